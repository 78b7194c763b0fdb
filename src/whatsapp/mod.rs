//! WhatsApp command bot: webhook intake, sender gate, dispatcher, replies.

pub mod client;
pub mod dispatcher;
pub mod gate;
pub mod parser;
pub mod webhook;

pub use client::{EvolutionClient, MessageSender, NoopSender, RecordingSender};
pub use gate::{BlockReason, GateDecision, InboundMessage};
pub use webhook::WebhookEnvelope;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::models::{NewWhatsAppLog, WhatsAppIntegration};
use crate::store::StoreHandle;

/// Command recorded for messages the gate dropped.
pub const BLOCKED_INCOMING: &str = "BLOCKED_INCOMING";

/// What happened to one webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// Not a text message event, or our own non-command message.
    Ignored,
    Blocked(BlockReason),
    /// Addressed to an instance other than the configured one.
    ForeignInstance,
    Replied { success: bool, delivered: bool },
}

enum Intake {
    ForeignInstance,
    Blocked(BlockReason),
    /// An outgoing message echoed back to us that is not a command, such as
    /// one of the bot's own replies.
    Echo,
    Dispatched {
        integration: WhatsAppIntegration,
        sender: String,
        reply: dispatcher::Reply,
    },
}

/// Gate, dispatch, reply and log one webhook envelope delivered for
/// `instance`. Never fails because of the remote party; only storage errors
/// propagate.
pub async fn handle_webhook(
    store: &StoreHandle,
    sender: &dyn MessageSender,
    instance: &str,
    envelope: &WebhookEnvelope,
    now: DateTime<Utc>,
) -> Result<WebhookOutcome> {
    let Some(message) = envelope.inbound_message() else {
        return Ok(WebhookOutcome::Ignored);
    };

    let msg = message.clone();
    let mut claimed = vec![instance.to_string()];
    claimed.extend(envelope.instance.clone());
    let intake = store
        .call(move |s| {
            let integration = s.get_whatsapp_integration()?;
            if let Some(configured) = &integration {
                if claimed.iter().any(|name| *name != configured.instance_name) {
                    return Ok(Intake::ForeignInstance);
                }
            }
            match gate::check(integration.as_ref(), &msg) {
                GateDecision::Block { sender, reason } => {
                    s.append_whatsapp_log(NewWhatsAppLog {
                        phone_number: sender,
                        message: msg.text.clone(),
                        command: Some(BLOCKED_INCOMING.to_string()),
                        response: None,
                        success: false,
                        error_message: Some(reason.to_string()),
                    })?;
                    Ok(Intake::Blocked(reason))
                }
                GateDecision::Accept { .. }
                    if msg.from_me && parser::parse_message(&msg.text).command.is_none() =>
                {
                    Ok(Intake::Echo)
                }
                GateDecision::Accept { sender } => {
                    let reply = dispatcher::dispatch(s, &msg.text, now);
                    // Accept implies an integration exists.
                    let integration = integration.ok_or_else(|| {
                        crate::errors::Error::Other(anyhow::anyhow!("integration vanished"))
                    })?;
                    Ok(Intake::Dispatched {
                        integration,
                        sender,
                        reply,
                    })
                }
            }
        })
        .await?;

    let (integration, from, reply) = match intake {
        Intake::ForeignInstance => {
            warn!(
                %instance,
                envelope_instance = ?envelope.instance,
                "Webhook for unknown instance"
            );
            return Ok(WebhookOutcome::ForeignInstance);
        }
        Intake::Blocked(reason) => {
            warn!(
                remote_jid = %message.remote_jid,
                reason = %reason,
                "Blocked incoming WhatsApp message"
            );
            return Ok(WebhookOutcome::Blocked(reason));
        }
        Intake::Echo => {
            debug!(remote_jid = %message.remote_jid, "Skipping own non-command message");
            return Ok(WebhookOutcome::Ignored);
        }
        Intake::Dispatched {
            integration,
            sender,
            reply,
        } => (integration, sender, reply),
    };

    let command = reply
        .command
        .map(|c| c.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!(sender = %from, command = %command, success = reply.success, "WhatsApp command handled");

    let delivery = sender
        .send_text(&integration, &message.reply_to(), &reply.text)
        .await;
    if let Err(e) = &delivery {
        warn!(error = %e, "Failed to deliver WhatsApp reply");
    }
    let delivered = delivery.is_ok();
    let success = reply.success && delivered;
    let error_message = delivery.err().map(|e| format!("send failed: {}", e));

    let log = NewWhatsAppLog {
        phone_number: from,
        message: message.text.clone(),
        command: Some(command),
        response: Some(reply.text),
        success,
        error_message,
    };
    store.call(move |s| s.append_whatsapp_log(log)).await?;

    Ok(WebhookOutcome::Replied {
        success: reply.success,
        delivered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WhatsAppIntegrationInput;
    use serde_json::json;

    fn envelope(from: &str, text: &str) -> WebhookEnvelope {
        message_envelope(from, text, false)
    }

    fn message_envelope(remote: &str, text: &str, from_me: bool) -> WebhookEnvelope {
        serde_json::from_value(json!({
            "event": "messages.upsert",
            "instance": "pontual",
            "data": {
                "key": {"remoteJid": format!("{}@s.whatsapp.net", remote), "fromMe": from_me},
                "message": {"conversation": text}
            }
        }))
        .unwrap()
    }

    async fn configured_store() -> StoreHandle {
        configured_store_allowing(&["5511988887777"]).await
    }

    async fn configured_store_allowing(numbers: &[&str]) -> StoreHandle {
        let authorized_numbers: Vec<String> = numbers.iter().map(|n| n.to_string()).collect();
        let store = StoreHandle::in_memory();
        store
            .call(move |s| {
                s.save_whatsapp_integration(WhatsAppIntegrationInput {
                    api_url: "http://evolution.local".into(),
                    api_key: "k".into(),
                    instance_name: "pontual".into(),
                    phone_number: Some("5511999990000".into()),
                    authorized_numbers,
                    restrict_to_group: false,
                    allowed_group_jid: None,
                    webhook_url: None,
                    is_active: true,
                })
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn blocked_sender_gets_no_reply_and_is_logged() {
        let store = configured_store().await;
        let sender = RecordingSender::new();
        let outcome = handle_webhook(
            &store,
            &sender,
            "pontual",
            &envelope("5511911112222", "tarefas"),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WebhookOutcome::Blocked(BlockReason::NotAuthorized));
        assert!(sender.sent().is_empty());

        let logs = store.call(|s| s.list_whatsapp_logs(10)).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].command.as_deref(), Some(BLOCKED_INCOMING));
        assert_eq!(logs[0].phone_number, "5511911112222");
        assert!(!logs[0].success);
    }

    #[tokio::test]
    async fn allowed_sender_gets_reply() {
        let store = configured_store().await;
        let sender = RecordingSender::new();
        let outcome = handle_webhook(
            &store,
            &sender,
            "pontual",
            &envelope("5511988887777", "criar Demo"),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Replied {
                success: true,
                delivered: true
            }
        );
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "5511988887777");
        assert!(sent[0].text.contains("Tarefa criada"));

        let logs = store.call(|s| s.list_whatsapp_logs(10)).await.unwrap();
        assert_eq!(logs[0].command.as_deref(), Some("create"));
        assert!(logs[0].success);
    }

    #[tokio::test]
    async fn delivery_failure_is_logged_not_raised() {
        let store = configured_store().await;
        let sender = RecordingSender::failing();
        let outcome = handle_webhook(
            &store,
            &sender,
            "pontual",
            &envelope("5511988887777", "status"),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Replied {
                success: true,
                delivered: false
            }
        );
        let logs = store.call(|s| s.list_whatsapp_logs(1)).await.unwrap();
        assert!(!logs[0].success);
        assert!(logs[0]
            .error_message
            .as_deref()
            .is_some_and(|e| e.contains("send failed")));
    }

    #[tokio::test]
    async fn non_message_events_are_ignored() {
        let store = configured_store().await;
        let env: WebhookEnvelope =
            serde_json::from_value(json!({"event": "connection.update"})).unwrap();
        let outcome = handle_webhook(&store, &NoopSender, "pontual", &env, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        let logs = store.call(|s| s.list_whatsapp_logs(10)).await.unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn own_replies_echoed_back_are_not_answered() {
        let store = configured_store_allowing(&["5511988887777", "5511999990000"]).await;
        let sender = RecordingSender::new();

        // The owner types a command on the bot's phone: it is handled.
        let outcome = handle_webhook(
            &store,
            &sender,
            "pontual",
            &message_envelope("5511988887777", "criar Eco", true),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Replied { .. }));
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);

        // The gateway then delivers the reply itself as an outgoing message.
        let echo = message_envelope(&sent[0].to, &sent[0].text, true);
        let outcome = handle_webhook(&store, &sender, "pontual", &echo, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        assert_eq!(sender.sent().len(), 1);

        let help = message_envelope("5511988887777", dispatcher::HELP_TEXT, true);
        let outcome = handle_webhook(&store, &sender, "pontual", &help, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        assert_eq!(sender.sent().len(), 1);

        let logs = store.call(|s| s.list_whatsapp_logs(10)).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn unknown_text_from_others_still_gets_help() {
        let store = configured_store().await;
        let sender = RecordingSender::new();
        let outcome = handle_webhook(
            &store,
            &sender,
            "pontual",
            &envelope("5511988887777", "oi"),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Replied {
                success: false,
                delivered: true
            }
        );
        assert!(sender.sent()[0].text.contains("não reconhecido"));
    }

    #[tokio::test]
    async fn other_instances_are_not_dispatched() {
        let store = configured_store().await;
        let sender = RecordingSender::new();
        let env = envelope("5511988887777", "criar Intrusa");
        let outcome = handle_webhook(&store, &sender, "outra", &env, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::ForeignInstance);

        let mut mislabeled = env.clone();
        mislabeled.instance = Some("outra".into());
        let outcome = handle_webhook(&store, &sender, "pontual", &mislabeled, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::ForeignInstance);

        assert!(sender.sent().is_empty());
        let tasks = store.call(|s| s.list_tasks()).await.unwrap();
        assert!(tasks.is_empty());
    }
}
