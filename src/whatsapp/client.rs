//! Outbound replies through the Evolution API.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::WhatsAppIntegration;

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(
        &self,
        integration: &WhatsAppIntegration,
        to: &str,
        text: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct SendTextRequest<'a> {
    number: &'a str,
    text: &'a str,
}

/// Evolution API client: `POST {apiUrl}/message/sendText/{instance}`.
#[derive(Clone)]
pub struct EvolutionClient {
    http: reqwest::Client,
}

impl EvolutionClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }

    pub fn send_text_url(integration: &WhatsAppIntegration) -> String {
        format!(
            "{}/message/sendText/{}",
            integration.api_url.trim_end_matches('/'),
            integration.instance_name
        )
    }
}

#[async_trait]
impl MessageSender for EvolutionClient {
    async fn send_text(
        &self,
        integration: &WhatsAppIntegration,
        to: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(Self::send_text_url(integration))
            .header("apikey", &integration.api_key)
            .json(&SendTextRequest { number: to, text })
            .send()
            .await
            .context("Failed to send message to Evolution API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Evolution API error ({}): {}", status, body);
        }
        Ok(())
    }
}

/// Drops every message. Used when replies are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSender;

#[async_trait]
impl MessageSender for NoopSender {
    async fn send_text(&self, _: &WhatsAppIntegration, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub text: String,
}

/// Collects messages instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentMessage>>,
    fail: bool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose every delivery fails after being recorded.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_text(&self, _: &WhatsAppIntegration, to: &str, text: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage {
                to: to.to_string(),
                text: text.to_string(),
            });
        if self.fail {
            anyhow::bail!("delivery failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn integration(api_url: &str) -> WhatsAppIntegration {
        WhatsAppIntegration {
            api_url: api_url.into(),
            api_key: "key".into(),
            instance_name: "pontual".into(),
            phone_number: None,
            authorized_numbers: vec![],
            restrict_to_group: false,
            allowed_group_jid: None,
            webhook_url: None,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(
            EvolutionClient::send_text_url(&integration("http://evo.local/")),
            "http://evo.local/message/sendText/pontual"
        );
    }

    #[tokio::test]
    async fn recording_sender_keeps_messages() {
        let sender = RecordingSender::new();
        sender
            .send_text(&integration("http://x"), "5511", "olá")
            .await
            .unwrap();
        assert_eq!(
            sender.sent(),
            vec![SentMessage {
                to: "5511".into(),
                text: "olá".into()
            }]
        );
        assert!(RecordingSender::failing()
            .send_text(&integration("http://x"), "1", "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unreachable_api_is_an_error() {
        let client = EvolutionClient::new(Duration::from_millis(200)).unwrap();
        let result = client
            .send_text(&integration("http://127.0.0.1:9"), "5511", "oi")
            .await;
        assert!(result.is_err());
    }
}
