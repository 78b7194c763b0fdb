//! Evolution API webhook envelope.

use serde::Deserialize;

use super::gate::InboundMessage;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub event: String,
    pub instance: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageData {
    key: MessageKey,
    push_name: Option<String>,
    message: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageKey {
    remote_jid: String,
    #[serde(default)]
    from_me: bool,
    participant: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageContent {
    conversation: Option<String>,
    extended_text_message: Option<ExtendedText>,
}

#[derive(Debug, Deserialize)]
struct ExtendedText {
    text: Option<String>,
}

impl WebhookEnvelope {
    /// `messages.upsert` in either the dotted or the upper-snake spelling.
    pub fn is_message_upsert(&self) -> bool {
        self.event.to_lowercase().replace('_', ".") == "messages.upsert"
    }

    /// The inbound text message, if this envelope carries one.
    pub fn inbound_message(&self) -> Option<InboundMessage> {
        if !self.is_message_upsert() {
            return None;
        }
        let data: MessageData = serde_json::from_value(self.data.clone()?).ok()?;
        let content = data.message?;
        let text = content
            .conversation
            .or_else(|| content.extended_text_message.and_then(|e| e.text))?;
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(InboundMessage {
            remote_jid: data.key.remote_jid,
            from_me: data.key.from_me,
            participant: data.key.participant,
            push_name: data.push_name,
            text: text.to_string(),
        })
    }
}
