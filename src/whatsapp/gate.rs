//! Sender authorization for inbound WhatsApp messages.

use std::fmt;

use crate::models::WhatsAppIntegration;

/// An inbound text message, already extracted from the webhook envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Chat the message arrived in: a contact or a group JID.
    pub remote_jid: String,
    pub from_me: bool,
    /// Author inside a group chat.
    pub participant: Option<String>,
    pub push_name: Option<String>,
    pub text: String,
}

impl InboundMessage {
    pub fn is_group(&self) -> bool {
        self.remote_jid.ends_with("@g.us")
    }

    /// Digits of the author's number as reported by the envelope.
    pub fn author_digits(&self) -> String {
        let author = if self.is_group() {
            self.participant.as_deref().unwrap_or_default()
        } else {
            self.remote_jid.as_str()
        };
        digits(author)
    }

    /// Where a reply should go: the group JID, or the contact's number.
    pub fn reply_to(&self) -> String {
        if self.is_group() {
            self.remote_jid.clone()
        } else {
            digits(&self.remote_jid)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    NoIntegration,
    IntegrationInactive,
    EmptyAllowList,
    OwnNumber,
    GroupNotAllowed,
    NotAuthorized,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoIntegration => "no WhatsApp integration configured",
            Self::IntegrationInactive => "integration is inactive",
            Self::EmptyAllowList => "no authorized numbers configured",
            Self::OwnNumber => "message from the bot's own number",
            Self::GroupNotAllowed => "chat is not the allowed group",
            Self::NotAuthorized => "sender is not an authorized number",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Accepted; carries the sender's digits.
    Accept { sender: String },
    Block { sender: String, reason: BlockReason },
}

pub fn digits(s: &str) -> String {
    let number = s.split('@').next().unwrap_or_default();
    let number = number.split(':').next().unwrap_or_default();
    number.chars().filter(char::is_ascii_digit).collect()
}

/// Decide whether `msg` may reach the dispatcher.
pub fn check(integration: Option<&WhatsAppIntegration>, msg: &InboundMessage) -> GateDecision {
    let own_number = integration
        .and_then(|i| i.phone_number.as_deref())
        .map(digits)
        .filter(|d| !d.is_empty());
    // The envelope of an outgoing message names the recipient, not the author.
    let sender = if msg.from_me {
        own_number.clone().unwrap_or_default()
    } else {
        msg.author_digits()
    };
    let block = |reason| GateDecision::Block {
        sender: sender.clone(),
        reason,
    };

    let Some(integration) = integration else {
        return block(BlockReason::NoIntegration);
    };
    if !integration.is_active {
        return block(BlockReason::IntegrationInactive);
    }
    let allowed: Vec<String> = integration
        .authorized_numbers
        .iter()
        .map(|n| digits(n))
        .filter(|n| !n.is_empty())
        .collect();
    if allowed.is_empty() {
        return block(BlockReason::EmptyAllowList);
    }

    if integration.restrict_to_group {
        let in_group = integration
            .allowed_group_jid
            .as_deref()
            .is_some_and(|jid| msg.is_group() && msg.remote_jid == jid);
        if !in_group {
            return block(BlockReason::GroupNotAllowed);
        }
    } else if msg.is_group() {
        return block(BlockReason::GroupNotAllowed);
    }

    let listed = !sender.is_empty() && allowed.contains(&sender);
    let is_own = msg.from_me || own_number.as_deref() == Some(sender.as_str());
    if is_own && !listed {
        return block(BlockReason::OwnNumber);
    }
    if !listed {
        return block(BlockReason::NotAuthorized);
    }
    GateDecision::Accept { sender }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn integration(numbers: &[&str]) -> WhatsAppIntegration {
        WhatsAppIntegration {
            api_url: "http://evolution.local".into(),
            api_key: "key".into(),
            instance_name: "pontual".into(),
            phone_number: Some("+55 11 99999-0000".into()),
            authorized_numbers: numbers.iter().map(|n| n.to_string()).collect(),
            restrict_to_group: false,
            allowed_group_jid: None,
            webhook_url: None,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    fn direct(from: &str) -> InboundMessage {
        InboundMessage {
            remote_jid: format!("{}@s.whatsapp.net", from),
            from_me: false,
            participant: None,
            push_name: None,
            text: "status".into(),
        }
    }

    fn reason(decision: GateDecision) -> Option<BlockReason> {
        match decision {
            GateDecision::Block { reason, .. } => Some(reason),
            GateDecision::Accept { .. } => None,
        }
    }

    #[test]
    fn digits_ignores_formatting_and_device_suffix() {
        assert_eq!(digits("+55 (11) 98888-7777"), "5511988887777");
        assert_eq!(digits("5511988887777:12@s.whatsapp.net"), "5511988887777");
    }

    #[test]
    fn authorized_sender_is_accepted() {
        let i = integration(&["+55 11 98888-7777"]);
        assert_eq!(
            check(Some(&i), &direct("5511988887777")),
            GateDecision::Accept {
                sender: "5511988887777".into()
            }
        );
    }

    #[test]
    fn unknown_sender_is_blocked() {
        let i = integration(&["5511988887777"]);
        assert_eq!(
            reason(check(Some(&i), &direct("5511911112222"))),
            Some(BlockReason::NotAuthorized)
        );
    }

    #[test]
    fn missing_or_empty_configuration_blocks_everything() {
        assert_eq!(
            reason(check(None, &direct("5511988887777"))),
            Some(BlockReason::NoIntegration)
        );
        let empty = integration(&[]);
        assert_eq!(
            reason(check(Some(&empty), &direct("5511988887777"))),
            Some(BlockReason::EmptyAllowList)
        );
        let mut inactive = integration(&["5511988887777"]);
        inactive.is_active = false;
        assert_eq!(
            reason(check(Some(&inactive), &direct("5511988887777"))),
            Some(BlockReason::IntegrationInactive)
        );
    }

    #[test]
    fn own_number_is_dropped_unless_listed() {
        let i = integration(&["5511988887777"]);
        let mut own = direct("5511988887777");
        own.from_me = true;
        assert_eq!(reason(check(Some(&i), &own)), Some(BlockReason::OwnNumber));
        assert_eq!(
            reason(check(Some(&i), &direct("5511999990000"))),
            Some(BlockReason::OwnNumber)
        );

        let listed = integration(&["5511988887777", "5511999990000"]);
        assert_eq!(
            check(Some(&listed), &own),
            GateDecision::Accept {
                sender: "5511999990000".into()
            }
        );
    }

    #[test]
    fn group_restriction_uses_participant() {
        let mut i = integration(&["5511988887777"]);
        i.restrict_to_group = true;
        i.allowed_group_jid = Some("120363000000000000@g.us".into());

        let mut msg = InboundMessage {
            remote_jid: "120363000000000000@g.us".into(),
            from_me: false,
            participant: Some("5511988887777@s.whatsapp.net".into()),
            push_name: None,
            text: "status".into(),
        };
        assert!(matches!(check(Some(&i), &msg), GateDecision::Accept { .. }));
        assert_eq!(msg.reply_to(), "120363000000000000@g.us");

        msg.remote_jid = "999@g.us".into();
        assert_eq!(reason(check(Some(&i), &msg)), Some(BlockReason::GroupNotAllowed));
        assert_eq!(
            reason(check(Some(&i), &direct("5511988887777"))),
            Some(BlockReason::GroupNotAllowed)
        );
    }

    #[test]
    fn groups_are_ignored_without_restriction() {
        let i = integration(&["5511988887777"]);
        let msg = InboundMessage {
            remote_jid: "120363000000000000@g.us".into(),
            from_me: false,
            participant: Some("5511988887777@s.whatsapp.net".into()),
            push_name: None,
            text: "status".into(),
        };
        assert_eq!(reason(check(Some(&i), &msg)), Some(BlockReason::GroupNotAllowed));
    }
}
