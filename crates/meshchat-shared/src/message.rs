use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::SYSTEM_SENDER;
use crate::types::{ChannelId, Fingerprint, MessageId, PeerAddress};

/// Who wrote a message, as far as we can tell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Sender {
    /// Resolved to a stable identity.
    Peer(Fingerprint),
    /// Only a display name is known (unauthenticated broadcast).
    Named(String),
    /// Locally generated notice.
    System,
}

/// Delivery state of an outgoing message.
///
/// `Failed` sits outside the ordering used for monotonic updates; see
/// [`DeliveryStatus::rank`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sending,
    Sent,
    PartiallyDelivered { reached: u32, total: u32 },
    Delivered { to: String, at: DateTime<Utc> },
    Read { by: String, at: DateTime<Utc> },
    Failed { reason: String },
}

impl DeliveryStatus {
    /// Position in sending < sent < partiallyDelivered < delivered < read.
    pub fn rank(&self) -> Option<u8> {
        match self {
            DeliveryStatus::Sending => Some(0),
            DeliveryStatus::Sent => Some(1),
            DeliveryStatus::PartiallyDelivered { .. } => Some(2),
            DeliveryStatus::Delivered { .. } => Some(3),
            DeliveryStatus::Read { .. } => Some(4),
            DeliveryStatus::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryStatus::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::PartiallyDelivered { .. } => "partially-delivered",
            DeliveryStatus::Delivered { .. } => "delivered",
            DeliveryStatus::Read { .. } => "read",
            DeliveryStatus::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub sender_nickname: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// `None` for direct messages.
    pub channel: Option<ChannelId>,
    pub is_private: bool,
    /// Mesh address the message arrived from, when it came over the radio.
    pub sender_address: Option<PeerAddress>,
    pub recipient_nickname: Option<String>,
    /// Who an outgoing direct message is for, once their identity is known.
    pub recipient: Option<Fingerprint>,
    pub mentions: Vec<String>,
    pub delivery_status: Option<DeliveryStatus>,
}

impl Message {
    /// A broadcast message on a public channel.
    pub fn public(
        id: MessageId,
        sender: Sender,
        sender_nickname: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        channel: ChannelId,
    ) -> Self {
        let content = content.into();
        Self {
            id,
            sender,
            sender_nickname: sender_nickname.into(),
            mentions: extract_mentions(&content),
            content,
            timestamp,
            channel: Some(channel),
            is_private: false,
            sender_address: None,
            recipient_nickname: None,
            recipient: None,
            delivery_status: None,
        }
    }

    /// A direct message we are about to send.
    pub fn outgoing_private(
        local: Fingerprint,
        local_nickname: impl Into<String>,
        recipient: Option<Fingerprint>,
        recipient_nickname: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let content = content.into();
        Self {
            id: MessageId::new(),
            sender: Sender::Peer(local),
            sender_nickname: local_nickname.into(),
            mentions: extract_mentions(&content),
            content,
            timestamp,
            channel: None,
            is_private: true,
            sender_address: None,
            recipient_nickname: Some(recipient_nickname.into()),
            recipient,
            delivery_status: Some(DeliveryStatus::Sending),
        }
    }

    /// A direct message received from a peer.
    pub fn incoming_private(
        id: MessageId,
        sender: Sender,
        sender_nickname: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        sender_address: Option<PeerAddress>,
    ) -> Self {
        let content = content.into();
        Self {
            id,
            sender,
            sender_nickname: sender_nickname.into(),
            mentions: extract_mentions(&content),
            content,
            timestamp,
            channel: None,
            is_private: true,
            sender_address,
            recipient_nickname: None,
            recipient: None,
            delivery_status: None,
        }
    }

    pub fn system(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::System,
            sender_nickname: SYSTEM_SENDER.to_string(),
            content: content.into(),
            timestamp,
            channel: None,
            is_private: false,
            sender_address: None,
            recipient_nickname: None,
            recipient: None,
            mentions: Vec::new(),
            delivery_status: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.sender == Sender::System
    }

    /// An outgoing direct message written by `local`.
    pub fn is_outgoing_from(&self, local: &Fingerprint) -> bool {
        self.is_private && self.sender == Sender::Peer(*local)
    }

    pub fn sender_fingerprint(&self) -> Option<Fingerprint> {
        match self.sender {
            Sender::Peer(fp) => Some(fp),
            _ => None,
        }
    }
}

/// Collect `@name` tokens (the `#abcd` disambiguation suffix is kept).
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    for token in content.split_whitespace() {
        let Some(name) = token.strip_prefix('@') else {
            continue;
        };
        let name: String = name
            .chars()
            .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '#'))
            .collect();
        if !name.is_empty() && !mentions.contains(&name) {
            mentions.push(name);
        }
    }
    mentions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order() {
        let now = Utc::now();
        let ladder = [
            DeliveryStatus::Sending,
            DeliveryStatus::Sent,
            DeliveryStatus::PartiallyDelivered { reached: 1, total: 3 },
            DeliveryStatus::Delivered { to: "bob".into(), at: now },
            DeliveryStatus::Read { by: "bob".into(), at: now },
        ];
        for pair in ladder.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        assert_eq!(DeliveryStatus::Failed { reason: "x".into() }.rank(), None);
    }

    #[test]
    fn test_mentions() {
        assert_eq!(
            extract_mentions("hi @alice and @bob#a1b2, @alice again"),
            vec!["alice".to_string(), "bob#a1b2".to_string()]
        );
        assert!(extract_mentions("mail me at a@b.c").is_empty());
    }

    #[test]
    fn test_outgoing_private_starts_sending() {
        let fp = Fingerprint::from_noise_key(&[3u8; 32]);
        let bob = Fingerprint::from_noise_key(&[4u8; 32]);
        let msg = Message::outgoing_private(fp, "me", Some(bob), "bob", "hey", Utc::now());
        assert!(msg.is_private);
        assert!(msg.is_outgoing_from(&fp));
        assert!(!msg.is_outgoing_from(&bob));
        assert_eq!(msg.recipient, Some(bob));
        assert_eq!(msg.delivery_status, Some(DeliveryStatus::Sending));
        assert_eq!(msg.sender_fingerprint(), Some(fp));
    }
}
