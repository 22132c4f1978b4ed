//! What travels on an inbox topic: one wire message plus enough about the
//! sender for the receiver to resolve them.

use serde::{Deserialize, Serialize};

use meshchat_shared::constants::{MAX_PACKET_SIZE, RELAY_INBOX_TOPIC_PREFIX};
use meshchat_shared::{MeshChatError, WireMessage};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayEnvelope {
    /// Sender's noise public key, hex.
    pub sender_key: String,
    pub nickname: String,
    /// Encoded [`WireMessage`].
    pub payload: Vec<u8>,
}

impl RelayEnvelope {
    pub fn seal(
        sender_key: impl Into<String>,
        nickname: impl Into<String>,
        message: &WireMessage,
    ) -> Result<Self, MeshChatError> {
        Ok(Self {
            sender_key: sender_key.into(),
            nickname: nickname.into(),
            payload: message.to_bytes()?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MeshChatError> {
        bincode::serialize(self).map_err(|e| MeshChatError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MeshChatError> {
        if data.len() > MAX_PACKET_SIZE * 2 {
            return Err(MeshChatError::OversizedMessage {
                size: data.len(),
                max: MAX_PACKET_SIZE * 2,
            });
        }
        bincode::deserialize(data).map_err(|e| MeshChatError::MalformedPacket(e.to_string()))
    }
}

/// Gossipsub topic a node listens on for relayed direct traffic.
pub fn inbox_topic(relay_key: &str) -> String {
    format!("{RELAY_INBOX_TOPIC_PREFIX}{relay_key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshchat_shared::protocol::DeliveryAck;
    use meshchat_shared::MessageId;

    #[test]
    fn test_envelope_carries_wire_message() {
        let ack = WireMessage::DeliveryAck(DeliveryAck {
            message_id: MessageId::from("m1"),
        });
        let envelope = RelayEnvelope::seal("ab".repeat(32), "alice", &ack).unwrap();

        let decoded = RelayEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.nickname, "alice");
        assert_eq!(WireMessage::from_bytes(&decoded.payload).unwrap(), ack);
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            RelayEnvelope::from_bytes(&[1, 2, 3]),
            Err(MeshChatError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_inbox_topic() {
        assert_eq!(inbox_topic("12D3Koo"), "meshchat-inbox:12D3Koo");
    }
}
