use serde::{Deserialize, Serialize};

use crate::constants::{MAX_PACKET_SIZE, VERIFY_NONCE_SIZE};
use crate::error::MeshChatError;
use crate::types::MessageId;

/// Packets the core exchanges with a single peer, over mesh or relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WireMessage {
    /// Direct chat message
    PrivateMessage(PrivateMessage),

    /// Recipient confirms it stored a direct message
    DeliveryAck(DeliveryAck),

    /// Recipient opened the conversation containing a message
    ReadReceipt(ReadReceipt),

    /// Out-of-band verification, initiator side
    VerifyChallenge(VerifyChallenge),

    /// Out-of-band verification, responder side
    VerifyResponse(VerifyResponse),

    /// Favorite toggle, carries our relay key so they can reach us later
    FavoriteNotification(FavoriteNotification),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrivateMessage {
    pub id: MessageId,
    pub content: String,
    pub sender_nickname: String,
    /// Unix epoch millis as stamped by the sender
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryAck {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub reader_id: String,
    pub reader_nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyChallenge {
    /// Noise key the initiator scanned, i.e. the responder's own key
    pub pubkey_hex: String,
    pub nonce_a: [u8; VERIFY_NONCE_SIZE],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyResponse {
    pub pubkey_hex: String,
    pub nonce_a: [u8; VERIFY_NONCE_SIZE],
    /// Ed25519 signature over `pubkey_hex || nonce_a`
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FavoriteNotification {
    pub is_favorite: bool,
    pub relay_public_key: Option<String>,
}

/// Bytes signed by a verification responder.
pub fn verification_payload(pubkey_hex: &str, nonce_a: &[u8; VERIFY_NONCE_SIZE]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(pubkey_hex.len() + VERIFY_NONCE_SIZE);
    payload.extend_from_slice(pubkey_hex.as_bytes());
    payload.extend_from_slice(nonce_a);
    payload
}

impl WireMessage {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, MeshChatError> {
        bincode::serialize(self).map_err(|e| MeshChatError::Serialization(e.to_string()))
    }

    /// Deserialize from binary, refusing anything over the packet cap
    pub fn from_bytes(data: &[u8]) -> Result<Self, MeshChatError> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(MeshChatError::OversizedMessage {
                size: data.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        bincode::deserialize(data).map_err(|e| MeshChatError::MalformedPacket(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::PrivateMessage(_) => "private-message",
            WireMessage::DeliveryAck(_) => "delivery-ack",
            WireMessage::ReadReceipt(_) => "read-receipt",
            WireMessage::VerifyChallenge(_) => "verify-challenge",
            WireMessage::VerifyResponse(_) => "verify-response",
            WireMessage::FavoriteNotification(_) => "favorite-notification",
        }
    }
}
