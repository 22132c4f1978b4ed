use thiserror::Error;

use crate::credential::CredentialError;

#[derive(Error, Debug)]
pub enum MeshChatError {
    #[error("No established session with peer {0}")]
    SessionNotEstablished(String),

    #[error("Peer {0} is not reachable via mesh or relay")]
    PeerUnreachable(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Verification nonce mismatch")]
    NonceMismatch,

    #[error("Verification key mismatch")]
    KeyMismatch,

    #[error("Duplicate message")]
    DuplicateMessage,

    #[error("Rate limited")]
    RateLimited,

    #[error("Message too large: {size} bytes (max {max})")]
    OversizedMessage { size: usize, max: usize },

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MeshChatError {
    /// Conditions that are dropped without any user-visible signal.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            MeshChatError::SignatureInvalid
                | MeshChatError::NonceMismatch
                | MeshChatError::KeyMismatch
                | MeshChatError::DuplicateMessage
                | MeshChatError::RateLimited
                | MeshChatError::OversizedMessage { .. }
                | MeshChatError::MalformedPacket(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid key hex: {0}")]
    InvalidKeyHex(String),

    #[error("Key file error: {0}")]
    KeyFile(String),
}
