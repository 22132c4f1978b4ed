//! Rows persisted in the local database.

use chrono::{DateTime, Utc};
use meshchat_shared::{Fingerprint, MessageId};
use serde::{Deserialize, Serialize};

/// Favorites relationship with one peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FavoriteRecord {
    pub fingerprint: Fingerprint,
    /// Last nickname we saw for the peer.
    pub nickname: String,
    /// We marked them as favorite.
    pub is_favorite: bool,
    /// They told us they marked us as favorite.
    pub they_favorited_us: bool,
    /// Their relay-network key, needed for the fallback path.
    pub relay_public_key: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl FavoriteRecord {
    pub fn new(fingerprint: Fingerprint, nickname: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            nickname: nickname.into(),
            is_favorite: false,
            they_favorited_us: false,
            relay_public_key: None,
            updated_at: now,
        }
    }

    pub fn is_mutual(&self) -> bool {
        self.is_favorite && self.they_favorited_us
    }
}

/// A direct message waiting for a usable transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxEntry {
    pub message_id: MessageId,
    pub peer: Fingerprint,
    pub recipient_nickname: String,
    pub content: String,
    pub queued_at: DateTime<Utc>,
}
