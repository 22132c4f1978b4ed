//! Narrow contracts for the collaborators the core consumes but does not
//! implement: the mesh radio with its secure-session primitive, the relay
//! fallback network and the favorites store.

use meshchat_shared::{Fingerprint, PeerAddress, WireMessage};
use meshchat_store::{Database, FavoriteRecord, StoreError};
use thiserror::Error;

/// Per-address state of the external secure-session primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Handshaking,
    Established,
    Failed,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Peer {0} is not connected")]
    NotConnected(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Send failed: {0}")]
    Send(String),
}

/// Short-range mesh with its session layer.
///
/// `send` hands an already-addressed packet to the session layer, which
/// encrypts it for `to`. Acks, receipts and verification packets all go
/// through the same call as different [`WireMessage`] variants.
pub trait MeshTransport: Send {
    fn is_peer_connected(&self, address: &PeerAddress) -> bool;

    /// Heard from recently, possibly through other hops.
    fn is_peer_reachable(&self, address: &PeerAddress) -> bool;

    fn session_state(&self, address: &PeerAddress) -> SessionState;

    fn trigger_handshake(&mut self, address: &PeerAddress);

    fn send(&mut self, to: &PeerAddress, message: &WireMessage) -> Result<(), TransportError>;

    fn peer_nickname(&self, address: &PeerAddress) -> Option<String>;
}

/// Store-and-forward relay network, addressed by fingerprint.
pub trait RelayTransport: Send {
    fn is_connected(&self) -> bool;

    /// Our own key on the relay network, advertised to favorites.
    fn local_key(&self) -> Option<String>;

    fn publish(
        &mut self,
        to: &Fingerprint,
        relay_key: &str,
        message: &WireMessage,
    ) -> Result<(), TransportError>;
}

/// Persisted favorites relationship keyed by fingerprint.
pub trait FavoritesStore: Send {
    fn favorite(&self, fingerprint: &Fingerprint) -> Option<FavoriteRecord>;

    fn save_favorite(&mut self, record: &FavoriteRecord) -> Result<(), StoreError>;

    fn favorites(&self) -> Vec<FavoriteRecord>;
}

impl FavoritesStore for Database {
    fn favorite(&self, fingerprint: &Fingerprint) -> Option<FavoriteRecord> {
        match self.get_favorite(fingerprint) {
            Ok(record) => Some(record),
            Err(StoreError::NotFound) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read favorite");
                None
            }
        }
    }

    fn save_favorite(&mut self, record: &FavoriteRecord) -> Result<(), StoreError> {
        self.upsert_favorite(record)
    }

    fn favorites(&self) -> Vec<FavoriteRecord> {
        self.list_favorites().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to list favorites");
            Vec::new()
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_database_backs_favorites_store() {
        let mut db = Database::open_in_memory().unwrap();
        let fp = Fingerprint::from_noise_key(&[6u8; 32]);
        assert!(FavoritesStore::favorite(&db, &fp).is_none());

        let mut record = FavoriteRecord::new(fp, "carol", Utc::now());
        record.is_favorite = true;
        db.save_favorite(&record).unwrap();

        assert!(FavoritesStore::favorite(&db, &fp).unwrap().is_favorite);
        assert_eq!(FavoritesStore::favorites(&db).len(), 1);
    }
}
