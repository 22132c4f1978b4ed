//! Connected relay-network peers.
//!
//! The relay counts as connected while at least one peer is.

use std::collections::HashMap;
use std::time::Instant;

use libp2p::{Multiaddr, PeerId};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub address: Multiaddr,
    pub connected_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    peers: HashMap<PeerId, ConnectionInfo>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this was the first connected peer.
    pub fn on_connected(&mut self, peer_id: PeerId, address: Multiaddr) -> bool {
        let was_empty = self.peers.is_empty();
        debug!(peer = %peer_id, addr = %address, "Tracking relay peer");
        self.peers.insert(
            peer_id,
            ConnectionInfo {
                address,
                connected_at: Instant::now(),
            },
        );
        was_empty
    }

    /// Returns `true` if the last peer just went away.
    pub fn on_disconnected(&mut self, peer_id: &PeerId) -> bool {
        self.peers.remove(peer_id).is_some() && self.peers.is_empty()
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&ConnectionInfo> {
        self.peers.get(peer_id)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(seed: u8) -> PeerId {
        libp2p::identity::Keypair::ed25519_from_bytes([seed; 32])
            .unwrap()
            .public()
            .to_peer_id()
    }

    fn test_addr() -> Multiaddr {
        "/ip4/127.0.0.1/udp/4101/quic-v1".parse().unwrap()
    }

    #[test]
    fn test_first_and_last_peer_edges() {
        let mut tracker = PeerTracker::new();
        let p1 = peer(1);
        let p2 = peer(2);

        assert!(tracker.on_connected(p1, test_addr()));
        assert!(!tracker.on_connected(p2, test_addr()));
        assert_eq!(tracker.peer_count(), 2);

        assert!(!tracker.on_disconnected(&p1));
        assert!(tracker.on_disconnected(&p2));
        assert!(!tracker.on_disconnected(&p2));
        assert!(tracker.connected_peers().is_empty());
    }

    #[test]
    fn test_reconnect_keeps_single_entry() {
        let mut tracker = PeerTracker::new();
        let peer = peer(3);
        tracker.on_connected(peer, test_addr());
        tracker.on_connected(peer, "/ip4/10.0.0.1/udp/4101/quic-v1".parse().unwrap());
        assert_eq!(tracker.peer_count(), 1);
        assert_eq!(tracker.get(&peer).unwrap().address.to_string(), "/ip4/10.0.0.1/udp/4101/quic-v1");
    }
}
