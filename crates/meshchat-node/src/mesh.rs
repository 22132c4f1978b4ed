//! Stand-in mesh for a node without a radio: nobody is ever in range, so
//! every send falls through to the relay or the outbox.

use meshchat_core::contracts::{MeshTransport, SessionState, TransportError};
use meshchat_shared::{PeerAddress, WireMessage};

#[derive(Debug, Default)]
pub struct DetachedMesh;

impl MeshTransport for DetachedMesh {
    fn is_peer_connected(&self, _address: &PeerAddress) -> bool {
        false
    }

    fn is_peer_reachable(&self, _address: &PeerAddress) -> bool {
        false
    }

    fn session_state(&self, _address: &PeerAddress) -> SessionState {
        SessionState::None
    }

    fn trigger_handshake(&mut self, address: &PeerAddress) {
        tracing::debug!(address = %address, "No radio, handshake skipped");
    }

    fn send(&mut self, to: &PeerAddress, _message: &WireMessage) -> Result<(), TransportError> {
        Err(TransportError::NotConnected(to.to_string()))
    }

    fn peer_nickname(&self, _address: &PeerAddress) -> Option<String> {
        None
    }
}
