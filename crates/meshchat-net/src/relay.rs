//! The core's [`RelayTransport`] on top of the gossip swarm, plus the
//! bridge that turns swarm notifications into core network events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use libp2p::PeerId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use meshchat_core::contracts::{RelayTransport, TransportError};
use meshchat_core::{EngineHandle, NetworkEvent};
use meshchat_shared::{Fingerprint, WireMessage};

use crate::envelope::{inbox_topic, RelayEnvelope};
use crate::peers::PeerTracker;
use crate::swarm::{SwarmCommand, SwarmNotification};

/// Publishes direct traffic to the recipient's inbox topic.
pub struct GossipRelayTransport {
    cmd_tx: mpsc::Sender<SwarmCommand>,
    relay_key: String,
    noise_key_hex: String,
    nickname: String,
    connected: Arc<AtomicBool>,
}

impl GossipRelayTransport {
    pub fn new(
        cmd_tx: mpsc::Sender<SwarmCommand>,
        local_peer_id: PeerId,
        noise_key_hex: impl Into<String>,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            cmd_tx,
            relay_key: local_peer_id.to_string(),
            noise_key_hex: noise_key_hex.into(),
            nickname: nickname.into(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag the bridge flips as relay peers come and go.
    pub fn connectivity(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    pub fn inbox(&self) -> String {
        inbox_topic(&self.relay_key)
    }
}

impl RelayTransport for GossipRelayTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn local_key(&self) -> Option<String> {
        Some(self.relay_key.clone())
    }

    fn publish(
        &mut self,
        to: &Fingerprint,
        relay_key: &str,
        message: &WireMessage,
    ) -> Result<(), TransportError> {
        let data = RelayEnvelope::seal(&self.noise_key_hex, &self.nickname, message)
            .and_then(|envelope| envelope.to_bytes())
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.cmd_tx
            .try_send(SwarmCommand::Publish {
                topic: inbox_topic(relay_key),
                data,
            })
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        debug!(peer = %to.short(), kind = message.kind(), "Queued relay publish");
        Ok(())
    }
}

/// Swarm notifications to core events.
pub struct RelayBridge {
    inbox: String,
    own_noise_key: String,
    connected: Arc<AtomicBool>,
    peers: PeerTracker,
}

impl RelayBridge {
    pub fn new(transport: &GossipRelayTransport) -> Self {
        Self {
            inbox: transport.inbox(),
            own_noise_key: transport.noise_key_hex.clone(),
            connected: transport.connectivity(),
            peers: PeerTracker::new(),
        }
    }

    pub fn translate(&mut self, notification: SwarmNotification) -> Option<NetworkEvent> {
        match notification {
            SwarmNotification::PeerConnected { peer_id, address } => {
                if self.peers.on_connected(peer_id, address) {
                    self.connected.store(true, Ordering::Relaxed);
                    return Some(NetworkEvent::RelayConnected);
                }
                None
            }
            SwarmNotification::PeerDisconnected { peer_id } => {
                if self.peers.on_disconnected(&peer_id) {
                    self.connected.store(false, Ordering::Relaxed);
                    return Some(NetworkEvent::RelayDisconnected);
                }
                None
            }
            SwarmNotification::MessageReceived { topic, data, .. } => {
                if topic != self.inbox {
                    return None;
                }
                let envelope = match RelayEnvelope::from_bytes(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(error = %e, "Dropped malformed relay envelope");
                        return None;
                    }
                };
                if envelope.sender_key.eq_ignore_ascii_case(&self.own_noise_key) {
                    return None;
                }
                Some(NetworkEvent::RelayPacket {
                    from_key: envelope.sender_key,
                    nickname: envelope.nickname,
                    data: envelope.payload,
                })
            }
        }
    }
}

/// Forward swarm notifications into the engine until either side closes.
pub async fn run_relay_bridge(
    mut bridge: RelayBridge,
    mut notif_rx: mpsc::Receiver<SwarmNotification>,
    engine: EngineHandle,
) {
    info!(inbox = %bridge.inbox, "Relay bridge started");
    while let Some(notification) = notif_rx.recv().await {
        let Some(event) = bridge.translate(notification) else {
            continue;
        };
        if let Err(e) = engine.network(event).await {
            warn!(error = %e, "Engine gone, stopping relay bridge");
            break;
        }
    }
    info!("Relay bridge stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshchat_shared::protocol::DeliveryAck;
    use meshchat_shared::MessageId;

    fn peer(seed: u8) -> PeerId {
        libp2p::identity::Keypair::ed25519_from_bytes([seed; 32])
            .unwrap()
            .public()
            .to_peer_id()
    }

    fn transport() -> (GossipRelayTransport, mpsc::Receiver<SwarmCommand>) {
        let (tx, rx) = mpsc::channel(8);
        (GossipRelayTransport::new(tx, peer(1), "aa".repeat(32), "alice"), rx)
    }

    fn ack() -> WireMessage {
        WireMessage::DeliveryAck(DeliveryAck {
            message_id: MessageId::from("m1"),
        })
    }

    #[test]
    fn test_publish_targets_recipient_inbox() {
        let (mut relay, mut rx) = transport();
        let to = Fingerprint::from_noise_key(&[2u8; 32]);

        relay.publish(&to, "bob-key", &ack()).unwrap();

        match rx.try_recv().unwrap() {
            SwarmCommand::Publish { topic, data } => {
                assert_eq!(topic, "meshchat-inbox:bob-key");
                let envelope = RelayEnvelope::from_bytes(&data).unwrap();
                assert_eq!(envelope.sender_key, "aa".repeat(32));
                assert_eq!(envelope.nickname, "alice");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_connectivity_follows_peers() {
        let (relay, _rx) = transport();
        let mut bridge = RelayBridge::new(&relay);
        let addr: libp2p::Multiaddr = "/ip4/127.0.0.1/udp/4101/quic-v1".parse().unwrap();
        assert!(!relay.is_connected());

        let up = bridge.translate(SwarmNotification::PeerConnected {
            peer_id: peer(2),
            address: addr.clone(),
        });
        assert!(matches!(up, Some(NetworkEvent::RelayConnected)));
        assert!(relay.is_connected());

        assert!(bridge
            .translate(SwarmNotification::PeerConnected {
                peer_id: peer(3),
                address: addr,
            })
            .is_none());
        assert!(bridge
            .translate(SwarmNotification::PeerDisconnected { peer_id: peer(2) })
            .is_none());
        let down = bridge.translate(SwarmNotification::PeerDisconnected { peer_id: peer(3) });
        assert!(matches!(down, Some(NetworkEvent::RelayDisconnected)));
        assert!(!relay.is_connected());
    }

    #[test]
    fn test_inbox_messages_become_relay_packets() {
        let (relay, _rx) = transport();
        let mut bridge = RelayBridge::new(&relay);
        let envelope = RelayEnvelope::seal("bb".repeat(32), "bob", &ack()).unwrap();

        let event = bridge.translate(SwarmNotification::MessageReceived {
            source: None,
            topic: relay.inbox(),
            data: envelope.to_bytes().unwrap(),
        });
        match event {
            Some(NetworkEvent::RelayPacket { from_key, nickname, data }) => {
                assert_eq!(from_key, "bb".repeat(32));
                assert_eq!(nickname, "bob");
                assert_eq!(WireMessage::from_bytes(&data).unwrap(), ack());
            }
            other => panic!("unexpected event {other:?}"),
        }

        // other topics and our own echoes are ignored
        assert!(bridge
            .translate(SwarmNotification::MessageReceived {
                source: None,
                topic: "meshchat-inbox:someone-else".into(),
                data: envelope.to_bytes().unwrap(),
            })
            .is_none());
        let own = RelayEnvelope::seal("aa".repeat(32), "alice", &ack()).unwrap();
        assert!(bridge
            .translate(SwarmNotification::MessageReceived {
                source: None,
                topic: relay.inbox(),
                data: own.to_bytes().unwrap(),
            })
            .is_none());
    }
}
