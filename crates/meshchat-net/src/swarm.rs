//! Relay swarm orchestration with the tokio mpsc command/notification pattern.
//!
//! The swarm event loop runs in its own task; the rest of the node talks to
//! it only through [`SwarmCommand`] and [`SwarmNotification`].

use futures::StreamExt;
use libp2p::{gossipsub, identify, swarm::SwarmEvent, Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use meshchat_shared::constants::DEFAULT_QUIC_PORT;

use crate::behaviour::MeshchatEvent;
use crate::peers::PeerTracker;
use crate::transport::build_swarm;

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    Dial(Multiaddr),
    Publish { topic: String, data: Vec<u8> },
    Subscribe(String),
    GetPeers(oneshot::Sender<Vec<PeerId>>),
    Shutdown,
}

/// Notifications sent *from* the swarm task.
#[derive(Debug, Clone)]
pub enum SwarmNotification {
    PeerConnected { peer_id: PeerId, address: Multiaddr },
    PeerDisconnected { peer_id: PeerId },
    MessageReceived {
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub listen_port: u16,
    pub bootstrap: Vec<Multiaddr>,
    /// Topics to join before the loop starts, typically our own inbox.
    pub topics: Vec<String>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
            bootstrap: Vec::new(),
            topics: Vec::new(),
        }
    }
}

/// Spawn the relay swarm in a background task.
///
/// Returns `(command_tx, notification_rx, local_peer_id)`.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    let listen_v4: Multiaddr = format!("/ip4/0.0.0.0/udp/{}/quic-v1", config.listen_port).parse()?;
    let listen_v6: Multiaddr = format!("/ip6/::/udp/{}/quic-v1", config.listen_port).parse()?;
    swarm.listen_on(listen_v4)?;
    if let Err(e) = swarm.listen_on(listen_v6) {
        warn!(error = %e, "IPv6 listen failed, continuing on IPv4 only");
    }
    info!(peer_id = %local_peer_id, port = config.listen_port, "Relay swarm listening");

    for topic in &config.topics {
        if let Err(e) = swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&gossipsub::IdentTopic::new(topic))
        {
            error!(topic = %topic, error = %e, "Subscribe failed");
        }
    }

    for addr in &config.bootstrap {
        match swarm.dial(addr.clone()) {
            Ok(()) => debug!(addr = %addr, "Dialing bootstrap peer"),
            Err(e) => warn!(addr = %addr, error = %e, "Failed to dial bootstrap peer"),
        }
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SwarmNotification>(256);

    tokio::spawn(async move {
        let mut peer_tracker = PeerTracker::new();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Dial(addr)) => {
                            if let Err(e) = swarm.dial(addr.clone()) {
                                error!(addr = %addr, error = %e, "Dial failed");
                            }
                        }
                        Some(SwarmCommand::Publish { topic, data }) => {
                            let ident = gossipsub::IdentTopic::new(&topic);
                            if let Err(e) = swarm.behaviour_mut().gossipsub.publish(ident, data) {
                                warn!(topic = %topic, error = %e, "Publish failed");
                            }
                        }
                        Some(SwarmCommand::Subscribe(topic)) => {
                            let ident = gossipsub::IdentTopic::new(&topic);
                            if let Err(e) = swarm.behaviour_mut().gossipsub.subscribe(&ident) {
                                error!(topic = %topic, error = %e, "Subscribe failed");
                            }
                        }
                        Some(SwarmCommand::GetPeers(reply)) => {
                            let _ = reply.send(peer_tracker.connected_peers());
                        }
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }

                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(MeshchatEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            let topic = message.topic.to_string();
                            debug!(
                                topic = %topic,
                                source = ?message.source,
                                len = message.data.len(),
                                "GossipSub message received"
                            );
                            let _ = notif_tx
                                .send(SwarmNotification::MessageReceived {
                                    source: message.source,
                                    topic,
                                    data: message.data,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(MeshchatEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!(
                                peer = %peer_id,
                                protocol = %info.protocol_version,
                                "Identify: received info from peer"
                            );
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            let addr = endpoint.get_remote_address().clone();
                            peer_tracker.on_connected(peer_id, addr.clone());
                            info!(peer = %peer_id, addr = %addr, "Relay peer connected");
                            let _ = notif_tx
                                .send(SwarmNotification::PeerConnected { peer_id, address: addr })
                                .await;
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 {
                                peer_tracker.on_disconnected(&peer_id);
                                info!(peer = %peer_id, "Relay peer disconnected");
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerDisconnected { peer_id })
                                    .await;
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Listening on new address");
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            warn!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        info!("Swarm event loop terminated");
    });

    Ok((cmd_tx, notif_rx, local_peer_id))
}
