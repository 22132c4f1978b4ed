use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
use libp2p::identity::Keypair;
use libp2p::{identify, SwarmBuilder};
use tracing::info;

use meshchat_shared::constants::{GOSSIPSUB_HEARTBEAT_SECS, MAX_PACKET_SIZE, PROTOCOL_VERSION};

use crate::behaviour::MeshchatBehaviour;

/// Room for the envelope around a full-size packet.
const ENVELOPE_OVERHEAD: usize = 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// QUIC-only swarm with signed gossipsub.
pub fn build_swarm(keypair: Keypair) -> anyhow::Result<libp2p::Swarm<MeshchatBehaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| -> Result<MeshchatBehaviour, BoxError> {
            let message_id_fn = |message: &gossipsub::Message| {
                let mut hasher = DefaultHasher::new();
                message.data.hash(&mut hasher);
                if let Some(ref source) = message.source {
                    source.hash(&mut hasher);
                }
                MessageId::from(hasher.finish().to_string())
            };

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(MAX_PACKET_SIZE + ENVELOPE_OVERHEAD)
                .message_id_fn(message_id_fn)
                .build()
                .map_err(|e| -> BoxError { format!("GossipSub config: {e}").into() })?;

            let gossipsub = gossipsub::Behaviour::new(
                MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| -> BoxError { format!("GossipSub init: {e}").into() })?;

            let identify_config = identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                .with_push_listen_addr_updates(true)
                .with_interval(Duration::from_secs(60));

            Ok(MeshchatBehaviour {
                gossipsub,
                identify: identify::Behaviour::new(identify_config),
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    info!(peer_id = %swarm.local_peer_id(), "Built relay swarm with QUIC transport");

    Ok(swarm)
}
