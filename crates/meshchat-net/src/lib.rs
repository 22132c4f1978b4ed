// Relay fallback transport: gossipsub over QUIC, one inbox topic per node.

pub mod behaviour;
pub mod discovery;
pub mod envelope;
pub mod keys;
pub mod peers;
pub mod relay;
pub mod swarm;
pub mod transport;

pub use behaviour::{MeshchatBehaviour, MeshchatEvent};
pub use discovery::parse_bootstrap_list;
pub use envelope::{inbox_topic, RelayEnvelope};
pub use keys::relay_keypair;
pub use peers::PeerTracker;
pub use relay::{run_relay_bridge, GossipRelayTransport, RelayBridge};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};
pub use transport::build_swarm;
