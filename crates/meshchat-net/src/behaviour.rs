//! Composed libp2p `NetworkBehaviour` for the relay network.
//!
//! GossipSub carries the inbox topics; Identify advertises the protocol
//! version so mismatched nodes are easy to spot in logs.

use libp2p::{gossipsub, identify, swarm::NetworkBehaviour};

/// Built by [`super::transport::build_swarm`].
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "MeshchatEvent")]
pub struct MeshchatBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
}

#[derive(Debug)]
pub enum MeshchatEvent {
    Gossipsub(gossipsub::Event),
    Identify(identify::Event),
}

impl From<gossipsub::Event> for MeshchatEvent {
    fn from(event: gossipsub::Event) -> Self {
        MeshchatEvent::Gossipsub(event)
    }
}

impl From<identify::Event> for MeshchatEvent {
    fn from(event: identify::Event) -> Self {
        MeshchatEvent::Identify(event)
    }
}
