//! Relay network identity, derived from the chat identity so it survives
//! restarts without a second key file.

use libp2p::identity::Keypair;
use meshchat_shared::identity::Identity;

const RELAY_KEY_CONTEXT: &str = "meshchat relay keypair v1";

pub fn relay_keypair(identity: &Identity) -> anyhow::Result<Keypair> {
    let seed = blake3::derive_key(RELAY_KEY_CONTEXT, &identity.to_export().signing_secret);
    Ok(Keypair::ed25519_from_bytes(seed)?)
}
