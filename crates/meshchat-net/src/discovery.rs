//! Bootstrap peers for the relay network.

use libp2p::Multiaddr;
use tracing::{debug, info, warn};

/// Parse a comma- or whitespace-separated list of multiaddrs, as found in
/// `MESHCHAT_BOOTSTRAP`. Malformed entries are logged and skipped.
pub fn parse_bootstrap_list(raw: &str) -> Vec<Multiaddr> {
    let addrs: Vec<Multiaddr> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<Multiaddr>() {
            Ok(addr) => {
                debug!(addr = %addr, "Loaded bootstrap peer");
                Some(addr)
            }
            Err(e) => {
                warn!(entry = %entry, error = %e, "Skipping invalid multiaddr");
                None
            }
        })
        .collect();

    if !addrs.is_empty() {
        info!(count = addrs.len(), "Loaded bootstrap peers");
    }
    addrs
}
