//! Node configuration loaded from environment variables.
//!
//! Everything has a default so a bare `meshchat-node` starts a relay-only
//! node in the platform data directory.

use std::path::PathBuf;

use libp2p::Multiaddr;

use meshchat_shared::constants::DEFAULT_QUIC_PORT;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Env: `MESHCHAT_DATA_DIR`
    /// Default: platform data directory
    pub data_dir: Option<PathBuf>,

    /// Env: `MESHCHAT_NICKNAME`
    /// Default: `anon`
    pub nickname: String,

    /// Env: `MESHCHAT_PORT`
    /// Default: `4101`
    pub listen_port: u16,

    /// Env: `MESHCHAT_BOOTSTRAP` (comma separated multiaddrs)
    pub bootstrap: Vec<Multiaddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            nickname: "anon".to_string(),
            listen_port: DEFAULT_QUIC_PORT,
            bootstrap: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("MESHCHAT_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(nickname) = lookup("MESHCHAT_NICKNAME") {
            let nickname = nickname.trim();
            if nickname.is_empty() {
                tracing::warn!("Empty MESHCHAT_NICKNAME, using default");
            } else {
                config.nickname = nickname.to_string();
            }
        }

        if let Some(port) = lookup("MESHCHAT_PORT") {
            match port.trim().parse::<u16>() {
                Ok(parsed) => config.listen_port = parsed,
                Err(_) => tracing::warn!(value = %port, "Invalid MESHCHAT_PORT, using default"),
            }
        }

        if let Some(list) = lookup("MESHCHAT_BOOTSTRAP") {
            config.bootstrap = meshchat_net::parse_bootstrap_list(&list);
        }

        config
    }
}
