/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/meshchat/1.0.0";

/// Application name
pub const APP_NAME: &str = "meshchat";

/// Noise static (X25519) public key size in bytes
pub const NOISE_KEY_SIZE: usize = 32;

/// Ed25519 signing key size in bytes
pub const SIGNING_KEY_SIZE: usize = 32;

/// Verification challenge nonce size in bytes
pub const VERIFY_NONCE_SIZE: usize = 16;

/// Hex length of a condensed (short-form) mesh address: 8 bytes
pub const SHORT_ADDRESS_HEX_LEN: usize = 16;

/// Hex length of a full noise public key address: 32 bytes
pub const FULL_KEY_HEX_LEN: usize = 64;

/// Maximum message content size in bytes (16 KiB)
pub const MAX_CONTENT_BYTES: usize = 16 * 1024;

/// Maximum encoded wire packet size in bytes (64 KiB)
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

/// Verification QR codes older than this are refused (24 h)
pub const CREDENTIAL_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// Tolerated clock skew for QR codes issued "in the future"
pub const CREDENTIAL_MAX_SKEW_SECS: i64 = 5 * 60;

/// URI prefix carried by verification QR codes
pub const CREDENTIAL_URI_PREFIX: &str = "meshchat://verify/";

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Default QUIC listen port for the relay swarm
pub const DEFAULT_QUIC_PORT: u16 = 4101;

/// Topic prefix for per-recipient relay inboxes
pub const RELAY_INBOX_TOPIC_PREFIX: &str = "meshchat-inbox:";

/// Local system-message sender name
pub const SYSTEM_SENDER: &str = "system";
