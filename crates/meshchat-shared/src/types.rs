use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{FULL_KEY_HEX_LEN, NOISE_KEY_SIZE, SHORT_ADDRESS_HEX_LEN};
use crate::error::{IdentityError, MeshChatError};

// Stable peer identity = BLAKE3 of the long-term noise static public key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn from_noise_key(noise_public_key: &[u8; NOISE_KEY_SIZE]) -> Self {
        Self(*blake3::hash(noise_public_key).as_bytes())
    }

    pub fn from_noise_key_hex(hex_key: &str) -> Result<Self, IdentityError> {
        let key = decode_key_hex(hex_key)?;
        Ok(Self::from_noise_key(&key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        decode_key_hex(s).map(Self)
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Decode a 64-char hex string into a 32-byte key.
pub fn decode_key_hex(s: &str) -> Result<[u8; 32], IdentityError> {
    let bytes = hex::decode(s.trim()).map_err(|e| IdentityError::InvalidKeyHex(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(IdentityError::InvalidKeyHex(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Volatile mesh-layer address of a peer.
///
/// Two forms circulate: the condensed 8-byte id announced on the radio
/// (16 hex chars) and the full 32-byte noise key (64 hex chars) used when
/// a peer is addressed through the relay path. Both are routing handles
/// only; business state hangs off the [`Fingerprint`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_short(&self) -> bool {
        self.0.len() == SHORT_ADDRESS_HEX_LEN && is_hex(&self.0)
    }

    pub fn is_full_key(&self) -> bool {
        self.0.len() == FULL_KEY_HEX_LEN && is_hex(&self.0)
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

const GEOHASH_ALPHABET: &str = "0123456789bcdefghjkmnpqrstuvwxyz";
const MAX_GEOHASH_LEN: usize = 12;

/// A logical message stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// The single mesh-wide stream.
    Mesh,
    /// A location-scoped stream keyed by geohash.
    Geohash(String),
}

impl ChannelId {
    pub fn geohash(raw: &str) -> Result<Self, MeshChatError> {
        let hash = raw.trim().to_ascii_lowercase();
        if hash.is_empty()
            || hash.len() > MAX_GEOHASH_LEN
            || !hash.chars().all(|c| GEOHASH_ALPHABET.contains(c))
        {
            return Err(MeshChatError::MalformedPacket(format!(
                "invalid geohash '{raw}'"
            )));
        }
        Ok(Self::Geohash(hash))
    }

    pub fn is_mesh(&self) -> bool {
        matches!(self, ChannelId::Mesh)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelId::Mesh => f.write_str("mesh"),
            ChannelId::Geohash(hash) => write!(f, "geo:{hash}"),
        }
    }
}

/// Which path carried (or should carry) a packet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Mesh,
    Relay,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_per_key() {
        let key = [7u8; 32];
        assert_eq!(Fingerprint::from_noise_key(&key), Fingerprint::from_noise_key(&key));
        assert_ne!(
            Fingerprint::from_noise_key(&key),
            Fingerprint::from_noise_key(&[8u8; 32])
        );
    }

    #[test]
    fn test_fingerprint_hex_roundtrip() {
        let fp = Fingerprint::from_noise_key(&[1u8; 32]);
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
        assert_eq!(fp.short().len(), 8);
        assert!(Fingerprint::from_hex("abcd").is_err());
    }

    #[test]
    fn test_address_forms() {
        assert!(PeerAddress::new("0011223344556677").is_short());
        assert!(PeerAddress::new("ab".repeat(32)).is_full_key());
        assert!(!PeerAddress::new("alice").is_short());
        assert_eq!(PeerAddress::new("AABB").as_str(), "aabb");
    }

    #[test]
    fn test_geohash_validation() {
        assert_eq!(
            ChannelId::geohash("U4PRU").unwrap(),
            ChannelId::Geohash("u4pru".into())
        );
        assert!(ChannelId::geohash("").is_err());
        assert!(ChannelId::geohash("abc").is_err()); // 'a' is not in the alphabet
        assert!(ChannelId::geohash("0123456789bcd").is_err());
    }
}
