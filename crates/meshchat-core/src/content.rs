//! Content fingerprints for near-duplicate detection and per-content rate
//! limiting.
//!
//! Two long messages sharing the first [`FINGERPRINT_PREFIX_CHARS`]
//! normalized characters collide. That is accepted.

/// Normalized characters that feed the hash.
pub const FINGERPRINT_PREFIX_CHARS: usize = 256;

/// Hex chars kept from the hash.
pub const FINGERPRINT_HEX_LEN: usize = 32;

/// Lowercase, cut URLs at `?`/`#`, collapse whitespace, bound the length.
pub fn normalize(content: &str) -> String {
    let mut out = String::with_capacity(content.len().min(FINGERPRINT_PREFIX_CHARS * 4));
    for token in content.split_whitespace() {
        let token = token.to_lowercase();
        let token = if token.contains("://") {
            match token.find(|c: char| c == '?' || c == '#') {
                Some(cut) => token[..cut].to_string(),
                None => token,
            }
        } else {
            token
        };
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&token);
    }
    out.chars().take(FINGERPRINT_PREFIX_CHARS).collect()
}

pub fn content_fingerprint(content: &str) -> String {
    let normalized = normalize(content);
    let hash = blake3::hash(normalized.as_bytes()).to_hex();
    hash.as_str()[..FINGERPRINT_HEX_LEN].to_string()
}
