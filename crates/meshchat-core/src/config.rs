//! Core tuning knobs loaded from environment variables.
//!
//! Every setting has a default matching the mesh app's behaviour, so the
//! core can start with zero configuration. Durations are read in
//! milliseconds from `MESHCHAT_*_MS` variables.

use std::str::FromStr;
use std::time::Duration;

use meshchat_shared::constants::MAX_CONTENT_BYTES;

/// Capacity and refill speed of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Max messages kept in the mesh-wide timeline.
    /// Env: `MESHCHAT_MESH_TIMELINE_CAP`
    pub mesh_timeline_cap: usize,

    /// Max messages kept per geohash channel.
    /// Env: `MESHCHAT_GEOHASH_TIMELINE_CAP`
    pub geohash_timeline_cap: usize,

    /// Identical normalized content within this window is a near-duplicate.
    /// Env: `MESHCHAT_NEAR_DUPLICATE_WINDOW_MS`
    pub near_duplicate_window: Duration,

    /// Entries in the content-fingerprint LRU.
    /// Env: `MESHCHAT_CONTENT_LRU_SIZE`
    pub content_lru_size: usize,

    /// Public batch flush interval: starting point, floor and ceiling.
    /// Env: `MESHCHAT_BATCH_BASE_MS`, `MESHCHAT_BATCH_MIN_MS`, `MESHCHAT_BATCH_MAX_MS`
    pub batch_base_interval: Duration,
    pub batch_min_interval: Duration,
    pub batch_max_interval: Duration,

    /// Messages older than the timeline tail by more than this are inserted
    /// in sorted position instead of appended.
    /// Env: `MESHCHAT_LATE_INSERT_THRESHOLD_MS`
    pub late_insert_threshold: Duration,

    /// Env: `MESHCHAT_SENDER_BUCKET_CAPACITY`, `MESHCHAT_SENDER_BUCKET_REFILL`
    pub sender_bucket: BucketConfig,

    /// Env: `MESHCHAT_CONTENT_BUCKET_CAPACITY`, `MESHCHAT_CONTENT_BUCKET_REFILL`
    pub content_bucket: BucketConfig,

    /// Env: `MESHCHAT_MAX_CONTENT_BYTES`
    pub max_content_bytes: usize,

    /// Direct messages older than this stay behind when an address rotates.
    /// Env: `MESHCHAT_MIGRATION_RETENTION_MS`
    pub migration_retention: Duration,

    /// Stored direct messages older than this are deleted.
    /// Env: `MESHCHAT_MESSAGE_RETENTION_MS`
    pub message_retention: Duration,

    /// Pending verifications are dropped after this long.
    /// Env: `MESHCHAT_VERIFICATION_TIMEOUT_MS`
    pub verification_timeout: Duration,

    /// How far back an inbound challenge counts toward mutual verification.
    /// Env: `MESHCHAT_MUTUAL_WINDOW_MS`
    pub mutual_window: Duration,

    /// At most one mutual-verification notice per peer per this interval.
    /// Env: `MESHCHAT_MUTUAL_THROTTLE_MS`
    pub mutual_toast_throttle: Duration,

    /// No read-receipt pruning this soon after start.
    /// Env: `MESHCHAT_RECEIPT_PRUNE_GRACE_MS`
    pub receipt_prune_grace: Duration,

    /// Env: `MESHCHAT_OUTBOX_MAX_AGE_MS`
    pub outbox_max_age: Duration,

    /// Env: `MESHCHAT_OUTBOX_PER_PEER_CAP`
    pub outbox_per_peer_cap: usize,

    /// A peer seen on the mesh within this window still counts as reachable.
    /// Env: `MESHCHAT_RECENTLY_REACHABLE_MS`
    pub recently_reachable_window: Duration,

    /// Period of the engine's maintenance tick.
    /// Env: `MESHCHAT_MAINTENANCE_INTERVAL_MS`
    pub maintenance_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            mesh_timeline_cap: 1337,
            geohash_timeline_cap: 1000,
            near_duplicate_window: Duration::from_secs(1),
            content_lru_size: 2000,
            batch_base_interval: Duration::from_millis(80),
            batch_min_interval: Duration::from_millis(40),
            batch_max_interval: Duration::from_millis(320),
            late_insert_threshold: Duration::from_secs(15),
            sender_bucket: BucketConfig {
                capacity: 5.0,
                refill_per_sec: 1.0,
            },
            content_bucket: BucketConfig {
                capacity: 3.0,
                refill_per_sec: 0.5,
            },
            max_content_bytes: MAX_CONTENT_BYTES,
            migration_retention: Duration::from_secs(24 * 60 * 60),
            message_retention: Duration::from_secs(7 * 24 * 60 * 60),
            verification_timeout: Duration::from_secs(5 * 60),
            mutual_window: Duration::from_secs(10 * 60),
            mutual_toast_throttle: Duration::from_secs(60),
            receipt_prune_grace: Duration::from_secs(10),
            outbox_max_age: Duration::from_secs(24 * 60 * 60),
            outbox_per_peer_cap: 100,
            recently_reachable_window: Duration::from_secs(10),
            maintenance_interval: Duration::from_secs(1),
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        set_parsed(&lookup, "MESHCHAT_MESH_TIMELINE_CAP", &mut config.mesh_timeline_cap);
        set_parsed(
            &lookup,
            "MESHCHAT_GEOHASH_TIMELINE_CAP",
            &mut config.geohash_timeline_cap,
        );
        set_millis(
            &lookup,
            "MESHCHAT_NEAR_DUPLICATE_WINDOW_MS",
            &mut config.near_duplicate_window,
        );
        set_parsed(&lookup, "MESHCHAT_CONTENT_LRU_SIZE", &mut config.content_lru_size);
        set_millis(&lookup, "MESHCHAT_BATCH_BASE_MS", &mut config.batch_base_interval);
        set_millis(&lookup, "MESHCHAT_BATCH_MIN_MS", &mut config.batch_min_interval);
        set_millis(&lookup, "MESHCHAT_BATCH_MAX_MS", &mut config.batch_max_interval);
        set_millis(
            &lookup,
            "MESHCHAT_LATE_INSERT_THRESHOLD_MS",
            &mut config.late_insert_threshold,
        );
        set_parsed(
            &lookup,
            "MESHCHAT_SENDER_BUCKET_CAPACITY",
            &mut config.sender_bucket.capacity,
        );
        set_parsed(
            &lookup,
            "MESHCHAT_SENDER_BUCKET_REFILL",
            &mut config.sender_bucket.refill_per_sec,
        );
        set_parsed(
            &lookup,
            "MESHCHAT_CONTENT_BUCKET_CAPACITY",
            &mut config.content_bucket.capacity,
        );
        set_parsed(
            &lookup,
            "MESHCHAT_CONTENT_BUCKET_REFILL",
            &mut config.content_bucket.refill_per_sec,
        );
        set_parsed(&lookup, "MESHCHAT_MAX_CONTENT_BYTES", &mut config.max_content_bytes);
        set_millis(
            &lookup,
            "MESHCHAT_MIGRATION_RETENTION_MS",
            &mut config.migration_retention,
        );
        set_millis(
            &lookup,
            "MESHCHAT_MESSAGE_RETENTION_MS",
            &mut config.message_retention,
        );
        set_millis(
            &lookup,
            "MESHCHAT_VERIFICATION_TIMEOUT_MS",
            &mut config.verification_timeout,
        );
        set_millis(&lookup, "MESHCHAT_MUTUAL_WINDOW_MS", &mut config.mutual_window);
        set_millis(
            &lookup,
            "MESHCHAT_MUTUAL_THROTTLE_MS",
            &mut config.mutual_toast_throttle,
        );
        set_millis(
            &lookup,
            "MESHCHAT_RECEIPT_PRUNE_GRACE_MS",
            &mut config.receipt_prune_grace,
        );
        set_millis(&lookup, "MESHCHAT_OUTBOX_MAX_AGE_MS", &mut config.outbox_max_age);
        set_parsed(
            &lookup,
            "MESHCHAT_OUTBOX_PER_PEER_CAP",
            &mut config.outbox_per_peer_cap,
        );
        set_millis(
            &lookup,
            "MESHCHAT_RECENTLY_REACHABLE_MS",
            &mut config.recently_reachable_window,
        );
        set_millis(
            &lookup,
            "MESHCHAT_MAINTENANCE_INTERVAL_MS",
            &mut config.maintenance_interval,
        );

        if config.batch_min_interval > config.batch_max_interval {
            tracing::warn!("MESHCHAT_BATCH_MIN_MS exceeds MESHCHAT_BATCH_MAX_MS, using defaults");
            let defaults = Self::default();
            config.batch_min_interval = defaults.batch_min_interval;
            config.batch_max_interval = defaults.batch_max_interval;
        }
        config.batch_base_interval = config
            .batch_base_interval
            .clamp(config.batch_min_interval, config.batch_max_interval);

        config
    }
}

fn set_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

fn set_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration) {
    let mut millis = slot.as_millis() as u64;
    set_parsed(lookup, key, &mut millis);
    *slot = Duration::from_millis(millis);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.mesh_timeline_cap, 1337);
        assert_eq!(config.sender_bucket.capacity, 5.0);
        assert_eq!(config.content_bucket.refill_per_sec, 0.5);
        assert_eq!(config.outbox_per_peer_cap, 100);
    }

    #[test]
    fn test_env_overrides() {
        let config = CoreConfig::from_lookup(lookup_from(&[
            ("MESHCHAT_MESH_TIMELINE_CAP", "50"),
            ("MESHCHAT_NEAR_DUPLICATE_WINDOW_MS", "2500"),
            ("MESHCHAT_SENDER_BUCKET_REFILL", "0.25"),
            ("MESHCHAT_MESSAGE_RETENTION_MS", "60000"),
        ]));
        assert_eq!(config.message_retention, Duration::from_secs(60));
        assert_eq!(config.mesh_timeline_cap, 50);
        assert_eq!(config.near_duplicate_window, Duration::from_millis(2500));
        assert_eq!(config.sender_bucket.refill_per_sec, 0.25);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = CoreConfig::from_lookup(lookup_from(&[
            ("MESHCHAT_GEOHASH_TIMELINE_CAP", "lots"),
            ("MESHCHAT_BATCH_MIN_MS", "900"),
        ]));
        let defaults = CoreConfig::default();
        assert_eq!(config.geohash_timeline_cap, defaults.geohash_timeline_cap);
        assert_eq!(config.batch_min_interval, defaults.batch_min_interval);
        assert_eq!(config.batch_max_interval, defaults.batch_max_interval);
    }
}
