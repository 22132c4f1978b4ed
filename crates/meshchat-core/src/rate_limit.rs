use std::collections::HashMap;
use std::time::{Duration, Instant};

use meshchat_shared::{Fingerprint, MeshChatError, PeerAddress};

use crate::config::{BucketConfig, CoreConfig};

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            capacity: config.capacity,
            tokens: config.capacity,
            refill_per_sec: config.refill_per_sec,
            last_refill: now,
        }
    }

    fn refilled(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.refill_per_sec).min(self.capacity)
    }

    /// Would `allow_at` succeed? Never mutates.
    pub fn peek(&self, cost: f64, now: Instant) -> bool {
        self.refilled(now) >= cost
    }

    /// Deduct `cost` if available. A refusal leaves the bucket untouched.
    pub fn allow_at(&mut self, cost: f64, now: Instant) -> bool {
        let tokens = self.refilled(now);
        if tokens < cost {
            return false;
        }
        self.tokens = tokens - cost;
        self.last_refill = now;
        true
    }

    pub fn tokens_at(&self, now: Instant) -> f64 {
        self.refilled(now)
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }
}

/// Spam gate for inbound broadcast traffic: one bucket per sender, one per
/// content fingerprint, plus an absolute size cap.
#[derive(Debug)]
pub struct RateLimiter {
    senders: HashMap<String, TokenBucket>,
    contents: HashMap<String, TokenBucket>,
    sender_config: BucketConfig,
    content_config: BucketConfig,
    max_content_bytes: usize,
}

impl RateLimiter {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            senders: HashMap::new(),
            contents: HashMap::new(),
            sender_config: config.sender_bucket,
            content_config: config.content_bucket,
            max_content_bytes: config.max_content_bytes,
        }
    }

    /// Admit one message. Both buckets must have a token; if either refuses,
    /// neither is charged.
    pub fn admit(
        &mut self,
        sender_key: &str,
        content_key: &str,
        content_len: usize,
        now: Instant,
    ) -> Result<(), MeshChatError> {
        if content_len > self.max_content_bytes {
            return Err(MeshChatError::OversizedMessage {
                size: content_len,
                max: self.max_content_bytes,
            });
        }

        let sender_config = self.sender_config;
        let content_config = self.content_config;
        let sender = self
            .senders
            .entry(sender_key.to_string())
            .or_insert_with(|| TokenBucket::new(sender_config, now));
        if !sender.peek(1.0, now) {
            return Err(MeshChatError::RateLimited);
        }
        let content = self
            .contents
            .entry(content_key.to_string())
            .or_insert_with(|| TokenBucket::new(content_config, now));
        if !content.allow_at(1.0, now) {
            return Err(MeshChatError::RateLimited);
        }

        if let Some(sender) = self.senders.get_mut(sender_key) {
            sender.allow_at(1.0, now);
        }
        Ok(())
    }

    /// Forget buckets untouched for `max_idle`.
    pub fn purge_stale(&mut self, max_idle: Duration, now: Instant) -> usize {
        let before = self.senders.len() + self.contents.len();
        self.senders.retain(|_, bucket| bucket.idle_for(now) < max_idle);
        self.contents.retain(|_, bucket| bucket.idle_for(now) < max_idle);
        before - self.senders.len() - self.contents.len()
    }

    pub fn tracked_buckets(&self) -> usize {
        self.senders.len() + self.contents.len()
    }
}

/// Normalized sender identity: fingerprint, else mesh address, else nickname.
pub fn sender_key(
    fingerprint: Option<&Fingerprint>,
    address: Option<&PeerAddress>,
    nickname: &str,
) -> String {
    if let Some(fp) = fingerprint {
        return format!("fp:{}", fp.to_hex());
    }
    if let Some(address) = address {
        return format!("addr:{address}");
    }
    format!("nick:{}", nickname.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(capacity: f64, refill: f64, now: Instant) -> TokenBucket {
        TokenBucket::new(
            BucketConfig {
                capacity,
                refill_per_sec: refill,
            },
            now,
        )
    }

    #[test]
    fn test_bucket_burst_then_refill() {
        let start = Instant::now();
        let mut bucket = bucket(5.0, 1.0, start);

        for _ in 0..5 {
            assert!(bucket.allow_at(1.0, start));
        }
        assert!(!bucket.allow_at(1.0, start));

        let later = start + Duration::from_secs(1);
        assert!(bucket.allow_at(1.0, later));
        assert!(!bucket.allow_at(1.0, later));
    }

    #[test]
    fn test_refusal_does_not_mutate() {
        let start = Instant::now();
        let mut bucket = bucket(2.0, 1.0, start);
        assert!(bucket.allow_at(2.0, start));

        let half = start + Duration::from_millis(500);
        assert!(!bucket.allow_at(1.0, half));
        assert!(!bucket.allow_at(1.0, half));
        assert!((bucket.tokens_at(half) - 0.5).abs() < 1e-9);

        assert!(bucket.allow_at(1.0, start + Duration::from_secs(1)));
    }

    #[test]
    fn test_refill_is_capped() {
        let start = Instant::now();
        let mut bucket = bucket(3.0, 1.0, start);
        assert!(bucket.allow_at(1.0, start));
        let much_later = start + Duration::from_secs(3600);
        assert_eq!(bucket.tokens_at(much_later), 3.0);
    }

    #[test]
    fn test_content_bucket_limits_across_senders() {
        let now = Instant::now();
        let mut limiter = RateLimiter::new(&CoreConfig::default());

        for i in 0..3 {
            assert!(limiter.admit(&format!("s{i}"), "same", 10, now).is_ok());
        }
        assert!(matches!(
            limiter.admit("s9", "same", 10, now),
            Err(MeshChatError::RateLimited)
        ));
        assert!(limiter.admit("s9", "other", 10, now).is_ok());
    }

    #[test]
    fn test_rejected_content_does_not_charge_sender() {
        let now = Instant::now();
        let mut limiter = RateLimiter::new(&CoreConfig::default());

        for _ in 0..3 {
            limiter.admit("noisy", "spam", 4, now).unwrap();
        }
        // content bucket is empty; these must not drain the sender bucket
        for _ in 0..10 {
            assert!(limiter.admit("noisy", "spam", 4, now).is_err());
        }
        assert!(limiter.admit("noisy", "fresh-1", 4, now).is_ok());
        assert!(limiter.admit("noisy", "fresh-2", 4, now).is_ok());
        assert!(limiter.admit("noisy", "fresh-3", 4, now).is_err());
    }

    #[test]
    fn test_oversized_rejected_before_buckets() {
        let now = Instant::now();
        let mut limiter = RateLimiter::new(&CoreConfig::default());
        let err = limiter.admit("a", "b", 16 * 1024 + 1, now).unwrap_err();
        assert!(matches!(err, MeshChatError::OversizedMessage { .. }));
        assert_eq!(limiter.tracked_buckets(), 0);
    }

    #[test]
    fn test_purge_stale() {
        let now = Instant::now();
        let mut limiter = RateLimiter::new(&CoreConfig::default());
        limiter.admit("a", "b", 1, now).unwrap();

        assert_eq!(limiter.purge_stale(Duration::from_secs(60), now), 0);
        let later = now + Duration::from_secs(61);
        assert_eq!(limiter.purge_stale(Duration::from_secs(60), later), 2);
    }

    #[test]
    fn test_sender_key_preference() {
        let fp = Fingerprint::from_noise_key(&[1u8; 32]);
        let addr = PeerAddress::new("0011223344556677");
        assert!(sender_key(Some(&fp), Some(&addr), "x").starts_with("fp:"));
        assert_eq!(sender_key(None, Some(&addr), "x"), "addr:0011223344556677");
        assert_eq!(sender_key(None, None, " Bob "), "nick:bob");
    }
}
