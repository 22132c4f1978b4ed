//! Bounded, deduplicated public timelines.
//!
//! One mesh-wide timeline plus one per geohash channel. Broadcast traffic
//! reaches them through a [`PublicBatcher`] whose flush interval adapts to
//! the incoming volume.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use meshchat_shared::{ChannelId, Message, MessageId};

use crate::config::CoreConfig;
use crate::content::content_fingerprint;
use crate::delivery::StatusTarget;

/// Flushes draining at least this many messages count as high volume.
const HIGH_VOLUME_BATCH: usize = 10;
/// Flushes draining at most this many messages count as low volume.
const LOW_VOLUME_BATCH: usize = 2;

#[derive(Debug)]
pub struct ChannelTimeline {
    messages: VecDeque<Message>,
    ids: HashSet<MessageId>,
    cap: usize,
}

impl ChannelTimeline {
    pub fn new(cap: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            ids: HashSet::new(),
            cap: cap.max(1),
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Append at the tail. No-op if the id is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        self.ids.insert(message.id.clone());
        self.messages.push_back(message);
        self.enforce_cap();
        true
    }

    /// Insert at the position given by timestamp. Equal timestamps keep
    /// arrival order.
    pub fn insert_sorted(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        let ts = message.timestamp;
        let pos = self.messages.partition_point(|m| m.timestamp <= ts);
        self.ids.insert(message.id.clone());
        self.messages.insert(pos, message);
        self.enforce_cap();
        true
    }

    fn enforce_cap(&mut self) {
        while self.messages.len() > self.cap {
            if let Some(evicted) = self.messages.pop_front() {
                self.ids.remove(&evicted.id);
            }
        }
    }

    pub fn tail_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.back().map(|m| m.timestamp)
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Buffer between the radio and the visible timeline.
#[derive(Debug)]
pub struct PublicBatcher {
    pending: Vec<(ChannelId, Message)>,
    interval: Duration,
    min_interval: Duration,
    max_interval: Duration,
    last_flush: Instant,
}

impl PublicBatcher {
    pub fn new(config: &CoreConfig, now: Instant) -> Self {
        Self {
            pending: Vec::new(),
            interval: config.batch_base_interval,
            min_interval: config.batch_min_interval,
            max_interval: config.batch_max_interval,
            last_flush: now,
        }
    }

    pub fn push(&mut self, channel: ChannelId, message: Message) {
        self.pending.push((channel, message));
    }

    pub fn is_due(&self, now: Instant) -> bool {
        !self.pending.is_empty() && now.saturating_duration_since(self.last_flush) >= self.interval
    }

    /// Drain everything pending and adapt the interval to how much there was.
    pub fn drain(&mut self, now: Instant) -> Vec<(ChannelId, Message)> {
        let batch = std::mem::take(&mut self.pending);
        self.last_flush = now;
        if batch.len() >= HIGH_VOLUME_BATCH {
            self.interval = (self.interval / 2).max(self.min_interval);
        } else if batch.len() <= LOW_VOLUME_BATCH {
            self.interval = (self.interval * 2).min(self.max_interval);
        }
        batch
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

pub struct TimelineStore {
    mesh: ChannelTimeline,
    geohash: HashMap<String, ChannelTimeline>,
    geohash_cap: usize,
    seen_content: LruCache<String, DateTime<Utc>>,
    near_duplicate_window: chrono::Duration,
    late_insert_threshold: chrono::Duration,
    batcher: PublicBatcher,
}

impl TimelineStore {
    pub fn new(config: &CoreConfig, now: Instant) -> Self {
        let lru_size = NonZeroUsize::new(config.content_lru_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            mesh: ChannelTimeline::new(config.mesh_timeline_cap),
            geohash: HashMap::new(),
            geohash_cap: config.geohash_timeline_cap,
            seen_content: LruCache::new(lru_size),
            near_duplicate_window: to_chrono(config.near_duplicate_window),
            late_insert_threshold: to_chrono(config.late_insert_threshold),
            batcher: PublicBatcher::new(config, now),
        }
    }

    fn timeline_mut(&mut self, channel: &ChannelId) -> &mut ChannelTimeline {
        match channel {
            ChannelId::Mesh => &mut self.mesh,
            ChannelId::Geohash(hash) => {
                let cap = self.geohash_cap;
                self.geohash
                    .entry(hash.clone())
                    .or_insert_with(|| ChannelTimeline::new(cap))
            }
        }
    }

    pub fn timeline(&self, channel: &ChannelId) -> Option<&ChannelTimeline> {
        match channel {
            ChannelId::Mesh => Some(&self.mesh),
            ChannelId::Geohash(hash) => self.geohash.get(hash),
        }
    }

    pub fn contains(&self, channel: &ChannelId, id: &MessageId) -> bool {
        self.timeline(channel).is_some_and(|t| t.contains(id))
    }

    /// Append directly, bypassing the batcher and near-duplicate check.
    pub fn append(&mut self, message: Message, channel: &ChannelId) -> bool {
        self.timeline_mut(channel).append(message)
    }

    /// Whether identical normalized content was seen within the window of
    /// this message's timestamp. Records the content when it was not.
    pub fn check_near_duplicate(&mut self, message: &Message) -> bool {
        let key = content_fingerprint(&message.content);
        if let Some(seen) = self.seen_content.get(&key) {
            let gap = if message.timestamp >= *seen {
                message.timestamp - *seen
            } else {
                *seen - message.timestamp
            };
            if gap <= self.near_duplicate_window {
                return true;
            }
        }
        self.seen_content.put(key, message.timestamp);
        false
    }

    /// Queue an inbound broadcast for the next flush.
    pub fn enqueue_public(&mut self, message: Message, channel: ChannelId) {
        self.batcher.push(channel, message);
    }

    pub fn flush_due(&self, now: Instant) -> bool {
        self.batcher.is_due(now)
    }

    /// Merge the pending batch into the timelines. Returns what was committed.
    pub fn flush_public(&mut self, now: Instant) -> Vec<(ChannelId, Message)> {
        let mut committed = Vec::new();
        for (channel, message) in self.batcher.drain(now) {
            if self.contains(&channel, &message.id) {
                continue;
            }
            if self.check_near_duplicate(&message) {
                tracing::debug!(id = %message.id, channel = %channel, "Near-duplicate suppressed");
                continue;
            }
            let late_threshold = self.late_insert_threshold;
            let timeline = self.timeline_mut(&channel);
            let is_late = timeline
                .tail_timestamp()
                .is_some_and(|tail| tail - message.timestamp > late_threshold);
            let added = if is_late {
                timeline.insert_sorted(message.clone())
            } else {
                timeline.append(message.clone())
            };
            // a late insert into a full timeline can be evicted on the spot
            if added && timeline.contains(&message.id) {
                committed.push((channel, message));
            }
        }
        committed
    }

    pub fn batcher(&self) -> &PublicBatcher {
        &self.batcher
    }

    pub fn geohash_channels(&self) -> impl Iterator<Item = &String> {
        self.geohash.keys()
    }
}

impl StatusTarget for TimelineStore {
    fn visit_message(&mut self, id: &MessageId, apply: &mut dyn FnMut(&mut Message)) {
        let timelines = std::iter::once(&mut self.mesh).chain(self.geohash.values_mut());
        for timeline in timelines {
            if timeline.contains(id) {
                timeline
                    .messages
                    .iter_mut()
                    .filter(|m| &m.id == id)
                    .for_each(&mut *apply);
            }
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(52))
}
