//! In-memory mirror of the persisted outbox.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use meshchat_shared::{Fingerprint, MessageId};
use meshchat_store::OutboxEntry;

#[derive(Debug)]
pub struct Outbox {
    queues: HashMap<Fingerprint, VecDeque<OutboxEntry>>,
    max_age: chrono::Duration,
    per_peer_cap: usize,
}

impl Outbox {
    pub fn new(max_age: std::time::Duration, per_peer_cap: usize) -> Self {
        Self {
            queues: HashMap::new(),
            max_age: chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
            per_peer_cap: per_peer_cap.max(1),
        }
    }

    /// Rebuild from rows loaded at startup.
    pub fn restore(&mut self, entries: Vec<OutboxEntry>) {
        for entry in entries {
            self.enqueue(entry);
        }
    }

    /// Queue an entry. Returns ids evicted to honour the per-peer cap.
    /// Re-queueing an id already waiting is a no-op.
    pub fn enqueue(&mut self, entry: OutboxEntry) -> Vec<MessageId> {
        let queue = self.queues.entry(entry.peer).or_default();
        if queue.iter().any(|e| e.message_id == entry.message_id) {
            return Vec::new();
        }
        queue.push_back(entry);

        let mut evicted = Vec::new();
        while queue.len() > self.per_peer_cap {
            if let Some(old) = queue.pop_front() {
                evicted.push(old.message_id);
            }
        }
        evicted
    }

    pub fn entries_for(&self, peer: &Fingerprint) -> Vec<OutboxEntry> {
        self.queues
            .get(peer)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<OutboxEntry> {
        let mut removed = None;
        for queue in self.queues.values_mut() {
            if let Some(pos) = queue.iter().position(|e| &e.message_id == id) {
                removed = queue.remove(pos);
                break;
            }
        }
        self.queues.retain(|_, q| !q.is_empty());
        removed
    }

    /// Drop entries older than the max age.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<MessageId> {
        let cutoff = now - self.max_age;
        let mut expired = Vec::new();
        for queue in self.queues.values_mut() {
            queue.retain(|e| {
                let keep = e.queued_at >= cutoff;
                if !keep {
                    expired.push(e.message_id.clone());
                }
                keep
            });
        }
        self.queues.retain(|_, q| !q.is_empty());
        expired
    }

    pub fn peers(&self) -> Vec<Fingerprint> {
        self.queues.keys().copied().collect()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.queues
            .values()
            .any(|q| q.iter().any(|e| &e.message_id == id))
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
