//! Delivery/read state machine and read-receipt bookkeeping.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use meshchat_shared::{DeliveryStatus, Message, MessageId, TransportKind};

/// Anything that holds messages whose status can change.
pub trait StatusTarget {
    /// Call `apply` on every message with this id.
    fn visit_message(&mut self, id: &MessageId, apply: &mut dyn FnMut(&mut Message));
}

/// Whether `next` may replace `current`.
///
/// Ranked states only move forward; an equal rank is a refresh. `Failed`
/// can be left for any state (retry), and can only be entered before
/// anything was acknowledged.
pub fn can_transition(current: Option<&DeliveryStatus>, next: &DeliveryStatus) -> bool {
    let Some(current) = current else {
        return true;
    };
    match (current.rank(), next.rank()) {
        (None, _) => true,
        (Some(cur), None) => cur <= 1,
        (Some(cur), Some(new)) => new >= cur,
    }
}

/// Apply a transition to one message. Returns whether it changed.
pub fn apply_transition(message: &mut Message, next: &DeliveryStatus) -> bool {
    if !can_transition(message.delivery_status.as_ref(), next) {
        return false;
    }
    if message.delivery_status.as_ref() == Some(next) {
        return false;
    }
    message.delivery_status = Some(next.clone());
    true
}

#[derive(Debug)]
pub struct DeliveryTracker {
    receipts_sent: HashSet<MessageId>,
    acks_sent: HashSet<MessageId>,
    arrived_via: HashMap<MessageId, TransportKind>,
    started_at: Instant,
    prune_grace: Duration,
}

impl DeliveryTracker {
    pub fn new(receipts_sent: HashSet<MessageId>, started_at: Instant, prune_grace: Duration) -> Self {
        Self {
            receipts_sent,
            acks_sent: HashSet::new(),
            arrived_via: HashMap::new(),
            started_at,
            prune_grace,
        }
    }

    /// Apply `status` to every copy of `id` across `targets`.
    /// Returns the number of copies that changed.
    pub fn update(
        &self,
        id: &MessageId,
        status: &DeliveryStatus,
        targets: &mut [&mut dyn StatusTarget],
    ) -> usize {
        let mut changed = 0;
        for target in targets.iter_mut() {
            target.visit_message(id, &mut |message| {
                if apply_transition(message, status) {
                    changed += 1;
                }
            });
        }
        if changed == 0 {
            tracing::debug!(id = %id, status = status.label(), "Delivery update ignored");
        }
        changed
    }

    pub fn receipt_already_sent(&self, id: &MessageId) -> bool {
        self.receipts_sent.contains(id)
    }

    /// Returns `false` if a receipt for `id` was already recorded.
    pub fn record_receipt_sent(&mut self, id: &MessageId) -> bool {
        self.receipts_sent.insert(id.clone())
    }

    /// Returns `false` if we already acked `id`.
    pub fn record_ack_sent(&mut self, id: &MessageId) -> bool {
        self.acks_sent.insert(id.clone())
    }

    pub fn record_arrival(&mut self, id: &MessageId, transport: TransportKind) {
        self.arrived_via.entry(id.clone()).or_insert(transport);
    }

    /// Transport that first delivered `id` to us.
    pub fn arrival_transport(&self, id: &MessageId) -> Option<TransportKind> {
        self.arrived_via.get(id).copied()
    }

    pub fn in_grace(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) < self.prune_grace
    }

    /// Drop receipt records for messages not in `live`.
    /// Returns `None` while still inside the startup grace window.
    pub fn prune(&mut self, live: &HashSet<MessageId>, now: Instant) -> Option<usize> {
        if self.in_grace(now) {
            return None;
        }
        let before = self.receipts_sent.len();
        self.receipts_sent.retain(|id| live.contains(id));
        self.acks_sent.retain(|id| live.contains(id));
        self.arrived_via.retain(|id, _| live.contains(id));
        Some(before - self.receipts_sent.len())
    }
}
