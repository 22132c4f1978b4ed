//! Per-peer direct-message buffers, keyed by the routing address the
//! conversation currently lives under.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use meshchat_shared::{Message, MessageId, PeerAddress};

use crate::delivery::StatusTarget;

/// What an address migration moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub moved: usize,
    /// Already present at the destination.
    pub duplicates: usize,
    /// Older than the retention cutoff, left under the old address.
    pub left_behind: usize,
    pub old_bucket_removed: bool,
}

#[derive(Debug, Default)]
pub struct PrivateChats {
    chats: HashMap<PeerAddress, Vec<Message>>,
    unread: HashSet<PeerAddress>,
    /// Received messages we still owe a read receipt for.
    pending_receipts: HashMap<PeerAddress, BTreeSet<MessageId>>,
}

impl PrivateChats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to a peer's buffer. No-op if that buffer already holds the id.
    pub fn append(&mut self, peer: &PeerAddress, message: Message) -> bool {
        let chat = self.chats.entry(peer.clone()).or_default();
        if chat.iter().any(|m| m.id == message.id) {
            return false;
        }
        chat.push(message);
        true
    }

    pub fn messages(&self, peer: &PeerAddress) -> &[Message] {
        self.chats.get(peer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, peer: &PeerAddress, id: &MessageId) -> bool {
        self.messages(peer).iter().any(|m| &m.id == id)
    }

    pub fn find(&self, id: &MessageId) -> Option<(&PeerAddress, &Message)> {
        self.chats
            .iter()
            .find_map(|(peer, chat)| chat.iter().find(|m| &m.id == id).map(|m| (peer, m)))
    }

    pub fn find_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.chats
            .values_mut()
            .find_map(|chat| chat.iter_mut().find(|m| &m.id == id))
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerAddress> {
        self.chats.keys()
    }

    pub fn mark_unread(&mut self, peer: &PeerAddress) {
        self.unread.insert(peer.clone());
    }

    pub fn is_unread(&self, peer: &PeerAddress) -> bool {
        self.unread.contains(peer)
    }

    /// Clear the unread marker. Returns whether it was set.
    pub fn clear_unread(&mut self, peer: &PeerAddress) -> bool {
        self.unread.remove(peer)
    }

    pub fn add_pending_receipt(&mut self, peer: &PeerAddress, id: MessageId) {
        self.pending_receipts.entry(peer.clone()).or_default().insert(id);
    }

    pub fn take_pending_receipts(&mut self, peer: &PeerAddress) -> Vec<MessageId> {
        self.pending_receipts
            .remove(peer)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn pending_receipts(&self, peer: &PeerAddress) -> usize {
        self.pending_receipts.get(peer).map_or(0, BTreeSet::len)
    }

    /// Every message id across all buffers.
    pub fn all_message_ids(&self) -> HashSet<MessageId> {
        self.chats
            .values()
            .flat_map(|chat| chat.iter().map(|m| m.id.clone()))
            .collect()
    }

    /// Move a conversation from `old` to `new`.
    ///
    /// Messages at or after `retain_since` are merged into the destination
    /// (ids already there are skipped, the union is sorted by timestamp).
    /// Unread and pending-receipt markers always move. The old bucket is
    /// removed only when nothing was left behind.
    pub fn migrate(
        &mut self,
        old: &PeerAddress,
        new: &PeerAddress,
        retain_since: DateTime<Utc>,
    ) -> MigrationReport {
        let mut report = MigrationReport::default();
        if old == new {
            return report;
        }

        if let Some(source) = self.chats.remove(old) {
            let (fresh, stale): (Vec<Message>, Vec<Message>) = source
                .into_iter()
                .partition(|m| m.timestamp >= retain_since);

            let dest = self.chats.entry(new.clone()).or_default();
            let mut present: HashSet<MessageId> = dest.iter().map(|m| m.id.clone()).collect();
            for mut message in fresh {
                if !present.insert(message.id.clone()) {
                    report.duplicates += 1;
                    continue;
                }
                if message.sender_address.as_ref() == Some(old) {
                    message.sender_address = Some(new.clone());
                }
                dest.push(message);
                report.moved += 1;
            }
            dest.sort_by_key(|m| m.timestamp);

            report.left_behind = stale.len();
            if stale.is_empty() {
                report.old_bucket_removed = true;
            } else {
                self.chats.insert(old.clone(), stale);
            }
        }

        if self.unread.remove(old) {
            self.unread.insert(new.clone());
        }
        if let Some(pending) = self.pending_receipts.remove(old) {
            self.pending_receipts
                .entry(new.clone())
                .or_default()
                .extend(pending);
        }

        report
    }
}

impl StatusTarget for PrivateChats {
    fn visit_message(&mut self, id: &MessageId, apply: &mut dyn FnMut(&mut Message)) {
        for chat in self.chats.values_mut() {
            chat.iter_mut().filter(|m| &m.id == id).for_each(&mut *apply);
        }
    }
}
