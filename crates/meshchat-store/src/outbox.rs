//! Persisted store-and-forward queue for direct messages.

use chrono::{DateTime, Utc};
use meshchat_shared::{Fingerprint, MessageId};
use rusqlite::params;

use crate::database::{parse_fingerprint, parse_ts, sortable_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::OutboxEntry;

impl Database {
    /// Queue a message; re-queueing the same id keeps the original row.
    pub fn enqueue_outbox(&self, entry: &OutboxEntry) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO outbox
                (message_id, peer_fingerprint, recipient_nickname, content, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.message_id.as_str(),
                entry.peer.to_hex(),
                entry.recipient_nickname,
                entry.content,
                sortable_ts(entry.queued_at),
            ],
        )?;
        Ok(())
    }

    /// Oldest first.
    pub fn outbox_for_peer(&self, peer: &Fingerprint) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, peer_fingerprint, recipient_nickname, content, queued_at
             FROM outbox
             WHERE peer_fingerprint = ?1
             ORDER BY queued_at ASC",
        )?;
        let rows = stmt.query_map(params![peer.to_hex()], row_to_entry)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn load_outbox(&self) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, peer_fingerprint, recipient_nickname, content, queued_at
             FROM outbox
             ORDER BY queued_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn remove_outbox(&self, message_id: &MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM outbox WHERE message_id = ?1",
            params![message_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Drop entries queued before `cutoff`. Returns the removed count.
    pub fn expire_outbox(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM outbox WHERE queued_at < ?1",
            params![sortable_ts(cutoff)],
        )?;
        Ok(affected)
    }

    /// Keep only the newest `cap` entries for `peer`.
    pub fn trim_outbox(&self, peer: &Fingerprint, cap: usize) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM outbox
             WHERE peer_fingerprint = ?1
               AND message_id NOT IN (
                   SELECT message_id FROM outbox
                   WHERE peer_fingerprint = ?1
                   ORDER BY queued_at DESC
                   LIMIT ?2
               )",
            params![peer.to_hex(), cap as i64],
        )?;
        Ok(affected)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let id: String = row.get(0)?;
    let peer_hex: String = row.get(1)?;
    let recipient_nickname: String = row.get(2)?;
    let content: String = row.get(3)?;
    let queued_str: String = row.get(4)?;

    Ok(OutboxEntry {
        message_id: MessageId::from(id),
        peer: parse_fingerprint(1, &peer_hex)?,
        recipient_nickname,
        content,
        queued_at: parse_ts(4, &queued_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(id: &str, peer: Fingerprint, queued_at: DateTime<Utc>) -> OutboxEntry {
        OutboxEntry {
            message_id: MessageId::from(id),
            peer,
            recipient_nickname: "bob".into(),
            content: format!("content {id}"),
            queued_at,
        }
    }

    #[test]
    fn test_queue_is_ordered_and_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let peer = Fingerprint::from_noise_key(&[4u8; 32]);
        let now = Utc::now();

        db.enqueue_outbox(&entry("second", peer, now)).unwrap();
        db.enqueue_outbox(&entry("first", peer, now - Duration::seconds(5))).unwrap();
        db.enqueue_outbox(&entry("first", peer, now)).unwrap();

        let queued = db.outbox_for_peer(&peer).unwrap();
        let ids: Vec<&str> = queued.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);

        assert!(db.remove_outbox(&MessageId::from("first")).unwrap());
        assert_eq!(db.load_outbox().unwrap().len(), 1);
    }

    #[test]
    fn test_expiry_and_cap() {
        let db = Database::open_in_memory().unwrap();
        let peer = Fingerprint::from_noise_key(&[4u8; 32]);
        let now = Utc::now();

        db.enqueue_outbox(&entry("stale", peer, now - Duration::hours(30))).unwrap();
        for i in 0..4 {
            db.enqueue_outbox(&entry(&format!("m{i}"), peer, now + Duration::seconds(i)))
                .unwrap();
        }

        assert_eq!(db.expire_outbox(now - Duration::hours(24)).unwrap(), 1);
        assert_eq!(db.trim_outbox(&peer, 2).unwrap(), 2);

        let ids: Vec<String> = db
            .outbox_for_peer(&peer)
            .unwrap()
            .into_iter()
            .map(|e| e.message_id.to_string())
            .collect();
        assert_eq!(ids, vec!["m2".to_string(), "m3".to_string()]);
    }
}
