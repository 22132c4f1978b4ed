//! Ids of messages we already sent a read receipt for.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use meshchat_shared::MessageId;
use rusqlite::params;

use crate::database::{sortable_ts, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Record that a receipt went out. Returns `false` if it was already recorded.
    pub fn mark_receipt_sent(&self, message_id: &MessageId, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO read_receipts_sent (message_id, sent_at) VALUES (?1, ?2)",
            params![message_id.as_str(), sortable_ts(at)],
        )?;
        Ok(affected > 0)
    }

    pub fn receipt_sent(&self, message_id: &MessageId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM read_receipts_sent WHERE message_id = ?1",
            params![message_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn load_sent_receipts(&self) -> Result<HashSet<MessageId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT message_id FROM read_receipts_sent")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map(MessageId::from))
            .collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Ids whose receipt went out at or after `since`.
    pub fn sent_receipts_since(&self, since: DateTime<Utc>) -> Result<HashSet<MessageId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT message_id FROM read_receipts_sent WHERE sent_at >= ?1")?;
        let rows = stmt.query_map(params![sortable_ts(since)], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map(MessageId::from))
            .collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Delete every recorded id not in `keep`. Returns how many were removed.
    pub fn prune_sent_receipts(&self, keep: &HashSet<MessageId>) -> Result<usize> {
        let stale: Vec<MessageId> = self
            .load_sent_receipts()?
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();

        let tx = self.conn().unchecked_transaction()?;
        for id in &stale {
            tx.execute(
                "DELETE FROM read_receipts_sent WHERE message_id = ?1",
                params![id.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(stale.len())
    }
}
