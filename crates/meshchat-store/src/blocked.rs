use std::collections::HashSet;

use chrono::{DateTime, Utc};
use meshchat_shared::Fingerprint;
use rusqlite::params;

use crate::database::{parse_fingerprint, Database};
use crate::error::{Result, StoreError};

impl Database {
    pub fn set_blocked(&self, fingerprint: &Fingerprint, blocked: bool, at: DateTime<Utc>) -> Result<()> {
        if blocked {
            self.conn().execute(
                "INSERT OR IGNORE INTO blocked_fingerprints (fingerprint, blocked_at) VALUES (?1, ?2)",
                params![fingerprint.to_hex(), at.to_rfc3339()],
            )?;
        } else {
            self.conn().execute(
                "DELETE FROM blocked_fingerprints WHERE fingerprint = ?1",
                params![fingerprint.to_hex()],
            )?;
        }
        Ok(())
    }

    pub fn load_blocked(&self) -> Result<HashSet<Fingerprint>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT fingerprint FROM blocked_fingerprints")?;
        let rows = stmt.query_map([], |row| {
            let raw: String = row.get(0)?;
            parse_fingerprint(0, &raw)
        })?;
        rows.collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}
