//! Fingerprints verified through the QR challenge/response.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use meshchat_shared::Fingerprint;
use rusqlite::params;

use crate::database::{parse_fingerprint, Database};
use crate::error::{Result, StoreError};

impl Database {
    pub fn mark_verified(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO verified_fingerprints (fingerprint, verified_at) VALUES (?1, ?2)",
            params![fingerprint.to_hex(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn unmark_verified(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM verified_fingerprints WHERE fingerprint = ?1",
            params![fingerprint.to_hex()],
        )?;
        Ok(affected > 0)
    }

    pub fn load_verified(&self) -> Result<HashSet<Fingerprint>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT fingerprint FROM verified_fingerprints")?;
        let rows = stmt.query_map([], |row| {
            let raw: String = row.get(0)?;
            parse_fingerprint(0, &raw)
        })?;
        rows.collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verified_set_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let fp = Fingerprint::from_noise_key(&[5u8; 32]);

        db.mark_verified(&fp, Utc::now()).unwrap();
        db.mark_verified(&fp, Utc::now()).unwrap();
        assert_eq!(db.load_verified().unwrap().len(), 1);

        assert!(db.unmark_verified(&fp).unwrap());
        assert!(db.load_verified().unwrap().is_empty());
    }
}
