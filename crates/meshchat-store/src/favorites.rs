//! CRUD operations for [`FavoriteRecord`] rows.

use meshchat_shared::Fingerprint;
use rusqlite::params;

use crate::database::{parse_fingerprint, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::FavoriteRecord;

impl Database {
    /// Insert or replace the whole record.
    pub fn upsert_favorite(&self, record: &FavoriteRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO favorites
                (fingerprint, nickname, is_favorite, they_favorited_us, relay_public_key, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(fingerprint) DO UPDATE SET
                nickname = excluded.nickname,
                is_favorite = excluded.is_favorite,
                they_favorited_us = excluded.they_favorited_us,
                relay_public_key = excluded.relay_public_key,
                updated_at = excluded.updated_at",
            params![
                record.fingerprint.to_hex(),
                record.nickname,
                record.is_favorite,
                record.they_favorited_us,
                record.relay_public_key,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_favorite(&self, fingerprint: &Fingerprint) -> Result<FavoriteRecord> {
        self.conn()
            .query_row(
                "SELECT fingerprint, nickname, is_favorite, they_favorited_us, relay_public_key, updated_at
                 FROM favorites WHERE fingerprint = ?1",
                params![fingerprint.to_hex()],
                row_to_favorite,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_favorites(&self) -> Result<Vec<FavoriteRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT fingerprint, nickname, is_favorite, they_favorited_us, relay_public_key, updated_at
             FROM favorites
             ORDER BY nickname ASC",
        )?;
        let rows = stmt.query_map([], row_to_favorite)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    // Rows where neither side cares any more are noise
    pub fn delete_favorite(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM favorites WHERE fingerprint = ?1",
            params![fingerprint.to_hex()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_favorite(row: &rusqlite::Row<'_>) -> rusqlite::Result<FavoriteRecord> {
    let fp_hex: String = row.get(0)?;
    let nickname: String = row.get(1)?;
    let is_favorite: bool = row.get(2)?;
    let they_favorited_us: bool = row.get(3)?;
    let relay_public_key: Option<String> = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(FavoriteRecord {
        fingerprint: parse_fingerprint(0, &fp_hex)?,
        nickname,
        is_favorite,
        they_favorited_us,
        relay_public_key,
        updated_at: parse_ts(5, &updated_str)?,
    })
}
