//! v001 -- Initial schema creation.
//!
//! Creates `read_receipts_sent`, `verified_fingerprints` and `favorites`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Message ids we already sent a read receipt for
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS read_receipts_sent (
    message_id TEXT PRIMARY KEY NOT NULL,
    sent_at    TEXT NOT NULL                  -- RFC-3339
);

-- ----------------------------------------------------------------
-- Fingerprints verified out of band (QR challenge/response)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS verified_fingerprints (
    fingerprint TEXT PRIMARY KEY NOT NULL,    -- hex BLAKE3 of noise static key
    verified_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Favorites relationship, keyed by stable fingerprint
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS favorites (
    fingerprint       TEXT PRIMARY KEY NOT NULL,
    nickname          TEXT NOT NULL,
    is_favorite       INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    they_favorited_us INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    relay_public_key  TEXT,                         -- hex, learned from the peer
    updated_at        TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
