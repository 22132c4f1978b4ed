use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    message_id         TEXT PRIMARY KEY NOT NULL,
    peer_fingerprint   TEXT NOT NULL,
    recipient_nickname TEXT NOT NULL,
    content            TEXT NOT NULL,
    queued_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outbox_peer_queued ON outbox(peer_fingerprint, queued_at);

CREATE TABLE IF NOT EXISTS blocked_fingerprints (
    fingerprint TEXT PRIMARY KEY NOT NULL,
    blocked_at  TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
