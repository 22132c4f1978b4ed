use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS private_messages (
    message_id   TEXT PRIMARY KEY NOT NULL,
    chat_address TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    body         BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_private_messages_chat_ts ON private_messages(chat_address, timestamp);

CREATE TABLE IF NOT EXISTS unread_chats (
    chat_address TEXT PRIMARY KEY NOT NULL,
    marked_at    TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
