//! Direct-message history, keyed by the chat address each conversation
//! lives under. Bodies are stored as bincode so delivery state and sender
//! metadata come back exactly as they were. System notices are never stored.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use meshchat_shared::{Message, MessageId, PeerAddress};
use rusqlite::params;

use crate::database::{sortable_ts, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Store a newly appended message. Returns `false` if the id is already stored.
    pub fn insert_private_message(&self, chat: &PeerAddress, message: &Message) -> Result<bool> {
        if message.is_system() {
            return Ok(false);
        }
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO private_messages (message_id, chat_address, timestamp, body)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                message.id.as_str(),
                chat.as_str(),
                sortable_ts(message.timestamp),
                encode(message)?,
            ],
        )?;
        Ok(affected > 0)
    }

    /// Rewrite the stored body, e.g. after a delivery status change.
    pub fn update_private_message(&self, message: &Message) -> Result<bool> {
        if message.is_system() {
            return Ok(false);
        }
        let affected = self.conn().execute(
            "UPDATE private_messages SET body = ?2 WHERE message_id = ?1",
            params![message.id.as_str(), encode(message)?],
        )?;
        Ok(affected > 0)
    }

    /// Store a whole conversation under `chat`, moving rows that lived
    /// under another address. Returns how many rows were written.
    pub fn save_chat(&self, chat: &PeerAddress, messages: &[Message]) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;
        let mut written = 0;
        for message in messages.iter().filter(|m| !m.is_system()) {
            written += tx.execute(
                "INSERT OR REPLACE INTO private_messages (message_id, chat_address, timestamp, body)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    message.id.as_str(),
                    chat.as_str(),
                    sortable_ts(message.timestamp),
                    encode(message)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(written)
    }

    /// Every stored message with its chat address, oldest first.
    pub fn load_private_messages(&self) -> Result<Vec<(PeerAddress, Message)>> {
        let mut stmt = self.conn().prepare(
            "SELECT chat_address, body
             FROM private_messages
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let chat: String = row.get(0)?;
            let body: Vec<u8> = row.get(1)?;
            Ok((PeerAddress::new(chat), decode(1, &body)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn private_message_ids(&self) -> Result<HashSet<MessageId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT message_id FROM private_messages")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map(MessageId::from))
            .collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Drop messages older than `cutoff`. Returns the removed count.
    pub fn delete_private_messages_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM private_messages WHERE timestamp < ?1",
            params![sortable_ts(cutoff)],
        )?;
        Ok(affected)
    }

    pub fn set_chat_unread(&self, chat: &PeerAddress, unread: bool, at: DateTime<Utc>) -> Result<()> {
        if unread {
            self.conn().execute(
                "INSERT OR IGNORE INTO unread_chats (chat_address, marked_at) VALUES (?1, ?2)",
                params![chat.as_str(), sortable_ts(at)],
            )?;
        } else {
            self.conn().execute(
                "DELETE FROM unread_chats WHERE chat_address = ?1",
                params![chat.as_str()],
            )?;
        }
        Ok(())
    }

    pub fn load_unread_chats(&self) -> Result<HashSet<PeerAddress>> {
        let mut stmt = self.conn().prepare("SELECT chat_address FROM unread_chats")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map(PeerAddress::new))
            .collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn encode(message: &Message) -> Result<Vec<u8>> {
    bincode::serialize(message).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(idx: usize, body: &[u8]) -> rusqlite::Result<Message> {
    bincode::deserialize(body).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Blob, Box::new(e))
    })
}
