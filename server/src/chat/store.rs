use chrono::Utc;
use thiserror::Error;

use super::{DirectMessage, Identity, NewDirectMessage};
use crate::db::DbPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid message: {0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Durable message history.
///
/// Calls are synchronous and may block; async callers run them on the
/// blocking pool.
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and timestamp.
    fn append(&self, message: NewDirectMessage) -> Result<DirectMessage, StoreError>;

    /// All messages exchanged between `a` and `b` (either direction),
    /// oldest first.
    fn query(&self, a: &Identity, b: &Identity) -> Result<Vec<DirectMessage>, StoreError>;
}

/// Reject messages that must never be persisted.
pub fn validate(message: &NewDirectMessage, max_content_len: usize) -> Result<(), StoreError> {
    if message.recipient.as_str().is_empty() {
        return Err(StoreError::Invalid("recipient is required".to_string()));
    }
    if message.content.trim().is_empty() {
        return Err(StoreError::Invalid("content is empty".to_string()));
    }
    if message.content.chars().count() > max_content_len {
        return Err(StoreError::Invalid(format!(
            "content exceeds {} characters",
            max_content_len
        )));
    }
    Ok(())
}

/// SQLite-backed store over the shared connection.
pub struct SqliteMessageStore {
    db: DbPool,
    max_content_len: usize,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool, max_content_len: usize) -> Self {
        Self {
            db,
            max_content_len,
        }
    }
}

impl MessageStore for SqliteMessageStore {
    fn append(&self, message: NewDirectMessage) -> Result<DirectMessage, StoreError> {
        validate(&message, self.max_content_len)?;

        let conn = self
            .db
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("DB lock: {}", e)))?;

        let recipient_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            rusqlite::params![message.recipient.as_str()],
            |row| row.get(0),
        )?;
        if !recipient_exists {
            return Err(StoreError::Invalid(format!(
                "unknown recipient {}",
                message.recipient
            )));
        }

        // Timestamps never go backwards, even if the wall clock does
        let last: i64 = conn.query_row(
            "SELECT COALESCE(MAX(timestamp), 0) FROM messages",
            [],
            |row| row.get(0),
        )?;
        let timestamp = Utc::now().timestamp_millis().max(last + 1);
        let id = uuid::Uuid::now_v7().to_string();

        conn.execute(
            "INSERT INTO messages (id, sender_id, recipient_id, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                id,
                message.sender.as_str(),
                message.recipient.as_str(),
                message.content,
                timestamp,
            ],
        )?;

        Ok(DirectMessage {
            id,
            sender: message.sender,
            recipient: message.recipient,
            content: message.content,
            timestamp,
        })
    }

    fn query(&self, a: &Identity, b: &Identity) -> Result<Vec<DirectMessage>, StoreError> {
        let conn = self
            .db
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("DB lock: {}", e)))?;

        let mut stmt = conn.prepare(
            "SELECT id, sender_id, recipient_id, content, timestamp
             FROM messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY timestamp ASC, seq ASC",
        )?;

        let messages = stmt
            .query_map(rusqlite::params![a.as_str(), b.as_str()], |row| {
                Ok(DirectMessage {
                    id: row.get(0)?,
                    sender: Identity::new(row.get::<_, String>(1)?),
                    recipient: Identity::new(row.get::<_, String>(2)?),
                    content: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }
}
