use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::validation::Validator;

use super::{Filters, Metadata, StoreError};

/// Maximum message content length in bytes.
pub const MAX_CONTENT_BYTES: usize = 1000;

/// A chat message. `id` is zero until the row is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub sender_id: i64,
    pub receiver_id: i64,
    #[serde(rename = "read")]
    pub read_status: bool,
}

impl Message {
    pub fn validate(&self, v: &mut Validator) {
        v.check(!self.content.is_empty(), "content", "Content is required");
        v.check(
            self.content.len() <= MAX_CONTENT_BYTES,
            "content",
            "Content must be less than 1000 characters",
        );
    }
}

/// A conversation partner, derived from the messages a user has sent.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Chat {
    pub id: i64,
    pub name: String,
}

const INSERT_QUERY: &str = "\
    INSERT INTO messages (timestamp, content, sender_id, receiver_id, read_status)
    VALUES ($1, $2, $3, $4, $5)
    RETURNING id";

#[derive(Clone)]
pub struct MessageStore {
    pool: PgPool,
}

impl MessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a single message, assigning its id.
    pub async fn insert(&self, message: &mut Message) -> Result<(), StoreError> {
        let id: i64 = sqlx::query_scalar(INSERT_QUERY)
            .bind(message.timestamp)
            .bind(&message.content)
            .bind(message.sender_id)
            .bind(message.receiver_id)
            .bind(message.read_status)
            .fetch_one(&self.pool)
            .await?;

        message.id = id;
        Ok(())
    }

    /// Insert all messages within a single transaction; any failure rolls
    /// the whole batch back.
    pub async fn bulk_insert(&self, messages: &mut [Message]) -> Result<(), StoreError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for message in messages.iter_mut() {
            let id: i64 = sqlx::query_scalar(INSERT_QUERY)
                .bind(message.timestamp)
                .bind(&message.content)
                .bind(message.sender_id)
                .bind(message.receiver_id)
                .bind(message.read_status)
                .fetch_one(&mut *tx)
                .await?;
            message.id = id;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Page of messages between the two users (in either direction), newest
    /// first, strictly older than the cursor.
    pub async fn get_all_for_pair(
        &self,
        user_id: i64,
        peer_id: i64,
        filters: &Filters,
    ) -> Result<(Vec<Message>, Metadata), StoreError> {
        let messages: Vec<Message> = sqlx::query_as(
            "SELECT id, timestamp, content, sender_id, receiver_id, read_status
             FROM messages
             WHERE ((sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1))
               AND timestamp < $3
             ORDER BY timestamp DESC
             LIMIT $4",
        )
        .bind(user_id)
        .bind(peer_id)
        .bind(filters.cursor)
        .bind(filters.page_size)
        .fetch_all(&self.pool)
        .await?;

        let metadata = match messages.last() {
            Some(oldest) => Metadata::page(filters.cursor, oldest.timestamp, filters.page_size),
            None => Metadata::empty(filters.cursor, filters.page_size),
        };

        Ok((messages, metadata))
    }

    /// Set the read flag on a message. Fails with `RecordNotFound` when no
    /// row was affected.
    pub async fn update_status(&self, message_id: i64, read_status: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE messages SET read_status = $1 WHERE id = $2")
            .bind(read_status)
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound);
        }
        Ok(())
    }

    /// Distinct peers the user has messaged, with their names.
    pub async fn chats_for_user(&self, user_id: i64) -> Result<Vec<Chat>, StoreError> {
        let chats = sqlx::query_as(
            "SELECT DISTINCT messages.receiver_id AS id, users.full_name AS name
             FROM messages
             JOIN users ON messages.receiver_id = users.id
             WHERE sender_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(chats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(content: &str) -> Message {
        Message {
            id: 0,
            timestamp: Utc::now(),
            content: content.to_string(),
            sender_id: 1,
            receiver_id: 2,
            read_status: false,
        }
    }

    #[test]
    fn test_validate_accepts_normal_content() {
        let mut v = Validator::new();
        sample_message("hi").validate(&mut v);
        assert!(v.is_valid());
    }

    #[test]
    fn test_validate_rejects_empty_content() {
        let mut v = Validator::new();
        sample_message("").validate(&mut v);
        assert_eq!(
            v.into_errors().get("content").map(String::as_str),
            Some("Content is required")
        );
    }

    #[test]
    fn test_validate_rejects_oversized_content() {
        let mut v = Validator::new();
        sample_message(&"a".repeat(MAX_CONTENT_BYTES + 1)).validate(&mut v);
        assert_eq!(
            v.into_errors().get("content").map(String::as_str),
            Some("Content must be less than 1000 characters")
        );

        let mut v = Validator::new();
        sample_message(&"a".repeat(MAX_CONTENT_BYTES)).validate(&mut v);
        assert!(v.is_valid());
    }

    #[test]
    fn test_message_json_round_trip() {
        let message = sample_message("hello");
        let json = serde_json::to_string(&message).unwrap();

        // The read flag is serialized under the short wire name.
        assert!(json.contains("\"read\":false"));
        assert!(!json.contains("read_status"));

        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, message);
    }
}
