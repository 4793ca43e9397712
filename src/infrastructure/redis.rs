//! Redis client wrapper with typed helpers for the stream commands used by
//! the durable queue.
//!
//! A single multiplexed connection is cached and shared across tasks; it is
//! established lazily and dropped after an I/O error so the next command
//! reconnects.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Client, FromRedisValue, RedisError};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

/// A single entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Broker-assigned stream id (`<ms>-<seq>`).
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl StreamEntry {
    /// Value of a named field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub struct RedisClient {
    client: Client,
    /// Multiplexed connection (shared across tasks)
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisClient {
    pub fn new(config: &RedisConfig) -> Result<Self, RedisError> {
        let client = Client::open(config.url())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
        })
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, RedisError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut conn_guard = self.connection.write().await;

        // Double-check in case another task connected while we waited
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        let conn = self.client.get_multiplexed_tokio_connection().await?;
        *conn_guard = Some(conn.clone());
        tracing::info!("redis connection established");
        Ok(conn)
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, RedisError> {
        let mut conn = self.get_connection().await?;

        match cmd.query_async(&mut conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                // Clear the cached connection so the next call reconnects
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                }
                Err(e)
            }
        }
    }

    pub async fn ping(&self) -> Result<(), RedisError> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    /// Append an entry with a broker-assigned id; returns the new entry id.
    pub async fn xadd(&self, key: &str, fields: &[(&str, &str)]) -> Result<String, RedisError> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg("*");
        for (field, value) in fields {
            cmd.arg(*field).arg(*value);
        }

        self.query(&cmd).await
    }

    /// Create a consumer group at stream id 0, creating the stream if it
    /// does not exist. Returns `Ok(false)` when the group already exists.
    pub async fn xgroup_create(&self, key: &str, group: &str) -> Result<bool, RedisError> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(key).arg(group).arg("0").arg("MKSTREAM");

        match self.query::<()>(&cmd).await {
            Ok(()) => Ok(true),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read up to `count` entries from a single stream as a consumer-group
    /// member. `id` is `">"` for undelivered entries or `"0"` for this
    /// consumer's pending entries. A nil reply (blocking timeout or empty
    /// pending list) yields an empty vec.
    pub async fn xread_group(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        id: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, RedisError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(key).arg(id);

        type ReadReply = Option<Vec<(String, Vec<(String, Vec<(String, String)>)>)>>;
        let reply: ReadReply = self.query(&cmd).await?;

        let mut entries = Vec::new();
        if let Some(streams) = reply {
            for (_, stream_entries) in streams {
                for (id, fields) in stream_entries {
                    entries.push(StreamEntry { id, fields });
                }
            }
        }
        Ok(entries)
    }

    /// Acknowledge processed entries in one call.
    pub async fn xack(&self, key: &str, group: &str, ids: &[String]) -> Result<(), RedisError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("XACK");
        cmd.arg(key).arg(group);
        for id in ids {
            cmd.arg(id);
        }

        let _: i64 = self.query(&cmd).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;

    #[test]
    fn test_client_creation() {
        let config = RedisConfig::default();
        assert!(RedisClient::new(&config).is_ok());
    }

    #[test]
    fn test_stream_entry_field_lookup() {
        let entry = StreamEntry {
            id: "1-0".to_string(),
            fields: vec![
                ("message".to_string(), "{}".to_string()),
                ("extra".to_string(), "x".to_string()),
            ],
        };

        assert_eq!(entry.field("message"), Some("{}"));
        assert_eq!(entry.field("extra"), Some("x"));
        assert_eq!(entry.field("missing"), None);
    }
}
