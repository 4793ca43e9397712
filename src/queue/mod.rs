//! Redis-stream-backed durable queue for the message write path.
//!
//! The API appends accepted messages to a stream; a consumer-group worker
//! batch-reads them, bulk-inserts into the message store with bounded
//! retries, and acknowledges. Batches that exhaust their retries are
//! re-appended to a dead-letter stream (and still acknowledged so the
//! pending-entries list does not wedge); a separate drainer retries DLQ
//! entries one row at a time.
//!
//! Delivery is at least once: a crash between insert and ack yields
//! redelivery, and the store may hold duplicate rows as a result.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::config::StreamConfig;
use crate::infrastructure::redis::{RedisClient, StreamEntry};
use crate::store::{Message, MessageStore};

/// Stream entry field holding the JSON-serialized message.
const MESSAGE_FIELD: &str = "message";

/// Consumer group used by the DLQ drainer.
const DLQ_CONSUMER_GROUP: &str = "dlq_processors";

/// Entries read from the DLQ per pass.
const DLQ_READ_COUNT: usize = 100;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub stream_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub blocking_duration: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub batch_size: usize,
    pub dlq_key: String,
}

impl From<&StreamConfig> for QueueConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            stream_key: config.key.clone(),
            consumer_group: config.consumer_group.clone(),
            consumer_name: config.consumer_name.clone(),
            blocking_duration: config.blocking_duration(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            batch_size: config.batch_size,
            dlq_key: config.dlq_key.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
enum DecodeError {
    #[error("entry has no `message` field")]
    MissingField,

    #[error("invalid message payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct MessageQueue {
    redis: Arc<RedisClient>,
    config: QueueConfig,
    messages: MessageStore,
}

impl MessageQueue {
    pub fn new(redis: Arc<RedisClient>, config: QueueConfig, messages: MessageStore) -> Self {
        Self {
            redis,
            config,
            messages,
        }
    }

    /// Append a message to the stream. Returns once the broker has assigned
    /// the entry an id; persistence happens asynchronously in the worker.
    pub async fn enqueue(&self, message: &Message) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)?;
        let entry_id = self
            .redis
            .xadd(&self.config.stream_key, &[(MESSAGE_FIELD, &payload)])
            .await?;

        tracing::debug!(
            entry_id = %entry_id,
            sender_id = message.sender_id,
            receiver_id = message.receiver_id,
            "message enqueued"
        );
        Ok(())
    }

    /// Consumer-group worker loop. Runs until a shutdown signal arrives;
    /// an in-flight batch interrupted by shutdown is left unacknowledged
    /// in the pending-entries list.
    pub async fn process_messages(
        &self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), QueueError> {
        // Creating an existing group is not an error; anything else is fatal.
        self.redis
            .xgroup_create(&self.config.stream_key, &self.config.consumer_group)
            .await?;

        tracing::info!(
            group = %self.config.consumer_group,
            consumer = %self.config.consumer_name,
            batch_size = self.config.batch_size,
            "message worker started"
        );

        loop {
            let entries = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("message worker stopping");
                    return Ok(());
                }
                read = self.redis.xread_group(
                    &self.config.stream_key,
                    &self.config.consumer_group,
                    &self.config.consumer_name,
                    ">",
                    self.config.batch_size,
                    Some(self.config.blocking_duration),
                ) => match read {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::error!(error = %e, "error reading from consumer group");
                        sleep(self.config.retry_delay).await;
                        continue;
                    }
                },
            };

            if entries.is_empty() {
                continue;
            }

            self.process_batch(entries).await;
        }
    }

    async fn process_batch(&self, entries: Vec<StreamEntry>) {
        let mut batch = Vec::with_capacity(entries.len());
        let mut entry_ids = Vec::with_capacity(entries.len());
        let mut poison_ids = Vec::new();

        for entry in entries {
            match decode_entry(&entry) {
                Ok(message) => {
                    batch.push(message);
                    entry_ids.push(entry.id);
                }
                Err(e) => {
                    tracing::error!(
                        entry_id = %entry.id,
                        error = %e,
                        "dropping undecodable stream entry"
                    );
                    poison_ids.push(entry.id);
                }
            }
        }

        // Poison entries are acknowledged right away so they leave the
        // pending-entries list instead of being redelivered forever.
        self.ack(&self.config.stream_key, &self.config.consumer_group, &poison_ids)
            .await;

        if batch.is_empty() {
            return;
        }

        let mut persisted = false;
        for attempt in 1..=self.config.max_retries {
            match self.messages.bulk_insert(&mut batch).await {
                Ok(()) => {
                    persisted = true;
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        retry = attempt,
                        batch_size = batch.len(),
                        "failed to persist message batch"
                    );
                    sleep(self.config.retry_delay).await;
                }
            }
        }

        if persisted {
            tracing::info!(count = batch.len(), "message batch persisted");
        } else {
            tracing::error!(
                batch_size = batch.len(),
                "message batch failed after retries, routing to DLQ"
            );
            for message in &batch {
                if let Err(e) = self.push_to_dlq(message).await {
                    tracing::error!(
                        error = %e,
                        sender_id = message.sender_id,
                        receiver_id = message.receiver_id,
                        "failed to push message to DLQ"
                    );
                }
            }
        }

        // Acknowledge either way so a failed batch cannot wedge the
        // pending-entries list; the DLQ now holds the failed copies.
        self.ack(&self.config.stream_key, &self.config.consumer_group, &entry_ids)
            .await;
    }

    async fn push_to_dlq(&self, message: &Message) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)?;
        self.redis
            .xadd(&self.config.dlq_key, &[(MESSAGE_FIELD, &payload)])
            .await?;
        Ok(())
    }

    async fn ack(&self, key: &str, group: &str, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.redis.xack(key, group, ids).await {
            tracing::error!(error = %e, count = ids.len(), "failed to acknowledge stream entries");
        }
    }

    /// Dead-letter drainer. Each pass retries the entries this consumer has
    /// already failed, then blocks for new ones. Entries are acknowledged
    /// only after a successful single-row insert, so a failure leaves the
    /// entry pending for the next pass.
    pub async fn process_dlq(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), QueueError> {
        self.redis
            .xgroup_create(&self.config.dlq_key, DLQ_CONSUMER_GROUP)
            .await?;

        tracing::info!(stream = %self.config.dlq_key, "DLQ processor started");

        loop {
            let entries = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("DLQ processor stopping");
                    return Ok(());
                }
                read = self.read_dlq() => match read {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::error!(error = %e, "error reading from DLQ");
                        sleep(self.config.retry_delay).await;
                        continue;
                    }
                },
            };

            if entries.is_empty() {
                continue;
            }

            let mut failed = 0usize;
            for entry in entries {
                match decode_entry(&entry) {
                    Ok(mut message) => match self.messages.insert(&mut message).await {
                        Ok(()) => {
                            tracing::info!(
                                entry_id = %entry.id,
                                message_id = message.id,
                                "message reprocessed from DLQ"
                            );
                            self.ack(
                                &self.config.dlq_key,
                                DLQ_CONSUMER_GROUP,
                                std::slice::from_ref(&entry.id),
                            )
                            .await;
                        }
                        Err(e) => {
                            failed += 1;
                            tracing::error!(
                                entry_id = %entry.id,
                                error = %e,
                                "failed to reprocess message from DLQ"
                            );
                        }
                    },
                    Err(e) => {
                        failed += 1;
                        tracing::error!(
                            entry_id = %entry.id,
                            error = %e,
                            "invalid message in DLQ"
                        );
                    }
                }
            }

            // Failed entries stay pending; back off before retrying them.
            if failed > 0 {
                sleep(self.config.retry_delay).await;
            }
        }
    }

    /// Pending entries first so earlier failures are retried before new
    /// arrivals are picked up.
    async fn read_dlq(&self) -> Result<Vec<StreamEntry>, redis::RedisError> {
        let pending = self
            .redis
            .xread_group(
                &self.config.dlq_key,
                DLQ_CONSUMER_GROUP,
                &self.config.consumer_name,
                "0",
                DLQ_READ_COUNT,
                None,
            )
            .await?;
        if !pending.is_empty() {
            return Ok(pending);
        }

        self.redis
            .xread_group(
                &self.config.dlq_key,
                DLQ_CONSUMER_GROUP,
                &self.config.consumer_name,
                ">",
                DLQ_READ_COUNT,
                Some(self.config.blocking_duration),
            )
            .await
    }
}

fn decode_entry(entry: &StreamEntry) -> Result<Message, DecodeError> {
    let Some(payload) = entry.field(MESSAGE_FIELD) else {
        return Err(DecodeError::MissingField);
    };
    Ok(serde_json::from_str(payload)?)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn entry_with_fields(fields: Vec<(String, String)>) -> StreamEntry {
        StreamEntry {
            id: "1-0".to_string(),
            fields,
        }
    }

    #[test]
    fn test_decode_entry_round_trips_message() {
        let message = Message {
            id: 0,
            timestamp: Utc::now(),
            content: "hi".to_string(),
            sender_id: 1,
            receiver_id: 2,
            read_status: false,
        };
        let payload = serde_json::to_string(&message).unwrap();
        let entry = entry_with_fields(vec![(MESSAGE_FIELD.to_string(), payload)]);

        let decoded = decode_entry(&entry).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_entry_missing_field() {
        let entry = entry_with_fields(vec![("other".to_string(), "x".to_string())]);
        assert!(matches!(
            decode_entry(&entry),
            Err(DecodeError::MissingField)
        ));
    }

    #[test]
    fn test_decode_entry_invalid_json() {
        let entry = entry_with_fields(vec![(MESSAGE_FIELD.to_string(), "not json".to_string())]);
        assert!(matches!(decode_entry(&entry), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_queue_config_from_stream_settings() {
        let stream = StreamConfig::default();
        let config = QueueConfig::from(&stream);

        assert_eq!(config.stream_key, "messages_stream");
        assert_eq!(config.consumer_group, "message_processors");
        assert_eq!(config.consumer_name, "message_processor_1");
        assert_eq!(config.blocking_duration, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.dlq_key, "messages_dlq");
    }
}
