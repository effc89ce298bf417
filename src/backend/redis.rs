//! Durable pub/sub backend over Redis Streams.
//!
//! One stream per topic. The handshake's `consumer` name becomes the
//! consumer-group name, so sessions sharing a consumer identity share
//! delivery; each session joins the group under a unique member name.
//! Confirmations translate to `XACK`, publishes to `XADD`; unconfirmed
//! entries stay pending in the group and survive the session.
//!
//! Offset semantics: `Oldest` creates the group at `0`, `Newest` at `$`,
//! and `Explicit(n)` at entry id `n-0` (Redis stream ids are
//! millisecond-timestamp based, so an explicit position is a stream id,
//! not a log index).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::redis::{cmd, Value as RedisValue};
use deadpool_redis::{Pool, Runtime};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::BackendError;
use crate::bridge::SessionError;
use crate::config::RedisConfig;
use crate::group::TaskGroup;
use crate::handler::{
    ConsumeHandler, ConsumerConfig, PublishHandler, PublisherConfig, StartOffset,
};
use crate::wire::{Confirmation, Message};

/// Shape of an XREADGROUP reply: stream name with its batch of
/// (entry id, field map) pairs. `None` means the blocking read timed out.
type ReadReply = Option<Vec<(String, Vec<(String, HashMap<String, RedisValue>)>)>>;

/// Redis Streams implementation of both handler contracts.
pub struct RedisBackend {
    pool: Pool,
    block_ms: u64,
    batch_size: usize,
}

impl RedisBackend {
    /// Build a backend with its own connection pool.
    pub fn new(config: &RedisConfig) -> Result<Self, BackendError> {
        let pool = deadpool_redis::Config::from_url(&config.url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        info!(url = %config.url, "redis backend connected");
        Ok(Self {
            pool,
            block_ms: config.block_ms,
            batch_size: config.batch_size,
        })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, BackendError> {
        self.pool
            .get()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))
    }

    /// Create the consumer group, tolerating a concurrent creation.
    async fn ensure_group(
        &self,
        topic: &str,
        group: &str,
        start_id: &str,
    ) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let created: Result<(), _> = cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => {
                info!(topic = %topic, group = %group, start = %start_id, "created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(topic = %topic, group = %group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(BackendError::Command(e.to_string())),
        }
    }
}

/// Entry id the consumer group starts delivering from.
fn group_start_id(offset: &StartOffset) -> String {
    match offset {
        StartOffset::Newest => "$".to_string(),
        StartOffset::Oldest => "0".to_string(),
        StartOffset::Explicit(n) => format!("{n}-0"),
    }
}

fn string_field(fields: &HashMap<String, RedisValue>, key: &str) -> Option<String> {
    fields.get(key).and_then(|value| match value {
        RedisValue::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        RedisValue::SimpleString(s) => Some(s.clone()),
        _ => None,
    })
}

fn bytes_field(fields: &HashMap<String, RedisValue>, key: &str) -> Option<Vec<u8>> {
    fields.get(key).and_then(|value| match value {
        RedisValue::BulkString(bytes) => Some(bytes.clone()),
        RedisValue::SimpleString(s) => Some(s.clone().into_bytes()),
        _ => None,
    })
}

/// Rebuild a wire message from a stream entry.
///
/// The publisher-assigned id is preferred for confirmation correlation; an
/// entry written by another producer falls back to its stream id.
fn entry_to_message(entry_id: &str, fields: &HashMap<String, RedisValue>) -> Message {
    let id = string_field(fields, "id")
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| entry_id.to_string());
    let data = bytes_field(fields, "data").unwrap_or_default();
    let mut metadata = HashMap::new();
    metadata.insert("streamEntryId".to_string(), entry_id.to_string());
    if let Some(published_at) = string_field(fields, "publishedAt") {
        metadata.insert("publishedAt".to_string(), published_at);
    }
    Message { data, id, metadata }
}

#[async_trait]
impl ConsumeHandler for RedisBackend {
    async fn handle_consume(
        &self,
        ctx: CancellationToken,
        config: ConsumerConfig,
        for_client: mpsc::Sender<Message>,
        mut confirmations: mpsc::Receiver<Confirmation>,
    ) -> Result<(), SessionError> {
        let group_name = config.consumer.clone();
        let member = format!("{}-{}", config.consumer, Uuid::new_v4());
        self.ensure_group(&config.topic, &group_name, &group_start_id(&config.offset))
            .await?;

        // Maps a delivered message id back to the stream entry to XACK.
        let unacked: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut tasks: TaskGroup<SessionError> = TaskGroup::new(&ctx);

        // Read loop: blocking group reads, forwarded in entry order.
        let token = tasks.token();
        let pool = self.pool.clone();
        let topic = config.topic.clone();
        let group = group_name.clone();
        let pending = unacked.clone();
        let block_ms = self.block_ms;
        let batch_size = self.batch_size;
        tasks.spawn(async move {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| BackendError::Connection(e.to_string()))?;
            let mut read = cmd("XREADGROUP");
            read.arg("GROUP")
                .arg(&group)
                .arg(&member)
                .arg("COUNT")
                .arg(batch_size)
                .arg("BLOCK")
                .arg(block_ms)
                .arg("STREAMS")
                .arg(&topic)
                .arg(">");
            loop {
                let reply: ReadReply = tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    result = read.query_async(&mut conn) => match result {
                        Ok(reply) => reply,
                        Err(_) if token.is_cancelled() => return Ok(()),
                        Err(e) => return Err(BackendError::Command(e.to_string()).into()),
                    },
                };
                let Some(streams) = reply else {
                    // Blocking read timed out with nothing new.
                    continue;
                };
                for (_stream, entries) in streams {
                    for (entry_id, fields) in entries {
                        let message = entry_to_message(&entry_id, &fields);
                        pending.lock().await.insert(message.id.clone(), entry_id);
                        tokio::select! {
                            _ = token.cancelled() => return Ok(()),
                            sent = for_client.send(message) => {
                                if sent.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
        });

        // Ack loop: one XACK per confirmation, on its own connection.
        let token = tasks.token();
        let pool = self.pool.clone();
        let topic = config.topic.clone();
        let group = group_name.clone();
        let pending = unacked.clone();
        tasks.spawn(async move {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| BackendError::Connection(e.to_string()))?;
            loop {
                let confirmation = tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    next = confirmations.recv() => match next {
                        Some(confirmation) => confirmation,
                        None => return Ok(()),
                    },
                };
                match pending.lock().await.remove(&confirmation.msg_id) {
                    Some(entry_id) => {
                        let acked: Result<u64, _> = cmd("XACK")
                            .arg(&topic)
                            .arg(&group)
                            .arg(&entry_id)
                            .query_async(&mut conn)
                            .await;
                        match acked {
                            Ok(_) => debug!(msg_id = %confirmation.msg_id, entry_id = %entry_id, "acked"),
                            Err(_) if token.is_cancelled() => return Ok(()),
                            Err(e) => return Err(BackendError::Command(e.to_string()).into()),
                        }
                    }
                    None => {
                        warn!(msg_id = %confirmation.msg_id, "confirmation for unknown message id");
                    }
                }
            }
        });

        tasks.wait().await
    }
}

#[async_trait]
impl PublishHandler for RedisBackend {
    async fn handle_publish(
        &self,
        ctx: CancellationToken,
        config: PublisherConfig,
        mut messages: mpsc::Receiver<Message>,
        acks: mpsc::Sender<Confirmation>,
    ) -> Result<(), SessionError> {
        let mut conn = self.connection().await?;
        loop {
            let mut message = tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                next = messages.recv() => match next {
                    Some(message) => message,
                    None => return Ok(()),
                },
            };

            if message.id.is_empty() {
                message.id = Uuid::new_v4().to_string();
            }
            let msg_id = message.id.clone();

            let added: Result<String, _> = cmd("XADD")
                .arg(&config.topic)
                .arg("*")
                .arg("id")
                .arg(&message.id)
                .arg("data")
                .arg(&message.data)
                .arg("publishedAt")
                .arg(chrono::Utc::now().to_rfc3339())
                .query_async(&mut conn)
                .await;
            let entry_id = match added {
                Ok(entry_id) => entry_id,
                Err(_) if ctx.is_cancelled() => return Ok(()),
                Err(e) => return Err(BackendError::Command(e.to_string()).into()),
            };
            debug!(topic = %config.topic, msg_id = %msg_id, entry_id = %entry_id, "published");

            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                sent = acks.send(Confirmation { msg_id }) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_start_id_mapping() {
        assert_eq!(group_start_id(&StartOffset::Newest), "$");
        assert_eq!(group_start_id(&StartOffset::Oldest), "0");
        assert_eq!(group_start_id(&StartOffset::Explicit(1700000000000)), "1700000000000-0");
    }

    #[test]
    fn test_entry_to_message_prefers_publisher_id() {
        let mut fields = HashMap::new();
        fields.insert(
            "id".to_string(),
            RedisValue::BulkString(b"msg-42".to_vec()),
        );
        fields.insert(
            "data".to_string(),
            RedisValue::BulkString(b"payload".to_vec()),
        );
        fields.insert(
            "publishedAt".to_string(),
            RedisValue::BulkString(b"2026-01-01T00:00:00Z".to_vec()),
        );

        let message = entry_to_message("1700000000000-0", &fields);
        assert_eq!(message.id, "msg-42");
        assert_eq!(message.data, b"payload");
        assert_eq!(
            message.metadata.get("streamEntryId").map(String::as_str),
            Some("1700000000000-0")
        );
        assert_eq!(
            message.metadata.get("publishedAt").map(String::as_str),
            Some("2026-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_entry_to_message_falls_back_to_entry_id() {
        let mut fields = HashMap::new();
        fields.insert(
            "data".to_string(),
            RedisValue::BulkString(b"payload".to_vec()),
        );

        let message = entry_to_message("1700000000000-7", &fields);
        assert_eq!(message.id, "1700000000000-7");
    }
}
