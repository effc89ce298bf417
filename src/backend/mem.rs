//! In-memory backend.
//!
//! Keeps every topic as a retained log plus a broadcast fan-out for live
//! traffic, which makes the offset semantics exact: `Oldest` replays the
//! log from the start, `Explicit(n)` from index `n`, `Newest` sees only
//! messages published after the consumer subscribed. Intended for tests and
//! local development; nothing survives the process.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::backend::BackendError;
use crate::bridge::SessionError;
use crate::handler::{
    ConsumeHandler, ConsumerConfig, PublishHandler, PublisherConfig, StartOffset,
};
use crate::wire::{Confirmation, Message};

/// Live messages buffered per subscriber before it counts as lagged.
const LIVE_BUFFER: usize = 1024;

struct Topic {
    log: Vec<Message>,
    live: broadcast::Sender<Message>,
}

impl Default for Topic {
    fn default() -> Self {
        let (live, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            log: Vec::new(),
            live,
        }
    }
}

/// In-memory implementation of both handler contracts.
#[derive(Default)]
pub struct MemBackend {
    topics: Mutex<HashMap<String, Topic>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsumeHandler for MemBackend {
    async fn handle_consume(
        &self,
        ctx: CancellationToken,
        config: ConsumerConfig,
        for_client: mpsc::Sender<Message>,
        mut confirmations: mpsc::Receiver<Confirmation>,
    ) -> Result<(), SessionError> {
        // Snapshot the backlog and subscribe under one lock so no message
        // is missed or seen twice at the replay/live boundary.
        let (backlog, mut live) = {
            let mut topics = self.topics.lock().await;
            let topic = topics.entry(config.topic.clone()).or_default();
            let backlog: Vec<Message> = match config.offset {
                StartOffset::Newest => Vec::new(),
                StartOffset::Oldest => topic.log.clone(),
                StartOffset::Explicit(n) => {
                    topic.log.iter().skip(n as usize).cloned().collect()
                }
            };
            (backlog, topic.live.subscribe())
        };

        debug!(
            topic = %config.topic,
            consumer = %config.consumer,
            backlog = backlog.len(),
            "mem consume session attached"
        );

        let mut pending: VecDeque<Message> = backlog.into();
        let mut confirmations_open = true;
        loop {
            if let Some(next) = pending.front().cloned() {
                tokio::select! {
                    _ = ctx.cancelled() => return Ok(()),
                    received = confirmations.recv(), if confirmations_open => {
                        match received {
                            Some(confirmation) => {
                                trace!(msg_id = %confirmation.msg_id, "confirmed");
                            }
                            None => confirmations_open = false,
                        }
                    }
                    sent = for_client.send(next) => {
                        if sent.is_err() {
                            // Session is resolving; the bridge owns the result.
                            return Ok(());
                        }
                        pending.pop_front();
                    }
                }
            } else {
                tokio::select! {
                    _ = ctx.cancelled() => return Ok(()),
                    received = confirmations.recv(), if confirmations_open => {
                        match received {
                            Some(confirmation) => {
                                trace!(msg_id = %confirmation.msg_id, "confirmed");
                            }
                            None => confirmations_open = false,
                        }
                    }
                    received = live.recv() => match received {
                        Ok(message) => pending.push_back(message),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            return Err(BackendError::Lagged(n).into());
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PublishHandler for MemBackend {
    async fn handle_publish(
        &self,
        ctx: CancellationToken,
        config: PublisherConfig,
        mut messages: mpsc::Receiver<Message>,
        acks: mpsc::Sender<Confirmation>,
    ) -> Result<(), SessionError> {
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
            message
                .metadata
                .insert("publishedAt".to_string(), chrono::Utc::now().to_rfc3339());
            let msg_id = message.id.clone();

            {
                let mut topics = self.topics.lock().await;
                let topic = topics.entry(config.topic.clone()).or_default();
                topic.log.push(message.clone());
                // No live subscribers is not an error.
                let _ = topic.live.send(message);
            }

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
