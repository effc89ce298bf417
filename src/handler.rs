//! Backend-facing handler contract.
//!
//! A backend plugs into the gateway by implementing [`ConsumeHandler`],
//! [`PublishHandler`], or both. The stream bridges invoke a handler exactly
//! once per session, after the handshake, handing it the session's two
//! steady-state channels. A handler owns broker I/O and nothing else: it
//! never sees the network stream, only the channels and the session's
//! cancellation scope.
//!
//! Handlers must treat `ctx` cancellation as an immediate, cooperative stop
//! signal and must not block indefinitely once `ctx` is cancelled. A
//! cancellation observed while blocked is a clean exit (`Ok(())`), not an
//! error.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bridge::SessionError;
use crate::wire::{Confirmation, Message, Offset, StartConsumeRequest, StartPublishRequest};

/// Initial position of a consumer session, derived from the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Only messages published after the session began.
    Newest,
    /// Replay from the beginning of the retained log.
    Oldest,
    /// Start at a backend-interpreted position.
    Explicit(u64),
}

impl Default for StartOffset {
    fn default() -> Self {
        Self::Newest
    }
}

/// Immutable identity of one consume session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub consumer: String,
    pub topic: String,
    pub offset: StartOffset,
}

impl From<StartConsumeRequest> for ConsumerConfig {
    fn from(start: StartConsumeRequest) -> Self {
        let offset = match Offset::try_from(start.initial_offset).unwrap_or(Offset::Default) {
            Offset::Oldest => StartOffset::Oldest,
            Offset::Explicit => StartOffset::Explicit(start.explicit_offset),
            // No stated preference means live traffic only.
            Offset::Newest | Offset::Default => StartOffset::Newest,
        };
        Self {
            consumer: start.consumer,
            topic: start.topic,
            offset,
        }
    }
}

/// Immutable identity of one publish session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    pub topic: String,
}

impl From<StartPublishRequest> for PublisherConfig {
    fn from(start: StartPublishRequest) -> Self {
        Self { topic: start.topic }
    }
}

/// Consume-direction backend capability.
#[async_trait]
pub trait ConsumeHandler: Send + Sync {
    /// Serve one consume session.
    ///
    /// Messages sent into `for_client` are forwarded to the client in order;
    /// each client acknowledgement arrives on `confirmations`. Both channels
    /// are rendezvous points owned by this call for the session's lifetime.
    /// The return value is the authoritative session result.
    async fn handle_consume(
        &self,
        ctx: CancellationToken,
        config: ConsumerConfig,
        for_client: mpsc::Sender<Message>,
        confirmations: mpsc::Receiver<Confirmation>,
    ) -> Result<(), SessionError>;
}

/// Publish-direction backend capability.
#[async_trait]
pub trait PublishHandler: Send + Sync {
    /// Serve one publish session.
    ///
    /// Each client message arrives on `messages`; every acknowledgement sent
    /// into `acks` is forwarded to the client in order.
    async fn handle_publish(
        &self,
        ctx: CancellationToken,
        config: PublisherConfig,
        messages: mpsc::Receiver<Message>,
        acks: mpsc::Sender<Confirmation>,
    ) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_from_handshake() {
        let config = ConsumerConfig::from(StartConsumeRequest {
            topic: "orders".to_string(),
            consumer: "c1".to_string(),
            initial_offset: Offset::Oldest as i32,
            explicit_offset: 0,
        });
        assert_eq!(config.topic, "orders");
        assert_eq!(config.consumer, "c1");
        assert_eq!(config.offset, StartOffset::Oldest);
    }

    #[test]
    fn test_default_offset_means_newest() {
        let config = ConsumerConfig::from(StartConsumeRequest {
            topic: "t".to_string(),
            consumer: "c".to_string(),
            initial_offset: Offset::Default as i32,
            explicit_offset: 0,
        });
        assert_eq!(config.offset, StartOffset::Newest);
    }

    #[test]
    fn test_explicit_offset_carries_position() {
        let config = ConsumerConfig::from(StartConsumeRequest {
            topic: "t".to_string(),
            consumer: "c".to_string(),
            initial_offset: Offset::Explicit as i32,
            explicit_offset: 42,
        });
        assert_eq!(config.offset, StartOffset::Explicit(42));
    }

    #[test]
    fn test_unknown_offset_value_falls_back_to_newest() {
        let config = ConsumerConfig::from(StartConsumeRequest {
            topic: "t".to_string(),
            consumer: "c".to_string(),
            initial_offset: 77,
            explicit_offset: 0,
        });
        assert_eq!(config.offset, StartOffset::Newest);
    }
}
