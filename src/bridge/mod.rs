//! Per-session stream bridges.
//!
//! A bridge is the concurrency orchestrator between one network-level
//! bidirectional stream and one backend handler invocation. It demultiplexes
//! the inbound stream into a handshake-then-steady-state protocol, runs the
//! reader, writer and handler-invoker tasks under one fail-fast
//! [`TaskGroup`](crate::group::TaskGroup), and resolves the whole session to
//! a single result.
//!
//! [`consume::serve_consume`] and [`publish::serve_publish`] are structural
//! mirrors of each other: consume forwards backend messages out and client
//! confirmations in, publish forwards client messages in and backend
//! acknowledgements out.

pub mod consume;
pub mod publish;

use async_trait::async_trait;
use thiserror::Error;

use crate::backend::BackendError;

pub use consume::serve_consume;
pub use publish::serve_publish;

/// Failures the transport layer can surface into a bridge.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Terminal result of one stream bridge invocation.
///
/// Protocol violations terminate the session and are never retried. Backend
/// errors pass through the bridge verbatim. Cancellation is a clean end of
/// session, distinguished so the status mapper can report it as such.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("consumption already started")]
    ConsumeAlreadyStarted,

    #[error("publishing already started")]
    PublishAlreadyStarted,

    #[error("invalid confirmation")]
    InvalidConfirmation,

    #[error("invalid message")]
    InvalidMessage,

    #[error("invalid request - this is possibly a bug in your client library")]
    InvalidRequest,

    #[error("session canceled")]
    Canceled,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Receiving half of a bidirectional stream, as seen by a bridge.
#[async_trait]
pub trait EnvelopeStream: Send {
    type Envelope: Send;

    /// Pull the next inbound envelope. `Ok(None)` is clean end-of-stream.
    async fn recv(&mut self) -> Result<Option<Self::Envelope>, TransportError>;
}

/// Sending half of a bidirectional stream, as seen by a bridge.
#[async_trait]
pub trait EnvelopeSink: Send {
    type Item: Send;

    /// Forward one outbound item onto the stream.
    async fn send(&mut self, item: Self::Item) -> Result<(), TransportError>;
}
