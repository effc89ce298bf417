//! Broker backends.
//!
//! Each backend implements the handler contract from [`crate::handler`] for
//! one broker technology. The gateway selects a backend once at startup from
//! configuration; the bridges never know which one they are talking to.
//!
//! ## Built-in backends
//!
//! - [`MemBackend`]: in-memory topics, for tests and local development
//! - [`RedisBackend`]: durable pub/sub over Redis Streams consumer groups

pub mod mem;
pub mod redis;

use thiserror::Error;

pub use mem::MemBackend;
pub use redis::RedisBackend;

/// Errors reported by a backend handler.
///
/// The bridge treats these as opaque: they propagate verbatim to the
/// session's terminal status without interpretation or retry.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    /// The consumer fell too far behind the topic's live traffic.
    #[error("consumer lagged behind by {0} messages")]
    Lagged(u64),
}
