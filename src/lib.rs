//! # Axon Stream Gateway
//!
//! A backend-agnostic gateway for bidirectional message streaming: clients
//! open one framed connection per session, consume from or publish to a
//! topic, and a pluggable backend does the broker I/O.
//!
//! ## Architecture
//!
//! ```text
//! Client <-> Framed TCP <-> Stream Bridge <-> Handler <-> Broker
//! ```
//!
//! ## Modules
//!
//! - [`wire`]: Protobuf envelopes exchanged on the wire
//! - [`bridge`]: Per-session orchestration of reader, writer and handler
//! - [`handler`]: The contract a backend implements
//! - [`backend`]: In-memory and Redis Streams backends
//! - [`server`]: Framed TCP front door with graceful shutdown

pub mod backend;
pub mod bridge;
pub mod config;
pub mod group;
pub mod handler;
pub mod server;
pub mod shutdown;
pub mod status;
pub mod wire;

// Re-export commonly used types at crate root
pub use backend::{BackendError, MemBackend, RedisBackend};
pub use bridge::{serve_consume, serve_publish, SessionError, TransportError};
pub use config::{ConfigError, GatewayConfig};
pub use handler::{ConsumeHandler, ConsumerConfig, PublishHandler, PublisherConfig, StartOffset};
pub use server::{Gateway, GatewayError};
pub use shutdown::ShutdownSignal;

/// Default listen port
pub const DEFAULT_PORT: u16 = 6868;
