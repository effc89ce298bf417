//! Graceful shutdown coordination for Axon.
//!
//! This module provides a [`ShutdownSignal`] that turns a termination signal
//! (SIGTERM, SIGINT) into a [`CancellationToken`] the server and every
//! in-flight session observe.
//!
//! # Example
//!
//! ```rust,ignore
//! use axon::shutdown::ShutdownSignal;
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutdown = ShutdownSignal::new();
//!
//!     let signal = shutdown.clone();
//!     tokio::spawn(async move { signal.wait().await });
//!
//!     // Hand shutdown.token() to the server; it stops accepting when
//!     // the token trips and drains sessions within the grace period.
//! }
//! ```

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Default grace period in seconds.
const DEFAULT_GRACE_SECS: u64 = 30;

/// A signal for coordinating graceful shutdown across components.
///
/// Cloning is cheap; every clone observes the same token.
#[derive(Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
    /// How long in-flight sessions get to wind down after the trigger.
    grace: Duration,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with the default grace period (30 seconds).
    pub fn new() -> Self {
        Self::with_grace(Duration::from_secs(DEFAULT_GRACE_SECS))
    }

    /// Create a new shutdown signal with a custom grace period.
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    /// Get the grace period.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// The token that trips when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for a termination signal (SIGTERM or SIGINT), then trip the token.
    pub async fn wait(&self) {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        self.token.cancel();
    }

    /// Check if shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown manually (for testing or programmatic shutdown).
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        self.token.cancel();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
