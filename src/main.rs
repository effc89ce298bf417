use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use axon::backend::{MemBackend, RedisBackend};
use axon::config::{BackendKind, GatewayConfig};
use axon::server::Gateway;
use axon::shutdown::ShutdownSignal;

#[tokio::main]
async fn main() {
    // 1. Initialize Logging
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    // 2. Load Configuration
    let config = match GatewayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // 3. Pick the Backend
    let gateway = match config.backend.kind {
        BackendKind::Mem => {
            info!("Using in-memory backend");
            let backend = Arc::new(MemBackend::new());
            Gateway::new(config.clone())
                .with_consume_handler(backend.clone())
                .with_publish_handler(backend)
        }
        BackendKind::Redis => {
            info!(url = %config.redis.url, "Using Redis Streams backend");
            let backend = match RedisBackend::new(&config.redis) {
                Ok(backend) => Arc::new(backend),
                Err(e) => {
                    error!("Failed to initialize Redis backend: {}", e);
                    std::process::exit(1);
                }
            };
            Gateway::new(config.clone())
                .with_consume_handler(backend.clone())
                .with_publish_handler(backend)
        }
    };

    // 4. Serve Until Shutdown
    let shutdown = ShutdownSignal::with_grace(Duration::from_secs(
        config.server.shutdown_grace_secs,
    ));
    let signal = shutdown.clone();
    tokio::spawn(async move { signal.wait().await });

    info!(port = config.server.port, "Axon gateway starting");
    if let Err(e) = gateway.serve(shutdown).await {
        error!("Gateway failed: {}", e);
        std::process::exit(1);
    }
}
