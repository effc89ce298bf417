//! Configuration module for Axon.
//!
//! Loads configuration from TOML files with environment variable substitution.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 6868
//! endpoints = ["consume", "publish"]
//!
//! [backend]
//! kind = "redis"
//!
//! [redis]
//! url = "${AXON_REDIS_URL}"
//! ```

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Which stream direction a listener accepts.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Consume,
    Publish,
}

/// Which backend serves the sessions.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Mem,
    Redis,
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub redis: RedisConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Stream directions this process serves. A call to a direction not
    /// listed here is refused as unimplemented.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointKind>,

    /// Seconds to let in-flight sessions wind down after a shutdown signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            endpoints: default_endpoints(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_port() -> u16 {
    6868
}

fn default_endpoints() -> Vec<EndpointKind> {
    vec![EndpointKind::Consume, EndpointKind::Publish]
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Backend selection
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// How long a consumer read blocks waiting for new entries.
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    /// Entries fetched per consumer read.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            block_ms: default_block_ms(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_block_ms() -> u64 {
    2000
}

fn default_batch_size() -> usize {
    10
}

impl GatewayConfig {
    /// Load configuration from the default path or AXON_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("AXON_CONFIG").unwrap_or_else(|_| "config/axon.toml".to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        debug!("Parsing TOML configuration");
        let config: GatewayConfig = toml::from_str(&content)?;

        config.validate()?;

        info!(
            port = config.server.port,
            endpoints = config.server.endpoints.len(),
            backend = ?config.backend.kind,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.endpoints.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one endpoint must be enabled".to_string(),
            ));
        }

        if self.backend.kind == BackendKind::Redis {
            if self.redis.url.contains("${") {
                return Err(ConfigError::ValidationError(format!(
                    "Redis URL contains unsubstituted environment variable: {}",
                    self.redis.url
                )));
            }
            if !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://") {
                return Err(ConfigError::ValidationError(format!(
                    "Redis URL must start with redis:// or rediss://: {}",
                    self.redis.url
                )));
            }
            if self.redis.batch_size == 0 {
                return Err(ConfigError::ValidationError(
                    "redis batch_size must be at least 1".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Whether this process serves the given stream direction.
    pub fn endpoint_enabled(&self, kind: EndpointKind) -> bool {
        self.server.endpoints.contains(&kind)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "substituted_value");
        let input = "url = \"${TEST_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"substituted_value\"");
        env::remove_var("TEST_VAR");
    }

    #[test]
    fn test_env_var_not_set() {
        let input = "url = \"${NONEXISTENT_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            port = 7000
        "#;

        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.backend.kind, BackendKind::Mem);
        assert_eq!(config.redis.url, "redis://localhost:6379");
    }

    #[test]
    fn test_parse_endpoints() {
        let toml = r#"
            [server]
            endpoints = ["consume"]
        "#;

        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(config.endpoint_enabled(EndpointKind::Consume));
        assert!(!config.endpoint_enabled(EndpointKind::Publish));
    }

    #[test]
    fn test_parse_redis_backend() {
        let toml = r#"
            [backend]
            kind = "redis"

            [redis]
            url = "redis://queue:6379"
            block_ms = 500
            batch_size = 25
        "#;

        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Redis);
        assert_eq!(config.redis.url, "redis://queue:6379");
        assert_eq!(config.redis.block_ms, 500);
        assert_eq!(config.redis.batch_size, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, 6868);
        assert!(config.endpoint_enabled(EndpointKind::Consume));
        assert!(config.endpoint_enabled(EndpointKind::Publish));
        assert_eq!(config.server.shutdown_grace_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_no_endpoints() {
        let toml = r#"
            [server]
            endpoints = []
        "#;

        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_redis_url() {
        let toml = r#"
            [backend]
            kind = "redis"

            [redis]
            url = "http://not-redis"
        "#;

        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_unsubstituted_redis_url() {
        let toml = r#"
            [backend]
            kind = "redis"

            [redis]
            url = "${SOME_UNSET_REDIS_URL}"
        "#;

        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
