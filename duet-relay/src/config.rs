//! Configuration loading for duet-relay.
//!
//! Configuration is loaded from a TOML file (default: `duet.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for duet-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Rendezvous store configuration.
    #[serde(default)]
    pub host: HostConfig,
    /// Relay pairing engine configuration.
    #[serde(default)]
    pub relay: RelayConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Prune task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Name of the cookie carrying the anonymous caller identity.
    #[serde(default = "default_identity_cookie")]
    pub identity_cookie: String,
}

/// Rendezvous store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Lifetime of a host mailbox in seconds (default: 60).
    #[serde(default = "default_host_ttl")]
    pub ttl_secs: u64,
    /// Relay endpoint prefixes that minted locations are spread across.
    #[serde(default = "default_relayers")]
    pub relayers: Vec<String>,
}

/// Relay pairing engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Idle time in seconds before a connection is cancelled (default: 60).
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Largest chunk read from a source before it is written on (default: 64 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chunks buffered between the relay and a streamed response (default: 8).
    #[serde(default = "default_stream_buffer_chunks")]
    pub stream_buffer_chunks: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Prune task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Prune interval in seconds (default: 60).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable the prune task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_identity_cookie() -> String {
    "identity".to_string()
}

fn default_host_ttl() -> u64 {
    60
}

fn default_relayers() -> Vec<String> {
    vec!["/api/relay/".to_string()]
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    64 * 1024 // 64 KiB
}

fn default_stream_buffer_chunks() -> usize {
    8
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            identity_cookie: default_identity_cookie(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_host_ttl(),
            relayers: default_relayers(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            chunk_size: default_chunk_size(),
            stream_buffer_chunks: default_stream_buffer_chunks(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl HostConfig {
    /// Mailbox lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl RelayConfig {
    /// Connection idle timeout.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl CleanupConfig {
    /// Prune interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the services cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                reason: reason.to_string(),
            })
        };
        if self.host.ttl_secs == 0 {
            return invalid("host.ttl_secs must be > 0");
        }
        if self.relay.idle_timeout_secs == 0 {
            return invalid("relay.idle_timeout_secs must be > 0");
        }
        if self.relay.chunk_size == 0 {
            return invalid("relay.chunk_size must be > 0");
        }
        if self.relay.stream_buffer_chunks == 0 {
            return invalid("relay.stream_buffer_chunks must be > 0");
        }
        if self.cleanup.interval_secs == 0 {
            return invalid("cleanup.interval_secs must be > 0");
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}
