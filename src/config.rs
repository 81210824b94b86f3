//! Configuration management for the MCP runtime
//!
//! Loads, parses, validates, and merges runtime configuration from a YAML
//! file, environment variables, and CLI overrides, in that order.

use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Streamable HTTP transport settings
    #[serde(default)]
    pub http: HttpConfig,
    /// WebSocket transport settings
    #[serde(default)]
    pub websocket: WebSocketConfig,
    /// Session manager settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Rate limiter settings
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Schema cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Tracing/log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Streamable HTTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Path of the single multiplexed MCP endpoint
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,
    /// SSE heartbeat interval, in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Maximum number of cached CORS header blocks before round-robin replace
    #[serde(default = "default_cors_cache_capacity")]
    pub cors_cache_capacity: usize,
    /// Maximum accepted request body size, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Origins allowed to talk to the endpoint. Empty disables the
    /// check entirely; `"*"` allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_endpoint_path() -> String {
    "/mcp".to_string()
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_cors_cache_capacity() -> usize {
    8
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            endpoint_path: default_endpoint_path(),
            heartbeat_secs: default_heartbeat_secs(),
            cors_cache_capacity: default_cors_cache_capacity(),
            max_body_bytes: default_max_body_bytes(),
            allowed_origins: Vec::new(),
        }
    }
}

/// WebSocket server transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Address the WebSocket listener binds to
    #[serde(default = "default_ws_bind_addr")]
    pub bind_addr: String,
    /// Maximum number of concurrently connected clients
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Number of independent segment mutexes guarding the client slot table
    #[serde(default = "default_num_segments")]
    pub num_segments: usize,
    /// Consecutive unanswered pings before a client is dropped
    #[serde(default = "default_max_ping_failures")]
    pub max_ping_failures: u32,
    /// Interval between ping sweeps, in seconds
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// How long a slot may sit idle before the sweep pings it, in seconds
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    /// Enable the heuristic big-endian length-prefix fast path
    #[serde(default)]
    pub length_prefix_fast_path: bool,
}

fn default_ws_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_max_clients() -> usize {
    1024
}

fn default_num_segments() -> usize {
    16
}

fn default_max_ping_failures() -> u32 {
    3
}

fn default_ping_interval_secs() -> u64 {
    20
}

fn default_ping_timeout_secs() -> u64 {
    20
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_ws_bind_addr(),
            max_clients: default_max_clients(),
            num_segments: default_num_segments(),
            max_ping_failures: default_max_ping_failures(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            length_prefix_fast_path: false,
        }
    }
}

/// Session manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of concurrently tracked sessions
    #[serde(default = "default_session_capacity")]
    pub capacity: usize,
    /// Inactivity timeout before a session is eligible for expiry, in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// Interval between background sweeper passes, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_session_capacity() -> usize {
    10_000
}

fn default_session_ttl_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: default_session_capacity(),
            ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Fixed-window rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests allowed per client key per window
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,
    /// Window length, in seconds
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

fn default_rate_limit_max_requests() -> u32 {
    120
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max_requests(),
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

/// Bounded LRU schema-cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries held by the schema cache; `0` disables caching
    #[serde(default = "default_schema_cache_capacity")]
    pub schema_cache_capacity: usize,
}

fn default_schema_cache_capacity() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            schema_cache_capacity: default_schema_cache_capacity(),
        }
    }
}

/// Logging/tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"mcprt=info"`
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit structured JSON log lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "mcprt=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a YAML file, falling back to defaults if the
    /// file does not exist, then apply environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Config(format!("failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| RuntimeError::Config(format!("failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(addr) = std::env::var("MCPRT_HTTP_BIND_ADDR") {
            self.http.bind_addr = addr;
        }
        if let Ok(addr) = std::env::var("MCPRT_WS_BIND_ADDR") {
            self.websocket.bind_addr = addr;
        }
        if let Ok(filter) = std::env::var("MCPRT_LOG_FILTER") {
            self.logging.filter = filter;
        }
        if let Ok(cap) = std::env::var("MCPRT_SESSION_CAPACITY") {
            match cap.parse() {
                Ok(v) => self.session.capacity = v,
                Err(_) => tracing::warn!("invalid MCPRT_SESSION_CAPACITY: {}", cap),
            }
        }
    }

    /// Validate that all configuration values are within acceptable ranges.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field encountered.
    pub fn validate(&self) -> Result<()> {
        if self.http.bind_addr.is_empty() {
            return Err(RuntimeError::Config("http.bind_addr cannot be empty".to_string()).into());
        }
        if !self.http.endpoint_path.starts_with('/') {
            return Err(RuntimeError::Config(
                "http.endpoint_path must start with '/'".to_string(),
            )
            .into());
        }
        if self.http.heartbeat_secs == 0 {
            return Err(
                RuntimeError::Config("http.heartbeat_secs must be greater than 0".to_string())
                    .into(),
            );
        }
        if self.websocket.num_segments == 0 {
            return Err(RuntimeError::Config(
                "websocket.num_segments must be greater than 0".to_string(),
            )
            .into());
        }
        if self.websocket.max_clients == 0 {
            return Err(RuntimeError::Config(
                "websocket.max_clients must be greater than 0".to_string(),
            )
            .into());
        }
        if self.websocket.max_ping_failures == 0 {
            return Err(RuntimeError::Config(
                "websocket.max_ping_failures must be greater than 0".to_string(),
            )
            .into());
        }
        if self.websocket.ping_timeout_secs == 0 {
            return Err(RuntimeError::Config(
                "websocket.ping_timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }
        if self.rate_limit.max_requests == 0 {
            return Err(RuntimeError::Config(
                "rate_limit.max_requests must be greater than 0".to_string(),
            )
            .into());
        }
        if self.rate_limit.window_secs == 0 {
            return Err(RuntimeError::Config(
                "rate_limit.window_secs must be greater than 0".to_string(),
            )
            .into());
        }
        if self.session.ttl_secs == 0 {
            return Err(
                RuntimeError::Config("session.ttl_secs must be greater than 0".to_string())
                    .into(),
            );
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            websocket: WebSocketConfig::default(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_endpoint_path_is_mcp() {
        assert_eq!(HttpConfig::default().endpoint_path, "/mcp");
    }

    #[test]
    fn validation_rejects_empty_bind_addr() {
        let mut config = RuntimeConfig::default();
        config.http.bind_addr = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_endpoint_path_without_leading_slash() {
        let mut config = RuntimeConfig::default();
        config.http.endpoint_path = "mcp".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_segments() {
        let mut config = RuntimeConfig::default();
        config.websocket.num_segments = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_rate_limit_window() {
        let mut config = RuntimeConfig::default();
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_nonexistent_file_uses_defaults() {
        let config = RuntimeConfig::load("definitely-does-not-exist.yaml").unwrap();
        assert_eq!(config.http.bind_addr, default_bind_addr());
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let yaml = r#"
http:
  bind_addr: "0.0.0.0:8080"
  endpoint_path: "/rpc"
websocket:
  max_clients: 50
rate_limit:
  max_requests: 10
  window_secs: 30
"#;
        let config: RuntimeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.http.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.http.endpoint_path, "/rpc");
        assert_eq!(config.websocket.max_clients, 50);
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window_secs, 30);
        assert!(config.validate().is_ok());
    }
}
