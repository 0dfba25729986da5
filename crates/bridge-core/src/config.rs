//! Centralized configuration for the bridge.
//!
//! Constant defaults live on [`Defaults`]; the runtime configuration is the
//! plain [`BridgeConfig`] struct assembled by the binary from its arguments.

use crate::error::{BridgeError, Result};
use crate::network::RetryPolicy;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Built-in defaults.
pub struct Defaults;

impl Defaults {
    pub const REMOTE_HOST: &'static str = "127.0.0.1";
    pub const REMOTE_PORT: u16 = 8080;
    pub const MCP_PATH: &'static str = "/api/mcp";
    pub const HEALTH_PATH: &'static str = "/api/mcp/health";
    pub const API_KEY_HEADER: &'static str = "X-API-Key";
    pub const SESSION_HEADER: &'static str = "X-Session-ID";
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);
    pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

    pub const WORKERS: usize = 4;
    pub const QUEUE_CAPACITY: usize = 64;
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
    pub const SHUTDOWN_FLUSH_DELAY: Duration = Duration::from_millis(100);

    pub const PROTOCOL_VERSION: &'static str = "2024-11-05";
    pub const SERVER_NAME: &'static str = "mcp-bridge";

    /// Idempotent, read-only list calls eligible for coalescing.
    pub const BATCHABLE_METHODS: &'static [&'static str] = &[
        "tools/list",
        "resources/list",
        "resources/templates/list",
        "prompts/list",
    ];
}

/// Where and how to reach the remote service.
#[derive(Clone)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    /// Use `https` instead of `http`.
    pub use_tls: bool,
    pub api_key: String,
    /// Socket-level timeout for a single remote call.
    pub call_timeout: Duration,
    /// Timeout for the startup liveness probe.
    pub health_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: Defaults::REMOTE_HOST.to_string(),
            port: Defaults::REMOTE_PORT,
            use_tls: false,
            api_key: String::new(),
            call_timeout: Defaults::CALL_TIMEOUT,
            health_timeout: Defaults::HEALTH_TIMEOUT,
        }
    }
}

impl RemoteConfig {
    /// Base URL such as `http://127.0.0.1:8080`.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn mcp_url(&self) -> String {
        format!("{}{}", self.base_url(), Defaults::MCP_PATH)
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url(), Defaults::HEALTH_PATH)
    }
}

// The API key never reaches the logs.
impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("api_key", &"<redacted>")
            .field("call_timeout", &self.call_timeout)
            .field("health_timeout", &self.health_timeout)
            .finish()
    }
}

/// Worker pool sizing and lifecycle.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// How long in-flight work may drain on shutdown before workers are aborted.
    pub shutdown_grace: Duration,
    /// Optional end-to-end timeout per request, on top of the retry budget.
    pub request_timeout: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: Defaults::WORKERS,
            queue_capacity: Defaults::QUEUE_CAPACITY,
            shutdown_grace: Defaults::SHUTDOWN_GRACE,
            request_timeout: None,
        }
    }
}

/// How the coalescing window reacts to new arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalesceMode {
    /// Every arrival restarts the window.
    #[default]
    Debounce,
    /// The window starts with the first arrival and is never extended.
    Fixed,
}

/// Coalescing of batchable requests.
#[derive(Debug, Clone)]
pub struct CoalesceConfig {
    /// Zero disables coalescing.
    pub window: Duration,
    pub mode: CoalesceMode,
    pub batchable_methods: HashSet<String>,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            window: Duration::ZERO,
            mode: CoalesceMode::default(),
            batchable_methods: Defaults::BATCHABLE_METHODS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl CoalesceConfig {
    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub remote: RemoteConfig,
    pub processor: ProcessorConfig,
    pub retry: RetryPolicy,
    pub coalesce: CoalesceConfig,
}

impl BridgeConfig {
    /// Create a config with defaults for everything but the credential.
    pub fn new(api_key: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.remote.api_key = api_key.into();
        config
    }

    /// Set the remote host and port.
    pub fn with_remote(mut self, host: impl Into<String>, port: u16) -> Self {
        self.remote.host = host.into();
        self.remote.port = port;
        self
    }

    /// Use `https` for the remote base URL.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.remote.use_tls = use_tls;
        self
    }

    /// Set the per-call HTTP timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.remote.call_timeout = timeout;
        self
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.processor.workers = workers;
        self
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.processor.queue_capacity = capacity;
        self
    }

    /// Set the coalescing window (zero disables coalescing).
    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce.window = window;
        self
    }

    /// Set the coalescing mode.
    pub fn with_coalesce_mode(mut self, mode: CoalesceMode) -> Self {
        self.coalesce.mode = mode;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the optional end-to-end request timeout.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.processor.request_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.processor.shutdown_grace = grace;
        self
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.remote.api_key.trim().is_empty() {
            return Err(BridgeError::config(
                "API key is required (pass --api-key or set MCP_BRIDGE_API_KEY)",
            ));
        }
        if self.remote.host.trim().is_empty() {
            return Err(BridgeError::config("remote host must not be empty"));
        }
        if self.processor.workers == 0 {
            return Err(BridgeError::config("worker count must be at least 1"));
        }
        if self.processor.queue_capacity == 0 {
            return Err(BridgeError::config("queue capacity must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(BridgeError::config("max attempts must be at least 1"));
        }
        if self.retry.jitter_min > self.retry.jitter_max {
            return Err(BridgeError::config(
                "retry jitter minimum exceeds jitter maximum",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let config = BridgeConfig::new("key").with_remote("api.example.com", 9443);
        assert_eq!(config.remote.base_url(), "http://api.example.com:9443");
        assert_eq!(
            config.remote.mcp_url(),
            "http://api.example.com:9443/api/mcp"
        );
        assert_eq!(
            config.remote.health_url(),
            "http://api.example.com:9443/api/mcp/health"
        );
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = BridgeConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("API key"));

        assert!(BridgeConfig::new("secret").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(BridgeConfig::new("k").with_workers(0).validate().is_err());
        assert!(BridgeConfig::new("k")
            .with_queue_capacity(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = BridgeConfig::new("super-secret");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_coalescing_disabled_by_default() {
        let config = BridgeConfig::default();
        assert!(!config.coalesce.is_enabled());
        assert!(config.coalesce.batchable_methods.contains("tools/list"));
    }
}
