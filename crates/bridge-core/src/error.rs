//! Error types for the bridge.
//!
//! Every failure the engine can observe is one variant of [`BridgeError`].
//! Each variant maps onto a JSON-RPC error code and a retry classification,
//! so the processor and retry executor never have to inspect error strings.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Local framing errors
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    #[error("Duplicate request id {id} is already in flight")]
    DuplicateRequest { id: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    // Remote call errors
    #[error("Authentication failed: the remote service rejected the API key (HTTP {status})")]
    Authentication { status: u16 },

    #[error("Permission denied: the API key is not authorized for this operation (HTTP {status})")]
    PermissionDenied { status: u16 },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Remote service returned HTTP {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    /// A JSON-RPC error object returned by the remote service, passed through.
    #[error("{message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    // Lifecycle errors
    #[error("Request processor is shut down")]
    ProcessorShutdown,

    #[error("Output transport is closed")]
    TransportClosed,

    #[error("Bridge is not connected (state: {state})")]
    NotConnected { state: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Plumbing
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Network {
                message: format!("Request timed out: {}", err),
            }
        } else if err.is_decode() {
            BridgeError::Json {
                message: format!("Failed to decode remote response: {}", err),
                source: None,
            }
        } else {
            BridgeError::Network {
                message: err.to_string(),
            }
        }
    }
}

/// Standard JSON-RPC error codes used by the bridge.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

impl BridgeError {
    /// Convert to a JSON-RPC error code.
    ///
    /// Remote and transport failures all surface as `-32603` (internal
    /// error) except a JSON-RPC error returned by the remote itself, whose
    /// code is passed through untouched.
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            BridgeError::Parse { .. } => codes::PARSE_ERROR,
            BridgeError::InvalidMessage { .. } | BridgeError::DuplicateRequest { .. } => {
                codes::INVALID_REQUEST
            }
            BridgeError::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            BridgeError::InvalidParams { .. } => codes::INVALID_PARAMS,
            BridgeError::Remote { code, .. } => *code,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Optional `data` member for the JSON-RPC error object.
    pub fn rpc_error_data(&self) -> Option<Value> {
        match self {
            BridgeError::Remote { data, .. } => data.clone(),
            _ => None,
        }
    }

    /// Check if this error is transient and the remote call should be retried.
    ///
    /// Authentication and authorization failures are terminal: retrying
    /// them only delays the error the caller needs to see.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Network { .. } | BridgeError::Timeout(_) => true,
            BridgeError::RemoteStatus { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    /// Whether this error is an authentication or authorization rejection.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            BridgeError::Authentication { .. } | BridgeError::PermissionDenied { .. }
        )
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }
}

/// HTTP statuses worth retrying: request timeout, throttling and 5xx.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..600).contains(&status)
}
