//! HTTP transport to the remote MCP service.
//!
//! Wraps reqwest with:
//! - Per-process session correlation and API key headers
//! - Status classification (auth, authorization, transient, terminal)
//! - Unwrapping of JSON-RPC response envelopes returned by the remote

use crate::config::{Defaults, RemoteConfig};
use crate::error::{is_transient_status, BridgeError, Result};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// The outbound side of the bridge.
///
/// `forward` performs exactly one remote call; retries are layered on top
/// by the retry executor.
#[async_trait]
pub trait RemoteTransport: Send + Sync + 'static {
    /// Forward a JSON-RPC envelope and return the call's result value.
    async fn forward(&self, body: &Value) -> Result<Value>;

    /// Startup liveness probe.
    async fn health_check(&self) -> Result<()>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: Client,
    mcp_url: String,
    health_url: String,
    api_key: String,
    session_id: String,
    call_timeout: Duration,
    health_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the configured remote.
    pub fn new(config: &RemoteConfig, session_id: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.call_timeout)
            .user_agent(concat!("mcp-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::Network {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            mcp_url: config.mcp_url(),
            health_url: config.health_url(),
            api_key: config.api_key.clone(),
            session_id: session_id.into(),
            call_timeout: config.call_timeout,
            health_timeout: config.health_timeout,
        })
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(header::CONTENT_TYPE, "application/json")
            .header(Defaults::API_KEY_HEADER, &self.api_key)
            .header(Defaults::SESSION_HEADER, &self.session_id)
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn forward(&self, body: &Value) -> Result<Value> {
        let method = body
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();

        let response = self
            .with_headers(self.client.post(&self.mcp_url))
            .json(body)
            .send()
            .await
            .map_err(|e| classify_send_error(&self.mcp_url, self.call_timeout, e))?;

        let response = check_status(response, &method).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        let payload: Value = serde_json::from_slice(&bytes).map_err(|e| BridgeError::Json {
            message: format!("Remote returned invalid JSON for {}: {}", method, e),
            source: Some(e),
        })?;
        unwrap_rpc_payload(payload)
    }

    async fn health_check(&self) -> Result<()> {
        debug!("Probing remote health at {}", self.health_url);
        let response = self
            .with_headers(self.client.get(&self.health_url))
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| classify_send_error(&self.health_url, self.health_timeout, e))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::UNAUTHORIZED => Err(BridgeError::Authentication { status: 401 }),
            StatusCode::FORBIDDEN => Err(BridgeError::PermissionDenied { status: 403 }),
            status => Err(BridgeError::RemoteStatus {
                status: status.as_u16(),
                message: "health check failed".to_string(),
            }),
        }
    }
}

fn classify_send_error(url: &str, timeout: Duration, err: reqwest::Error) -> BridgeError {
    if err.is_timeout() {
        BridgeError::Timeout(timeout)
    } else if err.is_connect() {
        BridgeError::Network {
            message: format!("Failed to connect to {}: {}", url, err),
        }
    } else {
        BridgeError::Network {
            message: format!("Request to {} failed: {}", url, err),
        }
    }
}

/// Map non-success statuses onto the error taxonomy.
async fn check_status(response: Response, method: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = status.as_u16();
    match status {
        StatusCode::UNAUTHORIZED => return Err(BridgeError::Authentication { status: code }),
        StatusCode::FORBIDDEN => return Err(BridgeError::PermissionDenied { status: code }),
        StatusCode::NOT_FOUND => {
            return Err(BridgeError::MethodNotFound {
                method: method.to_string(),
            })
        }
        _ => {}
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string()
    } else {
        body.chars().take(512).collect()
    };

    if is_transient_status(code) {
        warn!("Transient remote failure for {}: HTTP {}", method, code);
    }
    Err(BridgeError::RemoteStatus {
        status: code,
        message,
    })
}

/// Unwrap a JSON-RPC response envelope; anything else is the result itself.
pub fn unwrap_rpc_payload(payload: Value) -> Result<Value> {
    let Value::Object(mut map) = payload else {
        return Ok(payload);
    };

    if let Some(error) = map.remove("error").filter(Value::is_object) {
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .and_then(|c| i32::try_from(c).ok())
            .unwrap_or(crate::error::codes::INTERNAL_ERROR);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Remote error")
            .to_string();
        return Err(BridgeError::Remote {
            code,
            message,
            data: error.get("data").cloned(),
        });
    }

    if map.contains_key("jsonrpc") || map.contains_key("result") {
        if let Some(result) = map.remove("result") {
            return Ok(result);
        }
    }

    Ok(Value::Object(map))
}
