//! Control methods answered from local state.
//!
//! `initialize`, `ping`, `logging/setLevel` and `shutdown` never reach the
//! remote service.

use crate::config::Defaults;
use crate::error::{BridgeError, Result};
use crate::lifecycle::CancellationToken;
use crate::protocol::{Request, RpcResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};

/// Hook through which `logging/setLevel` adjusts the active log filter.
pub trait LogLevelControl: Send + Sync {
    fn set_level(&self, level: LevelFilter) -> Result<()>;
}

/// Control methods handled without a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalMethod {
    Initialize,
    Ping,
    SetLogLevel,
    Shutdown,
}

impl LocalMethod {
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "initialize" => Some(LocalMethod::Initialize),
            "ping" => Some(LocalMethod::Ping),
            "logging/setLevel" => Some(LocalMethod::SetLogLevel),
            "shutdown" => Some(LocalMethod::Shutdown),
            _ => None,
        }
    }
}

/// Notifications consumed locally instead of being forwarded.
const LOCAL_NOTIFICATIONS: &[&str] = &["notifications/initialized"];

/// Map an MCP log level name onto a tracing filter.
pub fn parse_log_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" | "notice" => Some(LevelFilter::INFO),
        "warning" | "warn" => Some(LevelFilter::WARN),
        "error" | "critical" | "alert" | "emergency" => Some(LevelFilter::ERROR),
        "off" => Some(LevelFilter::OFF),
        _ => None,
    }
}

/// Answers local control methods.
#[derive(Clone)]
pub struct LocalHandler {
    shutdown: CancellationToken,
    log_control: Option<Arc<dyn LogLevelControl>>,
}

impl LocalHandler {
    pub fn new(shutdown: CancellationToken, log_control: Option<Arc<dyn LogLevelControl>>) -> Self {
        Self {
            shutdown,
            log_control,
        }
    }

    pub fn absorbs_notification(&self, method: &str) -> bool {
        LOCAL_NOTIFICATIONS.contains(&method)
    }

    /// Answer `request` locally, or `None` if it must go to the remote.
    pub fn handle(&self, request: &Request) -> Option<RpcResponse> {
        let method = LocalMethod::from_method(&request.method)?;
        let id = Some(request.id.clone());

        let outcome = match method {
            LocalMethod::Initialize => Ok(self.initialize(request.params.as_ref())),
            LocalMethod::Ping => Ok(json!({"ok": true})),
            LocalMethod::SetLogLevel => self.set_log_level(request.params.as_ref()),
            LocalMethod::Shutdown => Ok(self.schedule_shutdown()),
        };

        debug!("Answered {} locally", request.method);
        Some(match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(err) => RpcResponse::from_error(id, &err),
        })
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let protocol_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(Defaults::PROTOCOL_VERSION);

        json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": {"listChanged": false},
                "resources": {"subscribe": false, "listChanged": false},
                "prompts": {"listChanged": false},
                "logging": {}
            },
            "serverInfo": {
                "name": Defaults::SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn set_log_level(&self, params: Option<&Value>) -> Result<Value> {
        let name = params
            .and_then(|p| p.get("level"))
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidParams {
                message: "Missing required parameter: level".to_string(),
            })?;
        let level = parse_log_level(name).ok_or_else(|| BridgeError::InvalidParams {
            message: format!("Unknown log level: {}", name),
        })?;

        if let Some(control) = &self.log_control {
            control.set_level(level)?;
        }
        info!("Log level set to {}", level);
        Ok(json!({}))
    }

    fn schedule_shutdown(&self) -> Value {
        info!("Shutdown requested by caller");
        let token = self.shutdown.clone();
        // Give the response line time to reach the caller first.
        tokio::spawn(async move {
            tokio::time::sleep(Defaults::SHUTDOWN_FLUSH_DELAY).await;
            token.cancel();
        });
        json!({})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingControl {
        levels: Mutex<Vec<LevelFilter>>,
    }

    impl LogLevelControl for RecordingControl {
        fn set_level(&self, level: LevelFilter) -> Result<()> {
            self.levels.lock().unwrap().push(level);
            Ok(())
        }
    }

    fn handler() -> LocalHandler {
        LocalHandler::new(CancellationToken::new(), None)
    }

    #[test]
    fn test_ping() {
        let response = handler().handle(&Request::new(1, "ping", None)).unwrap();
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#
        );
    }

    #[test]
    fn test_initialize_echoes_requested_version() {
        let request = Request::new(
            "init",
            "initialize",
            Some(json!({"protocolVersion": "2025-03-26", "capabilities": {}})),
        );
        let result = handler().handle(&request).unwrap().result.unwrap();

        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], "mcp-bridge");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[test]
    fn test_initialize_falls_back_to_default_version() {
        let result = handler()
            .handle(&Request::new(1, "initialize", None))
            .unwrap()
            .result
            .unwrap();
        assert_eq!(result["protocolVersion"], Defaults::PROTOCOL_VERSION);
    }

    #[test]
    fn test_set_level_uses_control() {
        let control = Arc::new(RecordingControl::default());
        let handler = LocalHandler::new(CancellationToken::new(), Some(control.clone()));

        let response = handler
            .handle(&Request::new(
                2,
                "logging/setLevel",
                Some(json!({"level": "warning"})),
            ))
            .unwrap();

        assert!(!response.is_error());
        assert_eq!(*control.levels.lock().unwrap(), vec![LevelFilter::WARN]);
    }

    #[test]
    fn test_set_level_rejects_unknown_level() {
        let response = handler()
            .handle(&Request::new(
                3,
                "logging/setLevel",
                Some(json!({"level": "loud"})),
            ))
            .unwrap();
        assert_eq!(response.id, Some(RequestId::from(3)));
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_answers_then_cancels() {
        let token = CancellationToken::new();
        let handler = LocalHandler::new(token.clone(), None);

        let response = handler.handle(&Request::new(4, "shutdown", None)).unwrap();
        assert!(!response.is_error());
        assert!(!token.is_cancelled());

        tokio::time::sleep(Defaults::SHUTDOWN_FLUSH_DELAY * 2).await;
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_remote_methods_not_handled() {
        assert!(handler().handle(&Request::new(5, "tools/call", None)).is_none());
        assert!(handler().absorbs_notification("notifications/initialized"));
        assert!(!handler().absorbs_notification("notifications/cancelled"));
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("notice"), Some(LevelFilter::INFO));
        assert_eq!(parse_log_level("CRITICAL"), Some(LevelFilter::ERROR));
        assert_eq!(parse_log_level("nope"), None);
    }
}
