//! Message classification.
//!
//! Turns one line of input into a [`Message`]: a request, a notification,
//! or an invalid message that may or may not be answerable.

use super::envelope::{Envelope, Notification, Request, RequestId, RpcResponse, JSONRPC_VERSION};
use crate::error::BridgeError;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// Classified form of one input line.
#[derive(Debug)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Invalid(InvalidMessage),
}

/// A line that could not be turned into a request or notification.
#[derive(Debug)]
pub struct InvalidMessage {
    /// Id recovered from the line, if any.
    pub id: Option<RequestId>,
    pub error: BridgeError,
}

impl InvalidMessage {
    /// The error response owed to the caller, or `None` when no id was salvaged.
    pub fn response(&self) -> Option<RpcResponse> {
        self.id
            .as_ref()
            .map(|id| RpcResponse::from_error(Some(id.clone()), &self.error))
    }
}

/// Classifies lines and tags batchable requests.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    batchable: HashSet<String>,
}

impl Classifier {
    pub fn new(batchable: HashSet<String>) -> Self {
        Self { batchable }
    }

    pub fn is_batchable(&self, method: &str) -> bool {
        self.batchable.contains(method)
    }

    /// Classify one line. Blank lines yield `None`.
    pub fn classify(&self, line: &str) -> Option<Message> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                let id = salvage_id(line);
                warn!("Unparseable message (salvaged id: {:?}): {}", id, e);
                return Some(Message::Invalid(InvalidMessage {
                    id,
                    error: BridgeError::Parse {
                        message: e.to_string(),
                    },
                }));
            }
        };

        if let Some(version) = envelope.jsonrpc.as_deref() {
            if version != JSONRPC_VERSION {
                warn!("Rejecting message with jsonrpc version {:?}", version);
                return Some(Message::Invalid(InvalidMessage {
                    id: envelope.id,
                    error: BridgeError::InvalidMessage {
                        message: format!("expected jsonrpc \"2.0\", got {:?}", version),
                    },
                }));
            }
        }

        let Some(method) = envelope.method else {
            return Some(Message::Invalid(match envelope.id {
                // Every id-bearing message is owed a response.
                Some(id) => {
                    warn!("Message {} has an id but no method", id);
                    InvalidMessage {
                        id: Some(id),
                        error: BridgeError::InvalidMessage {
                            message: "message has an id but no method".to_string(),
                        },
                    }
                }
                None => {
                    warn!("Dropping message without method or id");
                    InvalidMessage {
                        id: None,
                        error: BridgeError::Parse {
                            message: "missing method".to_string(),
                        },
                    }
                }
            }));
        };

        Some(match envelope.id {
            Some(id) => Message::Request(Request {
                batchable: self.is_batchable(&method),
                id,
                method,
                params: envelope.params,
            }),
            None => Message::Notification(Notification {
                method,
                params: envelope.params,
            }),
        })
    }
}

/// Recover a string or numeric `id` from a line that failed typed parsing.
fn salvage_id(line: &str) -> Option<RequestId> {
    let value: Value = serde_json::from_str(line).ok()?;
    value.get("id").and_then(RequestId::from_value)
}
