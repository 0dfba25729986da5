//! JSON-RPC framing: wire types and message classification.

pub mod classify;
pub mod envelope;

pub use classify::{Classifier, InvalidMessage, Message};
pub use envelope::{Envelope, Notification, Request, RequestId, RpcError, RpcResponse};
