//! Network side of the bridge: the remote transport and retry logic.
//!
//! This module provides:
//! - The `RemoteTransport` seam and its reqwest implementation
//! - Retry logic with exponential backoff and jitter

mod client;
mod retry;

pub use client::{unwrap_rpc_payload, HttpTransport, RemoteTransport};
pub use retry::{retry_async, RetryExecutor, RetryPolicy, RetryStats};
