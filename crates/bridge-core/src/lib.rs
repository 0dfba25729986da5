//! Bridge Core - concurrent stdio-to-HTTP JSON-RPC bridge engine.
//!
//! Reads newline-delimited JSON-RPC from a local stream, forwards each call
//! to a remote MCP service over HTTP and writes exactly one single-line
//! response per request. Many calls may be in flight at once; output lines
//! never interleave.
//!
//! The pieces:
//! - [`protocol`]: typed envelopes and message classification
//! - [`processor`]: bounded worker pool with caller-runs backpressure
//! - [`network`]: reqwest transport and retry with backoff and jitter
//! - [`coalesce`]: optional time-window buffering of list-style calls
//! - [`lifecycle`]: connection state machine and the shutdown token
//! - [`transport`]: line framing for the local stream
//!
//! # Example
//!
//! ```rust,ignore
//! use bridge_core::{Bridge, BridgeConfig};
//! use tokio::io::BufReader;
//!
//! #[tokio::main]
//! async fn main() -> bridge_core::Result<()> {
//!     let config = BridgeConfig::new("secret").with_remote("127.0.0.1", 8080);
//!     let mut bridge = Bridge::builder(config).build(tokio::io::stdout())?;
//!
//!     bridge.connect().await?;
//!     let exit = bridge.run(BufReader::new(tokio::io::stdin())).await?;
//!     println!("bridge exited: {:?}", exit);
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod network;
pub mod processor;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeBuilder, BridgeExit};
pub use coalesce::Coalescer;
pub use config::{BridgeConfig, CoalesceConfig, CoalesceMode, Defaults, ProcessorConfig, RemoteConfig};
pub use error::{BridgeError, Result};
pub use lifecycle::{CancellationToken, ConnectionState, ConnectionStateMachine};
pub use network::{HttpTransport, RemoteTransport, RetryExecutor, RetryPolicy, RetryStats};
pub use processor::{LogLevelControl, PendingResponse, ProcessorStats, RequestProcessor};
pub use protocol::{Classifier, Message, Notification, Request, RequestId, RpcError, RpcResponse};
