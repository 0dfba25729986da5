//! Process lifecycle: the connection state machine.
//!
//! Shutdown requests travel on a [`CancellationToken`]: the read loop waits on
//! `cancelled()`, while the `shutdown` control method and OS signal handlers
//! call `cancel()`.

mod state;

pub use state::{ConnectionState, ConnectionStateMachine};
pub use tokio_util::sync::CancellationToken;
