//! Connection lifecycle state machine.
//!
//! ```text
//! CONNECTING -> CONNECTED -> DISCONNECTING -> DISCONNECTED
//! ```
//!
//! The state only moves forward. `DISCONNECTED` is terminal and may be
//! re-entered any number of times. Only one caller wins the transition into
//! `DISCONNECTING`, so shutdown logic runs exactly once even when end of
//! input and a signal race each other.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::{debug, info};

/// Bridge connection states, ordered by lifecycle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Before the transport and liveness probe succeed.
    Connecting = 0,
    /// Steady state - requests are accepted.
    Connected = 1,
    /// Shutdown in progress - no new input, in-flight work drains.
    Disconnecting = 2,
    /// Terminal.
    Disconnected = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Disconnecting => write!(f, "DISCONNECTING"),
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

/// Tracks the lifecycle of one bridge process.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: AtomicU8,
    shutting_down: AtomicBool,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `CONNECTING -> CONNECTED` after a successful liveness probe.
    ///
    /// Returns `false` if the bridge had already moved past `CONNECTING`.
    pub fn mark_connected(&self) -> bool {
        let moved = self
            .state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Connected as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if moved {
            info!("Bridge state: {}", ConnectionState::Connected);
        }
        moved
    }

    /// Enter `DISCONNECTING`. Only the first caller gets `true`.
    pub fn begin_shutdown(&self) -> bool {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already in progress");
            return false;
        }
        self.advance_to(ConnectionState::Disconnecting);
        true
    }

    /// Enter the terminal `DISCONNECTED` state. Idempotent.
    pub fn mark_disconnected(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.advance_to(ConnectionState::Disconnected);
    }

    /// Whether new requests may be read and admitted.
    pub fn accepts_requests(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether the output stream may still be written.
    pub fn can_write(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    fn advance_to(&self, target: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.fetch_max(target as u8, Ordering::SeqCst));
        if previous < target {
            info!("Bridge state: {} -> {}", previous, target);
        }
    }
}
