//! In-flight request bookkeeping.
//!
//! Each admitted request holds a [`PendingGuard`]; the entry disappears when
//! the guard is dropped, which happens right before the response is handed
//! back (or when the job itself is dropped during a forced shutdown).

use crate::error::{BridgeError, Result};
use crate::protocol::{Request, RequestId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Thread-safe map of in-flight request ids.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: Mutex<HashSet<String>>,
}

impl PendingRequests {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Admit a request. A second request with an id that is still in flight
    /// is rejected rather than replacing the first.
    pub fn register(self: &Arc<Self>, request: &Request) -> Result<PendingGuard> {
        let key = request.id.key();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.insert(key.clone()) {
            return Err(BridgeError::DuplicateRequest { id: key });
        }
        Ok(PendingGuard {
            registry: Arc::clone(self),
            key,
        })
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id.key())
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Removes its entry from [`PendingRequests`] on drop.
#[derive(Debug)]
pub struct PendingGuard {
    registry: Arc<PendingRequests>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
    }
}
