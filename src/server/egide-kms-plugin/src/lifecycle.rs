//! Plugin process lifecycle.
//!
//! ```text
//! Uninitialized -> Initialized -> Serving -> Draining -> Stopped
//! ```
//!
//! Transitions only move forward. Skipping ahead is allowed so that a
//! failed bind or listener can go straight to `Stopped`; there is no
//! restart in place.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::error::PluginError;

/// State of the plugin process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServiceState {
    /// Key source client not yet constructed.
    Uninitialized,
    /// Key source ready, not listening.
    Initialized,
    /// Accepting calls.
    Serving,
    /// Shutdown requested; in-flight calls are finishing.
    Draining,
    /// Listener closed.
    Stopped,
}

/// Shared handle on the current [`ServiceState`].
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<ServiceState>>,
}

impl Lifecycle {
    /// Starts in [`ServiceState::Uninitialized`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ServiceState::Uninitialized);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn state(&self) -> ServiceState {
        *self.tx.borrow()
    }

    /// Receives every subsequent transition.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.tx.subscribe()
    }

    /// Moves to `next`, which must be later than the current state.
    pub fn advance(&self, next: ServiceState) -> Result<(), PluginError> {
        let mut rejected = None;

        self.tx.send_if_modified(|state| {
            if next > *state {
                debug!(from = ?*state, to = ?next, "Lifecycle transition");
                *state = next;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });

        match rejected {
            Some(from) => Err(PluginError::InvalidTransition { from, to: next }),
            None => Ok(()),
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
