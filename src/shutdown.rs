//! Cooperative cancellation
//!
//! Long-running operations (snapshot merges, target enumeration, array
//! expansion) poll a [`ShutdownNotifier`] at defined checkpoints and abort with
//! [`Error::Cancelled`]. The error is propagated to the caller unchanged.

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared cancellation flag
///
/// Cloning yields a handle to the same flag, so one clone can be handed to a
/// watchdog thread while the encoder keeps another.
#[derive(Debug, Clone, Default)]
pub struct ShutdownNotifier {
    requested: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl ShutdownNotifier {
    /// Create a notifier that has not been triggered
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown; every later checkpoint fails with `Error::Cancelled`
    pub fn request_shutdown(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert_with(|| reason.into());
        }
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Returns true once shutdown was requested
    pub fn should_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Checkpoint: fails if shutdown was requested
    pub fn check(&self) -> Result<()> {
        if !self.should_shutdown() {
            return Ok(());
        }
        let reason = self
            .reason
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| "shutdown requested".to_string());
        Err(Error::Cancelled { reason })
    }
}
