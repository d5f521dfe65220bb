//! Cooperative cancellation for the upload task.
//!
//! Every delay in the protocol (settle time after the wake burst, pacing
//! between pages, accept polling) is a wait on a [`CancelToken`], so a
//! server stop interrupts it immediately instead of after the full delay.

use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

/// Shared stop flag with interruptible waits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel, waking every pending [`sleep`](Self::sleep).
    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.cond.notify_all();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail with [`Error::Cancelled`] if cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait for `duration`, returning early with [`Error::Cancelled`] on cancel.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let guard = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .inner
            .cond
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);

        if *guard {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
