//! Cooperative cancellation.
//!
//! The pipeline checks a [`CancelToken`] between stages and periodically
//! inside its long loops. The caller trips it (or sets a deadline) to abort
//! a request that exceeded its wall-clock budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::DiagnoseError;

/// How many loop iterations run between cancellation checks.
pub const CHECK_INTERVAL: usize = 1024;

/// Shared cancellation flag with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that only trips when [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also trips once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Return `Err(Cancelled)` if the token has tripped.
    pub fn check(&self) -> Result<(), DiagnoseError> {
        if self.is_cancelled() {
            Err(DiagnoseError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cheap in-loop check: only consults the token every [`CHECK_INTERVAL`] iterations.
    #[inline]
    pub fn check_every(&self, iteration: usize) -> Result<(), DiagnoseError> {
        if iteration % CHECK_INTERVAL == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}
