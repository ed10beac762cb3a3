//! Cooperative abort signal
//!
//! One handle per run, cloned freely across threads. `abort` is
//! idempotent: the first caller's reason is kept, later calls are no-ops.
//! The reason is stored before the flag is raised so any observer that
//! sees the flag also sees the reason.

use crate::error::SequenceError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortInner>,
}

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an abort. Only the first call's reason is recorded.
    pub fn abort(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.inner.reason.lock() {
            if !self.inner.aborted.load(Ordering::Acquire) {
                *slot = Some(reason.into());
                self.inner.aborted.store(true, Ordering::Release);
            }
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        if !self.is_aborted() {
            return None;
        }
        self.inner.reason.lock().ok().and_then(|r| r.clone())
    }

    /// Cooperative poll point for user code and the scheduler.
    pub fn check(&self) -> Result<(), SequenceError> {
        if self.is_aborted() {
            Err(SequenceError::Abort {
                reason: self.reason().unwrap_or_else(|| "aborted".to_string()),
            })
        } else {
            Ok(())
        }
    }
}
