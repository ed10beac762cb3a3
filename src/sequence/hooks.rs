//! Lifecycle hooks
//!
//! Optional observers for run milestones. Every method has a default
//! no-op; a failing hook is logged and never propagates into the run.

use crate::core::Measurement;
use crate::error::SequenceError;
use crate::execution::supervisor::RunState;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn on_setup_start(&self) -> Result<(), SequenceError> {
        Ok(())
    }

    async fn on_setup_complete(&self, _ok: bool) -> Result<(), SequenceError> {
        Ok(())
    }

    async fn on_run_start(&self) -> Result<(), SequenceError> {
        Ok(())
    }

    async fn on_run_complete(&self, _passed: bool) -> Result<(), SequenceError> {
        Ok(())
    }

    async fn on_step_start(&self, _step: &str) -> Result<(), SequenceError> {
        Ok(())
    }

    async fn on_step_complete(&self, _step: &str, _passed: bool) -> Result<(), SequenceError> {
        Ok(())
    }

    async fn on_measurement(&self, _measurement: &Measurement) -> Result<(), SequenceError> {
        Ok(())
    }

    async fn on_error(&self, _error: &SequenceError) -> Result<(), SequenceError> {
        Ok(())
    }

    async fn on_sequence_complete(&self, _state: RunState) -> Result<(), SequenceError> {
        Ok(())
    }
}

/// Fans each milestone out to every registered hook. Hook errors are
/// swallowed after a warning so observers cannot alter the run.
#[derive(Default)]
pub struct CompositeHook {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

macro_rules! fan_out {
    ($self:ident, $name:ident ( $($arg:expr),* )) => {
        for hook in &$self.hooks {
            if let Err(e) = hook.$name($($arg),*).await {
                warn!("lifecycle hook {} failed: {}", stringify!($name), e);
            }
        }
    };
}

impl CompositeHook {
    pub fn new(hooks: Vec<Arc<dyn LifecycleHook>>) -> Self {
        Self { hooks }
    }

    pub async fn on_setup_start(&self) {
        fan_out!(self, on_setup_start());
    }

    pub async fn on_setup_complete(&self, ok: bool) {
        fan_out!(self, on_setup_complete(ok));
    }

    pub async fn on_run_start(&self) {
        fan_out!(self, on_run_start());
    }

    pub async fn on_run_complete(&self, passed: bool) {
        fan_out!(self, on_run_complete(passed));
    }

    pub async fn on_step_start(&self, step: &str) {
        fan_out!(self, on_step_start(step));
    }

    pub async fn on_step_complete(&self, step: &str, passed: bool) {
        fan_out!(self, on_step_complete(step, passed));
    }

    pub async fn on_measurement(&self, measurement: &Measurement) {
        fan_out!(self, on_measurement(measurement));
    }

    pub async fn on_error(&self, error: &SequenceError) {
        fan_out!(self, on_error(error));
    }

    pub async fn on_sequence_complete(&self, state: RunState) {
        fan_out!(self, on_sequence_complete(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counting {
        steps: AtomicU32,
    }

    #[async_trait]
    impl LifecycleHook for Counting {
        async fn on_step_start(&self, _step: &str) -> Result<(), SequenceError> {
            self.steps.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl LifecycleHook for Failing {
        async fn on_step_start(&self, _step: &str) -> Result<(), SequenceError> {
            Err(SequenceError::Step("hook broke".into()))
        }
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_stop_others() {
        let counting = Arc::new(Counting::default());
        let composite = CompositeHook::new(vec![Arc::new(Failing), counting.clone()]);
        composite.on_step_start("measure").await;
        composite.on_step_start("verify").await;
        assert_eq!(counting.steps.load(Ordering::SeqCst), 2);
    }
}
