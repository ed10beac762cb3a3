//! Run supervisor - owns the setup/run/teardown lifecycle
//!
//! Drives a [`Sequence`] through its lifecycle, classifies whatever user
//! code raises into a final state, and guarantees `teardown` runs exactly
//! once no matter how setup or run ended. The supervisor's verdict is
//! authoritative: a user-claimed pass cannot survive a terminally failed
//! non-cleanup step.

use crate::core::{ExecutionContext, SequenceManifest};
use crate::error::SequenceError;
use crate::events::{Event, EventEmitter};
use crate::execution::abort::AbortHandle;
use crate::execution::scheduler::{StepOutcome, StepScheduler};
use crate::sequence::hooks::CompositeHook;
use crate::sequence::{RunHandle, RunResult, Sequence};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Lifecycle states. The four rightmost are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Created,
    SettingUp,
    Running,
    TearingDown,
    Passed,
    Failed,
    Errored,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Passed | RunState::Failed | RunState::Errored | RunState::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::SettingUp => "setting_up",
            RunState::Running => "running",
            RunState::TearingDown => "tearing_down",
            RunState::Passed => "passed",
            RunState::Failed => "failed",
            RunState::Errored => "errored",
            RunState::Aborted => "aborted",
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub result: RunResult,
    pub steps: Vec<StepOutcome>,
    pub duration: Duration,
    pub abort_reason: Option<String>,
    pub error: Option<SequenceError>,
    /// Teardown failure is an annotation, never the verdict.
    pub teardown_error: Option<SequenceError>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.state == RunState::Passed
    }
}

pub struct RunSupervisor {
    context: Arc<ExecutionContext>,
    emitter: Arc<EventEmitter>,
    hooks: Arc<CompositeHook>,
    abort: AbortHandle,
    scheduler: Arc<StepScheduler>,
    state: Mutex<RunState>,
}

impl RunSupervisor {
    pub fn new(
        manifest: &SequenceManifest,
        context: Arc<ExecutionContext>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self::with_hooks(manifest, context, emitter, Arc::new(CompositeHook::default()))
    }

    pub fn with_hooks(
        manifest: &SequenceManifest,
        context: Arc<ExecutionContext>,
        emitter: Arc<EventEmitter>,
        hooks: Arc<CompositeHook>,
    ) -> Self {
        let abort = AbortHandle::new();
        let scheduler = Arc::new(StepScheduler::from_manifest(
            manifest,
            emitter.clone(),
            hooks.clone(),
            abort.clone(),
        ));
        Self {
            context,
            emitter,
            hooks,
            abort,
            scheduler,
            state: Mutex::new(RunState::Created),
        }
    }

    /// Handle for requesting an abort from another task or thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn state(&self) -> RunState {
        self.state.lock().map(|s| *s).unwrap_or(RunState::Errored)
    }

    fn transition(&self, next: RunState) {
        if let Ok(mut state) = self.state.lock() {
            if state.is_terminal() {
                return;
            }
            *state = next;
        }
        self.emitter.status(next.as_str(), None, None);
    }

    /// Drive the full lifecycle. `teardown` is always attempted once,
    /// even when setup raised or the run was aborted mid-flight.
    pub async fn execute<S: Sequence>(&self, mut sequence: S) -> RunReport {
        let started = Instant::now();
        let handle = RunHandle::new(
            self.context.clone(),
            self.emitter.clone(),
            self.scheduler.clone(),
            self.hooks.clone(),
            self.abort.clone(),
        );

        info!(
            "Starting run {} ({} v{})",
            self.context.execution_id(),
            self.context.sequence_name(),
            self.context.sequence_version()
        );

        self.transition(RunState::SettingUp);
        self.hooks.on_setup_start().await;
        let setup_error = match sequence.setup(&handle).await {
            Ok(()) => None,
            Err(e) => {
                error!("Setup failed: {}", e);
                Some(classify_setup(e))
            }
        };
        self.hooks.on_setup_complete(setup_error.is_none()).await;

        let mut run_result: Option<RunResult> = None;
        let mut run_error: Option<SequenceError> = None;
        if setup_error.is_none() && !self.abort.is_aborted() {
            self.transition(RunState::Running);
            self.hooks.on_run_start().await;
            match sequence.run(&handle).await {
                Ok(result) => run_result = Some(result),
                Err(e) => {
                    error!("Run raised: {}", e);
                    run_error = Some(e);
                }
            }
            self.hooks
                .on_run_complete(run_result.as_ref().map(|r| r.passed).unwrap_or(false))
                .await;
        }

        self.transition(RunState::TearingDown);
        let teardown_error = match sequence.teardown(&handle).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Teardown failed (verdict unaffected): {}", e);
                Some(SequenceError::Teardown(e.to_string()))
            }
        };

        let steps = self.scheduler.outcomes();
        let lifecycle_error = setup_error.or(run_error);
        let (state, error) = self.classify(&lifecycle_error, run_result.as_ref());

        // engine-recorded measurements first, user-returned values overlay
        let mut measurements = handle.measurements();
        let mut result = run_result.unwrap_or_default();
        measurements.extend(std::mem::take(&mut result.measurements));
        result.measurements = measurements;
        result.passed = state == RunState::Passed;
        if result.error.is_none() {
            result.error = error.as_ref().map(|e| e.to_string());
        }

        if let Some(e) = &error {
            self.emitter.error(e.code(), e.to_string(), false);
            self.hooks.on_error(e).await;
        }
        if let Some(e) = &teardown_error {
            self.emitter.error(e.code(), e.to_string(), false);
        }

        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
        let duration = started.elapsed();
        self.emitter.emit(Event::RunComplete {
            passed: result.passed,
            duration_seconds: duration.as_secs_f64(),
            measurements: result.measurements.clone(),
            error: result.error.clone(),
        });
        self.emitter.status(state.as_str(), Some(1.0), None);
        self.hooks.on_sequence_complete(state).await;
        info!(
            "Run {} finished: {} in {:?}",
            self.context.execution_id(),
            state.as_str(),
            duration
        );

        RunReport {
            state,
            result,
            steps,
            duration,
            abort_reason: self.abort.reason(),
            error,
            teardown_error,
        }
    }

    fn classify(
        &self,
        lifecycle_error: &Option<SequenceError>,
        run_result: Option<&RunResult>,
    ) -> (RunState, Option<SequenceError>) {
        if self.abort.is_aborted() {
            let reason = self.abort.reason().unwrap_or_else(|| "aborted".to_string());
            return (RunState::Aborted, Some(SequenceError::Abort { reason }));
        }
        match lifecycle_error {
            Some(SequenceError::Abort { reason }) => (
                RunState::Aborted,
                Some(SequenceError::Abort {
                    reason: reason.clone(),
                }),
            ),
            Some(e @ SequenceError::TestFailure(_)) => (RunState::Failed, Some(e.clone())),
            Some(e) => (RunState::Errored, Some(e.clone())),
            None => match run_result {
                // a terminally failed non-cleanup step overrides the claim
                Some(result) if result.passed && !self.scheduler.halted() => {
                    (RunState::Passed, None)
                }
                Some(result) => {
                    let message = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "sequence reported failure".to_string());
                    (RunState::Failed, Some(SequenceError::TestFailure(message)))
                }
                // setup was skipped by an abort raced before run
                None => (
                    RunState::Errored,
                    Some(SequenceError::Step("run() was never executed".to_string())),
                ),
            },
        }
    }
}

fn classify_setup(e: SequenceError) -> SequenceError {
    match e {
        SequenceError::Abort { .. } | SequenceError::Setup(_) => e,
        other => SequenceError::Setup(other.to_string()),
    }
}
