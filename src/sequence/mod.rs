//! User sequence boundary
//!
//! A [`Sequence`] is the user-supplied implementation of the
//! setup/run/teardown lifecycle. The engine hands it a [`RunHandle`] for
//! everything it may do during a run: read the resolved context, emit
//! logs and measurements, poll for abort, and report step execution into
//! the scheduler.

pub mod hooks;

use crate::core::{ExecutionContext, HardwareConfig, Measurement, ParamValue};
use crate::error::SequenceError;
use crate::events::{EventEmitter, LogLevel};
use crate::execution::abort::AbortHandle;
use crate::execution::scheduler::{StepOutcome, StepScheduler};
use crate::sequence::hooks::CompositeHook;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// What `run()` reports back. `passed` is the user's claim; the
/// supervisor's classification is authoritative and may override it.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub passed: bool,
    pub measurements: BTreeMap<String, Value>,
    pub data: BTreeMap<String, Value>,
    pub error: Option<String>,
}

impl RunResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// The lifecycle contract for user test logic.
///
/// `setup` acquires hardware, `run` does the work and returns the
/// verdict, `teardown` releases resources. `teardown` is always called
/// once, even when `setup` or `run` failed or the run was aborted.
#[async_trait]
pub trait Sequence: Send {
    async fn setup(&mut self, handle: &RunHandle) -> Result<(), SequenceError> {
        let _ = handle;
        Ok(())
    }

    async fn run(&mut self, handle: &RunHandle) -> Result<RunResult, SequenceError>;

    async fn teardown(&mut self, handle: &RunHandle) -> Result<(), SequenceError> {
        let _ = handle;
        Ok(())
    }
}

/// The engine-side services available to a running sequence.
pub struct RunHandle {
    context: Arc<ExecutionContext>,
    emitter: Arc<EventEmitter>,
    scheduler: Arc<StepScheduler>,
    hooks: Arc<CompositeHook>,
    abort: AbortHandle,
    measurements: Mutex<BTreeMap<String, Measurement>>,
    current_step: Mutex<Option<String>>,
}

impl RunHandle {
    pub(crate) fn new(
        context: Arc<ExecutionContext>,
        emitter: Arc<EventEmitter>,
        scheduler: Arc<StepScheduler>,
        hooks: Arc<CompositeHook>,
        abort: AbortHandle,
    ) -> Self {
        Self {
            context,
            emitter,
            scheduler,
            hooks,
            abort,
            measurements: Mutex::new(BTreeMap::new()),
            current_step: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.context.parameter(name)
    }

    pub fn hardware_config(&self, name: &str) -> Option<&HardwareConfig> {
        self.context.hardware_config(name)
    }

    pub fn scheduler(&self) -> &StepScheduler {
        &self.scheduler
    }

    fn current_step(&self) -> Option<String> {
        self.current_step.lock().ok().and_then(|s| s.clone())
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emitter.log(level, message, self.current_step());
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    /// Record a measurement: emitted immediately, retained for the final
    /// result (latest value wins on a repeated name).
    pub async fn record_measurement(&self, measurement: Measurement) {
        self.emitter.measurement(&measurement, self.current_step());
        self.hooks.on_measurement(&measurement).await;
        if let Ok(mut map) = self.measurements.lock() {
            map.insert(measurement.name.clone(), measurement);
        }
    }

    /// Name → value snapshot of everything recorded so far.
    pub fn measurements(&self) -> BTreeMap<String, Value> {
        self.measurements
            .lock()
            .map(|m| {
                m.iter()
                    .map(|(name, m)| (name.clone(), m.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if any recorded measurement failed its bounds or explicit verdict.
    pub fn any_measurement_failed(&self) -> bool {
        self.measurements
            .lock()
            .map(|m| m.values().any(|m| !m.passed()))
            .unwrap_or(false)
    }

    /// Cooperative abort poll. Call this at safe points in long-running
    /// bodies; returns `Err(Abort)` once an abort has been requested.
    pub fn check_abort(&self) -> Result<(), SequenceError> {
        self.abort.check()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Report one manifest step's execution. The scheduler enforces the
    /// step's timeout/retry policy and emits its start/complete events.
    pub async fn step<F, Fut>(&self, name: &str, body: F) -> StepOutcome
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<(), SequenceError>> + Send,
    {
        if let Ok(mut current) = self.current_step.lock() {
            *current = Some(name.to_string());
        }
        let outcome = self.scheduler.run_step(name, body).await;
        if let Ok(mut current) = self.current_step.lock() {
            *current = None;
        }
        outcome
    }
}
