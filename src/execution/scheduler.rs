//! Step scheduler - supervises timeout, retry, and skip policy per step
//!
//! The plan comes from the validated manifest: ascending `order`, ties in
//! declaration order. User code reports into the scheduler through
//! [`run_step`](StepScheduler::run_step); the scheduler wraps each attempt
//! in a fresh timeout window, retries recoverable failures, and after a
//! non-cleanup step fails terminally skips everything except `cleanup`
//! steps.

use crate::core::SequenceManifest;
use crate::error::SequenceError;
use crate::events::{Event, EventEmitter};
use crate::execution::abort::AbortHandle;
use crate::sequence::hooks::CompositeHook;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, info, warn};

/// One step of the execution plan, resolved from the manifest.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub name: String,
    pub display_name: String,
    pub index: usize,
    pub timeout: Duration,
    pub retry: u32,
    pub cleanup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

/// Final record for one supervised step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    pub index: usize,
    pub attempts: u32,
    pub status: StepStatus,
    pub duration: Duration,
    pub error: Option<SequenceError>,
}

impl StepOutcome {
    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }
}

pub struct StepScheduler {
    plan: Vec<PlannedStep>,
    emitter: Arc<EventEmitter>,
    hooks: Arc<CompositeHook>,
    abort: AbortHandle,
    halted: AtomicBool,
    outcomes: Mutex<Vec<StepOutcome>>,
}

impl StepScheduler {
    pub fn from_manifest(
        manifest: &SequenceManifest,
        emitter: Arc<EventEmitter>,
        hooks: Arc<CompositeHook>,
        abort: AbortHandle,
    ) -> Self {
        let plan = manifest
            .ordered_steps()
            .into_iter()
            .enumerate()
            .map(|(index, step)| PlannedStep {
                name: step.name.clone(),
                display_name: step.display_name.clone(),
                index,
                timeout: Duration::from_secs_f64(step.timeout),
                retry: step.retry,
                cleanup: step.cleanup,
            })
            .collect();
        Self {
            plan,
            emitter,
            hooks,
            abort,
            halted: AtomicBool::new(false),
            outcomes: Mutex::new(Vec::new()),
        }
    }

    pub fn plan(&self) -> &[PlannedStep] {
        &self.plan
    }

    /// True once a non-cleanup step has failed terminally or an abort was
    /// observed; subsequent non-cleanup steps will be skipped.
    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::Acquire) || self.abort.is_aborted()
    }

    pub fn outcomes(&self) -> Vec<StepOutcome> {
        self.outcomes.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn any_step_failed(&self) -> bool {
        self.outcomes()
            .iter()
            .any(|o| o.status == StepStatus::Failed)
    }

    /// Supervise one step: look up its plan entry, enforce timeout and
    /// retry policy around `body`, and emit the step's lifecycle events.
    ///
    /// Each attempt gets a fresh timeout window. A timed-out attempt's
    /// future is dropped, so a body completing after the deadline can
    /// never produce a second outcome. Recoverable errors consume retry
    /// budget; abort fails the attempt immediately with no retry.
    pub async fn run_step<F, Fut>(&self, name: &str, mut body: F) -> StepOutcome
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<(), SequenceError>> + Send,
    {
        let total = self.plan.len();
        let step = match self.plan.iter().find(|s| s.name == name) {
            Some(step) => step.clone(),
            None => {
                warn!("Unknown step reported: {}", name);
                let error = SequenceError::Step(format!("unknown step '{}'", name));
                self.emitter.error(error.code(), error.to_string(), false);
                self.halted.store(true, Ordering::Release);
                return self.record(StepOutcome {
                    name: name.to_string(),
                    index: 0,
                    attempts: 0,
                    status: StepStatus::Failed,
                    duration: Duration::ZERO,
                    error: Some(error),
                });
            }
        };

        if self.halted() && !step.cleanup {
            info!("Skipping step {} after earlier failure", step.name);
            self.emitter.log(
                crate::events::LogLevel::Info,
                format!("step '{}' skipped", step.name),
                Some(step.name.clone()),
            );
            return self.record(StepOutcome {
                name: step.name.clone(),
                index: step.index,
                attempts: 0,
                status: StepStatus::Skipped,
                duration: Duration::ZERO,
                error: None,
            });
        }

        let progress = if total == 0 {
            None
        } else {
            Some(step.index as f64 / total as f64)
        };
        self.emitter.status("running", progress, Some(step.name.clone()));
        self.emitter.emit(Event::StepStart {
            step: step.name.clone(),
            index: step.index,
            total,
            description: Some(step.display_name.clone()),
        });
        self.hooks.on_step_start(&step.name).await;

        let started = Instant::now();
        let max_attempts = step.retry + 1;
        let mut attempts = 0u32;
        let mut last_error: Option<SequenceError> = None;

        while attempts < max_attempts {
            attempts += 1;

            // cleanup steps still get their attempts after an abort
            if !step.cleanup {
                if let Err(abort) = self.abort.check() {
                    info!("Step {} aborted before attempt {}", step.name, attempts);
                    last_error = Some(abort);
                    break;
                }
            }

            debug!(
                "Step {} attempt {}/{} (timeout {:?})",
                step.name, attempts, max_attempts, step.timeout
            );
            match timeout(step.timeout, body()).await {
                Ok(Ok(())) => {
                    last_error = None;
                    break;
                }
                Ok(Err(e)) if e.is_abort() => {
                    info!("Step {} observed abort: {}", step.name, e);
                    last_error = Some(e);
                    break;
                }
                Ok(Err(e)) => {
                    let retrying = attempts < max_attempts && e.recoverable();
                    warn!(
                        "Step {} attempt {} failed: {} (retrying: {})",
                        step.name, attempts, e, retrying
                    );
                    let recoverable = e.recoverable();
                    self.emitter.error(e.code(), e.to_string(), retrying && recoverable);
                    last_error = Some(e);
                    if !retrying {
                        break;
                    }
                }
                Err(_) => {
                    let e = SequenceError::Timeout {
                        seconds: step.timeout.as_secs_f64(),
                    };
                    let retrying = attempts < max_attempts;
                    warn!(
                        "Step {} attempt {} timed out after {:?} (retrying: {})",
                        step.name, attempts, step.timeout, retrying
                    );
                    self.emitter.error(e.code(), e.to_string(), retrying);
                    last_error = Some(e);
                    if !retrying {
                        break;
                    }
                }
            }
        }

        let duration = started.elapsed();
        let passed = last_error.is_none();
        let outcome = StepOutcome {
            name: step.name.clone(),
            index: step.index,
            attempts,
            status: if passed {
                StepStatus::Passed
            } else {
                StepStatus::Failed
            },
            duration,
            error: last_error,
        };

        self.emitter.emit(Event::StepComplete {
            step: step.name.clone(),
            index: step.index,
            passed,
            duration_seconds: duration.as_secs_f64(),
            error: outcome.error.as_ref().map(|e| e.to_string()),
        });
        self.hooks.on_step_complete(&step.name, passed).await;

        if !passed && !step.cleanup {
            info!("Step {} failed terminally, halting later non-cleanup steps", step.name);
            self.halted.store(true, Ordering::Release);
        }

        self.record(outcome)
    }

    fn record(&self, outcome: StepOutcome) -> StepOutcome {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push(outcome.clone());
        }
        outcome
    }
}
