//! sequencer - runtime for manufacturing test sequences
//!
//! A manifest describes the sequence (hardware, parameters, steps); the
//! engine validates it, resolves an immutable execution context, then
//! drives user `setup`/`run`/`teardown` code under a supervisor that
//! enforces step timeouts, retries, cleanup guarantees, and cooperative
//! abort, while emitting an ordered JSON-Lines event stream.

pub mod cli;
pub mod core;
pub mod error;
pub mod events;
pub mod execution;
pub mod sequence;

// Re-export commonly used types
pub use cli::{run_from_cli, CliArgs, RunConfig};
pub use core::{
    ExecutionContext, Measurement, ParamValue, SequenceManifest, StepDefinition,
    ValidationErrors, ValidationIssue,
};
pub use error::SequenceError;
pub use events::{Event, EventEmitter, EventSink, JsonLinesSink, LogLevel};
pub use execution::{
    AbortHandle, RunReport, RunState, RunSupervisor, StepOutcome, StepScheduler, StepStatus,
};
pub use sequence::hooks::{CompositeHook, LifecycleHook};
pub use sequence::{RunHandle, RunResult, Sequence};
