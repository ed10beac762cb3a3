//! Sequence error taxonomy

use thiserror::Error;

/// Errors raised by the engine or by user sequence code.
///
/// Step-level failures (`Step`, `Timeout`, `TestFailure`) are recovered
/// locally by the scheduler's retry policy; lifecycle errors escalate to
/// the supervisor's final verdict.
#[derive(Debug, Clone, Error)]
pub enum SequenceError {
    /// Hardware/resource initialization failed
    #[error("setup failed: {0}")]
    Setup(String),

    /// Resource release failed; recorded, never overrides the verdict
    #[error("teardown failed: {0}")]
    Teardown(String),

    /// A step body failed
    #[error("step error: {0}")]
    Step(String),

    /// A step body did not report completion within its timeout window
    #[error("timed out after {seconds}s")]
    Timeout { seconds: f64 },

    /// The test ran and the verdict is a failure, not a system error
    #[error("test failure: {0}")]
    TestFailure(String),

    /// A hardware driver reported an error
    #[error("hardware error: {0}")]
    Hardware(String),

    /// Communication with a device or service failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Cooperative abort was observed
    #[error("aborted: {reason}")]
    Abort { reason: String },

    /// Configuration resolution failed before anything executed
    #[error("config error: {0}")]
    Config(String),
}

impl SequenceError {
    /// Stable error code used in emitted `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            SequenceError::Setup(_) => "SETUP_ERROR",
            SequenceError::Teardown(_) => "TEARDOWN_ERROR",
            SequenceError::Step(_) => "STEP_ERROR",
            SequenceError::Timeout { .. } => "TIMEOUT",
            SequenceError::TestFailure(_) => "TEST_FAILURE",
            SequenceError::Hardware(_) => "HARDWARE_ERROR",
            SequenceError::Connection(_) => "CONNECTION_ERROR",
            SequenceError::Abort { .. } => "ABORTED",
            SequenceError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether the scheduler may retry past this error.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            SequenceError::Step(_)
                | SequenceError::Timeout { .. }
                | SequenceError::TestFailure(_)
                | SequenceError::Connection(_)
        )
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, SequenceError::Abort { .. })
    }
}
