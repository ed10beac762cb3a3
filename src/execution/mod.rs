pub mod abort;
pub mod scheduler;
pub mod supervisor;

pub use abort::AbortHandle;
pub use scheduler::{PlannedStep, StepOutcome, StepScheduler, StepStatus};
pub use supervisor::{RunReport, RunState, RunSupervisor};
