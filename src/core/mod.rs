pub mod context;
pub mod manifest;
pub mod validate;

pub use context::{ExecutionContext, HardwareConfig, Measurement, ParamValue};
pub use manifest::{
    ConfigFieldSchema, EntryPoint, FieldType, HardwareDefinition, ManualCommand,
    ManualStepConfig, Modes, ParameterDefinition, SequenceManifest, StepDefinition,
    DEFAULT_STEP_TIMEOUT,
};
pub use validate::{ValidationErrors, ValidationIssue};
