//! Sequence manifest model
//!
//! The manifest is the declarative configuration for a sequence: entry
//! point, execution modes, hardware map, parameter map, and ordered step
//! list. Instances are only produced by [`validate`](crate::core::validate),
//! so an existing `SequenceManifest` is always well-formed and immutable.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Value types allowed for hardware config fields and parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
}

impl FieldType {
    pub fn parse(s: &str) -> Option<FieldType> {
        match s {
            "string" => Some(FieldType::String),
            "integer" => Some(FieldType::Integer),
            "float" => Some(FieldType::Float),
            "boolean" => Some(FieldType::Boolean),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
        }
    }
}

/// Entry point descriptor for the user sequence implementation.
#[derive(Debug, Clone, Serialize)]
pub struct EntryPoint {
    pub module: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub cli_module: Option<String>,
}

/// Execution mode flags. Independent booleans; `automatic` defaults on.
#[derive(Debug, Clone, Serialize)]
pub struct Modes {
    pub automatic: bool,
    pub manual: bool,
    pub interactive: bool,
    pub cli: bool,
}

impl Default for Modes {
    fn default() -> Self {
        Self {
            automatic: true,
            manual: false,
            interactive: false,
            cli: false,
        }
    }
}

/// Schema for one field of a hardware config or parameter value.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigFieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub options: Option<Vec<Value>>,
    pub description: String,
}

/// A manually invokable hardware command (manual mode only).
#[derive(Debug, Clone, Serialize)]
pub struct ManualCommand {
    pub name: String,
    pub description: String,
}

/// One declared hardware resource.
#[derive(Debug, Clone, Serialize)]
pub struct HardwareDefinition {
    pub display_name: String,
    pub driver: String,
    pub config_schema: BTreeMap<String, ConfigFieldSchema>,
    pub manual_commands: Vec<ManualCommand>,
}

/// One declared sequence parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterDefinition {
    pub display_name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub options: Option<Vec<Value>>,
    pub unit: Option<String>,
}

/// Manual-mode sub-settings for a step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManualStepConfig {
    pub skippable: bool,
    pub auto_only: bool,
    pub prompt: Option<String>,
    pub pause_before: bool,
    pub pause_after: bool,
    pub overridable_parameters: Vec<String>,
}

/// One step descriptor. `order` defines execution order; ties are broken
/// by declaration order. `retry` counts additional attempts after the
/// first failure. `cleanup` steps still run after a prior failure or abort.
#[derive(Debug, Clone, Serialize)]
pub struct StepDefinition {
    pub name: String,
    pub display_name: String,
    pub order: i64,
    pub timeout: f64,
    pub estimated_duration: Option<f64>,
    pub retry: u32,
    pub cleanup: bool,
    pub manual: Option<ManualStepConfig>,
}

pub const DEFAULT_STEP_TIMEOUT: f64 = 60.0;

/// A validated, immutable sequence manifest.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub entry_point: EntryPoint,
    pub modes: Modes,
    pub hardware: BTreeMap<String, HardwareDefinition>,
    pub parameters: BTreeMap<String, ParameterDefinition>,
    pub steps: Vec<StepDefinition>,
    pub dependencies: Vec<String>,
}

impl SequenceManifest {
    /// Steps in execution order: ascending `order`, declaration order on ties.
    pub fn ordered_steps(&self) -> Vec<&StepDefinition> {
        let mut steps: Vec<&StepDefinition> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.ordered_steps().iter().map(|s| s.name.as_str()).collect()
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, order: i64) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            display_name: name.to_string(),
            order,
            timeout: DEFAULT_STEP_TIMEOUT,
            estimated_duration: None,
            retry: 0,
            cleanup: false,
            manual: None,
        }
    }

    fn manifest_with_steps(steps: Vec<StepDefinition>) -> SequenceManifest {
        SequenceManifest {
            name: "test_seq".into(),
            version: "1.0.0".into(),
            description: String::new(),
            entry_point: EntryPoint {
                module: "main".into(),
                class_name: "TestSeq".into(),
                cli_module: None,
            },
            modes: Modes::default(),
            hardware: BTreeMap::new(),
            parameters: BTreeMap::new(),
            steps,
            dependencies: vec![],
        }
    }

    #[test]
    fn test_steps_sorted_by_order() {
        let manifest = manifest_with_steps(vec![
            step("third", 30),
            step("first", 10),
            step("second", 20),
        ]);
        assert_eq!(manifest.step_names(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_order_ties_preserve_declaration_order() {
        let manifest = manifest_with_steps(vec![
            step("b", 10),
            step("a", 10),
            step("c", 5),
        ]);
        assert_eq!(manifest.step_names(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_non_contiguous_orders() {
        let manifest = manifest_with_steps(vec![step("x", 100), step("y", -3)]);
        assert_eq!(manifest.step_names(), vec!["y", "x"]);
    }
}
