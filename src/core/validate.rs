//! Manifest validation
//!
//! Turns a plain nested map (parsed YAML/JSON) into a typed
//! [`SequenceManifest`]. All semantic violations are collected and returned
//! together so a user fixes every error in one pass; a structurally
//! malformed document short-circuits with a single fatal error. Pure and
//! deterministic: the same input always yields the same manifest or the
//! same error list.

use crate::core::context::ParamValue;
use crate::core::manifest::{
    ConfigFieldSchema, EntryPoint, FieldType, HardwareDefinition, ManualCommand,
    ManualStepConfig, Modes, ParameterDefinition, SequenceManifest, StepDefinition,
    DEFAULT_STEP_TIMEOUT,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

/// A single field-scoped validation problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The full list of problems found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    pub issues: Vec<ValidationIssue>,
}

impl std::error::Error for ValidationErrors {}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "manifest validation failed ({} error(s)):", self.issues.len())?;
        for issue in &self.issues {
            writeln!(f, "  - {}", issue)?;
        }
        Ok(())
    }
}

impl ValidationErrors {
    fn fatal(field: &str, message: String) -> Self {
        Self {
            issues: vec![ValidationIssue {
                field: field.to_string(),
                message,
            }],
        }
    }

    /// True if some issue references the given field path.
    pub fn mentions(&self, field: &str) -> bool {
        self.issues.iter().any(|i| i.field == field)
    }
}

// Lenient raw layer: everything optional so missing/invalid fields become
// collected issues instead of a serde short-circuit.

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    description: String,
    entry_point: Option<RawEntryPoint>,
    modes: Option<RawModes>,
    #[serde(default)]
    hardware: BTreeMap<String, RawHardware>,
    #[serde(default)]
    parameters: BTreeMap<String, RawParameter>,
    #[serde(default)]
    steps: Vec<RawStep>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntryPoint {
    module: Option<String>,
    #[serde(rename = "class")]
    class_name: Option<String>,
    cli_module: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawModes {
    #[serde(default = "default_true")]
    automatic: bool,
    #[serde(default)]
    manual: bool,
    #[serde(default)]
    interactive: bool,
    #[serde(default)]
    cli: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct RawHardware {
    display_name: Option<String>,
    driver: Option<String>,
    #[serde(default)]
    config_schema: BTreeMap<String, RawFieldSchema>,
    #[serde(default)]
    manual_commands: Vec<RawManualCommand>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFieldSchema {
    #[serde(rename = "type")]
    field_type: Option<String>,
    #[serde(default)]
    required: bool,
    default: Option<Value>,
    min: Option<f64>,
    max: Option<f64>,
    options: Option<Vec<Value>>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawManualCommand {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawParameter {
    display_name: Option<String>,
    #[serde(rename = "type")]
    field_type: Option<String>,
    default: Option<Value>,
    min: Option<f64>,
    max: Option<f64>,
    options: Option<Vec<Value>>,
    unit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStep {
    name: Option<String>,
    display_name: Option<String>,
    order: Option<Value>,
    timeout: Option<f64>,
    estimated_duration: Option<f64>,
    retry: Option<i64>,
    #[serde(default)]
    cleanup: bool,
    manual: Option<RawManualStepConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawManualStepConfig {
    #[serde(default)]
    skippable: bool,
    #[serde(default)]
    auto_only: bool,
    prompt: Option<String>,
    #[serde(default)]
    pause_before: bool,
    #[serde(default)]
    pause_after: bool,
    #[serde(default)]
    overridable_parameters: Vec<String>,
}

impl SequenceManifest {
    /// Validate a plain nested map into a typed manifest.
    pub fn validate(raw: Value) -> Result<SequenceManifest, ValidationErrors> {
        let raw: RawManifest = serde_json::from_value(raw)
            .map_err(|e| ValidationErrors::fatal("manifest", format!("malformed document: {}", e)))?;

        let mut issues: Vec<ValidationIssue> = Vec::new();
        let mut push = |field: String, message: String| {
            issues.push(ValidationIssue { field, message });
        };

        // identifier syntax: letters/digits/underscore, not digit-leading
        let name_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .map_err(|e| ValidationErrors::fatal("manifest", e.to_string()))?;
        let version_re = Regex::new(r"^\d+\.\d+\.\d+$")
            .map_err(|e| ValidationErrors::fatal("manifest", e.to_string()))?;

        match &raw.name {
            None => push("name".into(), "required field missing".into()),
            Some(name) if !name_re.is_match(name) => push(
                "name".into(),
                format!("'{}' is not a valid identifier", name),
            ),
            _ => {}
        }

        match &raw.version {
            None => push("version".into(), "required field missing".into()),
            Some(version) if !version_re.is_match(version) => push(
                "version".into(),
                format!("'{}' does not match MAJOR.MINOR.PATCH", version),
            ),
            _ => {}
        }

        match &raw.entry_point {
            None => {
                push("entry_point.module".into(), "required field missing".into());
                push("entry_point.class".into(), "required field missing".into());
            }
            Some(ep) => {
                if ep.module.is_none() {
                    push("entry_point.module".into(), "required field missing".into());
                }
                if ep.class_name.is_none() {
                    push("entry_point.class".into(), "required field missing".into());
                }
            }
        }

        for (hw_name, hw) in &raw.hardware {
            for (field_name, schema) in &hw.config_schema {
                let path = format!("hardware.{}.config_schema.{}", hw_name, field_name);
                check_field_schema(
                    &path,
                    schema.field_type.as_deref(),
                    schema.min,
                    schema.max,
                    schema.options.as_deref(),
                    schema.default.as_ref(),
                    &mut push,
                );
            }
        }

        for (param_name, param) in &raw.parameters {
            let path = format!("parameters.{}", param_name);
            check_field_schema(
                &path,
                param.field_type.as_deref(),
                param.min,
                param.max,
                param.options.as_deref(),
                param.default.as_ref(),
                &mut push,
            );
        }

        let mut seen_names: HashSet<&str> = HashSet::new();
        for (i, step) in raw.steps.iter().enumerate() {
            match &step.name {
                None => push(format!("steps[{}].name", i), "required field missing".into()),
                Some(name) => {
                    if !seen_names.insert(name.as_str()) {
                        push(
                            format!("steps[{}].name", i),
                            format!("duplicate step name '{}'", name),
                        );
                    }
                }
            }
            match &step.order {
                None => push(format!("steps[{}].order", i), "required field missing".into()),
                Some(v) if v.as_i64().is_none() => {
                    push(format!("steps[{}].order", i), "must be an integer".into())
                }
                _ => {}
            }
            if let Some(retry) = step.retry {
                if retry < 0 {
                    push(
                        format!("steps[{}].retry", i),
                        "must be a non-negative integer".into(),
                    );
                }
            }
            if let Some(timeout) = step.timeout {
                if !(timeout > 0.0) {
                    push(
                        format!("steps[{}].timeout", i),
                        "must be strictly positive".into(),
                    );
                }
            }
        }

        if !issues.is_empty() {
            return Err(ValidationErrors { issues });
        }

        // All required fields verified present above; the fallbacks are dead.
        let ep = raw.entry_point.unwrap_or_default();
        Ok(SequenceManifest {
            name: raw.name.unwrap_or_default(),
            version: raw.version.unwrap_or_default(),
            description: raw.description,
            entry_point: EntryPoint {
                module: ep.module.unwrap_or_default(),
                class_name: ep.class_name.unwrap_or_default(),
                cli_module: ep.cli_module,
            },
            modes: raw.modes.map_or_else(Modes::default, |m| Modes {
                automatic: m.automatic,
                manual: m.manual,
                interactive: m.interactive,
                cli: m.cli,
            }),
            hardware: raw
                .hardware
                .into_iter()
                .map(|(name, hw)| {
                    let display_name = hw.display_name.unwrap_or_else(|| name.clone());
                    (
                        name,
                        HardwareDefinition {
                            display_name,
                            driver: hw.driver.unwrap_or_default(),
                            config_schema: hw
                                .config_schema
                                .into_iter()
                                .map(|(f, s)| (f, convert_field_schema(s)))
                                .collect(),
                            manual_commands: hw
                                .manual_commands
                                .into_iter()
                                .map(|c| ManualCommand {
                                    name: c.name,
                                    description: c.description,
                                })
                                .collect(),
                        },
                    )
                })
                .collect(),
            parameters: raw
                .parameters
                .into_iter()
                .map(|(name, p)| {
                    let display_name = p.display_name.unwrap_or_else(|| name.clone());
                    (
                        name,
                        ParameterDefinition {
                            display_name,
                            field_type: p
                                .field_type
                                .as_deref()
                                .and_then(FieldType::parse)
                                .unwrap_or(FieldType::String),
                            default: p.default,
                            min: p.min,
                            max: p.max,
                            options: p.options,
                            unit: p.unit,
                        },
                    )
                })
                .collect(),
            steps: raw
                .steps
                .into_iter()
                .map(|s| {
                    let name = s.name.unwrap_or_default();
                    let display_name = s.display_name.unwrap_or_else(|| name.clone());
                    StepDefinition {
                        name,
                        display_name,
                        order: s.order.and_then(|v| v.as_i64()).unwrap_or_default(),
                        timeout: s.timeout.unwrap_or(DEFAULT_STEP_TIMEOUT),
                        estimated_duration: s.estimated_duration,
                        retry: s.retry.unwrap_or(0) as u32,
                        cleanup: s.cleanup,
                        manual: s.manual.map(|m| ManualStepConfig {
                            skippable: m.skippable,
                            auto_only: m.auto_only,
                            prompt: m.prompt,
                            pause_before: m.pause_before,
                            pause_after: m.pause_after,
                            overridable_parameters: m.overridable_parameters,
                        }),
                    }
                })
                .collect(),
            dependencies: raw.dependencies,
        })
    }

    /// Parse and validate a manifest from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<SequenceManifest, ValidationErrors> {
        let value: Value = serde_yaml::from_str(yaml)
            .map_err(|e| ValidationErrors::fatal("manifest", format!("YAML parsing error: {}", e)))?;
        Self::validate(value)
    }

    /// Load and validate a manifest file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SequenceManifest, ValidationErrors> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ValidationErrors::fatal(
                "manifest",
                format!("cannot read {}: {}", path.as_ref().display(), e),
            )
        })?;
        Self::from_yaml(&content)
    }
}

fn convert_field_schema(raw: RawFieldSchema) -> ConfigFieldSchema {
    ConfigFieldSchema {
        field_type: raw
            .field_type
            .as_deref()
            .and_then(FieldType::parse)
            .unwrap_or(FieldType::String),
        required: raw.required,
        default: raw.default,
        min: raw.min,
        max: raw.max,
        options: raw.options,
        description: raw.description,
    }
}

/// Shared checks for hardware config fields and parameters: type name,
/// bounds legality, and eager default validation.
fn check_field_schema(
    path: &str,
    field_type: Option<&str>,
    min: Option<f64>,
    max: Option<f64>,
    options: Option<&[Value]>,
    default: Option<&Value>,
    push: &mut impl FnMut(String, String),
) {
    let ty = match field_type {
        None => {
            push(format!("{}.type", path), "required field missing".into());
            return;
        }
        Some(s) => match FieldType::parse(s) {
            Some(ty) => ty,
            None => {
                push(
                    format!("{}.type", path),
                    format!("'{}' is not one of string, integer, float, boolean", s),
                );
                return;
            }
        },
    };

    if !ty.is_numeric() && (min.is_some() || max.is_some()) {
        push(
            path.to_string(),
            format!("min/max are only legal on numeric types, not {}", ty.as_str()),
        );
    }

    if let Some(default) = default {
        if let Err(msg) = ParamValue::conform(default, ty, min, max, options) {
            push(format!("{}.default", path), msg);
        }
    }
}
