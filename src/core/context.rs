//! Execution context and measurements
//!
//! The context is built once per run by resolving manifest-declared
//! defaults against caller overrides, then never mutated: private fields,
//! accessor methods, shared via `Arc` into user code and the scheduler.

use crate::core::manifest::{FieldType, SequenceManifest};
use crate::error::SequenceError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A resolved, type-checked configuration or parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    /// Check a raw value against a field schema and coerce it.
    ///
    /// `integer` input is accepted for `float` fields; every other
    /// cross-type combination is rejected. `options` restricts membership
    /// regardless of type; `min`/`max` apply to numeric values.
    pub fn conform(
        value: &Value,
        field_type: FieldType,
        min: Option<f64>,
        max: Option<f64>,
        options: Option<&[Value]>,
    ) -> Result<ParamValue, String> {
        if let Some(options) = options {
            if !options.contains(value) {
                return Err(format!(
                    "value {} is not one of the allowed options {:?}",
                    value, options
                ));
            }
        }

        let resolved = match field_type {
            FieldType::String => match value.as_str() {
                Some(s) => ParamValue::String(s.to_string()),
                None => return Err(format!("expected a string, got {}", value)),
            },
            FieldType::Integer => match value.as_i64() {
                Some(i) => ParamValue::Integer(i),
                None => return Err(format!("expected an integer, got {}", value)),
            },
            FieldType::Float => match value.as_f64() {
                Some(f) => ParamValue::Float(f),
                None => return Err(format!("expected a number, got {}", value)),
            },
            FieldType::Boolean => match value.as_bool() {
                Some(b) => ParamValue::Bool(b),
                None => return Err(format!("expected a boolean, got {}", value)),
            },
        };

        if let Some(n) = resolved.as_f64() {
            if let Some(min) = min {
                if n < min {
                    return Err(format!("value {} is below the minimum {}", n, min));
                }
            }
            if let Some(max) = max {
                if n > max {
                    return Err(format!("value {} is above the maximum {}", n, max));
                }
            }
        }

        Ok(resolved)
    }

    /// Coerce a raw value with no declared schema, inferring the type.
    fn infer(value: &Value) -> Result<ParamValue, String> {
        match value {
            Value::String(s) => Ok(ParamValue::String(s.clone())),
            Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(ParamValue::Integer(i)),
                None => match n.as_f64() {
                    Some(f) => Ok(ParamValue::Float(f)),
                    None => Err(format!("unrepresentable number {}", n)),
                },
            },
            other => Err(format!("unsupported value {}", other)),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Integer(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::String(s) => Value::String(s.clone()),
            ParamValue::Integer(i) => Value::from(*i),
            ParamValue::Float(f) => Value::from(*f),
            ParamValue::Bool(b) => Value::from(*b),
        }
    }
}

pub type HardwareConfig = BTreeMap<String, ParamValue>;

/// Immutable per-run bundle of identifiers and resolved configuration.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    execution_id: String,
    sequence_name: String,
    sequence_version: String,
    station_id: Option<String>,
    operator: Option<String>,
    serial_number: Option<String>,
    hardware: BTreeMap<String, HardwareConfig>,
    parameters: BTreeMap<String, ParamValue>,
    created_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Resolve manifest defaults against caller overrides.
    ///
    /// Two stages per hardware entry and per parameter: schema defaults
    /// first, then overrides on top. Every `required: true` hardware field
    /// must end up with a value; every parameter must end up with a value
    /// satisfying its type, bounds, and options. The first offending field
    /// is reported by name in a [`SequenceError::Config`].
    pub fn build(
        manifest: &SequenceManifest,
        hardware_overrides: &BTreeMap<String, BTreeMap<String, Value>>,
        parameter_overrides: &BTreeMap<String, Value>,
        execution_id: Option<String>,
    ) -> Result<ExecutionContext, SequenceError> {
        for name in hardware_overrides.keys() {
            if !manifest.hardware.contains_key(name) {
                return Err(SequenceError::Config(format!(
                    "unknown hardware '{}' in overrides",
                    name
                )));
            }
        }
        for name in parameter_overrides.keys() {
            if !manifest.parameters.contains_key(name) {
                return Err(SequenceError::Config(format!(
                    "unknown parameter '{}' in overrides",
                    name
                )));
            }
        }

        let mut hardware: BTreeMap<String, HardwareConfig> = BTreeMap::new();
        for (hw_name, hw) in &manifest.hardware {
            let overrides = hardware_overrides.get(hw_name);
            let mut config = HardwareConfig::new();

            for (field, schema) in &hw.config_schema {
                let raw = overrides
                    .and_then(|o| o.get(field))
                    .or(schema.default.as_ref());
                match raw {
                    Some(raw) => {
                        let value = ParamValue::conform(
                            raw,
                            schema.field_type,
                            schema.min,
                            schema.max,
                            schema.options.as_deref(),
                        )
                        .map_err(|msg| {
                            SequenceError::Config(format!(
                                "hardware '{}' field '{}': {}",
                                hw_name, field, msg
                            ))
                        })?;
                        config.insert(field.clone(), value);
                    }
                    None if schema.required => {
                        return Err(SequenceError::Config(format!(
                            "hardware '{}' field '{}' is required but has no value",
                            hw_name, field
                        )));
                    }
                    None => {}
                }
            }

            // schema-less override fields ride along with inferred types
            if let Some(overrides) = overrides {
                for (field, raw) in overrides {
                    if !hw.config_schema.contains_key(field) {
                        let value = ParamValue::infer(raw).map_err(|msg| {
                            SequenceError::Config(format!(
                                "hardware '{}' field '{}': {}",
                                hw_name, field, msg
                            ))
                        })?;
                        config.insert(field.clone(), value);
                    }
                }
            }

            hardware.insert(hw_name.clone(), config);
        }

        let mut parameters = BTreeMap::new();
        for (name, param) in &manifest.parameters {
            let raw = parameter_overrides.get(name).or(param.default.as_ref());
            match raw {
                Some(raw) => {
                    let value = ParamValue::conform(
                        raw,
                        param.field_type,
                        param.min,
                        param.max,
                        param.options.as_deref(),
                    )
                    .map_err(|msg| {
                        SequenceError::Config(format!("parameter '{}': {}", name, msg))
                    })?;
                    parameters.insert(name.clone(), value);
                }
                None => {
                    return Err(SequenceError::Config(format!(
                        "parameter '{}' has no default and no override",
                        name
                    )));
                }
            }
        }

        Ok(ExecutionContext {
            execution_id: execution_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()[..8].to_string()),
            sequence_name: manifest.name.clone(),
            sequence_version: manifest.version.clone(),
            station_id: None,
            operator: None,
            serial_number: None,
            hardware,
            parameters,
            created_at: Utc::now(),
        })
    }

    pub fn with_station_id(mut self, station_id: impl Into<String>) -> Self {
        self.station_id = Some(station_id.into());
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn sequence_name(&self) -> &str {
        &self.sequence_name
    }

    pub fn sequence_version(&self) -> &str {
        &self.sequence_version
    }

    pub fn station_id(&self) -> Option<&str> {
        self.station_id.as_deref()
    }

    pub fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn hardware_config(&self, name: &str) -> Option<&HardwareConfig> {
        self.hardware.get(name)
    }

    pub fn hardware(&self) -> &BTreeMap<String, HardwareConfig> {
        &self.hardware
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.parameters
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A named measurement with an auto-computed verdict.
///
/// `passed` is `true` when the value sits within the declared bounds, with
/// a missing bound treated as unbounded on that side. An explicit verdict
/// from [`with_passed`](Measurement::with_passed) always wins. Non-numeric
/// values with no bounds and no explicit verdict count as passed.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub name: String,
    pub value: Value,
    pub unit: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(skip)]
    explicit_passed: Option<bool>,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            unit: None,
            min: None,
            max: None,
            explicit_passed: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_limits(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_passed(mut self, passed: bool) -> Self {
        self.explicit_passed = Some(passed);
        self
    }

    pub fn passed(&self) -> bool {
        if let Some(explicit) = self.explicit_passed {
            return explicit;
        }
        match self.value.as_f64() {
            Some(n) => {
                self.min.map_or(true, |min| n >= min) && self.max.map_or(true, |max| n <= max)
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::SequenceManifest;
    use serde_json::json;

    fn manifest() -> SequenceManifest {
        SequenceManifest::validate(json!({
            "name": "ctx_test",
            "version": "1.0.0",
            "entry_point": {"module": "main", "class": "CtxTest"},
            "hardware": {
                "psu": {
                    "display_name": "Power Supply",
                    "driver": "drivers.psu",
                    "config_schema": {
                        "address": {"type": "string", "required": true},
                        "channel": {"type": "integer", "default": 1, "min": 1.0, "max": 4.0},
                    }
                }
            },
            "parameters": {
                "target_voltage": {"type": "float", "default": 3.3, "min": 0.0, "max": 5.0},
                "mode": {"type": "string", "options": ["fast", "slow"], "default": "slow"},
            }
        }))
        .unwrap()
    }

    fn no_overrides() -> (
        BTreeMap<String, BTreeMap<String, Value>>,
        BTreeMap<String, Value>,
    ) {
        (BTreeMap::new(), BTreeMap::new())
    }

    #[test]
    fn test_required_field_missing_names_field() {
        let (hw, params) = no_overrides();
        let err = ExecutionContext::build(&manifest(), &hw, &params, None).unwrap_err();
        assert!(err.to_string().contains("address"), "got: {}", err);
    }

    #[test]
    fn test_defaults_then_overrides() {
        let mut hw = BTreeMap::new();
        hw.insert(
            "psu".to_string(),
            BTreeMap::from([
                ("address".to_string(), json!("GPIB0::5")),
                ("channel".to_string(), json!(2)),
            ]),
        );
        let mut params = BTreeMap::new();
        params.insert("target_voltage".to_string(), json!(4));

        let ctx = ExecutionContext::build(&manifest(), &hw, &params, Some("run-1".into())).unwrap();
        assert_eq!(ctx.execution_id(), "run-1");
        let psu = ctx.hardware_config("psu").unwrap();
        assert_eq!(psu.get("address").unwrap().as_str(), Some("GPIB0::5"));
        assert_eq!(psu.get("channel").unwrap().as_i64(), Some(2));
        // integer accepted for a float parameter
        assert_eq!(ctx.parameter("target_voltage").unwrap().as_f64(), Some(4.0));
        // untouched parameter keeps its default
        assert_eq!(ctx.parameter("mode").unwrap().as_str(), Some("slow"));
    }

    #[test]
    fn test_override_out_of_bounds_rejected() {
        let mut hw = BTreeMap::new();
        hw.insert(
            "psu".to_string(),
            BTreeMap::from([
                ("address".to_string(), json!("GPIB0::5")),
                ("channel".to_string(), json!(9)),
            ]),
        );
        let (_, params) = no_overrides();
        let err = ExecutionContext::build(&manifest(), &hw, &params, None).unwrap_err();
        assert!(matches!(err, SequenceError::Config(_)));
        assert!(err.to_string().contains("channel"));
    }

    #[test]
    fn test_option_violation_rejected() {
        let mut hw = BTreeMap::new();
        hw.insert(
            "psu".to_string(),
            BTreeMap::from([("address".to_string(), json!("x"))]),
        );
        let mut params = BTreeMap::new();
        params.insert("mode".to_string(), json!("medium"));
        let err = ExecutionContext::build(&manifest(), &hw, &params, None).unwrap_err();
        assert!(err.to_string().contains("mode"));
    }

    #[test]
    fn test_unknown_names_rejected() {
        let (_, params) = no_overrides();
        let mut hw = BTreeMap::new();
        hw.insert("dmm".to_string(), BTreeMap::new());
        let err = ExecutionContext::build(&manifest(), &hw, &params, None).unwrap_err();
        assert!(err.to_string().contains("dmm"));

        let (hw, _) = no_overrides();
        let mut params = BTreeMap::new();
        params.insert("bogus".to_string(), json!(1));
        let err = ExecutionContext::build(&manifest(), &hw, &params, None).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut hw = BTreeMap::new();
        hw.insert(
            "psu".to_string(),
            BTreeMap::from([("address".to_string(), json!(42))]),
        );
        let (_, params) = no_overrides();
        let err = ExecutionContext::build(&manifest(), &hw, &params, None).unwrap_err();
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn test_generated_execution_id() {
        let mut hw = BTreeMap::new();
        hw.insert(
            "psu".to_string(),
            BTreeMap::from([("address".to_string(), json!("x"))]),
        );
        let (_, params) = no_overrides();
        let ctx = ExecutionContext::build(&manifest(), &hw, &params, None).unwrap();
        assert_eq!(ctx.execution_id().len(), 8);
    }

    #[test]
    fn test_measurement_bounds() {
        let m = Measurement::new("voltage", 3.28).with_limits(Some(3.0), Some(3.6));
        assert!(m.passed());
        let m = Measurement::new("voltage", 2.9).with_limits(Some(3.0), Some(3.6));
        assert!(!m.passed());
    }

    #[test]
    fn test_measurement_unbounded_sides() {
        assert!(Measurement::new("v", 100.0).with_limits(Some(3.0), None).passed());
        assert!(!Measurement::new("v", 2.0).with_limits(Some(3.0), None).passed());
        assert!(Measurement::new("v", -50.0).with_limits(None, Some(0.0)).passed());
    }

    #[test]
    fn test_measurement_explicit_passed_wins() {
        let m = Measurement::new("v", 3.3)
            .with_limits(Some(3.0), Some(3.6))
            .with_passed(false);
        assert!(!m.passed());
        let m = Measurement::new("fw_version", "1.2.3").with_passed(false);
        assert!(!m.passed());
    }

    #[test]
    fn test_measurement_non_numeric_defaults_passed() {
        assert!(Measurement::new("serial", "ABC123").passed());
    }
}
