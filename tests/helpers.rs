//! Test utilities shared by the integration tests

use sequencer::{
    Event, EventEmitter, EventSink, ExecutionContext, RunReport, RunSupervisor,
    SequenceManifest, StepStatus,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};

/// Sink that keeps every event in memory for later assertions.
pub struct RecordingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingSink {
    pub fn new(events: Arc<Mutex<Vec<Event>>>) -> Self {
        Self { events }
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &Event) -> io::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn recording_emitter() -> (Arc<EventEmitter>, Arc<Mutex<Vec<Event>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let emitter = Arc::new(EventEmitter::new(Box::new(RecordingSink::new(
        events.clone(),
    ))));
    (emitter, events)
}

/// Parse a manifest from YAML, panicking with the full issue list on error.
pub fn manifest_from_yaml(yaml: &str) -> SequenceManifest {
    SequenceManifest::from_yaml(yaml)
        .unwrap_or_else(|e| panic!("Failed to validate manifest:\n{}", e))
}

/// A board-test style manifest with hardware, parameters, retries, short
/// timeouts, and a trailing cleanup step.
pub const BOARD_TEST_YAML: &str = r#"
name: board_test
version: 1.0.0
description: Bring-up and measurement for the demo board
entry_point:
  module: board_test
  class: BoardTest
hardware:
  psu:
    display_name: Power Supply
    driver: drivers.psu
    config_schema:
      address:
        type: string
        required: true
      channel:
        type: integer
        default: 1
        min: 1.0
        max: 4.0
parameters:
  target_voltage:
    type: float
    default: 3.3
    min: 0.0
    max: 5.0
steps:
  - name: power_on
    order: 10
    timeout: 1.0
  - name: measure_rail
    order: 20
    timeout: 1.0
    retry: 2
  - name: verify
    order: 30
    timeout: 1.0
  - name: discharge
    order: 40
    timeout: 1.0
    cleanup: true
"#;

pub fn board_manifest() -> SequenceManifest {
    manifest_from_yaml(BOARD_TEST_YAML)
}

/// Overrides satisfying the board manifest's required fields.
pub fn board_overrides() -> BTreeMap<String, BTreeMap<String, Value>> {
    BTreeMap::from([(
        "psu".to_string(),
        BTreeMap::from([("address".to_string(), json!("GPIB0::5"))]),
    )])
}

/// Supervisor over the board manifest with a recording sink.
pub fn board_supervisor() -> (RunSupervisor, Arc<Mutex<Vec<Event>>>) {
    let manifest = board_manifest();
    let context = ExecutionContext::build(
        &manifest,
        &board_overrides(),
        &BTreeMap::new(),
        Some("itest".to_string()),
    )
    .unwrap();
    let (emitter, events) = recording_emitter();
    let supervisor = RunSupervisor::new(&manifest, Arc::new(context), emitter);
    (supervisor, events)
}

/// Tag names of the captured events, in emission order.
pub fn event_kinds(events: &Mutex<Vec<Event>>) -> Vec<&'static str> {
    events
        .lock()
        .unwrap()
        .iter()
        .map(|e| match e {
            Event::Log { .. } => "log",
            Event::Status { .. } => "status",
            Event::StepStart { .. } => "step_start",
            Event::StepComplete { .. } => "step_complete",
            Event::Measurement { .. } => "measurement",
            Event::Error { .. } => "error",
            Event::RunComplete { .. } => "run_complete",
        })
        .collect()
}

pub fn step_outcome<'a>(
    report: &'a RunReport,
    name: &str,
) -> &'a sequencer::StepOutcome {
    report
        .steps
        .iter()
        .find(|o| o.name == name)
        .unwrap_or_else(|| panic!("no outcome recorded for step '{}'", name))
}

pub fn assert_step_status(report: &RunReport, name: &str, status: StepStatus) {
    let outcome = step_outcome(report, name);
    assert_eq!(
        outcome.status, status,
        "step '{}' should be {:?}, was {:?} (error: {:?})",
        name, status, outcome.status, outcome.error
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_manifest_is_valid() {
        let manifest = board_manifest();
        assert_eq!(
            manifest.step_names(),
            vec!["power_on", "measure_rail", "verify", "discharge"]
        );
        assert!(manifest.step("discharge").unwrap().cleanup);
    }

    #[test]
    fn test_recording_emitter_captures() {
        let (emitter, events) = recording_emitter();
        emitter.status("running", None, None);
        assert_eq!(event_kinds(&events), vec!["status"]);
    }
}
