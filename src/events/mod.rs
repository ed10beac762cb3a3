//! Event stream
//!
//! Everything observable about a run flows through one ordered channel:
//! the supervisor and scheduler hand [`Event`]s to an [`EventEmitter`],
//! which forwards them synchronously to a single [`EventSink`]. Delivery
//! is best-effort: a failing sink is logged and the run continues.

use crate::core::Measurement;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One emitted event, tagged for the JSON-Lines wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log {
        level: LogLevel,
        message: String,
        step: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Status {
        phase: String,
        progress: Option<f64>,
        step: Option<String>,
        message: Option<String>,
    },
    StepStart {
        step: String,
        index: usize,
        total: usize,
        description: Option<String>,
    },
    StepComplete {
        step: String,
        index: usize,
        passed: bool,
        duration_seconds: f64,
        error: Option<String>,
    },
    Measurement {
        name: String,
        value: Value,
        unit: Option<String>,
        passed: bool,
        min: Option<f64>,
        max: Option<f64>,
        step: Option<String>,
    },
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
    RunComplete {
        passed: bool,
        duration_seconds: f64,
        measurements: BTreeMap<String, Value>,
        error: Option<String>,
    },
}

/// Destination for emitted events. Implementations are driven from one
/// thread at a time; the emitter serializes access.
pub trait EventSink: Send {
    fn emit(&mut self, event: &Event) -> io::Result<()>;
}

/// Writes one JSON object per line, flushed per event so a supervising
/// process sees output promptly.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &Event) -> io::Result<()> {
        let line = serde_json::to_string(event).map_err(io::Error::other)?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()
    }
}

/// Ordered, failure-tolerant fan-in point for the run's event stream.
pub struct EventEmitter {
    sink: Mutex<Box<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new(sink: Box<dyn EventSink>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Emitter writing JSON lines to stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(JsonLinesSink::new(io::stdout())))
    }

    /// Hand one event to the sink. Sink failures are logged and swallowed:
    /// event delivery never decides run correctness.
    pub fn emit(&self, event: Event) {
        match self.sink.lock() {
            Ok(mut sink) => {
                if let Err(e) = sink.emit(&event) {
                    tracing::warn!(error = %e, "event sink failed, continuing");
                }
            }
            Err(_) => tracing::warn!("event sink lock poisoned, event dropped"),
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, step: Option<String>) {
        self.emit(Event::Log {
            level,
            message: message.into(),
            step,
            timestamp: Utc::now(),
        });
    }

    pub fn status(&self, phase: &str, progress: Option<f64>, step: Option<String>) {
        self.emit(Event::Status {
            phase: phase.to_string(),
            progress,
            step,
            message: None,
        });
    }

    pub fn measurement(&self, m: &Measurement, step: Option<String>) {
        self.emit(Event::Measurement {
            name: m.name.clone(),
            value: m.value.clone(),
            unit: m.unit.clone(),
            passed: m.passed(),
            min: m.min,
            max: m.max,
            step,
        });
    }

    pub fn error(&self, code: &str, message: impl Into<String>, recoverable: bool) {
        self.emit(Event::Error {
            code: code.to_string(),
            message: message.into(),
            recoverable,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct VecSink(Arc<Mutex<Vec<Event>>>);

    impl EventSink for VecSink {
        fn emit(&mut self, event: &Event) -> io::Result<()> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn emit(&mut self, _event: &Event) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    #[test]
    fn test_events_arrive_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let emitter = EventEmitter::new(Box::new(VecSink(seen.clone())));
        emitter.status("running", Some(0.0), None);
        emitter.emit(Event::StepStart {
            step: "measure".into(),
            index: 0,
            total: 1,
            description: None,
        });
        emitter.log(LogLevel::Info, "measuring", Some("measure".into()));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], Event::Status { .. }));
        assert!(matches!(seen[1], Event::StepStart { .. }));
        assert!(matches!(seen[2], Event::Log { .. }));
    }

    #[test]
    fn test_sink_failure_does_not_panic_or_propagate() {
        let emitter = EventEmitter::new(Box::new(FailingSink));
        emitter.error("STEP_ERROR", "boom", true);
        emitter.log(LogLevel::Warning, "still here", None);
    }

    #[test]
    fn test_json_lines_format() {
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut sink = JsonLinesSink::new(&mut buf);
            sink.emit(&Event::Error {
                code: "TIMEOUT".into(),
                message: "step timed out".into(),
                recoverable: true,
            })
            .unwrap();
        }
        let line = String::from_utf8(buf).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["code"], "TIMEOUT");
        assert_eq!(parsed["recoverable"], true);
    }

    #[test]
    fn test_measurement_event_carries_verdict() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let emitter = EventEmitter::new(Box::new(VecSink(seen.clone())));
        let m = Measurement::new("voltage", 2.9)
            .with_unit("V")
            .with_limits(Some(3.0), Some(3.6));
        emitter.measurement(&m, Some("power_check".into()));

        let seen = seen.lock().unwrap();
        match &seen[0] {
            Event::Measurement { passed, unit, step, .. } => {
                assert!(!passed);
                assert_eq!(unit.as_deref(), Some("V"));
                assert_eq!(step.as_deref(), Some("power_check"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
