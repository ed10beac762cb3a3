//! Command-line contract for sequence processes
//!
//! A sequence binary embeds the engine and calls [`run_from_cli`]:
//! `--start --config/--config-file` runs to completion, `--start
//! --dry-run` validates and resolves configuration without touching
//! hardware, `--stop` prints a stop command for the side channel that
//! signals an already-running instance. Exit codes: 0 passed (or dry-run
//! clean), 1 failed/errored/aborted, 2 configuration problems.

use crate::core::{ExecutionContext, SequenceManifest};
use crate::error::SequenceError;
use crate::events::EventEmitter;
use crate::execution::supervisor::{RunState, RunSupervisor};
use crate::sequence::Sequence;
use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

pub const EXIT_PASSED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;

/// Station-facing argument set for a sequence process
#[derive(Debug, Parser, Clone)]
#[command(name = "sequence")]
#[command(about = "Run a test sequence", long_about = None)]
pub struct CliArgs {
    /// Start the sequence run
    #[arg(long)]
    pub start: bool,

    /// Print the stop command object for a running instance
    #[arg(long)]
    pub stop: bool,

    /// Validate the manifest and resolve configuration, then exit
    #[arg(long)]
    pub dry_run: bool,

    /// Run configuration as inline JSON
    #[arg(long)]
    pub config: Option<String>,

    /// Run configuration file (YAML or JSON)
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Execution identifier assigned by the station service
    #[arg(long)]
    pub execution_id: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

/// Caller-supplied run configuration: overrides plus station metadata.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub hardware: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl RunConfig {
    /// Resolve `--config` / `--config-file` into one config. Inline JSON
    /// wins when both are given.
    pub fn from_args(args: &CliArgs) -> Result<RunConfig, SequenceError> {
        if let Some(json) = &args.config {
            return serde_json::from_str(json)
                .map_err(|e| SequenceError::Config(format!("invalid --config JSON: {}", e)));
        }
        if let Some(path) = &args.config_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                SequenceError::Config(format!("cannot read {}: {}", path.display(), e))
            })?;
            return serde_yaml::from_str(&content).map_err(|e| {
                SequenceError::Config(format!("invalid config file {}: {}", path.display(), e))
            });
        }
        Ok(RunConfig::default())
    }
}

fn build_context(
    manifest: &SequenceManifest,
    config: &RunConfig,
    execution_id: Option<String>,
) -> Result<ExecutionContext, SequenceError> {
    let mut ctx = ExecutionContext::build(
        manifest,
        &config.hardware,
        &config.parameters,
        execution_id,
    )?;
    if let Some(station_id) = &config.station_id {
        ctx = ctx.with_station_id(station_id);
    }
    if let Some(operator) = &config.operator {
        ctx = ctx.with_operator(operator);
    }
    if let Some(serial) = &config.serial_number {
        ctx = ctx.with_serial_number(serial);
    }
    Ok(ctx)
}

/// Drive one sequence process invocation and return its exit code.
pub async fn run_from_cli<S: Sequence>(
    args: &CliArgs,
    manifest: &SequenceManifest,
    sequence: S,
) -> i32 {
    if args.stop {
        // the station service delivers this over its own side channel
        println!("{}", serde_json::json!({"command": "stop"}));
        return EXIT_PASSED;
    }

    if !args.start {
        error!("nothing to do: pass --start or --stop");
        return EXIT_CONFIG;
    }

    let config = match RunConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return EXIT_CONFIG;
        }
    };

    let context = match build_context(manifest, &config, args.execution_id.clone()) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("{}", e);
            return EXIT_CONFIG;
        }
    };

    if args.dry_run {
        info!(
            "dry run ok: {} v{}, {} hardware, {} parameters, {} steps",
            manifest.name,
            manifest.version,
            context.hardware().len(),
            context.parameters().len(),
            manifest.steps.len()
        );
        return EXIT_PASSED;
    }

    let emitter = Arc::new(EventEmitter::stdout());
    let supervisor = RunSupervisor::new(manifest, context, emitter);

    // honor an external stop signal while the run is in flight
    let abort = supervisor.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort("stop requested");
        }
    });

    let report = supervisor.execute(sequence).await;
    match report.state {
        RunState::Passed => EXIT_PASSED,
        _ => EXIT_FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{RunHandle, RunResult};
    use serde_json::json;

    fn manifest() -> SequenceManifest {
        SequenceManifest::validate(json!({
            "name": "cli_test",
            "version": "1.0.0",
            "entry_point": {"module": "main", "class": "CliTest"},
            "parameters": {
                "cycles": {"type": "integer", "default": 3, "min": 1.0, "max": 10.0}
            },
            "steps": [{"name": "only", "order": 1, "timeout": 5.0}],
        }))
        .unwrap()
    }

    struct Verdict(bool);

    #[async_trait::async_trait]
    impl Sequence for Verdict {
        async fn run(&mut self, handle: &RunHandle) -> Result<RunResult, SequenceError> {
            handle.step("only", || async { Ok(()) }).await;
            if self.0 {
                Ok(RunResult::pass())
            } else {
                Ok(RunResult::fail("nope"))
            }
        }
    }

    #[test]
    fn test_arg_parsing() {
        let args = CliArgs::try_parse_from([
            "seq",
            "--start",
            "--config",
            r#"{"parameters": {"cycles": 5}}"#,
            "--execution-id",
            "run-42",
        ])
        .unwrap();
        assert!(args.start);
        assert!(!args.dry_run);
        assert_eq!(args.execution_id.as_deref(), Some("run-42"));
        let config = RunConfig::from_args(&args).unwrap();
        assert_eq!(config.parameters["cycles"], json!(5));
    }

    #[tokio::test]
    async fn test_dry_run_exits_zero_without_running() {
        let args =
            CliArgs::try_parse_from(["seq", "--start", "--dry-run"]).unwrap();
        struct Never;
        #[async_trait::async_trait]
        impl Sequence for Never {
            async fn run(&mut self, _h: &RunHandle) -> Result<RunResult, SequenceError> {
                panic!("dry run must not invoke run()");
            }
        }
        assert_eq!(run_from_cli(&args, &manifest(), Never).await, EXIT_PASSED);
    }

    #[tokio::test]
    async fn test_bad_config_exits_two() {
        let args =
            CliArgs::try_parse_from(["seq", "--start", "--config", "{not json"]).unwrap();
        assert_eq!(run_from_cli(&args, &manifest(), Verdict(true)).await, EXIT_CONFIG);
    }

    #[tokio::test]
    async fn test_out_of_range_override_exits_two() {
        let args = CliArgs::try_parse_from([
            "seq",
            "--start",
            "--dry-run",
            "--config",
            r#"{"parameters": {"cycles": 99}}"#,
        ])
        .unwrap();
        assert_eq!(run_from_cli(&args, &manifest(), Verdict(true)).await, EXIT_CONFIG);
    }

    #[tokio::test]
    async fn test_exit_codes_follow_verdict() {
        let args = CliArgs::try_parse_from(["seq", "--start"]).unwrap();
        assert_eq!(run_from_cli(&args, &manifest(), Verdict(true)).await, EXIT_PASSED);
        let args = CliArgs::try_parse_from(["seq", "--start"]).unwrap();
        assert_eq!(run_from_cli(&args, &manifest(), Verdict(false)).await, EXIT_FAILED);
    }

    #[tokio::test]
    async fn test_stop_prints_command_and_exits_zero() {
        let args = CliArgs::try_parse_from(["seq", "--stop"]).unwrap();
        assert_eq!(run_from_cli(&args, &manifest(), Verdict(true)).await, EXIT_PASSED);
    }
}
