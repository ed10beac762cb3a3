use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sequencer::cli::RunConfig;
use sequencer::core::{ExecutionContext, SequenceManifest};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Manifest tooling for test sequences
#[derive(Debug, Parser)]
#[command(name = "sequencer")]
#[command(about = "Validate and inspect test sequence manifests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate manifest files
    Validate(ValidateCommand),

    /// Validate a manifest and resolve its configuration without running
    DryRun(DryRunCommand),
}

#[derive(Debug, Parser)]
struct ValidateCommand {
    /// A single manifest file
    #[arg(long, conflicts_with = "dir")]
    file: Option<PathBuf>,

    /// Validate every .yaml/.yml manifest in a directory
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Print the validated manifest as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct DryRunCommand {
    /// The manifest file
    #[arg(long)]
    file: PathBuf,

    /// Run configuration file with hardware/parameter overrides
    #[arg(long)]
    config_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Validate(cmd) => validate(cmd),
        Command::DryRun(cmd) => dry_run(cmd),
    }
}

fn validate(cmd: &ValidateCommand) -> Result<()> {
    let files = collect_manifests(cmd)?;
    if files.is_empty() {
        bail!("no manifest files to validate (pass --file or --dir)");
    }

    let mut failures = 0usize;
    for path in &files {
        match SequenceManifest::from_file(path) {
            Ok(manifest) => {
                println!(
                    "OK   {} ({} v{}, {} steps)",
                    path.display(),
                    manifest.name,
                    manifest.version,
                    manifest.steps.len()
                );
                if cmd.json {
                    println!("{}", serde_json::to_string_pretty(&manifest)?);
                }
            }
            Err(errors) => {
                failures += 1;
                println!("FAIL {}", path.display());
                for issue in &errors.issues {
                    println!("     {}", issue);
                }
            }
        }
    }

    println!("\n{} valid, {} invalid", files.len() - failures, failures);
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn collect_manifests(cmd: &ValidateCommand) -> Result<Vec<PathBuf>> {
    if let Some(file) = &cmd.file {
        return Ok(vec![file.clone()]);
    }
    let Some(dir) = &cmd.dir else {
        return Ok(vec![]);
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if is_yaml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn dry_run(cmd: &DryRunCommand) -> Result<()> {
    let manifest = match SequenceManifest::from_file(&cmd.file) {
        Ok(manifest) => manifest,
        Err(errors) => {
            println!("FAIL {}", cmd.file.display());
            for issue in &errors.issues {
                println!("     {}", issue);
            }
            std::process::exit(1);
        }
    };

    let config: RunConfig = match &cmd.config_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("invalid config file {}", path.display()))?
        }
        None => RunConfig::default(),
    };

    match ExecutionContext::build(&manifest, &config.hardware, &config.parameters, None) {
        Ok(context) => {
            let context = Arc::new(context);
            println!("OK   {} v{}", manifest.name, manifest.version);
            println!("     execution id: {}", context.execution_id());
            for (name, config) in context.hardware() {
                println!("     hardware {}: {} field(s)", name, config.len());
            }
            for (name, value) in context.parameters() {
                println!("     parameter {} = {}", name, value.to_json());
            }
            for step in manifest.ordered_steps() {
                println!(
                    "     step {} (order {}, timeout {}s{})",
                    step.name,
                    step.order,
                    step.timeout,
                    if step.cleanup { ", cleanup" } else { "" }
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("FAIL {}", e);
            std::process::exit(1);
        }
    }
}
