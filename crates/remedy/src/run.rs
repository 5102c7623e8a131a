use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::info;

use remedy_agent::{BackendConfig, OpenRouterClient, Role, DEFAULT_API_KEY_ENV};
use remedy_core::{
    discover_sources, BatchReport, BatchRunner, CommandProbe, LoopPolicy, Orchestrator,
};
use remedy_logging::{default_log_path, ExperimentLogger, JsonlSink, LogEvent, LogFormat, Logger};

use crate::config::ProjectConfig;
use crate::LogFormatChoice;

const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory containing the source files to remediate
    pub target_dir: PathBuf,

    /// Model for every role
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model for the auditor role
    #[arg(long)]
    pub auditor_model: Option<String>,

    /// Model for the fixer role
    #[arg(long)]
    pub fixer_model: Option<String>,

    /// Model for the judge role
    #[arg(long)]
    pub judge_model: Option<String>,

    /// Maximum iterations per file (default: 5)
    #[arg(short = 'n', long)]
    pub max_iterations: Option<usize>,

    /// Experiment log path (default: under the user data directory)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Progress output format
    #[arg(long, value_enum, default_value = "pretty")]
    pub log_format: LogFormatChoice,

    /// Output final results as JSON
    #[arg(long)]
    pub json_output: bool,

    /// Dry run: show what would happen without calling the backend
    #[arg(long)]
    pub dry_run: bool,

    /// Write approved fixes back to the target directory
    #[arg(long)]
    pub apply: bool,

    /// Files processed at the same time
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Command run on each candidate before judging, e.g. "python -m py_compile"
    #[arg(long)]
    pub test_command: Option<String>,

    /// Run fixer and judge even when the audit finds nothing
    #[arg(long)]
    pub no_short_circuit: bool,

    /// Overwrite applied files without keeping a .backup copy
    #[arg(long)]
    pub no_backup: bool,

    /// Also append every progress event to this file as JSON lines
    #[arg(long)]
    pub events_file: Option<PathBuf>,
}

impl RunArgs {
    fn role_override(&self, role: Role) -> Option<&str> {
        let specific = match role {
            Role::Auditor => &self.auditor_model,
            Role::Fixer => &self.fixer_model,
            Role::Judge => &self.judge_model,
        };
        specific.as_deref().or(self.model.as_deref())
    }
}

/// Resolve the loop policy: CLI flag > remedy.toml > default
fn resolve_policy(args: &RunArgs, config: &ProjectConfig) -> Result<LoopPolicy> {
    let mut policy = config.loop_policy();
    if let Some(max) = args.max_iterations {
        policy.max_iterations = max;
    }
    if args.apply {
        policy.apply = true;
    }
    if args.no_short_circuit {
        policy.short_circuit_clean = false;
    }
    if args.no_backup {
        policy.backup = false;
    }
    if policy.max_iterations == 0 {
        anyhow::bail!("max_iterations must be at least 1");
    }
    Ok(policy)
}

/// Backend settings with every model resolved: CLI > [role] > global > built-in
fn resolve_backend(args: &RunArgs, config: &ProjectConfig) -> Result<BackendConfig> {
    let key_env = config.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV);
    let mut backend = BackendConfig::from_env(key_env)?;

    if let Some(ref url) = config.base_url {
        backend = backend.with_base_url(url.clone());
    }
    if let Some(timeout) = config.timeout {
        backend = backend.with_timeout(timeout);
    }
    for role in Role::ALL {
        if let Some(model) = args.role_override(role).or(config.role_model(role)) {
            backend = backend.with_role_model(role, model);
        }
    }
    backend.validate()?;
    Ok(backend)
}

pub async fn handle_run_command(args: RunArgs) -> Result<i32> {
    let target = args
        .target_dir
        .canonicalize()
        .with_context(|| format!("Target directory {} not found", args.target_dir.display()))?;

    let config = ProjectConfig::load(&target)?.unwrap_or_default();
    let policy = resolve_policy(&args, &config)?;
    let files = discover_sources(&target, &config.source_filter())
        .with_context(|| format!("Failed to scan {}", target.display()))?;
    if files.is_empty() {
        anyhow::bail!("No source files found under {}", target.display());
    }

    let test_command = args
        .test_command
        .as_deref()
        .or(config.test_command.as_deref());
    let concurrency = args
        .concurrency
        .or(config.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);

    if args.dry_run {
        print_plan(&args, &config, &target, &files, &policy, test_command, concurrency);
        return Ok(0);
    }

    // Credential check happens here, before any client exists
    let backend = resolve_backend(&args, &config)?;
    let client = OpenRouterClient::new(backend)?;

    let log_path = match args.log_file {
        Some(ref path) => path.clone(),
        None => default_log_path(&target).context("Failed to resolve experiment log path")?,
    };
    let sink = JsonlSink::open(&log_path)
        .with_context(|| format!("Failed to open experiment log {}", log_path.display()))?;
    let experiment = Arc::new(ExperimentLogger::new(Arc::new(sink)));
    info!(run_id = experiment.run_id(), log = %log_path.display(), "Experiment log opened");

    let log_format: LogFormat = args.log_format.into();
    let logger = match args.events_file {
        Some(ref path) => Logger::with_events_file(log_format, path)
            .with_context(|| format!("Failed to open events file {}", path.display()))?,
        None => Logger::new(log_format),
    };
    let logger = Arc::new(logger);
    logger.log(&LogEvent::RunStarted {
        target_dir: target.clone(),
        files: files.len(),
        max_iterations: policy.max_iterations,
    });

    let mut orchestrator = Orchestrator::new(Arc::new(client), experiment.clone(), logger, policy)
        .with_root(target.clone());
    if let Some(command) = test_command {
        let probe = CommandProbe::parse(command)
            .with_context(|| format!("Invalid test command: {:?}", command))?;
        orchestrator = orchestrator.with_probe(Arc::new(probe));
    }

    // Handle Ctrl+C gracefully
    let interrupt_handle = orchestrator.interrupt_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Abandoning in-flight steps...");
        interrupt_handle.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let runner = BatchRunner::new(Arc::new(orchestrator), concurrency);
    let report = runner
        .run_logged(&target, files)
        .await
        .context("Failed to write run entry to experiment log")?;

    if args.json_output {
        let mut json = report.to_json();
        json["run_id"] = serde_json::json!(experiment.run_id());
        json["log_file"] = serde_json::json!(log_path.display().to_string());
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        print_report(&report, &target, experiment.run_id(), &log_path);
    }

    Ok(report.exit_code())
}

fn print_plan(
    args: &RunArgs,
    config: &ProjectConfig,
    target: &Path,
    files: &[PathBuf],
    policy: &LoopPolicy,
    test_command: Option<&str>,
    concurrency: usize,
) {
    println!("=== Dry Run ===");
    println!("Target: {}", target.display());
    for role in Role::ALL {
        let model = args
            .role_override(role)
            .or(config.role_model(role))
            .unwrap_or(remedy_agent::DEFAULT_MODEL);
        println!("{}: {}", role.agent_name(), model);
    }
    println!("Max iterations: {}", policy.max_iterations);
    println!("Short-circuit clean audits: {}", policy.short_circuit_clean);
    println!("Apply approved fixes: {}", policy.apply);
    if policy.apply {
        println!("Backups: {}", policy.backup);
    }
    println!("Concurrency: {}", concurrency);
    println!("Test command: {}", test_command.unwrap_or("none"));
    println!("Files ({}):", files.len());
    for file in files {
        let shown = file.strip_prefix(target).unwrap_or(file);
        println!("  {}", shown.display());
    }
}

fn print_report(report: &BatchReport, target: &Path, run_id: &str, log_path: &Path) {
    eprintln!();
    eprintln!("=== RESULTS ===");
    for file_report in &report.reports {
        let shown = file_report
            .file
            .strip_prefix(target)
            .unwrap_or(&file_report.file);
        let label = file_report.label();
        let styled = match label {
            "APPROVED" => label.bright_green().bold(),
            "EXHAUSTED" | "CANCELLED" => label.bright_yellow().bold(),
            _ => label.bright_red().bold(),
        };
        let iterations = file_report
            .result
            .as_ref()
            .map(|o| o.iterations())
            .unwrap_or(0);
        eprintln!(
            "{:<10} {} ({} iteration{})",
            styled,
            shown.display(),
            iterations,
            if iterations == 1 { "" } else { "s" }
        );
        if let Some(reason) = file_report.reason() {
            eprintln!("           {} {}", "Reason:".dimmed(), reason);
        }
        if let Some(backup) = file_report.result.as_ref().ok().and_then(|o| o.backup()) {
            eprintln!("           {} {}", "Backup:".dimmed(), backup.display());
        }
    }

    let counts = report.counts();
    let summary: Vec<String> = counts
        .iter()
        .map(|(label, n)| format!("{} {}", n, label.to_lowercase()))
        .collect();
    eprintln!();
    eprintln!("Summary: {}", summary.join(", "));
    eprintln!("Run: {}", run_id);
    eprintln!("Experiment log: {}", log_path.display());
}
