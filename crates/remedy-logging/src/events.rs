use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Operator-facing progress events for a remediation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    RunStarted {
        target_dir: PathBuf,
        files: usize,
        max_iterations: usize,
    },
    FileStarted {
        file: PathBuf,
    },
    AuditCompleted {
        file: PathBuf,
        iteration: usize,
        findings: usize,
        summary: String,
    },
    /// Clean audit; fixer and judge are skipped for this file
    ShortCircuited {
        file: PathBuf,
        iteration: usize,
    },
    FixCompleted {
        file: PathBuf,
        iteration: usize,
        lines: usize,
    },
    JudgeCompleted {
        file: PathBuf,
        iteration: usize,
        decision: String,
    },
    BackendRetry {
        file: PathBuf,
        role: String,
        attempt: u32,
        delay_secs: f64,
        error: String,
    },
    SchemaRejected {
        file: PathBuf,
        iteration: usize,
        role: String,
        error: String,
    },
    FileFinished {
        file: PathBuf,
        outcome: String,
        iterations: usize,
        reason: Option<String>,
        duration_secs: f64,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Console logger for progress events. `--events-file` mirrors every
/// event as a timestamped JSON line, whatever the console format.
pub struct Logger {
    format: LogFormat,
    mirror: Option<Mutex<BufWriter<File>>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            mirror: None,
        }
    }

    /// Console output plus an append-only JSONL copy at `events_path`
    pub fn with_events_file(format: LogFormat, events_path: &Path) -> io::Result<Self> {
        if let Some(parent) = events_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(events_path)?;

        Ok(Self {
            format,
            mirror: Some(Mutex::new(BufWriter::new(file))),
        })
    }

    fn write_mirror(&self, event: &LogEvent) -> io::Result<()> {
        let Some(ref mirror) = self.mirror else {
            return Ok(());
        };
        let mut writer = mirror
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "events file lock poisoned"))?;
        writeln!(writer, "{}", event.with_timestamp())?;
        writer.flush()
    }

    pub fn log(&self, event: &LogEvent) {
        if let Err(e) = self.write_mirror(event) {
            warn!(error = %e, "Failed to mirror progress event");
        }

        let line = match self.format {
            LogFormat::Json => serde_json::to_string(event).ok(),
            LogFormat::Pretty => Self::render_pretty(event),
            LogFormat::Compact => Some(Self::render_compact(event)),
        };
        if let Some(line) = line {
            let _ = writeln!(std::io::stderr(), "{}", line);
        }
    }

    fn name(file: &Path) -> String {
        file.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string())
    }

    fn render_pretty(event: &LogEvent) -> Option<String> {
        let line = match event {
            LogEvent::RunStarted {
                target_dir,
                files,
                max_iterations,
            } => format!(
                "\n{} {}\n  {} {}\n  {} {} file{}, up to {} iteration{} each\n",
                "▶".bright_blue(),
                "remedy".bold().bright_white(),
                "Target:".dimmed(),
                target_dir.display().to_string().dimmed(),
                "Plan:".dimmed(),
                files,
                if *files == 1 { "" } else { "s" },
                max_iterations,
                if *max_iterations == 1 { "" } else { "s" },
            ),
            LogEvent::FileStarted { file } => format!(
                "{} {}",
                "┌".bright_blue(),
                Self::name(file).bright_blue().bold()
            ),
            LogEvent::AuditCompleted {
                file,
                iteration,
                summary,
                ..
            } => format!(
                "{} {} {} {}",
                "│".bright_blue(),
                format!("[{} #{}]", Self::name(file), iteration).dimmed(),
                "AUDIT".bright_cyan().bold(),
                summary
            ),
            LogEvent::ShortCircuited { file, .. } => format!(
                "{} {} {}",
                "│".bright_blue(),
                format!("[{}]", Self::name(file)).dimmed(),
                "clean audit, skipping fixer and judge".bright_green()
            ),
            LogEvent::FixCompleted {
                file,
                iteration,
                lines,
            } => format!(
                "{} {} {} {} lines proposed",
                "│".bright_blue(),
                format!("[{} #{}]", Self::name(file), iteration).dimmed(),
                "FIX".bright_magenta().bold(),
                lines
            ),
            LogEvent::JudgeCompleted {
                file,
                iteration,
                decision,
            } => {
                let styled = if decision.starts_with("APPROVE") {
                    format!("✓ {}", decision).bright_green().to_string()
                } else if decision.starts_with("REJECT") {
                    format!("✗ {}", decision).bright_red().to_string()
                } else {
                    format!("→ {}", decision).bright_yellow().to_string()
                };
                format!(
                    "{} {} {} {}",
                    "│".bright_blue(),
                    format!("[{} #{}]", Self::name(file), iteration).dimmed(),
                    "JUDGE".bright_white().bold(),
                    styled
                )
            }
            LogEvent::BackendRetry {
                file,
                role,
                attempt,
                delay_secs,
                error,
            } => format!(
                "{} {} {} {} failed (attempt {}), retrying in {:.1}s: {}",
                "│".bright_blue(),
                format!("[{}]", Self::name(file)).dimmed(),
                "⚠".bright_yellow(),
                role,
                attempt,
                delay_secs,
                error.dimmed()
            ),
            LogEvent::SchemaRejected {
                file,
                iteration,
                role,
                error,
            } => format!(
                "{} {} {} {} response rejected: {}",
                "│".bright_blue(),
                format!("[{} #{}]", Self::name(file), iteration).dimmed(),
                "✗".bright_red(),
                role,
                error.bright_red()
            ),
            LogEvent::FileFinished {
                file,
                outcome,
                iterations,
                reason,
                duration_secs,
            } => {
                let styled = match outcome.as_str() {
                    "APPROVED" => outcome.bright_green().bold(),
                    "EXHAUSTED" | "CANCELLED" => outcome.bright_yellow().bold(),
                    _ => outcome.bright_red().bold(),
                };
                let mut line = format!(
                    "{} {} {} after {} iteration{} ({:.1}s)",
                    "└".bright_blue(),
                    Self::name(file).bright_blue(),
                    styled,
                    iterations,
                    if *iterations == 1 { "" } else { "s" },
                    duration_secs
                );
                if let Some(reason) = reason {
                    line.push_str(&format!("\n  {} {}", "Reason:".dimmed(), reason));
                }
                line
            }
        };
        Some(line)
    }

    fn render_compact(event: &LogEvent) -> String {
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        match event {
            LogEvent::RunStarted { files, .. } => format!("[{}] run:start files={}", timestamp, files),
            LogEvent::FileStarted { file } => {
                format!("[{}] file:start {}", timestamp, file.display())
            }
            LogEvent::AuditCompleted {
                file,
                iteration,
                findings,
                ..
            } => format!(
                "[{}] audit:{} {} findings={}",
                timestamp,
                iteration,
                file.display(),
                findings
            ),
            LogEvent::ShortCircuited { file, iteration } => format!(
                "[{}] short-circuit:{} {}",
                timestamp,
                iteration,
                file.display()
            ),
            LogEvent::FixCompleted {
                file,
                iteration,
                lines,
            } => format!(
                "[{}] fix:{} {} lines={}",
                timestamp,
                iteration,
                file.display(),
                lines
            ),
            LogEvent::JudgeCompleted {
                file,
                iteration,
                decision,
            } => format!(
                "[{}] judge:{} {} {}",
                timestamp,
                iteration,
                file.display(),
                decision
            ),
            LogEvent::BackendRetry {
                file,
                role,
                attempt,
                ..
            } => format!(
                "[{}] retry:{} {} attempt={}",
                timestamp,
                role,
                file.display(),
                attempt
            ),
            LogEvent::SchemaRejected {
                file,
                iteration,
                role,
                ..
            } => format!(
                "[{}] schema:{}:{} {}",
                timestamp,
                role,
                iteration,
                file.display()
            ),
            LogEvent::FileFinished {
                file,
                outcome,
                iterations,
                duration_secs,
                ..
            } => format!(
                "[{}] file:done {} {} iterations={} {:.1}s",
                timestamp,
                file.display(),
                outcome,
                iterations,
                duration_secs
            ),
        }
    }
}
