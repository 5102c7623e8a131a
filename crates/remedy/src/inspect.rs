use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;

use remedy_core::{reconstruct, IterationRecord, ReplayError};
use remedy_logging::{check_log, read_log, ExperimentLogEntry, FileSummary, LogReport};
use remedy_schema::Decision;

pub fn handle_replay_command(
    log: &Path,
    file: &Path,
    run_id: Option<&str>,
    json: bool,
) -> Result<i32> {
    let entries = read_log(log).with_context(|| format!("Failed to read {}", log.display()))?;
    let history = replay(&entries, file, run_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
    } else {
        print_history(file, &history);
    }
    Ok(0)
}

/// Logs record the canonical path; fall back to it when the given one is not found
fn replay(
    entries: &[ExperimentLogEntry],
    file: &Path,
    run_id: Option<&str>,
) -> Result<Vec<IterationRecord>> {
    match reconstruct(entries, file, run_id) {
        Err(ReplayError::NoEntries { .. }) => {
            let canonical: PathBuf = file
                .canonicalize()
                .with_context(|| format!("No log entries for {}", file.display()))?;
            Ok(reconstruct(entries, &canonical, run_id)?)
        }
        other => Ok(other?),
    }
}

fn print_history(file: &Path, history: &[IterationRecord]) {
    println!("{} {}", "History for".dimmed(), file.display().to_string().bold());

    for record in history {
        println!();
        println!(
            "{} {}",
            format!("Iteration {}", record.iteration_index).bright_blue().bold(),
            record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
        println!(
            "  {} {}",
            "AUDIT".bright_cyan(),
            record.audit_result.short_description()
        );
        for finding in &record.audit_result.findings {
            match finding.location {
                Some(ref location) => println!(
                    "    [{}] {} ({})",
                    finding.severity, finding.description, location
                ),
                None => println!("    [{}] {}", finding.severity, finding.description),
            }
        }

        match &record.fix_candidate {
            Some(candidate) => println!(
                "  {} {} lines proposed",
                "FIX".bright_magenta(),
                candidate.line_count()
            ),
            None => println!("  {} skipped", "FIX".bright_magenta()),
        }

        if let Some(ref decision) = record.judge_decision {
            let label = match decision.decision {
                Decision::Approve => decision.decision.as_str().bright_green(),
                Decision::Retry => decision.decision.as_str().bright_yellow(),
                Decision::Reject => decision.decision.as_str().bright_red(),
            };
            println!("  {} {} {}", "JUDGE".bright_white(), label, decision.reasoning);
            if !decision.next_steps.is_empty() {
                println!("    {} {}", "Next:".dimmed(), decision.next_steps);
            }
        }
    }
}

pub fn handle_check_log_command(log: &Path, json: bool) -> Result<i32> {
    let report = check_log(log).with_context(|| format!("Failed to read {}", log.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_log_report(log, &report);
    }

    Ok(if report.is_valid() { 0 } else { 1 })
}

fn print_log_report(log: &Path, report: &LogReport) {
    println!("{} {}", "Log:".dimmed(), log.display());
    println!("{} {}", "Entries:".dimmed(), report.total_entries);
    println!("{} {}", "Runs:".dimmed(), report.runs.len());

    let counts = |map: &std::collections::BTreeMap<String, usize>| {
        map.iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    };
    println!("{} {}", "Actions:".dimmed(), counts(&report.by_action));
    println!("{} {}", "Agents:".dimmed(), counts(&report.by_agent));
    println!("{} {}", "Models:".dimmed(), counts(&report.by_model));
    println!(
        "{} {} ({:.1}% success)",
        "Status:".dimmed(),
        counts(&report.by_status),
        report.success_rate()
    );
    if let (Some(first), Some(last)) = (&report.first_timestamp, &report.last_timestamp) {
        println!("{} {} .. {}", "Period:".dimmed(), first, last);
    }
    println!(
        "{} {:.0} chars avg prompt, {:.0} chars avg response",
        "Sizes:".dimmed(),
        report.prompts.mean(),
        report.responses.mean()
    );

    if !report.files.is_empty() {
        println!();
        println!("{}", "Files:".dimmed());
        for (file, summary) in &report.files {
            println!("  {:<10} {}  {}", outcome_label(summary), file, file_detail(summary));
        }
    }

    println!();

    if report.is_valid() {
        println!("{}", "✓ log is valid".bright_green());
    } else {
        println!(
            "{}",
            format!("✗ {} issue(s)", report.issues.len()).bright_red()
        );
        for issue in &report.issues {
            println!("  line {}: {}", issue.line, issue.message);
        }
    }
}

fn outcome_label(summary: &FileSummary) -> colored::ColoredString {
    let label = summary.outcome.as_deref().unwrap_or("UNFINISHED");
    match label {
        "APPROVED" => label.bright_green(),
        "REJECTED" | "ABORTED" => label.bright_red(),
        _ => label.bright_yellow(),
    }
}

fn file_detail(summary: &FileSummary) -> String {
    let mut detail = format!(
        "{} iteration{}",
        summary.iterations,
        if summary.iterations == 1 { "" } else { "s" }
    );
    if let Some(ref decision) = summary.last_decision {
        detail.push_str(&format!(", last judge {}", decision));
    }
    if summary.schema_failures > 0 {
        detail.push_str(&format!(", {} rejected response(s)", summary.schema_failures));
    }
    detail.dimmed().to_string()
}
