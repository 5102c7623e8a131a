use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::{ExperimentLogEntry, REQUIRED_DETAILS};

const REQUIRED_FIELDS: [&str; 7] = [
    "timestamp",
    "run_id",
    "agent_name",
    "model_used",
    "action",
    "details",
    "status",
];
const ANALYSIS_ACTIONS: [&str; 3] = ["ANALYSIS", "FIX", "JUDGMENT"];

/// Parse an experiment log file. Blank lines are skipped; any malformed
/// record fails the whole read with its line number.
pub fn read_log(path: &Path) -> io::Result<Vec<ExperimentLogEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line {}: {}", idx + 1, e),
            )
        })?;
        entries.push(entry);
    }

    Ok(entries)
}

/// A problem found in a single log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogIssue {
    pub line: usize,
    pub message: String,
}

/// Running size of a detail field across entries
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct TextStats {
    pub count: usize,
    pub total_chars: usize,
}

impl TextStats {
    fn add(&mut self, text: &str) {
        self.count += 1;
        self.total_chars += text.chars().count();
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_chars as f64 / self.count as f64
        }
    }
}

/// What the log says about one source file
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    /// Highest iteration index recorded for the file
    pub iterations: u64,
    pub analyses: usize,
    pub schema_failures: usize,
    pub last_decision: Option<String>,
    /// Terminal state from the run's closing RUN entry
    pub outcome: Option<String>,
}

/// Summary of an experiment log's health and of the runs it records
#[derive(Debug, Default, Clone, Serialize)]
pub struct LogReport {
    pub total_entries: usize,
    pub by_action: BTreeMap<String, usize>,
    pub by_agent: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_model: BTreeMap<String, usize>,
    pub runs: BTreeMap<String, usize>,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
    pub prompts: TextStats,
    pub responses: TextStats,
    pub files: BTreeMap<String, FileSummary>,
    pub issues: Vec<LogIssue>,
}

impl LogReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Share of entries with SUCCESS status, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_entries == 0 {
            return 0.0;
        }
        let ok = self.by_status.get("SUCCESS").copied().unwrap_or(0);
        ok as f64 * 100.0 / self.total_entries as f64
    }
}

/// Check every line of a log without stopping at the first problem
pub fn check_log(path: &Path) -> io::Result<LogReport> {
    let reader = BufReader::new(File::open(path)?);
    let mut report = LogReport::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        check_line(&mut report, idx + 1, &line);
    }

    Ok(report)
}

fn check_line(report: &mut LogReport, line_no: usize, line: &str) {
    let mut issue = |message: String| {
        report.issues.push(LogIssue {
            line: line_no,
            message,
        })
    };

    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            issue(format!("not valid JSON: {}", e));
            return;
        }
    };
    let Some(obj) = value.as_object() else {
        issue("record is not a JSON object".to_string());
        return;
    };

    for field in REQUIRED_FIELDS {
        if !obj.contains_key(field) {
            issue(format!("missing field `{}`", field));
        }
    }

    let action = obj.get("action").and_then(Value::as_str).unwrap_or("UNKNOWN");
    if ANALYSIS_ACTIONS.contains(&action) {
        let details = obj.get("details").and_then(Value::as_object);
        for field in REQUIRED_DETAILS {
            if !details.is_some_and(|d| d.get(field).is_some_and(Value::is_string)) {
                issue(format!("{} entry missing details.{}", action, field));
            }
        }
    }

    if serde_json::from_value::<ExperimentLogEntry>(value.clone()).is_err()
        && REQUIRED_FIELDS.iter().all(|f| obj.contains_key(*f))
    {
        issue("record fields have unexpected types or values".to_string());
    }

    let label = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string()
    };
    report.total_entries += 1;
    *report.by_action.entry(action.to_string()).or_default() += 1;
    *report.by_agent.entry(label("agent_name")).or_default() += 1;
    *report.by_status.entry(label("status")).or_default() += 1;
    *report.by_model.entry(label("model_used")).or_default() += 1;
    *report.runs.entry(label("run_id")).or_default() += 1;

    if let Some(ts) = obj.get("timestamp").and_then(Value::as_str) {
        report.first_timestamp.get_or_insert_with(|| ts.to_string());
        report.last_timestamp = Some(ts.to_string());
    }

    let Some(details) = obj.get("details").and_then(Value::as_object) else {
        return;
    };
    if ANALYSIS_ACTIONS.contains(&action) {
        if let Some(prompt) = details.get("input_prompt").and_then(Value::as_str) {
            report.prompts.add(prompt);
        }
        if let Some(response) = details.get("output_response").and_then(Value::as_str) {
            report.responses.add(response);
        }
    }
    summarize_file(report, action, details);
}

fn summarize_file(report: &mut LogReport, action: &str, details: &serde_json::Map<String, Value>) {
    // The closing RUN entry lists every file with its terminal state
    if action == "RUN" {
        for line in details.get("files").and_then(Value::as_array).into_iter().flatten() {
            if let (Some(file), Some(status)) = (
                line.get("file").and_then(Value::as_str),
                line.get("status").and_then(Value::as_str),
            ) {
                report.files.entry(file.to_string()).or_default().outcome = Some(status.to_string());
            }
        }
        return;
    }

    let Some(file) = details.get("file_path").and_then(Value::as_str) else {
        return;
    };
    let summary = report.files.entry(file.to_string()).or_default();
    if let Some(iteration) = details.get("iteration").and_then(Value::as_u64) {
        summary.iterations = summary.iterations.max(iteration);
    }
    match action {
        "ANALYSIS" => summary.analyses += 1,
        "DEBUG" => summary.schema_failures += 1,
        "JUDGMENT" => {
            if let Some(decision) = details.get("decision").and_then(Value::as_str) {
                summary.last_decision = Some(decision.to_string());
            }
        }
        _ => {}
    }
}
