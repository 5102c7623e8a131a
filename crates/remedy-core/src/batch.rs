use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use remedy_logging::{ActionType, EntryStatus, LogError};

use crate::{FileOutcome, Orchestrator, RunError};

const RUN_AGENT: &str = "Orchestrator";
const RUN_MODEL: &str = "-";

/// How one file's run ended: a terminal outcome or an abort
#[derive(Debug)]
pub struct FileReport {
    pub file: PathBuf,
    pub result: Result<FileOutcome, RunError>,
}

impl FileReport {
    pub fn label(&self) -> &'static str {
        match &self.result {
            Ok(outcome) => outcome.label(),
            Err(_) => "ABORTED",
        }
    }

    /// Reason for non-approval: judge reasoning, failure, or the abort error
    pub fn reason(&self) -> Option<String> {
        match &self.result {
            Ok(outcome) => outcome.reason().map(str::to_string),
            Err(e) => Some(e.to_string()),
        }
    }
}

/// Per-file results in discovery order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<FileReport>,
}

#[derive(Debug, Serialize)]
struct ReportLine<'a> {
    file: &'a Path,
    status: &'static str,
    iterations: usize,
    reason: Option<String>,
    applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    backup: Option<&'a Path>,
}

impl BatchReport {
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for report in &self.reports {
            *counts.entry(report.label()).or_default() += 1;
        }
        counts
    }

    pub fn all_approved(&self) -> bool {
        self.reports
            .iter()
            .all(|r| matches!(&r.result, Ok(o) if o.is_approved()))
    }

    /// 0 when every file was approved; 130 on cancellation, 2 on any abort,
    /// otherwise 1
    pub fn exit_code(&self) -> i32 {
        let mut code = 0;
        for report in &self.reports {
            let file_code = match &report.result {
                Ok(outcome) => outcome.exit_code(),
                Err(_) => 2,
            };
            code = match (code, file_code) {
                (130, _) | (_, 130) => 130,
                (2, _) | (_, 2) => 2,
                (a, b) => a.max(b),
            };
        }
        code
    }

    /// Machine-readable summary for `--json-output`
    pub fn to_json(&self) -> Value {
        let files: Vec<_> = self
            .reports
            .iter()
            .map(|r| ReportLine {
                file: &r.file,
                status: r.label(),
                iterations: r.result.as_ref().map(|o| o.iterations()).unwrap_or(0),
                reason: r.reason(),
                applied: matches!(
                    &r.result,
                    Ok(FileOutcome::Approved { applied: true, .. })
                ),
                backup: r.result.as_ref().ok().and_then(FileOutcome::backup),
            })
            .collect();
        json!({
            "files": files,
            "counts": self.counts(),
            "exit_code": self.exit_code(),
        })
    }
}

/// Runs one orchestrator pass per file, several files at a time
pub struct BatchRunner {
    orchestrator: Arc<Orchestrator>,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, concurrency: usize) -> Self {
        Self {
            orchestrator,
            concurrency: concurrency.max(1),
        }
    }

    /// Run every file and return the reports in the order given
    pub async fn run(&self, files: Vec<PathBuf>) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for (idx, file) in files.iter().cloned().enumerate() {
            let orchestrator = Arc::clone(&self.orchestrator);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let permit = semaphore.acquire_owned().await.ok();
                let result = orchestrator.run_file(&file).await;
                drop(permit);
                (idx, result)
            });
        }

        let mut slots: Vec<Option<Result<FileOutcome, RunError>>> =
            files.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => error!(error = %e, "File task join error"),
            }
        }

        let reports = files
            .into_iter()
            .zip(slots)
            .map(|(file, slot)| FileReport {
                file,
                result: slot.unwrap_or_else(|| Err(RunError::Task("task did not complete".into()))),
            })
            .collect();
        BatchReport { reports }
    }

    /// Like [`run`](Self::run), bracketed by RUN start and end entries in the
    /// experiment log
    pub async fn run_logged(
        &self,
        target_dir: &Path,
        files: Vec<PathBuf>,
    ) -> Result<BatchReport, LogError> {
        let experiment = self.orchestrator.experiment();
        let policy = self.orchestrator.policy();

        let mut details = Map::new();
        details.insert("phase".into(), json!("start"));
        details.insert("target_dir".into(), json!(target_dir.display().to_string()));
        details.insert("files".into(), json!(files.len()));
        details.insert("policy".into(), json!(policy));
        experiment.log(RUN_AGENT, RUN_MODEL, ActionType::Run, details, EntryStatus::Success)?;
        info!(run_id = experiment.run_id(), files = files.len(), "Run started");

        let report = self.run(files).await;

        let mut summary = report.to_json();
        let mut details = Map::new();
        details.insert("phase".into(), json!("end"));
        details.insert("counts".into(), json!(report.counts()));
        details.insert("files".into(), summary["files"].take());
        details.insert("exit_code".into(), json!(report.exit_code()));
        let status = if report.all_approved() {
            EntryStatus::Success
        } else {
            EntryStatus::Failure
        };
        experiment.log(RUN_AGENT, RUN_MODEL, ActionType::Run, details, status)?;
        info!(run_id = experiment.run_id(), exit_code = report.exit_code(), "Run finished");

        Ok(report)
    }
}
