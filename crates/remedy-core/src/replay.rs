//! Rebuild a file's iteration history from the experiment log.
//!
//! Every analysis entry is re-validated from its `output_response`, so a
//! replayed history holds exactly what the live run acted on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use remedy_logging::{ActionType, ExperimentLogEntry};
use remedy_schema::{validate_audit, validate_fix, validate_judge, SchemaError};

use crate::IterationRecord;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("No log entries for {file}")]
    NoEntries { file: PathBuf },

    #[error("Entry for {file} has no `{field}` detail")]
    MissingDetail { file: PathBuf, field: &'static str },

    #[error("Iteration {iteration} of {file} has no audit entry")]
    MissingAudit { file: PathBuf, iteration: usize },

    #[error("Logged response no longer validates: {0}")]
    Schema(#[from] SchemaError),
}

fn entry_file(entry: &ExperimentLogEntry) -> Option<&str> {
    entry.detail_str("file_path")
}

/// Reconstruct the history of `file` for `run_id`, or for the most recent
/// run that touched the file when `run_id` is `None`
pub fn reconstruct(
    entries: &[ExperimentLogEntry],
    file: &Path,
    run_id: Option<&str>,
) -> Result<Vec<IterationRecord>, ReplayError> {
    let wanted = file.display().to_string();
    let for_file: Vec<&ExperimentLogEntry> = entries
        .iter()
        .filter(|e| e.action.is_analysis() && entry_file(e) == Some(wanted.as_str()))
        .collect();

    let run_id = match run_id {
        Some(id) => id.to_string(),
        None => match for_file.last() {
            Some(entry) => entry.run_id.clone(),
            None => {
                return Err(ReplayError::NoEntries {
                    file: file.to_path_buf(),
                })
            }
        },
    };

    let mut by_iteration: BTreeMap<usize, Vec<&ExperimentLogEntry>> = BTreeMap::new();
    for entry in for_file.into_iter().filter(|e| e.run_id == run_id) {
        let iteration = entry
            .detail_u64("iteration")
            .ok_or(ReplayError::MissingDetail {
                file: file.to_path_buf(),
                field: "iteration",
            })?;
        by_iteration
            .entry(iteration as usize)
            .or_default()
            .push(entry);
    }
    if by_iteration.is_empty() {
        return Err(ReplayError::NoEntries {
            file: file.to_path_buf(),
        });
    }

    let mut history = Vec::with_capacity(by_iteration.len());
    for (iteration, steps) in by_iteration {
        let mut audit = None;
        let mut candidate = None;
        let mut decision = None;
        let mut timestamp = None;

        for entry in steps {
            let response = entry
                .detail_str("output_response")
                .ok_or(ReplayError::MissingDetail {
                    file: file.to_path_buf(),
                    field: "output_response",
                })?;
            match entry.action {
                ActionType::Analysis => audit = Some(validate_audit(response, file)?),
                ActionType::Fix => candidate = Some(validate_fix(response, file)?),
                ActionType::Judgment => decision = Some(validate_judge(response)?),
                _ => continue,
            }
            timestamp = Some(entry.timestamp);
        }

        let (Some(audit_result), Some(timestamp)) = (audit, timestamp) else {
            return Err(ReplayError::MissingAudit {
                file: file.to_path_buf(),
                iteration,
            });
        };
        history.push(IterationRecord {
            iteration_index: iteration,
            audit_result,
            fix_candidate: candidate,
            judge_decision: decision,
            timestamp,
        });
    }

    Ok(history)
}
