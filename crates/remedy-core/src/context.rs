use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use remedy_schema::{AuditResult, FixCandidate, JudgeDecision};

/// Working state for one file's remediation loop
#[derive(Debug, Clone)]
pub struct FileContext {
    pub file_path: PathBuf,
    /// Source as read from disk; the judge always compares against this
    pub original_source: String,
    /// Source the next audit looks at; replaced by each fix candidate
    pub current_source: String,
    /// Current iteration number (1-indexed)
    pub iteration: usize,
    pub max_iterations: usize,
    pub history: Vec<IterationRecord>,
    /// Judge notes from the last RETRY, passed to the next fixer call
    pub last_feedback: Option<String>,
    started_at: Instant,
}

/// Record of a single iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration_index: usize,
    pub audit_result: AuditResult,
    /// Absent when a clean audit ended the file early
    pub fix_candidate: Option<FixCandidate>,
    pub judge_decision: Option<JudgeDecision>,
    pub timestamp: DateTime<Utc>,
}

impl FileContext {
    pub fn new(file_path: PathBuf, source: String, max_iterations: usize) -> Self {
        Self {
            file_path,
            current_source: source.clone(),
            original_source: source,
            iteration: 1,
            max_iterations,
            history: Vec::new(),
            last_feedback: None,
            started_at: Instant::now(),
        }
    }

    pub fn push_record(&mut self, record: IterationRecord) {
        self.history.push(record);
    }

    /// Start the next pass: audit the candidate, remember the judge's notes
    pub fn advance(&mut self, candidate: &FixCandidate, feedback: String) {
        self.iteration += 1;
        self.current_source = candidate.source_text.clone();
        self.last_feedback = Some(feedback);
    }

    /// True once another pass would exceed the bound
    pub fn at_bound(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    pub fn total_duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}
