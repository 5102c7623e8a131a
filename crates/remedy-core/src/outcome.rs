use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use remedy_schema::FixCandidate;

use crate::IterationRecord;

/// The terminal state a file reached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileOutcome {
    /// Judge approved a candidate, or a clean audit short-circuited
    Approved {
        file: PathBuf,
        iterations: usize,
        summary: String,
        short_circuited: bool,
        applied: bool,
        /// Copy of the file taken before the candidate was applied
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backup: Option<PathBuf>,
        #[serde(skip)]
        candidate: Option<FixCandidate>,
        #[serde(skip)]
        history: Vec<IterationRecord>,
        total_duration_secs: f64,
    },
    /// Judge rejected the candidate, or a response broke its contract
    Rejected {
        file: PathBuf,
        iterations: usize,
        reason: String,
        /// Last candidate, kept for audit only
        #[serde(skip)]
        candidate: Option<FixCandidate>,
        #[serde(skip)]
        history: Vec<IterationRecord>,
        total_duration_secs: f64,
    },
    /// No terminal decision within the iteration bound, or the backend gave out
    Exhausted {
        file: PathBuf,
        iterations: usize,
        reason: String,
        #[serde(skip)]
        history: Vec<IterationRecord>,
        total_duration_secs: f64,
    },
    /// Operator cancelled the run
    Cancelled {
        file: PathBuf,
        iterations: usize,
        #[serde(skip)]
        history: Vec<IterationRecord>,
        total_duration_secs: f64,
    },
}

impl FileOutcome {
    pub fn approved(
        file: PathBuf,
        iterations: usize,
        summary: String,
        candidate: Option<FixCandidate>,
        history: Vec<IterationRecord>,
        duration: Duration,
    ) -> Self {
        Self::Approved {
            file,
            iterations,
            summary,
            short_circuited: candidate.is_none(),
            applied: false,
            backup: None,
            candidate,
            history,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn rejected(
        file: PathBuf,
        iterations: usize,
        reason: String,
        candidate: Option<FixCandidate>,
        history: Vec<IterationRecord>,
        duration: Duration,
    ) -> Self {
        Self::Rejected {
            file,
            iterations,
            reason,
            candidate,
            history,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn exhausted(
        file: PathBuf,
        iterations: usize,
        reason: String,
        history: Vec<IterationRecord>,
        duration: Duration,
    ) -> Self {
        Self::Exhausted {
            file,
            iterations,
            reason,
            history,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn cancelled(
        file: PathBuf,
        iterations: usize,
        history: Vec<IterationRecord>,
        duration: Duration,
    ) -> Self {
        Self::Cancelled {
            file,
            iterations,
            history,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn file(&self) -> &Path {
        match self {
            Self::Approved { file, .. }
            | Self::Rejected { file, .. }
            | Self::Exhausted { file, .. }
            | Self::Cancelled { file, .. } => file.as_path(),
        }
    }

    pub fn iterations(&self) -> usize {
        match self {
            Self::Approved { iterations, .. }
            | Self::Rejected { iterations, .. }
            | Self::Exhausted { iterations, .. }
            | Self::Cancelled { iterations, .. } => *iterations,
        }
    }

    pub fn history(&self) -> &[IterationRecord] {
        match self {
            Self::Approved { history, .. }
            | Self::Rejected { history, .. }
            | Self::Exhausted { history, .. }
            | Self::Cancelled { history, .. } => history.as_slice(),
        }
    }

    pub fn total_duration_secs(&self) -> f64 {
        match self {
            Self::Approved {
                total_duration_secs,
                ..
            }
            | Self::Rejected {
                total_duration_secs,
                ..
            }
            | Self::Exhausted {
                total_duration_secs,
                ..
            }
            | Self::Cancelled {
                total_duration_secs,
                ..
            } => *total_duration_secs,
        }
    }

    /// Why the file was not approved
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Rejected { reason, .. } | Self::Exhausted { reason, .. } => Some(reason.as_str()),
            Self::Cancelled { .. } => Some("cancelled by operator"),
            Self::Approved { .. } => None,
        }
    }

    /// The candidate carried by this outcome, if any
    pub fn candidate(&self) -> Option<&FixCandidate> {
        match self {
            Self::Approved { candidate, .. } | Self::Rejected { candidate, .. } => {
                candidate.as_ref()
            }
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Approved { .. } => "APPROVED",
            Self::Rejected { .. } => "REJECTED",
            Self::Exhausted { .. } => "EXHAUSTED",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Approved { .. } => 0,
            Self::Rejected { .. } | Self::Exhausted { .. } => 1,
            Self::Cancelled { .. } => 130,
        }
    }

    /// Where the pre-apply copy of the file went, if one was taken
    pub fn backup(&self) -> Option<&Path> {
        match self {
            Self::Approved { backup, .. } => backup.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn mark_applied(&mut self, backup_file: Option<PathBuf>) {
        if let Self::Approved {
            applied, backup, ..
        } = self
        {
            *applied = true;
            *backup = backup_file;
        }
    }
}
