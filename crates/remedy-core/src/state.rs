use serde::{Deserialize, Serialize};
use thiserror::Error;

use remedy_schema::Decision;

/// Per-file remediation state.
///
/// `Approved`, `Rejected`, `Exhausted` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Start,
    Auditing,
    Fixing,
    Judging,
    Approved,
    Rejected,
    Exhausted,
    Cancelled,
}

/// What just happened to the file under repair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Begin,
    /// Auditor returned a validated result. `short_circuit` is true only when
    /// the audit was clean and the policy allows skipping fixer and judge.
    Audited { short_circuit: bool },
    Fixed,
    Judged(Decision),
    /// A retry would push the iteration index past the configured maximum
    BoundExceeded,
    /// Backend kept failing after the retry budget
    BackendFailed,
    /// A role response broke its wire contract; `exhaust` picks the terminal
    SchemaFailed { exhaust: bool },
    Cancel,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: LoopState,
    pub event: LoopEvent,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopState::Approved | LoopState::Rejected | LoopState::Exhausted | LoopState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Start => "START",
            LoopState::Auditing => "AUDITING",
            LoopState::Fixing => "FIXING",
            LoopState::Judging => "JUDGING",
            LoopState::Approved => "APPROVED",
            LoopState::Rejected => "REJECTED",
            LoopState::Exhausted => "EXHAUSTED",
            LoopState::Cancelled => "CANCELLED",
        }
    }

    /// The transition table. Pure; the orchestrator owns all side effects.
    pub fn next(self, event: LoopEvent) -> Result<LoopState, InvalidTransition> {
        use LoopEvent as E;
        use LoopState as S;

        let next = match (self, event) {
            (s, _) if s.is_terminal() => None,
            (_, E::Cancel) => Some(S::Cancelled),
            (_, E::BackendFailed) => Some(S::Exhausted),
            (_, E::SchemaFailed { exhaust: true }) => Some(S::Exhausted),
            (_, E::SchemaFailed { exhaust: false }) => Some(S::Rejected),

            (S::Start, E::Begin) => Some(S::Auditing),
            (S::Auditing, E::Audited { short_circuit: true }) => Some(S::Approved),
            (S::Auditing, E::Audited { short_circuit: false }) => Some(S::Fixing),
            (S::Auditing, E::BoundExceeded) => Some(S::Exhausted),
            (S::Fixing, E::Fixed) => Some(S::Judging),
            (S::Judging, E::Judged(Decision::Approve)) => Some(S::Approved),
            (S::Judging, E::Judged(Decision::Reject)) => Some(S::Rejected),
            (S::Judging, E::Judged(Decision::Retry)) => Some(S::Auditing),
            _ => None,
        };

        next.ok_or(InvalidTransition { from: self, event })
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
