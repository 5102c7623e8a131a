use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::sink::LogSink;

/// Detail keys every analysis entry must carry
pub const REQUIRED_DETAILS: [&str; 2] = ["input_prompt", "output_response"];

/// What kind of step an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Auditor pass over a source file
    Analysis,
    /// Fixer rewrite
    Fix,
    /// Judge verdict
    Judgment,
    /// Diagnostic record, e.g. a rejected response
    Debug,
    /// Run lifecycle (start/end)
    Run,
}

impl ActionType {
    /// Analysis actions are the ones whose prompt and response must be traceable
    pub fn is_analysis(&self) -> bool {
        matches!(
            self,
            ActionType::Analysis | ActionType::Fix | ActionType::Judgment
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Analysis => "ANALYSIS",
            ActionType::Fix => "FIX",
            ActionType::Judgment => "JUDGMENT",
            ActionType::Debug => "DEBUG",
            ActionType::Run => "RUN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Success,
    Failure,
}

/// One immutable, self-describing record of a completed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentLogEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub agent_name: String,
    pub model_used: String,
    pub action: ActionType,
    pub details: Map<String, Value>,
    pub status: EntryStatus,
}

impl ExperimentLogEntry {
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    pub fn detail_u64(&self, key: &str) -> Option<u64> {
        self.details.get(key).and_then(Value::as_u64)
    }
}

#[derive(Error, Debug)]
pub enum LogError {
    /// A step tried to log without its prompt/response trace
    #[error("{action} entry from {agent} is missing required detail `{field}`")]
    MissingDetail {
        agent: String,
        action: &'static str,
        field: &'static str,
    },

    #[error("Failed to append to experiment log: {0}")]
    Write(#[from] std::io::Error),
}

/// Validating front end to a [`LogSink`].
///
/// Shared by every orchestrator in a run; the sink serializes appends.
pub struct ExperimentLogger {
    run_id: String,
    sink: Arc<dyn LogSink>,
}

impl ExperimentLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self::with_run_id(sink, Uuid::new_v4().to_string())
    }

    pub fn with_run_id(sink: Arc<dyn LogSink>, run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            sink,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Validate and append one record. Nothing is written when validation fails.
    pub fn log(
        &self,
        agent_name: &str,
        model_used: &str,
        action: ActionType,
        details: Map<String, Value>,
        status: EntryStatus,
    ) -> Result<ExperimentLogEntry, LogError> {
        if action.is_analysis() {
            if let Some(&field) = REQUIRED_DETAILS
                .iter()
                .find(|f| !matches!(details.get(**f), Some(Value::String(_))))
            {
                return Err(LogError::MissingDetail {
                    agent: agent_name.to_string(),
                    action: action.as_str(),
                    field,
                });
            }
        }

        let entry = ExperimentLogEntry {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            agent_name: agent_name.to_string(),
            model_used: model_used.to_string(),
            action,
            details,
            status,
        };
        self.sink.append(&entry)?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySink;
    use serde_json::json;

    fn details(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_log_appends_entry() {
        let sink = Arc::new(MemorySink::new());
        let logger = ExperimentLogger::with_run_id(sink.clone(), "run-1");

        let entry = logger
            .log(
                "Auditor",
                "test/model",
                ActionType::Analysis,
                details(json!({"input_prompt": "p", "output_response": "r", "file_path": "a.py"})),
                EntryStatus::Success,
            )
            .unwrap();

        assert_eq!(entry.run_id, "run-1");
        assert_eq!(entry.detail_str("file_path"), Some("a.py"));
        assert_eq!(sink.entries(), vec![entry]);
    }

    #[test]
    fn test_analysis_action_without_response_is_rejected() {
        let sink = Arc::new(MemorySink::new());
        let logger = ExperimentLogger::new(sink.clone());

        let err = logger
            .log(
                "Fixer",
                "m",
                ActionType::Fix,
                details(json!({"input_prompt": "p"})),
                EntryStatus::Success,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            LogError::MissingDetail { field: "output_response", action: "FIX", .. }
        ));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_every_role_action_requires_prompt() {
        let logger = ExperimentLogger::new(Arc::new(MemorySink::new()));
        for action in [ActionType::Analysis, ActionType::Fix, ActionType::Judgment] {
            let err = logger
                .log("x", "m", action, details(json!({"output_response": "r"})), EntryStatus::Success)
                .unwrap_err();
            assert!(matches!(err, LogError::MissingDetail { field: "input_prompt", .. }));
        }
    }

    #[test]
    fn test_run_action_needs_no_trace() {
        let logger = ExperimentLogger::new(Arc::new(MemorySink::new()));
        assert!(logger
            .log("System", "-", ActionType::Run, Map::new(), EntryStatus::Success)
            .is_ok());
    }

    #[test]
    fn test_entry_serializes_screaming_enums() {
        let logger = ExperimentLogger::with_run_id(Arc::new(MemorySink::new()), "r");
        let entry = logger
            .log(
                "Judge",
                "m",
                ActionType::Judgment,
                details(json!({"input_prompt": "p", "output_response": "r"})),
                EntryStatus::Failure,
            )
            .unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "JUDGMENT");
        assert_eq!(json["status"], "FAILURE");
        assert_eq!(json["details"]["input_prompt"], "p");
    }
}
