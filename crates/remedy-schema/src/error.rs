use thiserror::Error;

use crate::Role;

/// What exactly was wrong with a role's response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("expected {expected}, found {found}")]
    WrongShape {
        expected: &'static str,
        found: &'static str,
    },

    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("unexpected field `{0}`")]
    UnexpectedField(String),

    #[error("field `{field}` must be {expected}")]
    WrongFieldType {
        field: String,
        expected: &'static str,
    },

    #[error("unknown severity {0:?} (expected CRITICAL, MAJOR or MINOR)")]
    InvalidSeverity(String),

    #[error("finding {0} has an empty description")]
    EmptyDescription(usize),

    #[error("unknown decision {0:?} (expected APPROVE, RETRY or REJECT)")]
    InvalidDecision(String),

    #[error("no fenced source block found")]
    NoCodeBlock,

    #[error("expected exactly one fenced source block, found {0}")]
    MultipleCodeBlocks(usize),

    #[error("fenced source block opened but never closed")]
    UnterminatedCodeBlock,

    #[error("fenced source block is empty")]
    EmptyCodeBlock,
}

/// A role response that does not match its wire contract.
///
/// Keeps the offending raw text so the operator can see what the backend
/// actually said.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{role} response rejected: {violation}")]
pub struct SchemaError {
    pub role: Role,
    pub violation: SchemaViolation,
    pub raw: String,
}

impl SchemaError {
    pub fn new(role: Role, violation: SchemaViolation, raw: &str) -> Self {
        Self {
            role,
            violation,
            raw: raw.to_string(),
        }
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Strip one surrounding ```json fence, if the whole payload is wrapped in one.
/// Anything else is returned untouched and must parse on its own.
pub(crate) fn unwrap_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.trim()
}
