use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{json_kind, unwrap_json_fence, SchemaError, SchemaViolation};
use crate::Role;

const FIELDS: [&str; 5] = [
    "decision",
    "reasoning",
    "tests_passed",
    "tests_failed",
    "next_steps",
];

/// The judge's verdict on a fix candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Accept the candidate; terminal success
    Approve,
    /// Audit the candidate again and make another pass
    Retry,
    /// Give up on this file; terminal failure
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "APPROVE",
            Decision::Retry => "RETRY",
            Decision::Reject => "REJECT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "APPROVE" => Some(Decision::Approve),
            "RETRY" => Some(Decision::Retry),
            "REJECT" => Some(Decision::Reject),
            _ => None,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated judge output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeDecision {
    pub decision: Decision,
    pub reasoning: String,
    pub tests_passed: Vec<String>,
    pub tests_failed: Vec<String>,
    pub next_steps: String,
}

impl JudgeDecision {
    pub fn is_terminal(&self) -> bool {
        !matches!(self.decision, Decision::Retry)
    }

    /// Get a short description of the decision for logging
    pub fn short_description(&self) -> String {
        match (self.tests_passed.len(), self.tests_failed.len()) {
            (0, 0) => self.decision.as_str().to_string(),
            (passed, failed) => format!(
                "{} ({} passed, {} failed)",
                self.decision, passed, failed
            ),
        }
    }

    /// Feedback handed to the fixer on the next pass
    pub fn feedback(&self) -> String {
        let mut out = self.next_steps.trim().to_string();
        if !self.tests_failed.is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str("Failing checks:\n");
            for t in &self.tests_failed {
                out.push_str("- ");
                out.push_str(t);
                out.push('\n');
            }
        }
        out
    }

    /// Serialize to the judge wire contract
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Validate raw judge output.
///
/// The payload must be an object with exactly the five contract fields. A
/// missing or unknown `decision` is an error; no fallback verdict is guessed.
pub fn validate_judge(text: &str) -> Result<JudgeDecision, SchemaError> {
    let fail = |violation| SchemaError::new(Role::Judge, violation, text);

    debug!(output_len = text.len(), "Validating judge decision");

    let value: Value = serde_json::from_str(unwrap_json_fence(text))
        .map_err(|e| fail(SchemaViolation::NotJson(e.to_string())))?;

    let obj = value.as_object().ok_or_else(|| {
        fail(SchemaViolation::WrongShape {
            expected: "a decision object",
            found: json_kind(&value),
        })
    })?;

    if let Some(extra) = obj.keys().find(|k| !FIELDS.contains(&k.as_str())) {
        return Err(fail(SchemaViolation::UnexpectedField(extra.clone())));
    }
    if let Some(missing) = FIELDS.iter().find(|f| !obj.contains_key(**f)) {
        return Err(fail(SchemaViolation::MissingField(missing.to_string())));
    }

    let decision = match &obj["decision"] {
        Value::String(s) => {
            Decision::parse(s).ok_or_else(|| fail(SchemaViolation::InvalidDecision(s.clone())))?
        }
        other => {
            return Err(fail(SchemaViolation::InvalidDecision(other.to_string())));
        }
    };

    Ok(JudgeDecision {
        decision,
        reasoning: string_field(obj, "reasoning").map_err(fail)?,
        tests_passed: string_list(obj, "tests_passed").map_err(fail)?,
        tests_failed: string_list(obj, "tests_failed").map_err(fail)?,
        next_steps: string_field(obj, "next_steps").map_err(fail)?,
    })
}

fn string_field(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String, SchemaViolation> {
    match &obj[field] {
        Value::String(s) => Ok(s.clone()),
        _ => Err(SchemaViolation::WrongFieldType {
            field: field.to_string(),
            expected: "a string",
        }),
    }
}

fn string_list(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Vec<String>, SchemaViolation> {
    let wrong = || SchemaViolation::WrongFieldType {
        field: field.to_string(),
        expected: "an array of strings",
    };
    match &obj[field] {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(wrong))
            .collect(),
        _ => Err(wrong()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_approve() {
        let text = r#"{"decision":"APPROVE","reasoning":"All edge cases handled","tests_passed":["test_mean_empty","test_mean_basic"],"tests_failed":[],"next_steps":""}"#;
        let decision = validate_judge(text).unwrap();
        assert_eq!(decision.decision, Decision::Approve);
        assert!(decision.is_terminal());
        assert_eq!(decision.tests_passed.len(), 2);
        assert_eq!(decision.short_description(), "APPROVE (2 passed, 0 failed)");
    }

    #[test]
    fn test_parse_retry_in_fence() {
        let text = "```json\n{\"decision\":\"RETRY\",\"reasoning\":\"close\",\"tests_passed\":[],\"tests_failed\":[\"test_negative\"],\"next_steps\":\"handle negatives\"}\n```";
        let decision = validate_judge(text).unwrap();
        assert_eq!(decision.decision, Decision::Retry);
        assert!(!decision.is_terminal());
        let feedback = decision.feedback();
        assert!(feedback.starts_with("handle negatives"));
        assert!(feedback.contains("- test_negative"));
    }

    #[test]
    fn test_unknown_decision_fails() {
        let text = r#"{"decision":"SUCCESS","reasoning":"","tests_passed":[],"tests_failed":[],"next_steps":""}"#;
        let err = validate_judge(text).unwrap_err();
        assert_eq!(err.role, Role::Judge);
        assert_eq!(err.violation, SchemaViolation::InvalidDecision("SUCCESS".into()));
    }

    #[test]
    fn test_missing_decision_fails() {
        let text = r#"{"reasoning":"","tests_passed":[],"tests_failed":[],"next_steps":""}"#;
        let err = validate_judge(text).unwrap_err();
        assert_eq!(err.violation, SchemaViolation::MissingField("decision".into()));
    }

    #[test]
    fn test_null_decision_fails() {
        let text = r#"{"decision":null,"reasoning":"","tests_passed":[],"tests_failed":[],"next_steps":""}"#;
        let err = validate_judge(text).unwrap_err();
        assert!(matches!(err.violation, SchemaViolation::InvalidDecision(_)));
    }

    #[test]
    fn test_counts_instead_of_lists_fail() {
        let text = r#"{"decision":"APPROVE","reasoning":"","tests_passed":5,"tests_failed":0,"next_steps":""}"#;
        let err = validate_judge(text).unwrap_err();
        assert!(matches!(
            err.violation,
            SchemaViolation::WrongFieldType { ref field, .. } if field == "tests_passed"
        ));
    }

    #[test]
    fn test_extra_field_fails() {
        let text = r#"{"decision":"APPROVE","reasoning":"","tests_passed":[],"tests_failed":[],"next_steps":"","estimated_iterations_remaining":0}"#;
        let err = validate_judge(text).unwrap_err();
        assert_eq!(
            err.violation,
            SchemaViolation::UnexpectedField("estimated_iterations_remaining".into())
        );
    }

    #[test]
    fn test_wire_round_trip_preserves_every_field() {
        let original = JudgeDecision {
            decision: Decision::Reject,
            reasoning: "The fix deletes the public API".to_string(),
            tests_passed: vec!["test_import".to_string()],
            tests_failed: vec!["test_api \"quoted\"".to_string(), "test_unicode ✓".to_string()],
            next_steps: "Restore `compute()`\nthen retry".to_string(),
        };
        let parsed = validate_judge(&original.to_wire()).unwrap();
        assert_eq!(parsed, original);
    }
}
