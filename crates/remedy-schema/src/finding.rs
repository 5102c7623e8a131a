use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{json_kind, unwrap_json_fence, SchemaError, SchemaViolation};
use crate::Role;

/// How bad a finding is. Closed set; anything else is a schema violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Major => "MAJOR",
            Severity::Minor => "MINOR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "CRITICAL" => Some(Severity::Critical),
            "MAJOR" => Some(Severity::Major),
            "MINOR" => Some(Severity::Minor),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single defect reported by the auditor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Validated auditor output for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditResult {
    pub file_path: PathBuf,
    pub findings: Vec<Finding>,
}

impl AuditResult {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    /// Short description for console output, e.g. `3 findings (1 critical, 2 minor)`
    pub fn short_description(&self) -> String {
        if self.findings.is_empty() {
            return "no findings".to_string();
        }
        let parts: Vec<String> = [Severity::Critical, Severity::Major, Severity::Minor]
            .iter()
            .filter_map(|s| {
                let n = self.count(*s);
                (n > 0).then(|| format!("{} {}", n, s.as_str().to_lowercase()))
            })
            .collect();
        format!(
            "{} finding{} ({})",
            self.findings.len(),
            if self.findings.len() == 1 { "" } else { "s" },
            parts.join(", ")
        )
    }

    /// Serialize to the auditor wire contract
    pub fn to_wire(&self) -> String {
        serde_json::json!({ "findings": self.findings }).to_string()
    }
}

/// Validate raw auditor output.
///
/// Accepts `{"findings": [...]}` or a bare array of findings, optionally
/// wrapped in a single ```json fence. Nothing else.
pub fn validate_audit(text: &str, file_path: &Path) -> Result<AuditResult, SchemaError> {
    let fail = |violation| SchemaError::new(Role::Auditor, violation, text);

    let value: Value = serde_json::from_str(unwrap_json_fence(text))
        .map_err(|e| fail(SchemaViolation::NotJson(e.to_string())))?;

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(obj) => {
            if let Some(extra) = obj.keys().find(|k| k.as_str() != "findings") {
                return Err(fail(SchemaViolation::UnexpectedField(extra.clone())));
            }
            match obj.get("findings") {
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(fail(SchemaViolation::WrongFieldType {
                        field: "findings".to_string(),
                        expected: "an array",
                    }))
                }
                None => return Err(fail(SchemaViolation::MissingField("findings".to_string()))),
            }
        }
        other => {
            return Err(fail(SchemaViolation::WrongShape {
                expected: "an object or array of findings",
                found: json_kind(other),
            }))
        }
    };

    let findings = items
        .iter()
        .enumerate()
        .map(|(idx, item)| parse_finding(idx, item).map_err(fail))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AuditResult {
        file_path: file_path.to_path_buf(),
        findings,
    })
}

fn parse_finding(idx: usize, item: &Value) -> Result<Finding, SchemaViolation> {
    let obj: &Map<String, Value> = item.as_object().ok_or(SchemaViolation::WrongShape {
        expected: "a finding object",
        found: json_kind(item),
    })?;

    if let Some(extra) = obj
        .keys()
        .find(|k| !matches!(k.as_str(), "severity" | "description" | "location"))
    {
        return Err(SchemaViolation::UnexpectedField(format!(
            "findings[{}].{}",
            idx, extra
        )));
    }

    let severity = match obj.get("severity") {
        Some(Value::String(s)) => {
            Severity::parse(s).ok_or_else(|| SchemaViolation::InvalidSeverity(s.clone()))?
        }
        Some(_) => {
            return Err(SchemaViolation::WrongFieldType {
                field: format!("findings[{}].severity", idx),
                expected: "a string",
            })
        }
        None => {
            return Err(SchemaViolation::MissingField(format!(
                "findings[{}].severity",
                idx
            )))
        }
    };

    let description = match obj.get("description") {
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err(SchemaViolation::EmptyDescription(idx))
        }
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(SchemaViolation::WrongFieldType {
                field: format!("findings[{}].description", idx),
                expected: "a string",
            })
        }
        None => {
            return Err(SchemaViolation::MissingField(format!(
                "findings[{}].description",
                idx
            )))
        }
    };

    let location = match obj.get("location") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(SchemaViolation::WrongFieldType {
                field: format!("findings[{}].location", idx),
                expected: "a string or null",
            })
        }
    };

    Ok(Finding {
        severity,
        description,
        location,
    })
}
