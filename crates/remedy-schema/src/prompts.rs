use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{AuditResult, FixCandidate};

/// Result of running a check command against a fix candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Prompt templates for the three roles.
///
/// Source text always goes in whole; only tool output and feedback are cut.
pub struct RolePrompts;

impl RolePrompts {
    /// Build the auditor prompt for `source`
    pub fn audit(file_path: &Path, source: &str) -> String {
        format!(
            r#"Audit this source file.

## File
{path}

## Source
```
{source}
```

Report every defect as a finding. Respond with the findings JSON object only."#,
            path = file_path.display(),
            source = source,
        )
    }

    /// Build the fixer prompt from the source under repair and its audit.
    /// `feedback` carries the judge's notes from the previous pass, if any.
    pub fn fix(
        file_path: &Path,
        source: &str,
        audit: &AuditResult,
        feedback: Option<&str>,
    ) -> String {
        let mut findings = String::new();
        for (idx, finding) in audit.findings.iter().enumerate() {
            findings.push_str(&format!(
                "{}. [{}] {}",
                idx + 1,
                finding.severity,
                finding.description
            ));
            if let Some(ref location) = finding.location {
                findings.push_str(&format!(" (at {})", location));
            }
            findings.push('\n');
        }

        let mut prompt = format!(
            r#"Fix this source file.

## File
{path}

## Current Source
```
{source}
```

## Findings To Address
{findings}"#,
            path = file_path.display(),
            source = source,
            findings = findings,
        );

        if let Some(feedback) = feedback.filter(|f| !f.trim().is_empty()) {
            prompt.push_str(&format!(
                r#"
## Feedback From The Previous Attempt
{}
"#,
                truncate_output(feedback, 4000)
            ));
        }

        prompt.push_str(
            "\nReturn the complete corrected file in exactly one fenced code block and nothing else.",
        );
        prompt
    }

    /// Build the judge prompt comparing the original source against the candidate
    pub fn judge(
        file_path: &Path,
        original_source: &str,
        candidate: &FixCandidate,
        tests: Option<&TestOutcome>,
    ) -> String {
        let tests_section = match tests {
            Some(outcome) => format!(
                r#"Command: {command}
Exit code: {code} ({verdict})

stdout:
```
{stdout}
```

stderr:
```
{stderr}
```"#,
                command = outcome.command,
                code = outcome.exit_code,
                verdict = if outcome.passed() { "passed" } else { "failed" },
                stdout = truncate_output(&outcome.stdout, 2000),
                stderr = truncate_output(&outcome.stderr, 1000),
            ),
            None => "No test outcomes are available; judge from the code alone.".to_string(),
        };

        format!(
            r#"Evaluate this fix.

## File
{path}

## Original Source
```
{original}
```

## Proposed Fix
```
{fixed}
```

## Test Outcomes
{tests}

Decide APPROVE, RETRY or REJECT and respond with the decision JSON object only."#,
            path = file_path.display(),
            original = original_source,
            fixed = candidate.source_text,
            tests = tests_section,
        )
    }
}

/// Truncate at a line boundary when possible, never inside a UTF-8 sequence
fn truncate_output(output: &str, max_len: usize) -> &str {
    if output.len() <= max_len {
        return output;
    }
    let mut end = max_len;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    match output[..end].rfind('\n') {
        Some(pos) => &output[..pos],
        None => &output[..end],
    }
}
