use serde::{Deserialize, Serialize};

const AUDITOR_INSTRUCTION: &str = r#"You are the Auditor in an automated code remediation loop.

Inspect the source file you are given and report every defect you find: syntax errors, logic bugs, unsafe edge cases and maintainability problems.

Respond with JSON only, in exactly this shape:
{"findings": [{"severity": "CRITICAL" | "MAJOR" | "MINOR", "description": "...", "location": "line or symbol, optional"}]}

If the file has no defects, respond with {"findings": []}. Do not write any prose outside the JSON object."#;

const FIXER_INSTRUCTION: &str = r#"You are the Fixer in an automated code remediation loop.

Rewrite the source file so that every finding you are given is addressed, while preserving the intended behaviour of the code.

Respond with the complete corrected file inside exactly one fenced code block. Do not include explanations, partial snippets or additional code blocks."#;

const JUDGE_INSTRUCTION: &str = r#"You are the Judge in an automated code remediation loop.

Compare the original source with the proposed fix and any test outcomes, then decide whether the fix is acceptable.

Respond with JSON only, in exactly this shape:
{"decision": "APPROVE" | "RETRY" | "REJECT", "reasoning": "...", "tests_passed": ["..."], "tests_failed": ["..."], "next_steps": "..."}

APPROVE when the fix is correct and complete. RETRY when it is on the right track but needs another pass; describe what to change in next_steps. REJECT when the fix is wrong in a way another pass will not repair."#;

/// The three roles the remediation loop drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Auditor,
    Fixer,
    Judge,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Auditor, Role::Fixer, Role::Judge];

    /// Name recorded as `agent_name` in the experiment log
    pub fn agent_name(&self) -> &'static str {
        match self {
            Role::Auditor => "Auditor",
            Role::Fixer => "Fixer",
            Role::Judge => "Judge",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Auditor => "auditor",
            Role::Fixer => "fixer",
            Role::Judge => "judge",
        }
    }

    /// Fixed system instruction sent with every request for this role
    pub fn system_instruction(&self) -> &'static str {
        match self {
            Role::Auditor => AUDITOR_INSTRUCTION,
            Role::Fixer => FIXER_INSTRUCTION,
            Role::Judge => JUDGE_INSTRUCTION,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auditor" | "audit" => Ok(Role::Auditor),
            "fixer" | "fix" => Ok(Role::Fixer),
            "judge" => Ok(Role::Judge),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}
