use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SchemaError, SchemaViolation};
use crate::Role;

const FENCE: &str = "```";

/// Source proposed by the fixer. Replaces, never merges with, the previous candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixCandidate {
    pub file_path: PathBuf,
    pub source_text: String,
}

impl FixCandidate {
    pub fn line_count(&self) -> usize {
        self.source_text.lines().count()
    }

    /// Serialize to the fixer wire contract: one fenced block tagged with the file extension
    pub fn to_wire(&self) -> String {
        let tag = self
            .file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let close = if self.source_text.ends_with('\n') { "" } else { "\n" };
        format!("{FENCE}{tag}\n{}{close}{FENCE}", self.source_text)
    }
}

/// Validate raw fixer output: exactly one fenced block, commentary outside it ignored.
pub fn validate_fix(text: &str, file_path: &Path) -> Result<FixCandidate, SchemaError> {
    let fail = |violation| SchemaError::new(Role::Fixer, violation, text);

    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        match current.take() {
            None => {
                if line.trim_start().starts_with(FENCE) {
                    current = Some(Vec::new());
                }
            }
            Some(body) if line.trim() == FENCE => blocks.push(body),
            Some(mut body) => {
                body.push(line);
                current = Some(body);
            }
        }
    }

    if current.is_some() {
        return Err(fail(SchemaViolation::UnterminatedCodeBlock));
    }

    let body = match blocks.len() {
        0 => return Err(fail(SchemaViolation::NoCodeBlock)),
        1 => blocks.remove(0),
        n => return Err(fail(SchemaViolation::MultipleCodeBlocks(n))),
    };

    if body.iter().all(|line| line.trim().is_empty()) {
        return Err(fail(SchemaViolation::EmptyCodeBlock));
    }
    // Every line inside the fence, the last one included, ends with a newline
    let mut source_text = body.join("\n");
    source_text.push('\n');

    Ok(FixCandidate {
        file_path: file_path.to_path_buf(),
        source_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> PathBuf {
        PathBuf::from("pkg/stats.py")
    }

    #[test]
    fn test_single_block_extracted() {
        let text = "```python\ndef mean(xs):\n    return sum(xs) / len(xs) if xs else 0.0\n```";
        let fix = validate_fix(text, &path()).unwrap();
        assert_eq!(
            fix.source_text,
            "def mean(xs):\n    return sum(xs) / len(xs) if xs else 0.0\n"
        );
        assert_eq!(fix.line_count(), 2);
    }

    #[test]
    fn test_commentary_outside_block_ignored() {
        let text = "Here is the fix:\n\n```\nx = 1\n```\n\nLet me know if you need more.";
        let fix = validate_fix(text, &path()).unwrap();
        assert_eq!(fix.source_text, "x = 1\n");
    }

    #[test]
    fn test_no_block_is_fatal() {
        let text = "def mean(xs):\n    return 0";
        let err = validate_fix(text, &path()).unwrap_err();
        assert_eq!(err.role, Role::Fixer);
        assert_eq!(err.violation, SchemaViolation::NoCodeBlock);
        assert_eq!(err.raw, text);
    }

    #[test]
    fn test_multiple_blocks_fail() {
        let text = "```python\na = 1\n```\nand also\n```python\nb = 2\n```";
        let err = validate_fix(text, &path()).unwrap_err();
        assert_eq!(err.violation, SchemaViolation::MultipleCodeBlocks(2));
    }

    #[test]
    fn test_unterminated_block_fails() {
        let err = validate_fix("```python\na = 1\n", &path()).unwrap_err();
        assert_eq!(err.violation, SchemaViolation::UnterminatedCodeBlock);
    }

    #[test]
    fn test_empty_block_fails() {
        let err = validate_fix("```python\n\n```", &path()).unwrap_err();
        assert_eq!(err.violation, SchemaViolation::EmptyCodeBlock);
    }

    #[test]
    fn test_wire_form_revalidates() {
        let fix = FixCandidate {
            file_path: path(),
            source_text: "import os\n\nprint(os.getcwd())\n".to_string(),
        };
        let wire = fix.to_wire();
        assert_eq!(wire, "```py\nimport os\n\nprint(os.getcwd())\n```");
        assert_eq!(validate_fix(&wire, &path()).unwrap(), fix);
    }

    #[test]
    fn test_final_newline_kept() {
        let fix = validate_fix("```python\nx = 1\n```", &path()).unwrap();
        assert_eq!(fix.source_text, "x = 1\n");

        let trailing_blank = validate_fix("```python\nx = 1\n\n```\n", &path()).unwrap();
        assert_eq!(trailing_blank.source_text, "x = 1\n\n");
    }

    #[test]
    fn test_wire_without_final_newline_gains_one() {
        let fix = FixCandidate {
            file_path: path(),
            source_text: "x = 1".to_string(),
        };
        assert_eq!(fix.to_wire(), "```py\nx = 1\n```");
        assert_eq!(validate_fix(&fix.to_wire(), &path()).unwrap().source_text, "x = 1\n");
    }
}
