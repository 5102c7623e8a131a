use async_trait::async_trait;
use std::io::{self, Write};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use remedy_schema::{FixCandidate, TestOutcome};

/// Supplies test outcomes for a candidate before the judge sees it
#[async_trait]
pub trait TestProbe: Send + Sync {
    async fn check(&self, candidate: &FixCandidate) -> io::Result<TestOutcome>;
}

/// Runs a shell-free command with the candidate's temp file appended as the last argument,
/// e.g. `python -m py_compile <tmp>.py`.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProbe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Split a command line on whitespace. Returns `None` for a blank command.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command as shown to the judge
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl TestProbe for CommandProbe {
    async fn check(&self, candidate: &FixCandidate) -> io::Result<TestOutcome> {
        let suffix = candidate
            .file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let mut temp = tempfile::Builder::new()
            .prefix("remedy-candidate-")
            .suffix(&suffix)
            .tempfile()?;
        temp.write_all(candidate.source_text.as_bytes())?;
        temp.flush()?;

        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(temp.path()).kill_on_drop(true);
        if let Some(dir) = candidate.file_path.parent().filter(|d| d.is_dir()) {
            command.current_dir(dir);
        }

        debug!(command = %self.display(), file = %candidate.file_path.display(), "Running test probe");
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("`{}` timed out after {:?}", self.display(), self.timeout),
                )
            })??;

        Ok(TestOutcome {
            command: self.display(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
