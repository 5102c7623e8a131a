use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default iteration bound per file
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// What a schema violation does to the file's run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaFailure {
    /// End the file as REJECTED
    #[default]
    Reject,
    /// End the file as EXHAUSTED
    Exhaust,
}

/// Backoff for retryable backend failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per role call, including the first
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// Exponential from `base_delay`; a server-provided `retry_after` wins.
    /// Both are capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = retry_after.unwrap_or_else(|| {
            let exp = attempt.saturating_sub(1).min(16);
            self.base_delay.saturating_mul(1u32 << exp)
        });
        delay.min(self.max_delay)
    }
}

/// Per-file loop behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopPolicy {
    pub max_iterations: usize,
    /// A clean audit approves the file without calling fixer or judge
    pub short_circuit_clean: bool,
    /// Keep the last candidate of a REJECTED file in its outcome (never applied)
    pub keep_rejected_candidate: bool,
    pub on_schema_error: SchemaFailure,
    pub retry: RetryPolicy,
    /// Write approved candidates back to disk
    pub apply: bool,
    /// Copy each file to `<name>.backup` before an approved candidate replaces it
    pub backup: bool,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            short_circuit_clean: true,
            keep_rejected_candidate: true,
            on_schema_error: SchemaFailure::Reject,
            retry: RetryPolicy::default(),
            apply: false,
            backup: true,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
