//! # remedy-logging
//!
//! Logging for the remedy auditor/fixer/judge loop.
//!
//! Two separate streams live here:
//!
//! - The **experiment log**: one immutable [`ExperimentLogEntry`] per role
//!   invocation, validated by [`ExperimentLogger`] and appended to a
//!   [`LogSink`]. It is the audit trail of a run and can be read back with
//!   [`read_log`] or checked with [`check_log`].
//! - **Console events**: [`LogEvent`]s rendered by [`Logger`] for the
//!   operator in Pretty, JSON or Compact form.
//!
//! Diagnostics go through `tracing`; see [`init_tracing`].

mod events;
mod experiment;
mod reader;
mod sink;

pub use events::{LogEvent, LogFormat, Logger};
pub use experiment::{
    ActionType, EntryStatus, ExperimentLogEntry, ExperimentLogger, LogError, REQUIRED_DETAILS,
};
pub use reader::{check_log, read_log, FileSummary, LogIssue, LogReport, TextStats};
pub use sink::{default_log_path, JsonlSink, LogSink, MemorySink};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for the application
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty | LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .init();
        }
    }
}
