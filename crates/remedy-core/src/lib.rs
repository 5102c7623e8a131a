//! # remedy-core
//!
//! The per-file remediation loop. An [`Orchestrator`] moves one source file
//! through `START → AUDITING → FIXING → JUDGING` until it lands in one of the
//! terminal [`LoopState`]s, logging every role step through the injected
//! experiment logger. [`BatchRunner`] fans the loop out over many files.

mod batch;
mod context;
mod error;
mod orchestrator;
mod outcome;
mod policy;
mod probe;
pub mod replay;
mod state;
mod workspace;

pub use batch::{BatchReport, BatchRunner, FileReport};
pub use context::{FileContext, IterationRecord};
pub use error::RunError;
pub use orchestrator::Orchestrator;
pub use outcome::FileOutcome;
pub use policy::{LoopPolicy, RetryPolicy, SchemaFailure, DEFAULT_MAX_ITERATIONS};
pub use probe::{CommandProbe, TestProbe};
pub use replay::{reconstruct, ReplayError};
pub use state::{InvalidTransition, LoopEvent, LoopState};
pub use workspace::{backup_path, discover_sources, replace_within, write_within, SourceFilter};
