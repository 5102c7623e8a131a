//! # remedy-schema
//!
//! Wire contracts for the auditor, fixer and judge roles.
//!
//! Every response from the backend passes through one of the validators
//! here before the orchestrator acts on it. Validators are pure: they
//! either return a typed value or a [`SchemaError`] carrying the raw text.
//!
//! - [`validate_audit`] - findings JSON into an [`AuditResult`]
//! - [`validate_fix`] - exactly one fenced block into a [`FixCandidate`]
//! - [`validate_judge`] - five-field decision JSON into a [`JudgeDecision`]
//!
//! [`RolePrompts`] builds the user prompt each role is sent.

mod decision;
mod error;
mod finding;
mod fix;
mod prompts;
mod role;

pub use decision::{validate_judge, Decision, JudgeDecision};
pub use error::{SchemaError, SchemaViolation};
pub use finding::{validate_audit, AuditResult, Finding, Severity};
pub use fix::{validate_fix, FixCandidate};
pub use prompts::{RolePrompts, TestOutcome};
pub use role::Role;
