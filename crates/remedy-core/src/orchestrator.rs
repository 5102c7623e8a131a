use chrono::Utc;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use remedy_agent::{Role, RoleClient};
use remedy_logging::{ActionType, EntryStatus, ExperimentLogger, LogEvent, Logger};
use remedy_schema::{
    validate_audit, validate_fix, validate_judge, AuditResult, Decision, FixCandidate,
    JudgeDecision, RolePrompts, SchemaError, TestOutcome,
};

use crate::context::IterationRecord;
use crate::error::{RunError, StepError};
use crate::outcome::FileOutcome;
use crate::policy::{LoopPolicy, SchemaFailure};
use crate::probe::TestProbe;
use crate::state::{InvalidTransition, LoopEvent, LoopState};
use crate::workspace::{replace_within, write_within};
use crate::FileContext;

fn action_for(role: Role) -> ActionType {
    match role {
        Role::Auditor => ActionType::Analysis,
        Role::Fixer => ActionType::Fix,
        Role::Judge => ActionType::Judgment,
    }
}

/// Drives one file through audit, fix and judge until a terminal state
pub struct Orchestrator {
    client: Arc<dyn RoleClient>,
    experiment: Arc<ExperimentLogger>,
    logger: Arc<Logger>,
    policy: LoopPolicy,
    probe: Option<Arc<dyn TestProbe>>,
    root: Option<PathBuf>,
    interrupted: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn RoleClient>,
        experiment: Arc<ExperimentLogger>,
        logger: Arc<Logger>,
        policy: LoopPolicy,
    ) -> Self {
        Self {
            client,
            experiment,
            logger,
            policy,
            probe: None,
            root: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run `probe` on every candidate and hand its outcome to the judge
    pub fn with_probe(mut self, probe: Arc<dyn TestProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Directory approved candidates may be written into.
    /// Defaults to the file's own directory.
    pub fn with_root(mut self, root: PathBuf) -> Self {
        self.root = Some(root);
        self
    }

    /// Share a cancellation flag, e.g. one set from a Ctrl+C handler
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// Get a handle to signal interruption
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    pub fn policy(&self) -> &LoopPolicy {
        &self.policy
    }

    pub fn experiment(&self) -> &ExperimentLogger {
        &self.experiment
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Read `file_path` and run it to a terminal state
    pub async fn run_file(&self, file_path: &Path) -> Result<FileOutcome, RunError> {
        let source = tokio::fs::read_to_string(file_path)
            .await
            .map_err(|source| RunError::Read {
                path: file_path.to_path_buf(),
                source,
            })?;
        let context = FileContext::new(
            file_path.to_path_buf(),
            source,
            self.policy.max_iterations,
        );
        self.run(context).await
    }

    /// Run the loop until the file reaches a terminal state.
    ///
    /// Returns `Err` only for failures that leave the run unauditable
    /// (log validation, I/O); everything else ends in a [`FileOutcome`].
    pub async fn run(&self, mut context: FileContext) -> Result<FileOutcome, RunError> {
        self.logger.log(&LogEvent::FileStarted {
            file: context.file_path.clone(),
        });

        let mut state = LoopState::Start.next(LoopEvent::Begin)?;
        let mut audit: Option<AuditResult> = None;
        let mut candidate: Option<FixCandidate> = None;
        let mut tests: Option<TestOutcome> = None;
        let mut verdict: Option<JudgeDecision> = None;
        let mut failure: Option<String> = None;
        let mut approved_by_audit = false;
        let mut bound_reached = context.max_iterations == 0;

        while !state.is_terminal() {
            let event = if self.is_interrupted() {
                info!(file = %context.file_path.display(), "Run cancelled");
                LoopEvent::Cancel
            } else {
                match state {
                    LoopState::Auditing if bound_reached => LoopEvent::BoundExceeded,
                    LoopState::Auditing => match self.audit(&context).await {
                        Ok(result) => {
                            let short_circuit = result.is_clean() && self.policy.short_circuit_clean;
                            if short_circuit {
                                self.short_circuit(&mut context, &result);
                            }
                            approved_by_audit = short_circuit;
                            audit = Some(result);
                            LoopEvent::Audited { short_circuit }
                        }
                        Err(e) => self.settle_failure(&context, e, &mut failure)?,
                    },
                    LoopState::Fixing => {
                        let current = audit
                            .as_ref()
                            .ok_or(InvalidTransition {
                                from: state,
                                event: LoopEvent::Fixed,
                            })?;
                        match self.fix(&context, current).await {
                            Ok(fixed) => {
                                tests = self.probe(&fixed).await;
                                candidate = Some(fixed);
                                LoopEvent::Fixed
                            }
                            Err(e) => self.settle_failure(&context, e, &mut failure)?,
                        }
                    }
                    LoopState::Judging => {
                        let (Some(current_audit), Some(current)) = (audit.as_ref(), candidate.as_ref())
                        else {
                            return Err(InvalidTransition {
                                from: state,
                                event: LoopEvent::Judged(Decision::Retry),
                            }
                            .into());
                        };
                        match self.judge(&context, current, tests.as_ref()).await {
                            Ok(decision) => {
                                let event = LoopEvent::Judged(decision.decision);
                                context.push_record(IterationRecord {
                                    iteration_index: context.iteration,
                                    audit_result: current_audit.clone(),
                                    fix_candidate: Some(current.clone()),
                                    judge_decision: Some(decision.clone()),
                                    timestamp: Utc::now(),
                                });
                                if decision.decision == Decision::Retry {
                                    if context.at_bound() {
                                        bound_reached = true;
                                    } else {
                                        context.advance(current, decision.feedback());
                                        info!(
                                            file = %context.file_path.display(),
                                            iteration = context.iteration,
                                            "Judge asked for another pass"
                                        );
                                    }
                                }
                                verdict = Some(decision);
                                event
                            }
                            Err(e) => self.settle_failure(&context, e, &mut failure)?,
                        }
                    }
                    other => {
                        return Err(InvalidTransition {
                            from: other,
                            event: LoopEvent::Begin,
                        }
                        .into())
                    }
                }
            };

            let next = state.next(event)?;
            debug!(file = %context.file_path.display(), from = %state, to = %next, "State transition");
            state = next;
        }

        let iterations = context.iteration.min(context.max_iterations);
        let duration = context.total_duration();
        let file = context.file_path.clone();
        let history = std::mem::take(&mut context.history);

        let mut outcome = match state {
            LoopState::Approved => {
                // A clean re-audit after RETRY approves the last candidate;
                // the judge's reasoning at that point is the stale RETRY
                let summary = if approved_by_audit {
                    audit.as_ref().map(AuditResult::short_description)
                } else {
                    verdict.as_ref().map(|v| v.reasoning.clone())
                }
                .unwrap_or_default();
                let accepted = verdict.as_ref().and(candidate);
                FileOutcome::approved(file, iterations, summary, accepted, history, duration)
            }
            LoopState::Rejected => {
                let reason = failure
                    .or_else(|| verdict.map(|v| v.reasoning))
                    .unwrap_or_else(|| "rejected".to_string());
                let kept = candidate.filter(|_| self.policy.keep_rejected_candidate);
                FileOutcome::rejected(file, iterations, reason, kept, history, duration)
            }
            LoopState::Exhausted => {
                let reason = failure.unwrap_or_else(|| match verdict {
                    Some(v) => format!(
                        "no APPROVE or REJECT within {} iteration(s); last judge reasoning: {}",
                        context.max_iterations, v.reasoning
                    ),
                    None => format!(
                        "no terminal decision within {} iteration(s)",
                        context.max_iterations
                    ),
                });
                FileOutcome::exhausted(file, iterations, reason, history, duration)
            }
            _ => FileOutcome::cancelled(file, iterations, history, duration),
        };

        if self.policy.apply {
            self.apply(&mut outcome)?;
        }

        info!(
            file = %outcome.file().display(),
            outcome = outcome.label(),
            iterations = outcome.iterations(),
            "File finished"
        );
        self.logger.log(&LogEvent::FileFinished {
            file: outcome.file().to_path_buf(),
            outcome: outcome.label().to_string(),
            iterations: outcome.iterations(),
            reason: outcome.reason().map(str::to_string),
            duration_secs: outcome.total_duration_secs(),
        });

        Ok(outcome)
    }

    fn short_circuit(&self, context: &mut FileContext, result: &AuditResult) {
        info!(
            file = %context.file_path.display(),
            iteration = context.iteration,
            "Clean audit, skipping fixer and judge"
        );
        self.logger.log(&LogEvent::ShortCircuited {
            file: context.file_path.clone(),
            iteration: context.iteration,
        });
        context.push_record(IterationRecord {
            iteration_index: context.iteration,
            audit_result: result.clone(),
            fix_candidate: None,
            judge_decision: None,
            timestamp: Utc::now(),
        });
    }

    /// Map a failed step to the event that ends the file, or abort
    fn settle_failure(
        &self,
        context: &FileContext,
        error: StepError,
        failure: &mut Option<String>,
    ) -> Result<LoopEvent, RunError> {
        match error {
            StepError::Cancelled => Ok(LoopEvent::Cancel),
            StepError::Log(e) => Err(e.into()),
            StepError::Backend { .. } => {
                warn!(file = %context.file_path.display(), error = %error, "Backend gave up");
                *failure = Some(error.to_string());
                Ok(LoopEvent::BackendFailed)
            }
            StepError::Schema(e) => {
                *failure = Some(e.to_string());
                Ok(LoopEvent::SchemaFailed {
                    exhaust: self.policy.on_schema_error == SchemaFailure::Exhaust,
                })
            }
        }
    }

    async fn audit(&self, context: &FileContext) -> Result<AuditResult, StepError> {
        let prompt = RolePrompts::audit(&context.file_path, &context.current_source);
        let short_circuit_enabled = self.policy.short_circuit_clean;
        let result = self
            .step(
                context,
                Role::Auditor,
                prompt,
                |raw| validate_audit(raw, &context.file_path),
                |audit, details| {
                    details.insert("findings".into(), json!(audit.findings.len()));
                    details.insert(
                        "short_circuit".into(),
                        json!(short_circuit_enabled && audit.is_clean()),
                    );
                },
            )
            .await?;

        self.logger.log(&LogEvent::AuditCompleted {
            file: context.file_path.clone(),
            iteration: context.iteration,
            findings: result.findings.len(),
            summary: result.short_description(),
        });
        Ok(result)
    }

    async fn fix(
        &self,
        context: &FileContext,
        audit: &AuditResult,
    ) -> Result<FixCandidate, StepError> {
        let prompt = RolePrompts::fix(
            &context.file_path,
            &context.current_source,
            audit,
            context.last_feedback.as_deref(),
        );
        let candidate = self
            .step(
                context,
                Role::Fixer,
                prompt,
                |raw| validate_fix(raw, &context.file_path),
                |candidate, details| {
                    details.insert("lines".into(), json!(candidate.line_count()));
                },
            )
            .await?;

        self.logger.log(&LogEvent::FixCompleted {
            file: context.file_path.clone(),
            iteration: context.iteration,
            lines: candidate.line_count(),
        });
        Ok(candidate)
    }

    async fn judge(
        &self,
        context: &FileContext,
        candidate: &FixCandidate,
        tests: Option<&TestOutcome>,
    ) -> Result<JudgeDecision, StepError> {
        let prompt = RolePrompts::judge(
            &context.file_path,
            &context.original_source,
            candidate,
            tests,
        );
        let decision = self
            .step(
                context,
                Role::Judge,
                prompt,
                validate_judge,
                |decision, details| {
                    details.insert("decision".into(), json!(decision.decision.as_str()));
                    if let Some(outcome) = tests {
                        details.insert("test_exit_code".into(), json!(outcome.exit_code));
                    }
                },
            )
            .await?;

        self.logger.log(&LogEvent::JudgeCompleted {
            file: context.file_path.clone(),
            iteration: context.iteration,
            decision: decision.short_description(),
        });
        Ok(decision)
    }

    async fn probe(&self, candidate: &FixCandidate) -> Option<TestOutcome> {
        let probe = self.probe.as_ref()?;
        match probe.check(candidate).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(file = %candidate.file_path.display(), error = %e, "Test probe failed to run");
                None
            }
        }
    }

    /// The one call site every role goes through: invoke, validate, log.
    async fn step<T>(
        &self,
        context: &FileContext,
        role: Role,
        prompt: String,
        validate: impl FnOnce(&str) -> Result<T, SchemaError>,
        annotate: impl FnOnce(&T, &mut Map<String, Value>),
    ) -> Result<T, StepError> {
        if self.is_interrupted() {
            return Err(StepError::Cancelled);
        }

        debug!(file = %context.file_path.display(), role = %role, iteration = context.iteration, "Invoking role");
        let raw = self.invoke(context, role, &prompt).await?;

        // Late results are dropped so no half-finished step reaches the log
        if self.is_interrupted() {
            return Err(StepError::Cancelled);
        }

        let value = match validate(&raw) {
            Ok(value) => value,
            Err(e) => {
                self.record_schema_failure(context, role, &prompt, &e)?;
                return Err(e.into());
            }
        };

        let mut details = self.trace(context, role, prompt, raw);
        annotate(&value, &mut details);
        self.experiment.log(
            role.agent_name(),
            self.client.model_for(role),
            action_for(role),
            details,
            EntryStatus::Success,
        )?;
        Ok(value)
    }

    async fn invoke(
        &self,
        context: &FileContext,
        role: Role,
        prompt: &str,
    ) -> Result<String, StepError> {
        let retry = &self.policy.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.client.invoke(role, prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = retry.delay_for(attempt, e.retry_after());
                    warn!(
                        file = %context.file_path.display(),
                        role = %role,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "Backend call failed, retrying"
                    );
                    self.logger.log(&LogEvent::BackendRetry {
                        file: context.file_path.clone(),
                        role: role.agent_name().to_string(),
                        attempt,
                        delay_secs: delay.as_secs_f64(),
                        error: e.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                    if self.is_interrupted() {
                        return Err(StepError::Cancelled);
                    }
                    attempt += 1;
                }
                Err(source) => {
                    return Err(StepError::Backend {
                        role,
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    fn trace(
        &self,
        context: &FileContext,
        role: Role,
        prompt: String,
        response: String,
    ) -> Map<String, Value> {
        let mut details = Map::new();
        details.insert("input_prompt".into(), Value::String(prompt));
        details.insert("output_response".into(), Value::String(response));
        details.insert(
            "file_path".into(),
            json!(context.file_path.display().to_string()),
        );
        details.insert("iteration".into(), json!(context.iteration));
        details.insert("role".into(), json!(role.as_str()));
        details
    }

    /// Keep the rejected raw text in the log as a DEBUG record.
    /// It is never written as the step's analysis entry.
    fn record_schema_failure(
        &self,
        context: &FileContext,
        role: Role,
        prompt: &str,
        error: &SchemaError,
    ) -> Result<(), StepError> {
        warn!(
            file = %context.file_path.display(),
            role = %role,
            iteration = context.iteration,
            error = %error.violation,
            "Response rejected by schema"
        );
        self.logger.log(&LogEvent::SchemaRejected {
            file: context.file_path.clone(),
            iteration: context.iteration,
            role: role.agent_name().to_string(),
            error: error.violation.to_string(),
        });

        let mut details = Map::new();
        details.insert("input_prompt".into(), json!(prompt));
        details.insert("raw_response".into(), json!(error.raw));
        details.insert("error".into(), json!(error.violation.to_string()));
        details.insert(
            "file_path".into(),
            json!(context.file_path.display().to_string()),
        );
        details.insert("iteration".into(), json!(context.iteration));
        details.insert("role".into(), json!(role.as_str()));
        self.experiment.log(
            role.agent_name(),
            self.client.model_for(role),
            ActionType::Debug,
            details,
            EntryStatus::Failure,
        )?;
        Ok(())
    }

    /// Write an approved candidate back, inside the target root only
    fn apply(&self, outcome: &mut FileOutcome) -> Result<(), RunError> {
        let FileOutcome::Approved {
            candidate: Some(candidate),
            ..
        } = &*outcome
        else {
            return Ok(());
        };

        let root = match &self.root {
            Some(root) => root.clone(),
            None => candidate
                .file_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let backup = if self.policy.backup {
            replace_within(&root, &candidate.file_path, &candidate.source_text)?
        } else {
            write_within(&root, &candidate.file_path, &candidate.source_text)?;
            None
        };
        info!(
            file = %candidate.file_path.display(),
            backup = ?backup,
            "Applied approved candidate"
        );
        outcome.mark_applied(backup);
        Ok(())
    }
}
