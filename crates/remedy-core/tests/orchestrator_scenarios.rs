use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use remedy_agent::{BackendConfig, BackendError, ConfigError, Role, RoleClient};
use remedy_core::{
    reconstruct, BatchRunner, FileContext, FileOutcome, LoopPolicy, Orchestrator, RetryPolicy,
    SchemaFailure, TestProbe,
};
use remedy_logging::{
    check_log, read_log, ActionType, EntryStatus, ExperimentLogger, JsonlSink, LogFormat, LogSink, Logger,
    MemorySink,
};
use remedy_schema::{Decision, FixCandidate, TestOutcome};
use tempfile::TempDir;

const SOURCE: &str = "def mean(xs):\n    return sum(xs) / len(xs)\n";
const CLEAN: &str = r#"{"findings":[]}"#;
const CRITICAL: &str = r#"{"findings":[{"severity":"CRITICAL","description":"division by zero on empty input","location":"line 2"}]}"#;
const FIX_1: &str = "Here you go:\n```python\ndef mean(xs):\n    return sum(xs) / len(xs) if xs else 0.0\n```";
const FIX_2: &str = "```python\ndef mean(xs):\n    if not xs:\n        return 0.0\n    return sum(xs) / len(xs)\n```";
const APPROVE: &str = r#"{"decision":"APPROVE","reasoning":"guard added","tests_passed":["empty list"],"tests_failed":[],"next_steps":""}"#;
const RETRY: &str = r#"{"decision":"RETRY","reasoning":"still unsafe","tests_passed":[],"tests_failed":["empty list"],"next_steps":"handle the empty case explicitly"}"#;
const REJECT: &str = r#"{"decision":"REJECT","reasoning":"changes behaviour for callers","tests_passed":[],"tests_failed":["api"],"next_steps":""}"#;

type Reply = Result<String, BackendError>;
type Hook = Box<dyn Fn(Role) + Send + Sync>;

/// Role client that plays back canned replies per role and records every prompt
#[derive(Default)]
struct ScriptedClient {
    replies: Mutex<HashMap<Role, VecDeque<Reply>>>,
    fallback: Mutex<HashMap<Role, String>>,
    prompts: Mutex<Vec<(Role, String)>>,
    on_call: Option<Hook>,
}

impl ScriptedClient {
    fn new() -> Self {
        Self::default()
    }

    fn reply(self, role: Role, text: &str) -> Self {
        self.push(role, Ok(text.to_string()))
    }

    fn fail(self, role: Role, error: BackendError) -> Self {
        self.push(role, Err(error))
    }

    /// Reply used once the scripted queue for `role` is empty
    fn always(self, role: Role, text: &str) -> Self {
        self.fallback.lock().unwrap().insert(role, text.to_string());
        self
    }

    fn on_call(mut self, hook: impl Fn(Role) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Box::new(hook));
        self
    }

    fn push(self, role: Role, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(reply);
        self
    }

    fn calls(&self, role: Role) -> usize {
        self.prompts(role).len()
    }

    fn prompts(&self, role: Role) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl RoleClient for ScriptedClient {
    async fn invoke(&self, role: Role, prompt: &str) -> Result<String, BackendError> {
        self.prompts
            .lock()
            .unwrap()
            .push((role, prompt.to_string()));
        if let Some(hook) = &self.on_call {
            hook(role);
        }
        let scripted = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&role)
            .and_then(|q| q.pop_front());
        match scripted {
            Some(reply) => reply,
            None => self
                .fallback
                .lock()
                .unwrap()
                .get(&role)
                .cloned()
                .ok_or_else(|| BackendError::MalformedResponse(format!("no reply scripted for {}", role))),
        }
    }

    fn model_for(&self, _role: Role) -> &str {
        "test/model"
    }
}

fn fast_policy() -> LoopPolicy {
    LoopPolicy {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..LoopPolicy::default()
    }
}

fn orchestrator(
    client: &Arc<ScriptedClient>,
    sink: Arc<dyn LogSink>,
    policy: LoopPolicy,
) -> Orchestrator {
    Orchestrator::new(
        client.clone(),
        Arc::new(ExperimentLogger::with_run_id(sink, "test-run")),
        Arc::new(Logger::new(LogFormat::Compact)),
        policy,
    )
}

fn context(policy: &LoopPolicy) -> FileContext {
    FileContext::new(
        PathBuf::from("pkg/stats.py"),
        SOURCE.to_string(),
        policy.max_iterations,
    )
}

fn actions(sink: &MemorySink) -> Vec<ActionType> {
    sink.entries().iter().map(|e| e.action).collect()
}

// ============================================================
// Scenarios
// ============================================================

#[tokio::test]
async fn test_clean_audit_short_circuits_to_approved() {
    let client = Arc::new(ScriptedClient::new().reply(Role::Auditor, CLEAN));
    let sink = Arc::new(MemorySink::new());
    let policy = fast_policy();

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        FileOutcome::Approved {
            short_circuited: true,
            iterations: 1,
            ..
        }
    ));
    assert_eq!(client.calls(Role::Fixer), 0);
    assert_eq!(client.calls(Role::Judge), 0);

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, ActionType::Analysis);
    assert_eq!(entries[0].details["short_circuit"], true);
    assert_eq!(outcome.history().len(), 1);
    assert!(outcome.history()[0].fix_candidate.is_none());
}

#[tokio::test]
async fn test_single_pass_approval_logs_three_entries() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply(Role::Auditor, CRITICAL)
            .reply(Role::Fixer, FIX_1)
            .reply(Role::Judge, APPROVE),
    );
    let sink = Arc::new(MemorySink::new());
    let policy = fast_policy();

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    assert!(outcome.is_approved());
    assert_eq!(outcome.iterations(), 1);
    assert_eq!(
        outcome.candidate().unwrap().source_text,
        "def mean(xs):\n    return sum(xs) / len(xs) if xs else 0.0\n"
    );
    assert_eq!(
        actions(&sink),
        vec![ActionType::Analysis, ActionType::Fix, ActionType::Judgment]
    );

    let entries = sink.entries();
    for entry in &entries {
        assert_eq!(entry.status, EntryStatus::Success);
        assert_eq!(entry.model_used, "test/model");
        assert_eq!(entry.detail_str("file_path"), Some("pkg/stats.py"));
        assert!(entry.detail_str("input_prompt").is_some());
    }
    assert_eq!(entries[0].agent_name, "Auditor");
    assert_eq!(entries[2].detail_str("output_response"), Some(APPROVE));
    assert_eq!(entries[2].detail_str("decision"), Some("APPROVE"));

    // Judge compares against the original, fixer sees the audit
    assert!(client.prompts(Role::Judge)[0].contains("return sum(xs) / len(xs)\n"));
    assert!(client.prompts(Role::Fixer)[0].contains("[CRITICAL] division by zero"));
}

#[tokio::test]
async fn test_retry_twice_then_reject() {
    let client = Arc::new(
        ScriptedClient::new()
            .always(Role::Auditor, CRITICAL)
            .reply(Role::Fixer, FIX_1)
            .reply(Role::Fixer, FIX_2)
            .reply(Role::Fixer, FIX_1)
            .reply(Role::Judge, RETRY)
            .reply(Role::Judge, RETRY)
            .reply(Role::Judge, REJECT),
    );
    let sink = Arc::new(MemorySink::new());
    let policy = fast_policy();

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    assert_eq!(outcome.label(), "REJECTED");
    assert_eq!(outcome.iterations(), 3);
    assert_eq!(outcome.reason(), Some("changes behaviour for callers"));
    // Kept for audit, never applied
    assert!(outcome.candidate().is_some());

    let entries = sink.entries();
    assert_eq!(entries.len(), 9);
    let iterations: Vec<u64> = entries
        .iter()
        .map(|e| e.detail_u64("iteration").unwrap())
        .collect();
    assert_eq!(iterations, vec![1, 1, 1, 2, 2, 2, 3, 3, 3]);

    let history = outcome.history();
    assert_eq!(history.len(), 3);
    for (idx, record) in history.iter().enumerate() {
        assert_eq!(record.iteration_index, idx + 1);
    }
    assert_eq!(
        history[2].judge_decision.as_ref().unwrap().decision,
        Decision::Reject
    );

    // Each retry audits the previous candidate and hands the judge's notes to the fixer
    let audits = client.prompts(Role::Auditor);
    assert!(audits[1].contains("return sum(xs) / len(xs) if xs else 0.0"));
    assert!(audits[2].contains("if not xs:"));
    assert!(client.prompts(Role::Fixer)[1].contains("handle the empty case explicitly"));
}

#[tokio::test]
async fn test_fixer_without_code_block_is_schema_failure() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply(Role::Auditor, CRITICAL)
            .reply(Role::Fixer, "I would add a guard for the empty list."),
    );
    let sink = Arc::new(MemorySink::new());
    let policy = fast_policy();

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    assert_eq!(outcome.label(), "REJECTED");
    assert!(outcome.reason().unwrap().contains("fixer response rejected"));
    assert_eq!(client.calls(Role::Judge), 0);

    // No FIX entry; the raw text survives only as a DEBUG record
    let entries = sink.entries();
    assert_eq!(actions(&sink), vec![ActionType::Analysis, ActionType::Debug]);
    assert_eq!(entries[1].status, EntryStatus::Failure);
    assert_eq!(
        entries[1].detail_str("raw_response"),
        Some("I would add a guard for the empty list.")
    );
    assert!(entries[1].detail_str("output_response").is_none());
}

#[tokio::test]
async fn test_schema_failure_can_exhaust() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply(Role::Auditor, CRITICAL)
            .reply(Role::Fixer, FIX_1)
            .reply(Role::Judge, r#"{"decision":"MAYBE","reasoning":"","tests_passed":[],"tests_failed":[],"next_steps":""}"#),
    );
    let sink = Arc::new(MemorySink::new());
    let policy = LoopPolicy {
        on_schema_error: SchemaFailure::Exhaust,
        ..fast_policy()
    };

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    assert_eq!(outcome.label(), "EXHAUSTED");
    assert_eq!(
        actions(&sink),
        vec![ActionType::Analysis, ActionType::Fix, ActionType::Debug]
    );
}

#[test]
fn test_missing_credential_fails_before_any_call() {
    let sink = Arc::new(MemorySink::new());
    let _logger = ExperimentLogger::new(sink.clone());

    let err = BackendConfig::from_env("REMEDY_TEST_KEY_THAT_IS_NEVER_SET").unwrap_err();

    assert!(matches!(err, ConfigError::MissingCredential(ref var) if var == "REMEDY_TEST_KEY_THAT_IS_NEVER_SET"));
    assert!(sink.is_empty());
}

// ============================================================
// Properties
// ============================================================

#[tokio::test]
async fn test_retry_at_bound_exhausts() {
    let client = Arc::new(
        ScriptedClient::new()
            .always(Role::Auditor, CRITICAL)
            .always(Role::Fixer, FIX_1)
            .always(Role::Judge, RETRY),
    );
    let sink = Arc::new(MemorySink::new());
    let policy = LoopPolicy {
        max_iterations: 2,
        ..fast_policy()
    };

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    assert_eq!(outcome.label(), "EXHAUSTED");
    assert_eq!(outcome.iterations(), 2);
    assert!(outcome.reason().unwrap().contains("still unsafe"));
    assert_eq!(client.calls(Role::Auditor), 2);
    assert_eq!(client.calls(Role::Judge), 2);
    assert_eq!(sink.len(), 6);
    assert!(sink
        .entries()
        .iter()
        .all(|e| e.detail_u64("iteration").unwrap() <= 2));
}

#[tokio::test]
async fn test_short_circuit_can_be_disabled() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply(Role::Auditor, CLEAN)
            .reply(Role::Fixer, FIX_1)
            .reply(Role::Judge, APPROVE),
    );
    let sink = Arc::new(MemorySink::new());
    let policy = LoopPolicy {
        short_circuit_clean: false,
        ..fast_policy()
    };

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        FileOutcome::Approved {
            short_circuited: false,
            ..
        }
    ));
    assert_eq!(client.calls(Role::Fixer), 1);
    assert_eq!(sink.entries()[0].details["short_circuit"], false);
}

#[tokio::test]
async fn test_transient_backend_errors_are_retried() {
    let client = Arc::new(
        ScriptedClient::new()
            .fail(
                Role::Auditor,
                BackendError::Status {
                    status: 503,
                    message: "overloaded".into(),
                },
            )
            .fail(Role::Auditor, BackendError::RateLimited { retry_after: None })
            .reply(Role::Auditor, CLEAN),
    );
    let sink = Arc::new(MemorySink::new());
    let policy = fast_policy();

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    assert!(outcome.is_approved());
    assert_eq!(client.calls(Role::Auditor), 3);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn test_backend_failure_after_retries_exhausts() {
    let client = Arc::new(ScriptedClient::new().always(Role::Auditor, CLEAN));
    for _ in 0..3 {
        client
            .replies
            .lock()
            .unwrap()
            .entry(Role::Auditor)
            .or_default()
            .push_back(Err(BackendError::Network("connection reset".into())));
    }
    let sink = Arc::new(MemorySink::new());
    let policy = fast_policy();

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    assert_eq!(outcome.label(), "EXHAUSTED");
    assert!(outcome.reason().unwrap().contains("3 attempt(s)"));
    assert_eq!(client.calls(Role::Auditor), 3);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_non_retryable_backend_error_is_not_retried() {
    let client = Arc::new(ScriptedClient::new().fail(
        Role::Auditor,
        BackendError::Status {
            status: 401,
            message: "bad key".into(),
        },
    ));
    let sink = Arc::new(MemorySink::new());
    let policy = fast_policy();

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    assert_eq!(outcome.label(), "EXHAUSTED");
    assert!(outcome.reason().unwrap().contains("401"));
    assert_eq!(client.calls(Role::Auditor), 1);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let client = Arc::new(ScriptedClient::new().always(Role::Auditor, CLEAN));
    let sink = Arc::new(MemorySink::new());
    let policy = fast_policy();
    let orchestrator = orchestrator(&client, sink.clone(), policy.clone());
    orchestrator.interrupt_handle().store(true, Ordering::SeqCst);

    let outcome = orchestrator.run(context(&policy)).await.unwrap();

    assert_eq!(outcome.label(), "CANCELLED");
    assert_eq!(outcome.exit_code(), 130);
    assert_eq!(client.calls(Role::Auditor), 0);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_result_arriving_after_cancel_is_discarded() {
    let flag = Arc::new(AtomicBool::new(false));
    let hook_flag = flag.clone();
    let client = Arc::new(
        ScriptedClient::new()
            .reply(Role::Auditor, CRITICAL)
            .reply(Role::Fixer, FIX_1)
            .on_call(move |role| {
                if role == Role::Fixer {
                    hook_flag.store(true, Ordering::SeqCst);
                }
            }),
    );
    let sink = Arc::new(MemorySink::new());
    let policy = fast_policy();

    let outcome = orchestrator(&client, sink.clone(), policy.clone())
        .with_interrupt(flag)
        .run(context(&policy))
        .await
        .unwrap();

    assert_eq!(outcome.label(), "CANCELLED");
    assert_eq!(actions(&sink), vec![ActionType::Analysis]);
}

struct FailingProbe;

#[async_trait]
impl TestProbe for FailingProbe {
    async fn check(&self, _candidate: &FixCandidate) -> std::io::Result<TestOutcome> {
        Ok(TestOutcome {
            command: "pytest -q".to_string(),
            exit_code: 1,
            stdout: "1 failed".to_string(),
            stderr: String::new(),
        })
    }
}

#[tokio::test]
async fn test_probe_outcome_reaches_judge() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply(Role::Auditor, CRITICAL)
            .reply(Role::Fixer, FIX_1)
            .reply(Role::Judge, REJECT),
    );
    let sink = Arc::new(MemorySink::new());
    let policy = fast_policy();

    orchestrator(&client, sink.clone(), policy.clone())
        .with_probe(Arc::new(FailingProbe))
        .run(context(&policy))
        .await
        .unwrap();

    let judge_prompt = &client.prompts(Role::Judge)[0];
    assert!(judge_prompt.contains("Command: pytest -q"));
    assert!(judge_prompt.contains("Exit code: 1 (failed)"));
    assert_eq!(sink.entries()[2].details["test_exit_code"], 1);
}

// ============================================================
// Files on disk
// ============================================================

fn write_source(root: &Path, rel: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, SOURCE).unwrap();
    path
}

#[tokio::test]
async fn test_apply_writes_only_approved_candidates() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let approved = write_source(&root, "approved.py");
    let rejected = write_source(&root, "rejected.py");
    let policy = LoopPolicy {
        apply: true,
        ..fast_policy()
    };

    let client = Arc::new(
        ScriptedClient::new()
            .reply(Role::Auditor, CRITICAL)
            .reply(Role::Fixer, FIX_1)
            .reply(Role::Judge, APPROVE),
    );
    let outcome = orchestrator(&client, Arc::new(MemorySink::new()), policy.clone())
        .with_root(root.clone())
        .run_file(&approved)
        .await
        .unwrap();
    assert!(matches!(outcome, FileOutcome::Approved { applied: true, .. }));
    assert_eq!(
        fs::read_to_string(&approved).unwrap(),
        "def mean(xs):\n    return sum(xs) / len(xs) if xs else 0.0\n"
    );
    let backup = outcome.backup().unwrap();
    assert_eq!(backup, root.join("approved.py.backup"));
    assert_eq!(fs::read_to_string(backup).unwrap(), SOURCE);

    let client = Arc::new(
        ScriptedClient::new()
            .reply(Role::Auditor, CRITICAL)
            .reply(Role::Fixer, FIX_1)
            .reply(Role::Judge, REJECT),
    );
    orchestrator(&client, Arc::new(MemorySink::new()), policy)
        .with_root(root.clone())
        .run_file(&rejected)
        .await
        .unwrap();
    assert_eq!(fs::read_to_string(&rejected).unwrap(), SOURCE);
    assert!(!root.join("rejected.py.backup").exists());
}

#[tokio::test]
async fn test_apply_without_backup() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let file = write_source(&root, "stats.py");
    let policy = LoopPolicy {
        apply: true,
        backup: false,
        ..fast_policy()
    };
    let client = Arc::new(
        ScriptedClient::new()
            .reply(Role::Auditor, CRITICAL)
            .reply(Role::Fixer, FIX_2)
            .reply(Role::Judge, APPROVE),
    );

    let outcome = orchestrator(&client, Arc::new(MemorySink::new()), policy)
        .with_root(root.clone())
        .run_file(&file)
        .await
        .unwrap();

    assert!(matches!(outcome, FileOutcome::Approved { applied: true, .. }));
    assert!(outcome.backup().is_none());
    assert!(!root.join("stats.py.backup").exists());
    assert!(fs::read_to_string(&file).unwrap().ends_with("return sum(xs) / len(xs)\n"));
}

#[tokio::test]
async fn test_clean_reaudit_approves_last_candidate() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let file = write_source(&root, "stats.py");
    let client = Arc::new(
        ScriptedClient::new()
            .reply(Role::Auditor, CRITICAL)
            .reply(Role::Auditor, CLEAN)
            .reply(Role::Fixer, FIX_2)
            .reply(Role::Judge, RETRY),
    );
    let sink = Arc::new(MemorySink::new());
    let policy = LoopPolicy {
        apply: true,
        ..fast_policy()
    };

    let outcome = orchestrator(&client, sink.clone(), policy)
        .with_root(root.clone())
        .run_file(&file)
        .await
        .unwrap();

    let FileOutcome::Approved {
        ref summary,
        short_circuited,
        applied,
        iterations,
        ..
    } = outcome
    else {
        panic!("expected APPROVED, got {}", outcome.label());
    };
    assert!(!short_circuited);
    assert!(applied);
    assert_eq!(iterations, 2);
    assert_eq!(summary, "no findings");
    assert!(!summary.contains("still unsafe"));

    let expected = "def mean(xs):\n    if not xs:\n        return 0.0\n    return sum(xs) / len(xs)\n";
    assert_eq!(outcome.candidate().unwrap().source_text, expected);
    assert_eq!(fs::read_to_string(&file).unwrap(), expected);

    let history = outcome.history();
    assert_eq!(history.len(), 2);
    assert!(history[0].fix_candidate.is_some());
    assert!(history[1].fix_candidate.is_none());
    assert!(history[1].audit_result.is_clean());
    assert_eq!(
        actions(&sink),
        vec![
            ActionType::Analysis,
            ActionType::Fix,
            ActionType::Judgment,
            ActionType::Analysis
        ]
    );
    assert_eq!(client.calls(Role::Judge), 1);
}

#[tokio::test]
async fn test_missing_file_aborts() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(ScriptedClient::new());
    let policy = fast_policy();

    let result = orchestrator(&client, Arc::new(MemorySink::new()), policy)
        .run_file(&dir.path().join("gone.py"))
        .await;

    assert!(matches!(result, Err(remedy_core::RunError::Read { .. })));
    assert_eq!(client.calls(Role::Auditor), 0);
}

#[tokio::test]
async fn test_batch_keeps_discovery_order_and_brackets_run() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = ["a.py", "b.py", "c.py", "d.py"]
        .iter()
        .map(|f| write_source(dir.path(), f))
        .collect();
    let client = Arc::new(ScriptedClient::new().always(Role::Auditor, CLEAN));
    let sink = Arc::new(MemorySink::new());
    let runner = BatchRunner::new(
        Arc::new(orchestrator(&client, sink.clone(), fast_policy())),
        2,
    );

    let report = runner.run_logged(dir.path(), files.clone()).await.unwrap();

    let reported: Vec<PathBuf> = report.reports.iter().map(|r| r.file.clone()).collect();
    assert_eq!(reported, files);
    assert!(report.all_approved());
    assert_eq!(report.exit_code(), 0);

    let entries = sink.entries();
    assert_eq!(entries.len(), 6);
    assert_eq!(entries.first().unwrap().action, ActionType::Run);
    assert_eq!(entries.last().unwrap().action, ActionType::Run);
    assert_eq!(entries.last().unwrap().details["counts"]["APPROVED"], 4);
    assert_eq!(entries.last().unwrap().details["files"][3]["status"], "APPROVED");
}

#[tokio::test]
async fn test_checked_log_reports_each_file_outcome() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("run.jsonl");
    let clean = write_source(dir.path(), "clean.py");
    let broken = write_source(dir.path(), "broken.py");
    let client = Arc::new(
        ScriptedClient::new()
            .always(Role::Auditor, CRITICAL)
            .always(Role::Fixer, FIX_1)
            .always(Role::Judge, REJECT),
    );
    let runner = BatchRunner::new(
        Arc::new(orchestrator(
            &client,
            Arc::new(JsonlSink::open(&log_path).unwrap()),
            fast_policy(),
        )),
        1,
    );

    let report = runner
        .run_logged(dir.path(), vec![broken.clone(), clean.clone()])
        .await
        .unwrap();
    assert_eq!(report.exit_code(), 1);

    let checked = check_log(&log_path).unwrap();
    assert!(checked.is_valid());
    for file in [&broken, &clean] {
        let summary = &checked.files[&file.display().to_string()];
        assert_eq!(summary.outcome.as_deref(), Some("REJECTED"));
        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.last_decision.as_deref(), Some("REJECT"));
    }
    assert_eq!(checked.by_action.get("RUN"), Some(&2));
}

#[tokio::test]
async fn test_log_replays_to_same_history() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("run.jsonl");
    let client = Arc::new(
        ScriptedClient::new()
            .always(Role::Auditor, CRITICAL)
            .reply(Role::Fixer, FIX_1)
            .reply(Role::Fixer, FIX_2)
            .reply(Role::Judge, RETRY)
            .reply(Role::Judge, APPROVE),
    );
    let sink = Arc::new(JsonlSink::open(&log_path).unwrap());
    let policy = fast_policy();

    let outcome = orchestrator(&client, sink, policy.clone())
        .run(context(&policy))
        .await
        .unwrap();

    let entries = read_log(&log_path).unwrap();
    let replayed = reconstruct(&entries, Path::new("pkg/stats.py"), Some("test-run")).unwrap();

    assert_eq!(replayed.len(), outcome.history().len());
    for (live, replay) in outcome.history().iter().zip(&replayed) {
        assert_eq!(live.iteration_index, replay.iteration_index);
        assert_eq!(live.audit_result, replay.audit_result);
        assert_eq!(live.fix_candidate, replay.fix_candidate);
        assert_eq!(live.judge_decision, replay.judge_decision);
    }
}
