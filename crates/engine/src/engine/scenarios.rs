//! End-to-end engine behaviour on the in-memory store.

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use super::executors::{
    shared_flows_from, ExecutionContext, ExecutorRegistry, StepExecutor, StepResult, StepValidation,
};
use super::machine::{ExecutionEvent, ExecutionStatus};
use super::orchestrator::ResumeOutcome;
use super::plan::{ActionSpec, Step, StepKind};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::rules::{ReentryPolicy, RuleDefinition, TriggerSpec};
use crate::store::{
    DelayKind, DelayStatus, ExecutionStore, HistoryEntry, PendingDelay, StateCommit, StepOutcome,
    StepPointer,
};
use crate::template::TemplateRenderer;
use crate::testing::{Harness, RecordingSender};

fn send(name: &str) -> serde_json::Value {
    json!({"action": {"name": name, "params": {"to": "{{ trigger.email }}"}}})
}

fn rule(policy: ReentryPolicy, flow: serde_json::Value) -> RuleDefinition {
    let mut trigger = TriggerSpec::new("signup");
    trigger.reentry = policy;
    RuleDefinition::rule("welcome", trigger, flow)
}

fn event(id: &str, user: &str) -> serde_json::Value {
    json!({"id": id, "user_id": user, "email": format!("{}@example.com", user), "package": "B"})
}

async fn pending_delay(h: &Harness, execution_id: Uuid) -> PendingDelay {
    let delays = h.store.delays_for_execution(execution_id).await.unwrap();
    delays
        .into_iter()
        .find(|d| d.status == DelayStatus::Pending)
        .expect("no pending delay")
}

async fn admit(h: &Harness, payload: serde_json::Value) -> Uuid {
    let outcome = h.engine.admit_trigger("signup", &payload).await.unwrap();
    assert!(outcome.success);
    outcome.execution_id.expect("not admitted")
}

#[tokio::test]
async fn test_resume_runs_exactly_the_next_segment() {
    let a = RecordingSender::new("a");
    let b = RecordingSender::new("b");
    let c = RecordingSender::new("c");
    let h = Harness::new(
        vec![rule(
            ReentryPolicy::Always,
            json!({"and": [send("a"), {"delay": {"days": 1}}, send("b"), {"delay": {"days": 2}}, send("c"), "end"]}),
        )],
        &[&a, &b, &c],
    );

    let id = admit(&h, event("e1", "u1")).await;
    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Delayed);
    assert_eq!(exec.current_step_id.as_deref(), Some("s003"));
    assert_eq!((a.calls().len(), b.calls().len()), (1, 0));

    let first = pending_delay(&h, id).await;
    assert_eq!(first.step_id, "s002");
    assert_eq!(first.resume_at, crate::testing::start_time() + Duration::days(1));

    h.clock.advance(Duration::days(1));
    let outcome = h.engine.resume_from_delay(first.delay_id).await.unwrap();
    assert_eq!(
        outcome,
        ResumeOutcome::Resumed {
            execution_id: id,
            status: ExecutionStatus::Delayed
        }
    );
    assert_eq!(b.calls().len(), 1);
    assert!(c.calls().is_empty());

    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.current_step_id.as_deref(), Some("s005"));
    let after_resume: Vec<&str> = exec.state.history[2..]
        .iter()
        .map(|e| e.step_id.as_str())
        .collect();
    assert_eq!(after_resume, vec!["s003", "s004"]);
    assert_eq!(exec.state.history[3].outcome, StepOutcome::Suspended);

    let first = h.store.get_delay(first.delay_id).await.unwrap().unwrap();
    assert_eq!(first.status, DelayStatus::Executed);

    let second = pending_delay(&h, id).await;
    h.clock.advance(Duration::days(2));
    assert_ok!(h.engine.resume_from_delay(second.delay_id).await);

    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert!(exec.completed_at.is_some());
    assert_eq!(exec.current_step_id, None);
    assert_eq!((a.calls().len(), b.calls().len(), c.calls().len()), (1, 1, 1));
}

#[tokio::test]
async fn test_resume_interrupted_mid_segment_finishes_the_segment() {
    let b = RecordingSender::new("b");
    let c = RecordingSender::new("c");
    let h = Harness::new(
        vec![rule(
            ReentryPolicy::Always,
            json!([{"delay": {"days": 1}}, send("b"), send("c"), "end"]),
        )],
        &[&b, &c],
    );
    let id = admit(&h, event("e1", "u1")).await;
    let delay = pending_delay(&h, id).await;
    assert_eq!(delay.resume_step_id.as_deref(), Some("s002"));

    // A worker claims the delay, resumes, runs s002 and dies before s003.
    h.clock.advance(Duration::days(1));
    let now = h.clock.now();
    assert!(h
        .store
        .claim_delay(delay.delay_id, now, now - Duration::minutes(5))
        .await
        .unwrap()
        .is_some());
    h.store
        .commit(
            id,
            &StateCommit::new(ExecutionEvent::Resume)
                .with_pointer(StepPointer::at("s002", Some(1)))
                .with_dynamic_steps(Vec::new()),
            now,
        )
        .await
        .unwrap();
    h.store
        .commit(
            id,
            &StateCommit::new(ExecutionEvent::Advance)
                .with_history(HistoryEntry::succeeded("s002", None, now))
                .with_pointer(StepPointer::at("s003", Some(2))),
            now,
        )
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(6));
    let outcome = h.engine.resume_from_delay(delay.delay_id).await.unwrap();
    assert_eq!(
        outcome,
        ResumeOutcome::Resumed {
            execution_id: id,
            status: ExecutionStatus::Completed
        }
    );
    assert!(b.calls().is_empty());
    assert_eq!(c.calls().len(), 1);

    let delay = h.store.get_delay(delay.delay_id).await.unwrap().unwrap();
    assert_eq!(delay.status, DelayStatus::Executed);
}

#[tokio::test]
async fn test_resume_after_execution_moved_on_is_reconciled() {
    let a = RecordingSender::new("a");
    let h = Harness::new(
        vec![rule(
            ReentryPolicy::Always,
            json!([{"delay": 60}, send("a"), {"delay": 60}, send("a")]),
        )],
        &[&a],
    );
    let id = admit(&h, event("e1", "u1")).await;
    let first = pending_delay(&h, id).await;

    // The resume ran to the next delay, but the first row was never closed.
    let now = h.clock.now();
    h.store
        .claim_delay(first.delay_id, now, now - Duration::minutes(5))
        .await
        .unwrap();
    h.store
        .commit(
            id,
            &StateCommit::new(ExecutionEvent::Resume)
                .with_pointer(StepPointer::at("s002", Some(1)))
                .with_dynamic_steps(Vec::new()),
            now,
        )
        .await
        .unwrap();
    h.store
        .commit(
            id,
            &StateCommit::new(ExecutionEvent::Advance)
                .with_history(HistoryEntry::succeeded("s002", None, now))
                .with_pointer(StepPointer::at("s003", Some(2))),
            now,
        )
        .await
        .unwrap();
    h.store
        .commit(
            id,
            &StateCommit::new(ExecutionEvent::Suspend)
                .with_history(HistoryEntry::suspended("s003", None, now))
                .with_pointer(StepPointer::at("s004", Some(3))),
            now,
        )
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(6));
    let outcome = h.engine.resume_from_delay(first.delay_id).await.unwrap();
    assert_eq!(outcome, ResumeOutcome::Reconciled { execution_id: id });
    assert!(a.calls().is_empty());
    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Delayed);
}

#[tokio::test]
async fn test_concurrent_admission_of_same_trigger_creates_one_execution() {
    let a = RecordingSender::new("a");
    let h = Harness::new(
        vec![rule(ReentryPolicy::Always, json!([send("a"), {"delay": 3600}, send("a")]))],
        &[&a],
    );
    let payload = event("e1", "u1");

    let (first, second) = tokio::join!(
        h.engine.admit_trigger("signup", &payload),
        h.engine.admit_trigger("signup", &payload)
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.execution_id.is_some()).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| o.duplicate_prevented).count(), 1);
    assert!(outcomes.iter().all(|o| o.success));

    let all = h.engine.list_executions(&Default::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(a.calls().len(), 1);
}

#[tokio::test]
async fn test_exclusive_branches_share_tail_once() {
    let senders: Vec<Arc<RecordingSender>> = ["x", "y", "z", "tail_1", "tail_2"]
        .iter()
        .map(|n| RecordingSender::new(n))
        .collect();
    let refs: Vec<&Arc<RecordingSender>> = senders.iter().collect();
    let when = |v: &str| json!({"compare": {"field": "package", "value": v}});
    let h = Harness::new(
        vec![rule(
            ReentryPolicy::Always,
            json!({"and": [
                {"if": [
                    {"when": when("A"), "then": send("x"), "label": "A"},
                    {"when": when("B"), "then": send("y"), "label": "B"},
                    {"when": when("C"), "then": send("z"), "label": "C"}
                ]},
                send("tail_1"),
                send("tail_2")
            ]}),
        )],
        &refs,
    );

    let id = admit(&h, event("e1", "u1")).await;

    let counts: Vec<usize> = senders.iter().map(|s| s.calls().len()).collect();
    assert_eq!(counts, vec![0, 1, 0, 1, 1]);
    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert!(exec.state.history[1..]
        .iter()
        .all(|e| exec.resolve_step(&e.step_id).unwrap().branch.as_deref() == Some("B")));
}

#[tokio::test]
async fn test_if_else_routes_to_matching_branch_only() {
    let x = RecordingSender::new("x");
    let y = RecordingSender::new("y");
    let z = RecordingSender::new("z");
    let h = Harness::new(
        vec![rule(
            ReentryPolicy::Always,
            json!({"if": [
                {"when": {"compare": {"field": "package", "value": "A"}}, "then": send("x")},
                {"when": {"compare": {"field": "package", "value": "B"}}, "then": send("y")},
                {"else": send("z")}
            ]}),
        )],
        &[&x, &y, &z],
    );

    admit(&h, event("e1", "u1")).await;

    assert!(x.calls().is_empty());
    assert_eq!(y.calls().len(), 1);
    assert!(z.calls().is_empty());
}

#[tokio::test]
async fn test_always_failing_step_retries_then_fails() {
    let a = RecordingSender::failing("a", u32::MAX);
    let config = EngineConfig {
        max_retries: 3,
        retry_backoff_secs: 60,
        ..EngineConfig::default()
    };
    let h = Harness::with_config(vec![rule(ReentryPolicy::Always, json!([send("a")]))], &[&a], config);

    let id = admit(&h, event("e1", "u1")).await;

    for attempt in 1..=3 {
        let exec = h.engine.get_execution_status(id).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Delayed);
        assert_eq!(exec.retry_count, attempt);

        let delay = pending_delay(&h, id).await;
        assert_eq!(delay.kind, DelayKind::Retry);
        assert_eq!(delay.step_id, format!("s001#retry{}", attempt));
        assert_eq!(delay.resume_step_id.as_deref(), Some("s001"));

        h.clock.set(delay.resume_at);
        assert_ok!(h.engine.resume_from_delay(delay.delay_id).await);
    }

    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.failed_at.is_some());
    assert!(exec.error.as_deref().unwrap_or("").contains("s001"));
    assert_eq!(a.calls().len(), 4);
    assert_eq!(
        exec.state
            .history
            .iter()
            .filter(|e| e.outcome == StepOutcome::Failed)
            .count(),
        4
    );

    let delays = h.store.delays_for_execution(id).await.unwrap();
    assert_eq!(delays.len(), 3);
    assert!(delays.iter().all(|d| d.status == DelayStatus::Executed));
}

#[tokio::test]
async fn test_retry_backoff_doubles() {
    let a = RecordingSender::failing("a", 2);
    let h = Harness::new(vec![rule(ReentryPolicy::Always, json!([send("a")]))], &[&a]);
    let id = admit(&h, event("e1", "u1")).await;

    let first = pending_delay(&h, id).await;
    assert_eq!(first.resume_at - h.clock.now(), Duration::seconds(60));
    h.clock.set(first.resume_at);
    h.engine.resume_from_delay(first.delay_id).await.unwrap();

    let second = pending_delay(&h, id).await;
    assert_eq!(second.resume_at - h.clock.now(), Duration::seconds(120));
    h.clock.set(second.resume_at);
    h.engine.resume_from_delay(second.delay_id).await.unwrap();

    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.retry_count, 0);
    assert_eq!(a.calls().len(), 3);
}

#[tokio::test]
async fn test_resuming_executed_delay_is_noop() {
    let a = RecordingSender::new("a");
    let h = Harness::new(
        vec![rule(ReentryPolicy::Always, json!([{"delay": 60}, send("a")]))],
        &[&a],
    );
    let id = admit(&h, event("e1", "u1")).await;
    let delay = pending_delay(&h, id).await;

    assert_ok!(h.engine.resume_from_delay(delay.delay_id).await);
    assert_eq!(a.calls().len(), 1);

    let again = h.engine.resume_from_delay(delay.delay_id).await.unwrap();
    assert_eq!(
        again,
        ResumeOutcome::AlreadyFinished {
            status: DelayStatus::Executed
        }
    );
    assert_eq!(a.calls().len(), 1);
}

#[tokio::test]
async fn test_unknown_delay_is_inconsistent() {
    let h = Harness::new(vec![rule(ReentryPolicy::Always, json!(["end"]))], &[]);
    let err = h.engine.resume_from_delay(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::SuspensionInconsistency(_)));
}

#[tokio::test]
async fn test_once_per_user_prevents_second_run() {
    let a = RecordingSender::new("a");
    let h = Harness::new(vec![rule(ReentryPolicy::OncePerUser, json!([send("a")]))], &[&a]);

    let id = admit(&h, event("e1", "u1")).await;
    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);

    let second = h
        .engine
        .admit_trigger("signup", &event("e2", "u1"))
        .await
        .unwrap();
    assert!(second.success);
    assert!(second.duplicate_prevented);
    assert!(second.execution_id.is_none());
    assert_eq!(a.calls().len(), 1);

    // A different user is admitted.
    admit(&h, event("e3", "u2")).await;
    assert_eq!(a.calls().len(), 2);
}

#[tokio::test]
async fn test_inline_branch_resumes_from_snapshot() {
    let senders: Vec<Arc<RecordingSender>> = ["intro", "x", "y", "z", "outro"]
        .iter()
        .map(|n| RecordingSender::new(n))
        .collect();
    let refs: Vec<&Arc<RecordingSender>> = senders.iter().collect();
    let h = Harness::new(
        vec![rule(
            ReentryPolicy::Always,
            json!({"and": [
                send("intro"),
                {"switch": {
                    "on": "package",
                    "cases": [
                        {"equals": "A", "then": send("x")},
                        {"equals": "B", "then": {"and": [send("y"), {"delay": {"hours": 2}}]}}
                    ],
                    "default": send("z")
                }},
                send("outro")
            ]}),
        )],
        &refs,
    );

    let id = admit(&h, event("e1", "u1")).await;
    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Delayed);
    assert_eq!(exec.current_step_id.as_deref(), Some("s002.2.3"));
    assert_eq!(exec.current_step_index, None);

    let delay = pending_delay(&h, id).await;
    assert_eq!(delay.snapshot_steps().len(), 4);
    h.clock.advance(Duration::hours(2));
    assert_ok!(h.engine.resume_from_delay(delay.delay_id).await);

    let counts: Vec<usize> = senders.iter().map(|s| s.calls().len()).collect();
    assert_eq!(counts, vec![1, 0, 1, 0, 1]);
    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_paused_execution_releases_delay() {
    let a = RecordingSender::new("a");
    let h = Harness::new(
        vec![rule(ReentryPolicy::Always, json!([{"delay": 60}, send("a")]))],
        &[&a],
    );
    let id = admit(&h, event("e1", "u1")).await;
    let delay = pending_delay(&h, id).await;

    let paused = h.engine.pause_execution(id).await.unwrap();
    assert_eq!(paused.status, ExecutionStatus::Paused);

    let outcome = h.engine.resume_from_delay(delay.delay_id).await.unwrap();
    assert_eq!(outcome, ResumeOutcome::Released { execution_id: id });
    let released = h.store.get_delay(delay.delay_id).await.unwrap().unwrap();
    assert_eq!(released.status, DelayStatus::Pending);
    assert!(a.calls().is_empty());

    let resumed = h.engine.resume_execution(id).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Delayed);

    assert_ok!(h.engine.resume_from_delay(delay.delay_id).await);
    assert_eq!(a.calls().len(), 1);
    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_cancel_fails_pending_delays() {
    let a = RecordingSender::new("a");
    let h = Harness::new(
        vec![rule(ReentryPolicy::Always, json!([{"delay": 60}, send("a")]))],
        &[&a],
    );
    let id = admit(&h, event("e1", "u1")).await;
    let delay = pending_delay(&h, id).await;

    let cancelled = h.engine.cancel_execution(id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert_eq!(cancelled.error.as_deref(), Some("execution cancelled"));

    let outcome = h.engine.resume_from_delay(delay.delay_id).await.unwrap();
    assert_eq!(
        outcome,
        ResumeOutcome::AlreadyFinished {
            status: DelayStatus::Failed
        }
    );
    assert!(a.calls().is_empty());

    let err = h.engine.stop_execution(id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_manual_start_of_pending_execution() {
    let a = RecordingSender::new("a");
    let h = Harness::new(vec![rule(ReentryPolicy::Always, json!([send("a")]))], &[&a]);
    let outcome = h
        .engine
        .admit_trigger("signup", &event("e1", "u1"))
        .await
        .unwrap();
    let id = outcome.execution_id.unwrap();

    // Already started by admission.
    assert_err!(h.engine.start_execution(id).await);
    assert_eq!(a.calls().len(), 1);
}

#[tokio::test]
async fn test_unknown_trigger_type_is_rejected() {
    let h = Harness::new(vec![rule(ReentryPolicy::Always, json!(["end"]))], &[]);
    let err = h
        .engine
        .admit_trigger("purchase", &event("e1", "u1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_err!(h.engine.enqueue_trigger("purchase", &json!({})).await);
}

struct PanickingExecutor;

#[async_trait]
impl StepExecutor for PanickingExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Action
    }

    async fn execute(&self, _step: &Step, _ctx: &ExecutionContext) -> AppResult<StepResult> {
        panic!("sender exploded")
    }

    fn validate(&self, _step: &Step) -> StepValidation {
        StepValidation::valid()
    }
}

#[tokio::test]
async fn test_panicking_executor_fails_the_step() {
    let rules = vec![rule(ReentryPolicy::Always, json!([send("a")]))];
    let mut executors = ExecutorRegistry::standard(
        Arc::new(drip_actions::ActionRegistry::new()),
        Arc::new(shared_flows_from(&rules)),
        Arc::new(TemplateRenderer::new()),
    );
    executors.register(PanickingExecutor);
    let config = EngineConfig {
        max_retries: 0,
        ..EngineConfig::default()
    };
    let h = Harness::with_executors(rules, executors, config);

    let id = admit(&h, event("e1", "u1")).await;

    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    let error = exec.state.history[0].error.clone().unwrap();
    assert!(error.contains("panicked"));
    assert!(error.contains("sender exploded"));
}

#[tokio::test]
async fn test_shared_flow_step_runs_flow_actions() {
    let notify = RecordingSender::new("notify");
    let rules = vec![
        rule(ReentryPolicy::Always, json!([{"flow": "ops"}])),
        RuleDefinition::shared_flow(
            "ops",
            vec![ActionSpec {
                name: "notify".into(),
                params: json!({"text": "{{ user_id }} signed up"}),
            }],
        ),
    ];
    let h = Harness::new(rules, &[&notify]);

    let id = admit(&h, event("e1", "u7")).await;

    assert_eq!(notify.calls()[0].params["text"], "u7 signed up");
    let exec = h.engine.get_execution_status(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
}
