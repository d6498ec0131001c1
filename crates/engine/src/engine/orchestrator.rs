//! Workflow engine.
//!
//! Drives executions through their plans one step at a time:
//! - Admits triggers and starts the resulting executions
//! - Runs steps through the executor registry and commits after each one
//! - Suspends on delays and retry backoff, resumes exactly the next step
//! - Applies operator controls (stop, pause, resume, cancel)

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executors::{ExecutionContext, ExecutorRegistry, StepResult};
use super::machine::{ExecutionEvent, ExecutionStatus};
use super::plan::{next_in, Step};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::result_ext::OptionResultExt;
use crate::rules::RuleSource;
use crate::store::{
    DelayDraft, DelayKind, DelayStatus, ExecutionFilter, ExecutionStore, HistoryEntry,
    PendingDelay, StateCommit, StepPointer, TriggerEvent, WorkflowExecution,
};
use crate::triggers::{AdmissionController, AdmissionOutcome, TriggerRegistry};

/// What `resume_from_delay` did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResumeOutcome {
    /// The resume step ran; `status` is where the execution stopped.
    Resumed {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
    /// The delay was already executed or failed.
    AlreadyFinished { status: DelayStatus },
    /// Another worker holds the claim.
    NotClaimed,
    /// The execution is paused; the delay goes back to pending.
    Released { execution_id: Uuid },
    /// The execution ended without this delay; the delay is marked failed.
    Discarded {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
    /// A previous attempt already ran the resume step and the execution has
    /// moved on (suspended again or finished).
    Reconciled { execution_id: Uuid },
}

pub struct WorkflowEngine {
    store: Arc<dyn ExecutionStore>,
    executors: Arc<ExecutorRegistry>,
    admission: AdmissionController,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        executors: Arc<ExecutorRegistry>,
        triggers: TriggerRegistry,
        rules: Arc<dyn RuleSource>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let admission = AdmissionController::new(
            triggers,
            rules,
            executors.clone(),
            store.clone(),
            clock.clone(),
        );
        Self {
            store,
            executors,
            admission,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn trigger_types(&self) -> Vec<&str> {
        self.admission.triggers().list()
    }

    /// Admit a trigger and, if a new execution was created, start it.
    ///
    /// Store errors while starting are returned so the caller can retry; the
    /// execution stays pending and [`start_stale_pending`] picks it up. Any
    /// other start failure is logged and the admission stands.
    ///
    /// [`start_stale_pending`]: Self::start_stale_pending
    pub async fn admit_trigger(
        &self,
        trigger_type: &str,
        payload: &serde_json::Value,
    ) -> AppResult<AdmissionOutcome> {
        let outcome = self.admission.process(trigger_type, payload).await?;

        if let Some(execution_id) = outcome.execution_id {
            match self.start_execution(execution_id).await {
                Ok(_) => {}
                Err(e @ AppError::Database(_)) => {
                    warn!(
                        execution_id = %execution_id,
                        error = %e,
                        "Admitted execution could not be started"
                    );
                    return Err(e);
                }
                Err(e) => error!(
                    execution_id = %execution_id,
                    error = %e,
                    "Admitted execution failed to start"
                ),
            }
        }
        Ok(outcome)
    }

    /// Start executions left pending for longer than the claim timeout.
    ///
    /// Returns the ids that were started. An execution someone else started
    /// in the meantime is skipped; one that fails to start is logged and
    /// left for the next sweep.
    pub async fn start_stale_pending(&self, limit: i64) -> AppResult<Vec<Uuid>> {
        let filter = ExecutionFilter {
            status: Some(ExecutionStatus::Pending),
            created_before: Some(self.clock.now() - self.config.delay_claim_timeout()),
            limit: Some(limit),
            ..Default::default()
        };

        let mut started = Vec::new();
        for execution in self.store.list_executions(&filter).await? {
            let execution_id = execution.execution_id;
            match self.start_execution(execution_id).await {
                Ok(_) => started.push(execution_id),
                Err(AppError::InvalidTransition { .. }) => {
                    debug!(execution_id = %execution_id, "Pending execution started elsewhere");
                }
                Err(e) => warn!(
                    execution_id = %execution_id,
                    error = %e,
                    "Pending execution could not be started"
                ),
            }
        }
        if !started.is_empty() {
            info!(count = started.len(), "Started stale pending executions");
        }
        Ok(started)
    }

    /// Queue a raw trigger for the poller.
    pub async fn enqueue_trigger(
        &self,
        trigger_type: &str,
        payload: &serde_json::Value,
    ) -> AppResult<TriggerEvent> {
        if !self.admission.triggers().has(trigger_type) {
            return Err(AppError::Validation(format!(
                "unknown trigger type '{}'",
                trigger_type
            )));
        }
        self.store
            .enqueue_trigger(trigger_type, payload, self.clock.now())
            .await
    }

    /// pending → running, then drive.
    pub async fn start_execution(&self, execution_id: Uuid) -> AppResult<WorkflowExecution> {
        let execution = self
            .commit(execution_id, StateCommit::new(ExecutionEvent::Start))
            .await?;
        info!(
            execution_id = %execution_id,
            workflow_id = %execution.workflow_id,
            "Execution started"
        );
        self.drive(execution).await
    }

    pub async fn stop_execution(&self, execution_id: Uuid) -> AppResult<WorkflowExecution> {
        self.cancel_with(execution_id, "stopped").await
    }

    pub async fn cancel_execution(&self, execution_id: Uuid) -> AppResult<WorkflowExecution> {
        self.cancel_with(execution_id, "cancelled").await
    }

    /// Pausing keeps pending delays; a delay that comes due while paused is
    /// left pending.
    pub async fn pause_execution(&self, execution_id: Uuid) -> AppResult<WorkflowExecution> {
        let execution = self
            .commit(execution_id, StateCommit::new(ExecutionEvent::Pause))
            .await?;
        info!(execution_id = %execution_id, "Execution paused");
        Ok(execution)
    }

    /// paused → previous status. Drives when that status is running.
    pub async fn resume_execution(&self, execution_id: Uuid) -> AppResult<WorkflowExecution> {
        let execution = self
            .commit(execution_id, StateCommit::new(ExecutionEvent::Unpause))
            .await?;
        info!(
            execution_id = %execution_id,
            status = %execution.status,
            "Execution resumed"
        );
        self.drive(execution).await
    }

    pub async fn get_execution_status(&self, execution_id: Uuid) -> AppResult<WorkflowExecution> {
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("execution {}", execution_id)))
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> AppResult<Vec<WorkflowExecution>> {
        self.store.list_executions(filter).await
    }

    /// Resume the execution suspended on `delay_id`.
    pub async fn resume_from_delay(&self, delay_id: Uuid) -> AppResult<ResumeOutcome> {
        let delay = self.store.get_delay(delay_id).await?.ok_or_else(|| {
            AppError::SuspensionInconsistency(format!("delay {} does not exist", delay_id))
        })?;
        if delay.status.is_finished() {
            return Ok(ResumeOutcome::AlreadyFinished {
                status: delay.status,
            });
        }

        let now = self.clock.now();
        let stale_before = now - self.config.delay_claim_timeout();
        let Some(delay) = self.store.claim_delay(delay_id, now, stale_before).await? else {
            debug!(delay_id = %delay_id, "Delay claimed elsewhere");
            return Ok(ResumeOutcome::NotClaimed);
        };

        let Some(execution) = self
            .store
            .get_execution(delay.execution_id)
            .await?
            .log_none(format!("execution for delay {}", delay.delay_id))
        else {
            let message = format!("execution {} does not exist", delay.execution_id);
            self.finish_delay(&delay, DelayStatus::Failed, Some(message.clone()))
                .await?;
            return Err(AppError::SuspensionInconsistency(message));
        };
        let execution_id = execution.execution_id;
        let already_ran = delay
            .resume_step_id
            .as_deref()
            .is_some_and(|step| execution.ran_after(step, delay.history_len()));

        if execution.status.is_terminal() {
            if already_ran {
                self.finish_delay(&delay, DelayStatus::Executed, None).await?;
                return Ok(ResumeOutcome::Reconciled { execution_id });
            }
            self.finish_delay(
                &delay,
                DelayStatus::Failed,
                Some(format!("execution is {}", execution.status)),
            )
            .await?;
            return Ok(ResumeOutcome::Discarded {
                execution_id,
                status: execution.status,
            });
        }

        if execution.status == ExecutionStatus::Paused {
            self.store.release_delay(delay.delay_id, self.clock.now()).await?;
            return Ok(ResumeOutcome::Released { execution_id });
        }

        if already_ran {
            if execution.status != ExecutionStatus::Running {
                self.finish_delay(&delay, DelayStatus::Executed, None).await?;
                return Ok(ResumeOutcome::Reconciled { execution_id });
            }
            // A previous resume died partway through the segment.
            info!(
                execution_id = %execution_id,
                delay_id = %delay.delay_id,
                step_id = ?execution.current_step_id,
                "Continuing interrupted resume"
            );
            let execution = self.drive(execution).await?;
            self.finish_delay(&delay, DelayStatus::Executed, None).await?;
            return Ok(ResumeOutcome::Resumed {
                execution_id,
                status: execution.status,
            });
        }

        let positioned = execution.current_step_id == delay.resume_step_id;
        let resumable = matches!(
            execution.status,
            ExecutionStatus::Delayed | ExecutionStatus::Running
        );
        if !(positioned && resumable) {
            let message = format!(
                "delay {} resumes {:?} but execution {} is {} at {:?}",
                delay.delay_id,
                delay.resume_step_id,
                execution_id,
                execution.status,
                execution.current_step_id
            );
            error!(delay_id = %delay.delay_id, execution_id = %execution_id, "{}", message);
            self.finish_delay(&delay, DelayStatus::Failed, Some(message.clone()))
                .await?;
            return Err(AppError::SuspensionInconsistency(message));
        }

        let execution = if execution.status == ExecutionStatus::Delayed {
            let commit = self.resume_commit(&execution, &delay)?;
            self.commit(execution_id, commit).await?
        } else {
            // Crash between the resume commit and the step: just drive.
            execution
        };

        info!(
            execution_id = %execution_id,
            delay_id = %delay.delay_id,
            kind = %delay.kind,
            step_id = ?delay.resume_step_id,
            "Resuming from delay"
        );
        let execution = self.drive(execution).await?;
        self.finish_delay(&delay, DelayStatus::Executed, None).await?;

        Ok(ResumeOutcome::Resumed {
            execution_id,
            status: execution.status,
        })
    }

    fn resume_commit(
        &self,
        execution: &WorkflowExecution,
        delay: &PendingDelay,
    ) -> AppResult<StateCommit> {
        let commit = StateCommit::new(ExecutionEvent::Resume);
        let Some(ref step_id) = delay.resume_step_id else {
            return Ok(commit.with_pointer(StepPointer::finished()));
        };

        if let Some(index) = execution.workflow_definition.index_of(step_id) {
            return Ok(commit
                .with_pointer(StepPointer::at(step_id, Some(index as i32)))
                .with_dynamic_steps(Vec::new()));
        }

        let snapshot = delay.snapshot_steps();
        if !snapshot.iter().any(|s| &s.id == step_id) {
            return Err(AppError::SuspensionInconsistency(format!(
                "resume step {} is neither in the plan nor in the delay snapshot",
                step_id
            )));
        }
        Ok(commit
            .with_pointer(StepPointer::at(step_id, None))
            .with_dynamic_steps(snapshot))
    }

    async fn cancel_with(&self, execution_id: Uuid, reason: &str) -> AppResult<WorkflowExecution> {
        let execution = self
            .commit(
                execution_id,
                StateCommit::new(ExecutionEvent::Cancel).with_error(format!("execution {}", reason)),
            )
            .await?;

        let now = self.clock.now();
        for delay in self.store.delays_for_execution(execution_id).await? {
            if delay.status == DelayStatus::Pending {
                self.store
                    .finish_delay(
                        delay.delay_id,
                        DelayStatus::Failed,
                        Some(format!("execution {}", reason)),
                        now,
                    )
                    .await?;
            }
        }

        info!(execution_id = %execution_id, reason = reason, "Execution cancelled");
        Ok(execution)
    }

    async fn finish_delay(
        &self,
        delay: &PendingDelay,
        status: DelayStatus,
        error: Option<String>,
    ) -> AppResult<()> {
        self.store
            .finish_delay(delay.delay_id, status, error, self.clock.now())
            .await
    }

    async fn commit(&self, execution_id: Uuid, commit: StateCommit) -> AppResult<WorkflowExecution> {
        self.store
            .commit(execution_id, &commit, self.clock.now())
            .await
    }

    /// Run steps while the execution is running. Stops after a suspension,
    /// completion or failure, or when a commit is rejected because the
    /// execution changed underneath (e.g. cancelled).
    async fn drive(&self, mut execution: WorkflowExecution) -> AppResult<WorkflowExecution> {
        while execution.status == ExecutionStatus::Running {
            let execution_id = execution.execution_id;

            let Some(step) = execution.current_step().cloned() else {
                let commit = match execution.current_step_id {
                    None => StateCommit::new(ExecutionEvent::Complete),
                    Some(ref missing) => StateCommit::new(ExecutionEvent::Fail)
                        .with_error(format!("step {} is not part of the plan", missing)),
                };
                execution = self.commit(execution_id, commit).await?;
                break;
            };

            let ctx = ExecutionContext {
                execution_id,
                workflow_id: execution.workflow_id.clone(),
                context: execution.state.context.clone(),
                next_step_id: next_in(execution.active_steps(), &step.id),
                attempt: execution.retry_count,
                now: self.clock.now(),
            };

            let commit = match self.run_step(&step, &ctx).await {
                Ok(result) if result.success => self.success_commit(&execution, &step, &ctx, result),
                Ok(result) => {
                    let message = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "step reported failure".to_string());
                    self.failure_commit(&execution, &step, &ctx, message, result.result)
                }
                Err(message) => self.failure_commit(&execution, &step, &ctx, message, None),
            };

            execution = match self.commit(execution_id, commit).await {
                Ok(updated) => updated,
                Err(AppError::InvalidTransition { status, event }) => {
                    warn!(
                        execution_id = %execution_id,
                        step_id = %step.id,
                        status = %status,
                        event = %event,
                        "Execution changed while a step ran; stopping"
                    );
                    return self.get_execution_status(execution_id).await;
                }
                Err(e) => return Err(e),
            };
        }

        match execution.status {
            ExecutionStatus::Completed => info!(
                execution_id = %execution.execution_id,
                workflow_id = %execution.workflow_id,
                "Execution completed"
            ),
            ExecutionStatus::Failed => warn!(
                execution_id = %execution.execution_id,
                error = ?execution.error,
                "Execution failed"
            ),
            _ => {}
        }
        Ok(execution)
    }

    /// Execute one step. Any error, panic or missing executor becomes a
    /// failure message.
    async fn run_step(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult, String> {
        let Some(executor) = self.executors.get(step.kind()) else {
            return Err(format!("no executor registered for {} steps", step.kind()));
        };

        debug!(
            execution_id = %ctx.execution_id,
            step_id = %step.id,
            kind = %step.kind(),
            attempt = ctx.attempt,
            "Executing step"
        );

        match AssertUnwindSafe(executor.execute(step, ctx)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    execution_id = %ctx.execution_id,
                    step_id = %step.id,
                    "Step executor panicked: {}",
                    detail
                );
                Err(format!("executor panicked: {}", detail))
            }
        }
    }

    fn success_commit(
        &self,
        execution: &WorkflowExecution,
        step: &Step,
        ctx: &ExecutionContext,
        result: StepResult,
    ) -> StateCommit {
        let StepResult {
            result: output,
            next_step,
            extracted_steps,
            suspend,
            complete,
            context_updates,
            ..
        } = result;

        let mut commit = StateCommit::new(ExecutionEvent::Advance).with_context(context_updates);
        if execution.retry_count != 0 {
            commit = commit.with_retry_count(0);
        }

        if let Some(draft) = suspend {
            let pointer = self.pointer_for(execution, draft.resume_step_id.as_deref(), None);
            commit.event = ExecutionEvent::Suspend;
            return commit
                .with_history(HistoryEntry::suspended(&step.id, output, ctx.now))
                .with_pointer(pointer)
                .with_delay(draft);
        }

        commit = commit.with_history(HistoryEntry::succeeded(&step.id, output, ctx.now));

        if complete {
            commit.event = ExecutionEvent::Complete;
            return commit.with_pointer(StepPointer::finished());
        }

        let next = next_step.or_else(|| ctx.next_step_id.clone());
        let pointer = self.pointer_for(execution, next.as_deref(), extracted_steps.as_deref());
        if let Some(steps) = extracted_steps {
            commit = commit.with_dynamic_steps(steps);
        } else if pointer.index.is_some() && !execution.state.dynamic_steps.is_empty() {
            // Jumped out of the inline segment back into the plan.
            commit = commit.with_dynamic_steps(Vec::new());
        }

        if next.is_none() {
            commit.event = ExecutionEvent::Complete;
        }
        commit.with_pointer(pointer)
    }

    fn failure_commit(
        &self,
        execution: &WorkflowExecution,
        step: &Step,
        ctx: &ExecutionContext,
        message: String,
        output: Option<serde_json::Value>,
    ) -> StateCommit {
        let attempt = execution.retry_count + 1;
        let mut entry = HistoryEntry::failed(&step.id, &message, ctx.now);
        entry.result = output;

        if attempt as u32 <= self.config.max_retries {
            let resume_at = ctx.now + self.config.retry_backoff(attempt as u32);
            warn!(
                execution_id = %execution.execution_id,
                step_id = %step.id,
                attempt = attempt,
                resume_at = %resume_at,
                error = %message,
                "Step failed, retry scheduled"
            );
            return StateCommit::new(ExecutionEvent::Suspend)
                .with_history(entry)
                .with_retry_count(attempt)
                .with_delay(DelayDraft {
                    step_id: format!("{}#retry{}", step.id, attempt),
                    resume_step_id: Some(step.id.clone()),
                    kind: DelayKind::Retry,
                    resume_at,
                });
        }

        warn!(
            execution_id = %execution.execution_id,
            step_id = %step.id,
            attempts = attempt,
            error = %message,
            "Step failed, retries exhausted"
        );
        StateCommit::new(ExecutionEvent::Fail)
            .with_history(entry)
            .with_retry_count(attempt)
            .with_error(format!("step {} failed: {}", step.id, message))
    }

    /// Pointer for `next`, which lives either in `segment` (when a new one is
    /// spliced in), in the current dynamic segment, or in the static plan.
    fn pointer_for(
        &self,
        execution: &WorkflowExecution,
        next: Option<&str>,
        segment: Option<&[Step]>,
    ) -> StepPointer {
        let Some(next) = next else {
            return StepPointer::finished();
        };
        let in_segment = segment
            .unwrap_or(&execution.state.dynamic_steps)
            .iter()
            .any(|s| s.id == next);
        if in_segment {
            return StepPointer::at(next, None);
        }
        let index = execution
            .workflow_definition
            .index_of(next)
            .map(|i| i as i32);
        StepPointer::at(next, index)
    }
}
