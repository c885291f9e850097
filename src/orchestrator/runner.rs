#![allow(dead_code)]

//! Agent task orchestration
//!
//! Drives one agent task execution end to end: resolve the task's strategy to
//! a workflow request, move the record through the lifecycle, and run the
//! workflow under the category timeout with retries for transient failures.
//! Validation problems settle the record before the first attempt.

use super::lifecycle::{ExecutionKind, ExecutionRecord, ExecutionStatus};
use super::policy::{self, RetryPolicy};
use super::task::{AgentTask, ExecutionStrategy};
use crate::notify::{ProgressEvent, ProgressNotifier};
use crate::queue::AsyncStepQueue;
use crate::store::ExecutionStore;
use crate::workflow::{WorkflowError, WorkflowExecutionEngine, WorkflowRequest, codes};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task {id} is disabled")]
    TaskDisabled { id: String },

    #[error("execution {id} not found")]
    ExecutionNotFound { id: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Trigger-time context for a task execution
#[derive(Debug, Clone, Default)]
pub struct TriggerContext {
    /// Params supplied by the trigger; override the task's own params
    pub input: Map<String, Value>,
}

/// Orchestrates agent task executions over the workflow engine
pub struct AgentTaskOrchestrator {
    store: Arc<ExecutionStore>,
    engine: Arc<WorkflowExecutionEngine>,
    queue: Arc<AsyncStepQueue>,
    retry_policy: RetryPolicy,
    notifier: ProgressNotifier,
}

impl AgentTaskOrchestrator {
    pub fn new(
        store: Arc<ExecutionStore>,
        engine: Arc<WorkflowExecutionEngine>,
        queue: Arc<AsyncStepQueue>,
        retry_policy: RetryPolicy,
        notifier: ProgressNotifier,
    ) -> Self {
        Self {
            store,
            engine,
            queue,
            retry_policy,
            notifier,
        }
    }

    /// Start a task execution and drive it to a terminal state.
    ///
    /// Strategy resolution and request validation settle the record as Failed
    /// with `VALIDATION_ERROR` before any attempt is consumed. Transient
    /// failures retry with exponential backoff up to the task's budget; a
    /// timed-out attempt is terminal and never retried.
    pub async fn start_task_execution(
        &self,
        task: &AgentTask,
        ctx: TriggerContext,
    ) -> Result<ExecutionRecord, OrchestratorError> {
        if !task.enabled {
            return Err(OrchestratorError::TaskDisabled {
                id: task.id.clone(),
            });
        }

        let mut record =
            ExecutionRecord::new_task(task.id.clone(), task.team_id.clone(), task.max_attempts());
        self.store.save_execution(&record)?;

        info!(
            execution_id = %record.id,
            task_id = %task.id,
            task = %task.name,
            "task execution queued"
        );

        let mut request = match self.resolve_strategy(task, &mut record)? {
            Some(request) => request,
            None => return Ok(record),
        };

        if let Err(WorkflowError::Validation { message }) =
            self.engine.validate_request(&request)
        {
            return Ok(self.settle_validation_failure(record, message)?);
        }

        self.merge_params(&mut request, task, &ctx);

        record.status = ExecutionStatus::Starting;
        self.store.save_execution(&record)?;
        record.mark_started();
        self.store.save_execution(&record)?;
        self.notifier.emit(ProgressEvent::Started {
            execution_id: record.id.clone(),
        });

        let timeout = policy::timeout_for(task.category, task.timeout_minutes);

        loop {
            // A cancel may have landed between attempts
            if let Some(current) = self.store.find_execution(&record.id)? {
                if current.status == ExecutionStatus::Cancelled {
                    return Ok(current);
                }
            }

            record.record_attempt();

            // Pre-create the workflow record so a cancel or timeout can
            // reach the in-flight execution by id
            let workflow_execution =
                ExecutionRecord::new_workflow(task.team_id.clone(), record.workflow_id.clone());
            let workflow_execution_id = workflow_execution.id.clone();
            record.correlation_id = Some(workflow_execution_id.clone());
            self.store.save_execution(&record)?;

            let run = self.engine.execute_into(&request, workflow_execution);

            match tokio::time::timeout(timeout, run).await {
                Err(_) => {
                    warn!(
                        execution_id = %record.id,
                        task_id = %task.id,
                        timeout_secs = timeout.as_secs(),
                        "task execution timed out"
                    );
                    // The dropped run leaves its execution mid-flight;
                    // settle it and any async steps it queued
                    if self.store.find_execution(&workflow_execution_id)?.is_some() {
                        self.cancel_execution(&workflow_execution_id)?;
                    }
                    record = self.require_execution(&record.id)?;
                    if record.is_terminal() {
                        return Ok(record);
                    }
                    record.mark_timeout();
                    self.store.save_execution(&record)?;
                    self.emit_settled(&record);
                    return Ok(record);
                }

                Ok(Err(WorkflowError::Validation { message })) => {
                    return Ok(self.settle_validation_failure(record, message)?);
                }

                Ok(Err(WorkflowError::Storage(err))) => return Err(err.into()),

                Ok(Ok(workflow_record)) => {
                    // Re-read before settling: a cancel may have landed
                    // while the workflow ran
                    record = self.require_execution(&record.id)?;
                    if record.is_terminal() {
                        return Ok(record);
                    }
                    record.results = workflow_record.results.clone();

                    match workflow_record.status {
                        ExecutionStatus::Completed => {
                            record.mark_completed();
                            self.store.save_execution(&record)?;
                            info!(
                                execution_id = %record.id,
                                task_id = %task.id,
                                attempts = record.attempt_count,
                                "task execution completed"
                            );
                            self.emit_settled(&record);
                            return Ok(record);
                        }

                        ExecutionStatus::Cancelled => {
                            record.mark_cancelled();
                            self.store.save_execution(&record)?;
                            self.emit_settled(&record);
                            return Ok(record);
                        }

                        _ => {
                            let error = workflow_record.last_error.clone().unwrap_or_else(|| {
                                crate::workflow::ErrorInfo::new(
                                    "workflow failed",
                                    codes::TOOL_ERROR,
                                )
                            });

                            let retryable = error.code == codes::TRANSIENT_ERROR;
                            if retryable && record.attempt_count < record.max_attempts {
                                let delay = self
                                    .retry_policy
                                    .delay_for_attempt(record.attempt_count - 1);
                                warn!(
                                    execution_id = %record.id,
                                    task_id = %task.id,
                                    attempt = record.attempt_count,
                                    delay_ms = delay.as_millis() as u64,
                                    "transient failure, retrying"
                                );
                                record.last_error = Some(error);
                                self.store.save_execution(&record)?;
                                tokio::time::sleep(delay).await;
                                continue;
                            }

                            record.mark_failed(error.message, error.code);
                            self.store.save_execution(&record)?;
                            self.emit_settled(&record);
                            return Ok(record);
                        }
                    }
                }
            }
        }
    }

    /// Manual/API trigger entry point
    pub async fn execute_task_manually(
        &self,
        task: &AgentTask,
        input: Map<String, Value>,
    ) -> Result<ExecutionRecord, OrchestratorError> {
        self.start_task_execution(task, TriggerContext { input }).await
    }

    /// Cancel an execution.
    ///
    /// Terminal records are left untouched (idempotent no-op). Otherwise the
    /// record is marked Cancelled; a running workflow stops cooperatively at
    /// its next step boundary and pending async steps are cancelled.
    pub fn cancel_execution(&self, id: &str) -> Result<ExecutionRecord, OrchestratorError> {
        let mut record = self.require_execution(id)?;
        if !record.status.can_transition_to(ExecutionStatus::Cancelled) {
            return Ok(record);
        }

        record.mark_cancelled();
        self.store.save_execution(&record)?;
        info!(execution_id = %id, "execution cancelled");

        if record.kind == ExecutionKind::Workflow {
            for entry in self.queue.list_async_steps(id)? {
                if !entry.status.is_terminal() {
                    self.queue.cancel_async_step(id, entry.step_number)?;
                }
            }
        }

        // A task record cancels the workflow execution it triggered
        if let Some(correlation_id) = record.correlation_id.clone() {
            if self.store.find_execution(&correlation_id)?.is_some() {
                self.cancel_execution(&correlation_id)?;
            }
        }

        self.emit_settled(&record);
        Ok(record)
    }

    pub fn execution(&self, id: &str) -> Result<ExecutionRecord, OrchestratorError> {
        self.require_execution(id)
    }

    pub fn executions_for_task(&self, task_id: &str) -> Result<Vec<ExecutionRecord>, OrchestratorError> {
        Ok(self.store.executions_for_task(task_id)?)
    }

    pub fn executions_for_team(&self, team_id: &str) -> Result<Vec<ExecutionRecord>, OrchestratorError> {
        Ok(self.store.executions_for_team(team_id)?)
    }

    pub fn executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ExecutionRecord>, OrchestratorError> {
        Ok(self.store.executions_by_status(status)?)
    }

    /// Resolve the task's strategy to a concrete request.
    ///
    /// Returns `None` when resolution settled the record as Failed.
    fn resolve_strategy(
        &self,
        task: &AgentTask,
        record: &mut ExecutionRecord,
    ) -> Result<Option<WorkflowRequest>, OrchestratorError> {
        match &task.strategy {
            ExecutionStrategy::TriggerById { workflow_id } => {
                match self.store.find_workflow(workflow_id)? {
                    Some(definition) => {
                        record.workflow_id = Some(workflow_id.clone());
                        self.store.save_execution(record)?;
                        Ok(Some(definition.request))
                    }
                    None => {
                        let message = format!("workflow {} not found", workflow_id);
                        *record = self.settle_validation_failure(record.clone(), message)?;
                        Ok(None)
                    }
                }
            }
            ExecutionStrategy::Embedded { request } | ExecutionStrategy::AdHoc { request } => {
                Ok(Some(request.clone()))
            }
        }
    }

    fn merge_params(&self, request: &mut WorkflowRequest, task: &AgentTask, ctx: &TriggerContext) {
        for (key, value) in &task.params {
            request.params.insert(key.clone(), value.clone());
        }
        for (key, value) in &ctx.input {
            request.params.insert(key.clone(), value.clone());
        }
        if let Some(team_id) = &task.team_id {
            request
                .params
                .insert("team_id".into(), Value::String(team_id.clone()));
        }
    }

    fn settle_validation_failure(
        &self,
        mut record: ExecutionRecord,
        message: String,
    ) -> Result<ExecutionRecord, OrchestratorError> {
        warn!(
            execution_id = %record.id,
            error = %message,
            "task rejected before execution"
        );
        record.mark_failed(message, codes::VALIDATION_ERROR);
        self.store.save_execution(&record)?;
        self.emit_settled(&record);
        Ok(record)
    }

    fn require_execution(&self, id: &str) -> Result<ExecutionRecord, OrchestratorError> {
        self.store
            .find_execution(id)?
            .ok_or_else(|| OrchestratorError::ExecutionNotFound { id: id.to_string() })
    }

    fn emit_settled(&self, record: &ExecutionRecord) {
        let event = match record.status {
            ExecutionStatus::Completed => ProgressEvent::Completed {
                execution_id: record.id.clone(),
            },
            ExecutionStatus::Cancelled => ProgressEvent::Cancelled {
                execution_id: record.id.clone(),
            },
            _ => {
                let Some(error) = record.last_error.clone() else {
                    return;
                };
                ProgressEvent::Failed {
                    execution_id: record.id.clone(),
                    error,
                }
            }
        };
        self.notifier.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::task::TaskCategory;
    use crate::tool::{ToolCall, ToolError, ToolInvoker};
    use crate::workflow::{WorkflowDefinition, WorkflowStep};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `fail_count` invocations with the given error
    struct FlakyInvoker {
        calls: AtomicU32,
        fail_count: u32,
        error: ToolError,
        delay: Option<Duration>,
    }

    impl FlakyInvoker {
        fn reliable() -> Self {
            Self::failing(0, ToolError::failed("unused"))
        }

        fn failing(fail_count: u32, error: ToolError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_count,
                error,
                delay: None,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_count: 0,
                error: ToolError::failed("unused"),
                delay: Some(delay),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ToolInvoker for FlakyInvoker {
        async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if n < self.fail_count {
                return Err(self.error.clone());
            }
            Ok(json!({"params": call.params}))
        }
    }

    struct Fixture {
        store: Arc<ExecutionStore>,
        orchestrator: AgentTaskOrchestrator,
    }

    fn fixture(invoker: Arc<FlakyInvoker>) -> Fixture {
        let store = Arc::new(ExecutionStore::open_in_memory().unwrap());
        let queue = Arc::new(AsyncStepQueue::new(store.clone()));
        let engine = Arc::new(WorkflowExecutionEngine::new(
            store.clone(),
            queue.clone(),
            invoker,
            ProgressNotifier::disabled(),
            Duration::from_millis(10),
        ));
        let retry_policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        };
        let orchestrator = AgentTaskOrchestrator::new(
            store.clone(),
            engine,
            queue,
            retry_policy,
            ProgressNotifier::disabled(),
        );
        Fixture {
            store,
            orchestrator,
        }
    }

    fn embedded_request() -> WorkflowRequest {
        WorkflowRequest {
            target: "workflow".into(),
            action: "execute".into(),
            intent: None,
            params: Map::new(),
            payload: None,
            steps: vec![WorkflowStep {
                step_number: 1,
                target: "api".into(),
                action: "get".into(),
                intent: None,
                params: Map::new(),
                payload: None,
                is_async: false,
            }],
        }
    }

    fn embedded_task(max_retries: u32) -> AgentTask {
        AgentTask {
            id: "task-1".into(),
            name: "embedded test task".into(),
            team_id: Some("team-a".into()),
            category: TaskCategory::ApiCall,
            strategy: ExecutionStrategy::Embedded {
                request: embedded_request(),
            },
            max_retries,
            timeout_minutes: 5,
            params: Map::new(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_embedded_task_completes() {
        let invoker = Arc::new(FlakyInvoker::reliable());
        let f = fixture(invoker.clone());

        let record = f
            .orchestrator
            .start_task_execution(&embedded_task(0), TriggerContext::default())
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.attempt_count, 1);
        assert!(record.last_error.is_none());
        assert!(record.correlation_id.is_some());
        assert!(record.duration_ms.is_some());

        // Triggered workflow execution is persisted and linked
        let workflow_record = f
            .store
            .find_execution(record.correlation_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(workflow_record.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_disabled_task_rejected() {
        let f = fixture(Arc::new(FlakyInvoker::reliable()));
        let mut task = embedded_task(0);
        task.enabled = false;

        let err = f
            .orchestrator
            .start_task_execution(&task, TriggerContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::TaskDisabled { .. }));
    }

    #[tokio::test]
    async fn test_unknown_workflow_id_fails_without_attempt() {
        let invoker = Arc::new(FlakyInvoker::reliable());
        let f = fixture(invoker.clone());

        let mut task = embedded_task(2);
        task.strategy = ExecutionStrategy::TriggerById {
            workflow_id: "wf-missing".into(),
        };

        let record = f
            .orchestrator
            .start_task_execution(&task, TriggerContext::default())
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.attempt_count, 0);
        assert_eq!(
            record.last_error.as_ref().unwrap().code,
            codes::VALIDATION_ERROR
        );
        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test]
    async fn test_trigger_by_id_runs_stored_workflow() {
        let invoker = Arc::new(FlakyInvoker::reliable());
        let f = fixture(invoker.clone());

        f.store
            .save_workflow(&WorkflowDefinition {
                id: "wf-1".into(),
                team_id: None,
                name: "stored".into(),
                request: embedded_request(),
            })
            .unwrap();

        let mut task = embedded_task(0);
        task.strategy = ExecutionStrategy::TriggerById {
            workflow_id: "wf-1".into(),
        };

        let record = f
            .orchestrator
            .start_task_execution(&task, TriggerContext::default())
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.workflow_id.as_deref(), Some("wf-1"));
        assert_eq!(invoker.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_to_success() {
        let invoker = Arc::new(FlakyInvoker::failing(
            2,
            ToolError::network("connection reset"),
        ));
        let f = fixture(invoker.clone());

        let record = f
            .orchestrator
            .start_task_execution(&embedded_task(2), TriggerContext::default())
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.attempt_count, 3);
        assert!(record.last_error.is_none());
        assert_eq!(invoker.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retry_budget_fails() {
        let invoker = Arc::new(FlakyInvoker::failing(
            10,
            ToolError::unavailable("down for maintenance"),
        ));
        let f = fixture(invoker.clone());

        let record = f
            .orchestrator
            .start_task_execution(&embedded_task(1), TriggerContext::default())
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        // max_retries = 1 means exactly 2 attempts
        assert_eq!(record.attempt_count, 2);
        assert_eq!(invoker.calls(), 2);
        assert_eq!(
            record.last_error.as_ref().unwrap().code,
            codes::TRANSIENT_ERROR
        );
    }

    #[tokio::test]
    async fn test_hard_failure_is_never_retried() {
        let invoker = Arc::new(FlakyInvoker::failing(10, ToolError::failed("bad input")));
        let f = fixture(invoker.clone());

        let record = f
            .orchestrator
            .start_task_execution(&embedded_task(3), TriggerContext::default())
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(invoker.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_terminal_and_not_retried() {
        let invoker = Arc::new(FlakyInvoker::slow(Duration::from_millis(200)));
        let f = fixture(invoker.clone());

        let mut task = embedded_task(2);
        task.timeout_minutes = 0;

        let record = f
            .orchestrator
            .start_task_execution(&task, TriggerContext::default())
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Timeout);
        assert_eq!(record.attempt_count, 1);
        let error = record.last_error.unwrap();
        assert_eq!(error.message, "Execution timed out");
        assert_eq!(error.code, codes::TIMEOUT);

        // The abandoned workflow execution is settled, not left Running
        let workflow_record = f
            .store
            .find_execution(record.correlation_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(workflow_record.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_during_run_is_not_overwritten() {
        let f = fixture(Arc::new(FlakyInvoker::slow(Duration::from_millis(300))));
        let orchestrator = Arc::new(f.orchestrator);
        let task = embedded_task(0);

        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .start_task_execution(&task, TriggerContext::default())
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let running = f.store.executions_for_task("task-1").unwrap();
        assert_eq!(running.len(), 1);
        orchestrator.cancel_execution(&running[0].id).unwrap();

        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Cancelled);

        // The terminal record stays Cancelled in the store
        let persisted = f.store.find_execution(&record.id).unwrap().unwrap();
        assert_eq!(persisted.status, ExecutionStatus::Cancelled);
        let workflow_record = f
            .store
            .find_execution(persisted.correlation_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert!(workflow_record.is_terminal());
    }

    #[tokio::test]
    async fn test_trigger_input_overrides_task_params() {
        let invoker = Arc::new(FlakyInvoker::reliable());
        let f = fixture(invoker.clone());

        let mut task = embedded_task(0);
        task.params.insert("city".into(), json!("Lyon"));
        if let ExecutionStrategy::Embedded { request } = &mut task.strategy {
            request.steps[0]
                .params
                .insert("q".into(), json!("{{params.city}}"));
        }

        let mut input = Map::new();
        input.insert("city".into(), json!("Oslo"));

        let record = f
            .orchestrator
            .execute_task_manually(&task, input)
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        let value = record.final_value().unwrap();
        assert_eq!(value["params"]["q"], json!("Oslo"));
        assert_eq!(value["params"]["team_id"], json!("team-a"));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_on_terminal_records() {
        let f = fixture(Arc::new(FlakyInvoker::reliable()));

        let record = f
            .orchestrator
            .start_task_execution(&embedded_task(0), TriggerContext::default())
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);

        let after = f.orchestrator.cancel_execution(&record.id).unwrap();
        assert_eq!(after.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_pending_execution() {
        let f = fixture(Arc::new(FlakyInvoker::reliable()));

        let record = ExecutionRecord::new_task("task-9".into(), None, 1);
        f.store.save_execution(&record).unwrap();

        let cancelled = f.orchestrator.cancel_execution(&record.id).unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert_eq!(
            cancelled.last_error.as_ref().unwrap().code,
            codes::CANCELLED
        );
    }

    #[tokio::test]
    async fn test_cancel_unknown_execution() {
        let f = fixture(Arc::new(FlakyInvoker::reliable()));
        let err = f.orchestrator.cancel_execution("nope").unwrap_err();
        assert!(matches!(err, OrchestratorError::ExecutionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_queries() {
        let f = fixture(Arc::new(FlakyInvoker::reliable()));

        f.orchestrator
            .start_task_execution(&embedded_task(0), TriggerContext::default())
            .await
            .unwrap();

        assert_eq!(f.orchestrator.executions_for_task("task-1").unwrap().len(), 1);
        assert_eq!(f.orchestrator.executions_for_team("team-a").unwrap().len(), 1);
        assert_eq!(
            f.orchestrator
                .executions_by_status(ExecutionStatus::Completed)
                .unwrap()
                .len(),
            // task record plus the workflow execution it triggered
            2
        );
    }
}
