#![allow(dead_code)]

//! Workflow execution engine
//!
//! Runs a workflow's steps strictly in ascending order, binding each step's
//! references against the results accumulated so far. Sync steps run inline
//! and fail fast; async steps are handed to the queue and the engine waits for
//! them only where a later step (or workflow completion) needs them.

use super::request::{ErrorInfo, StepResult, WorkflowRequest, WorkflowStep, codes};
use crate::notify::{ProgressEvent, ProgressNotifier};
use crate::orchestrator::{ExecutionRecord, ExecutionStatus};
use crate::queue::{AsyncStepQueue, AsyncStepStatus};
use crate::resolver::{StepValues, VariableBinder};
use crate::store::ExecutionStore;
use crate::tool::{ToolCall, ToolInvoker};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that prevent a workflow from running at all
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The request is malformed; nothing was executed
    #[error("workflow validation failed: {message}")]
    Validation { message: String },

    /// Persistence failure
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Outcome of waiting on an async step
enum AsyncWait {
    Finished(AsyncStepStatus),
    ParentCancelled,
}

/// Validate a workflow request.
///
/// Steps must be numbered 1..=n in order with no gaps, and every
/// `{{stepN...}}` reference must point at a strictly earlier step.
pub fn validate_request(request: &WorkflowRequest) -> Result<(), WorkflowError> {
    if request.steps.is_empty() {
        return Err(WorkflowError::validation("workflow has no steps"));
    }

    for (position, step) in request.steps.iter().enumerate() {
        let expected = (position + 1) as u32;
        if step.step_number != expected {
            return Err(WorkflowError::validation(format!(
                "steps must be numbered 1..={} in order; position {} has step_number {}",
                request.steps.len(),
                expected,
                step.step_number
            )));
        }
    }

    let binder = VariableBinder::new();
    for step in &request.steps {
        for dep in binder.referenced_steps(step) {
            if dep == 0 || dep >= step.step_number {
                return Err(WorkflowError::validation(format!(
                    "step {} references step {} before its result exists",
                    step.step_number, dep
                )));
            }
        }
    }

    Ok(())
}

/// Successful step values from a record, keyed by step number
fn step_values(record: &ExecutionRecord) -> StepValues {
    record
        .results
        .iter()
        .filter(|r| r.is_success())
        .map(|r| (r.step_number, r.value.clone()))
        .collect()
}

/// The workflow execution engine
pub struct WorkflowExecutionEngine {
    store: Arc<ExecutionStore>,
    queue: Arc<AsyncStepQueue>,
    invoker: Arc<dyn ToolInvoker>,
    binder: VariableBinder,
    notifier: ProgressNotifier,
    poll_interval: Duration,
}

impl WorkflowExecutionEngine {
    pub fn new(
        store: Arc<ExecutionStore>,
        queue: Arc<AsyncStepQueue>,
        invoker: Arc<dyn ToolInvoker>,
        notifier: ProgressNotifier,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            invoker,
            binder: VariableBinder::new(),
            notifier,
            poll_interval,
        }
    }

    /// Validate a request without executing it
    pub fn validate_request(&self, request: &WorkflowRequest) -> Result<(), WorkflowError> {
        validate_request(request)
    }

    /// Execute a workflow to a terminal record.
    ///
    /// Validation failures return `Err` without creating a record. Step
    /// failures, timeouts of async steps and cancellation all return `Ok`
    /// with the record in the corresponding terminal state; partial results
    /// stay attached to the record.
    pub async fn execute_workflow(
        &self,
        request: &WorkflowRequest,
        team_id: Option<String>,
        workflow_id: Option<String>,
    ) -> Result<ExecutionRecord, WorkflowError> {
        self.validate_request(request)?;
        let record = ExecutionRecord::new_workflow(team_id, workflow_id);
        self.execute_into(request, record).await
    }

    /// Execute a workflow into a pre-created (not yet persisted) record.
    ///
    /// Callers that need the execution id before the run starts (to cancel an
    /// in-flight execution, for instance) build the record themselves and
    /// hand it over here.
    pub async fn execute_into(
        &self,
        request: &WorkflowRequest,
        mut record: ExecutionRecord,
    ) -> Result<ExecutionRecord, WorkflowError> {
        self.validate_request(request)?;
        self.store.save_execution(&record)?;
        record.status = ExecutionStatus::Starting;
        self.store.save_execution(&record)?;
        record.mark_started();
        self.store.save_execution(&record)?;

        info!(
            execution_id = %record.id,
            steps = request.steps.len(),
            target = %request.target,
            action = %request.action,
            "workflow execution started"
        );
        self.notifier.emit(ProgressEvent::Started {
            execution_id: record.id.clone(),
        });

        let total = request.steps.len() as u32;
        let async_steps: BTreeSet<u32> = request
            .steps
            .iter()
            .filter(|s| s.is_async)
            .map(|s| s.step_number)
            .collect();

        for step in &request.steps {
            // Cancellation is cooperative: re-read the record at each step
            // boundary and stop if someone cancelled us
            record = self.reload(&record.id)?;
            if record.status == ExecutionStatus::Cancelled {
                self.emit_cancelled(&record);
                return Ok(record);
            }

            if step.is_async {
                self.queue
                    .queue_async_step(&record.id, step, &request.params)?;
                self.notifier.emit(ProgressEvent::StepProgress {
                    execution_id: record.id.clone(),
                    step: step.step_number,
                    total,
                });
                continue;
            }

            // Block on async dependencies before binding
            for dep in self.binder.referenced_steps(step) {
                if !async_steps.contains(&dep) {
                    continue;
                }
                match self.wait_for_async_step(&record.id, dep).await? {
                    AsyncWait::ParentCancelled => {
                        record = self.reload(&record.id)?;
                        self.emit_cancelled(&record);
                        return Ok(record);
                    }
                    AsyncWait::Finished(AsyncStepStatus::Completed) => {}
                    AsyncWait::Finished(_) => {
                        return Ok(self.settle_async_failure(&record.id, dep)?);
                    }
                }
            }

            record = self.reload(&record.id)?;
            if record.is_terminal() {
                if record.status == ExecutionStatus::Cancelled {
                    self.emit_cancelled(&record);
                }
                return Ok(record);
            }

            let result = self
                .execute_single_step(step, &record, &request.params)
                .await;
            self.notifier.emit(ProgressEvent::StepProgress {
                execution_id: record.id.clone(),
                step: step.step_number,
                total,
            });

            // The drain loop may have folded async results, or a cancel may
            // have landed, while the step ran; merge into a fresh copy
            record = self.reload(&record.id)?;
            if record.is_terminal() {
                if record.status == ExecutionStatus::Cancelled {
                    self.emit_cancelled(&record);
                }
                return Ok(record);
            }

            let failed = !result.is_success();
            let error = result.error.clone();
            record.fold_step_result(result);

            if failed {
                let error =
                    error.unwrap_or_else(|| ErrorInfo::new("step failed", codes::TOOL_ERROR));
                warn!(
                    execution_id = %record.id,
                    step = step.step_number,
                    code = %error.code,
                    "step failed, stopping workflow"
                );
                record.mark_failed(error.message.clone(), error.code.clone());
                self.store.save_execution(&record)?;
                self.notifier.emit(ProgressEvent::Failed {
                    execution_id: record.id.clone(),
                    error,
                });
                return Ok(record);
            }

            self.store.save_execution(&record)?;
        }

        // Outstanding async steps must settle before the execution does
        for step_number in &async_steps {
            match self.wait_for_async_step(&record.id, *step_number).await? {
                AsyncWait::ParentCancelled => {
                    record = self.reload(&record.id)?;
                    self.emit_cancelled(&record);
                    return Ok(record);
                }
                AsyncWait::Finished(AsyncStepStatus::Completed) => {}
                AsyncWait::Finished(_) => {
                    return Ok(self.settle_async_failure(&record.id, *step_number)?);
                }
            }
        }

        record = self.reload(&record.id)?;
        if record.status == ExecutionStatus::Cancelled {
            self.emit_cancelled(&record);
            return Ok(record);
        }
        if record.is_terminal() {
            return Ok(record);
        }

        record.mark_completed();
        self.store.save_execution(&record)?;
        info!(
            execution_id = %record.id,
            duration_ms = record.duration_ms,
            "workflow execution completed"
        );
        self.notifier.emit(ProgressEvent::Completed {
            execution_id: record.id.clone(),
        });
        Ok(record)
    }

    /// Bind and invoke one step with no workflow bookkeeping.
    ///
    /// Shared by the inline path and the queue drain. Never returns an error:
    /// binding and invocation failures become a failing [`StepResult`].
    pub async fn execute_single_step(
        &self,
        step: &WorkflowStep,
        record: &ExecutionRecord,
        request_params: &Map<String, Value>,
    ) -> StepResult {
        let started = Instant::now();
        let values = step_values(record);

        let bound = match self.binder.bind_step(step, &values, request_params) {
            Ok(bound) => bound,
            Err(err) => {
                warn!(step = step.step_number, error = %err, "binding failed");
                return StepResult::failure(
                    step.step_number,
                    ErrorInfo::new(err.to_string(), codes::UNRESOLVED_REFERENCE),
                    elapsed_ms(started),
                );
            }
        };

        let call = ToolCall {
            target: bound.target,
            action: bound.action,
            intent: bound.intent,
            params: bound.params,
            payload: bound.payload,
        };

        match self.invoker.invoke(&call).await {
            Ok(value) => {
                if let Some(message) = embedded_error(&value) {
                    return StepResult::failure(
                        step.step_number,
                        ErrorInfo::new(message, codes::TOOL_ERROR),
                        elapsed_ms(started),
                    );
                }
                debug!(
                    step = step.step_number,
                    target = %call.target,
                    action = %call.action,
                    "step completed"
                );
                StepResult::success(step.step_number, value, elapsed_ms(started))
            }
            Err(err) => {
                warn!(
                    step = step.step_number,
                    target = %call.target,
                    error = %err,
                    "tool invocation failed"
                );
                // Transient failures keep a distinct code so the retry
                // wrapper can tell them apart from hard failures
                let code = if err.is_retryable() {
                    codes::TRANSIENT_ERROR
                } else {
                    codes::TOOL_ERROR
                };
                StepResult::failure(
                    step.step_number,
                    ErrorInfo::new(err.to_string(), code),
                    elapsed_ms(started),
                )
            }
        }
    }

    async fn wait_for_async_step(
        &self,
        execution_id: &str,
        step_number: u32,
    ) -> Result<AsyncWait, WorkflowError> {
        loop {
            match self.queue.async_step_status(execution_id, step_number)? {
                Some(status) if status.is_terminal() => {
                    return Ok(AsyncWait::Finished(status));
                }
                Some(_) => {}
                // Entry vanished; treat like a failed dependency
                None => return Ok(AsyncWait::Finished(AsyncStepStatus::Failed)),
            }

            let record = self.reload(execution_id)?;
            if record.status == ExecutionStatus::Cancelled {
                return Ok(AsyncWait::ParentCancelled);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// An async dependency failed or was cancelled; settle the record
    fn settle_async_failure(
        &self,
        execution_id: &str,
        step_number: u32,
    ) -> Result<ExecutionRecord, WorkflowError> {
        let mut record = self.reload(execution_id)?;
        if !record.is_terminal() {
            record.mark_failed(
                format!("async step {} did not complete", step_number),
                codes::TOOL_ERROR,
            );
            self.store.save_execution(&record)?;
        }
        if let Some(error) = record.last_error.clone() {
            self.notifier.emit(ProgressEvent::Failed {
                execution_id: record.id.clone(),
                error,
            });
        }
        Ok(record)
    }

    fn reload(&self, id: &str) -> Result<ExecutionRecord, WorkflowError> {
        self.store
            .find_execution(id)?
            .ok_or_else(|| WorkflowError::Storage(anyhow::anyhow!("execution {} disappeared", id)))
    }

    fn emit_cancelled(&self, record: &ExecutionRecord) {
        info!(execution_id = %record.id, "workflow execution cancelled");
        self.notifier.emit(ProgressEvent::Cancelled {
            execution_id: record.id.clone(),
        });
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

/// A result object carrying an `error` key fails the step
fn embedded_error(value: &Value) -> Option<String> {
    let err = value.get("error")?;
    if err.is_null() {
        return None;
    }
    Some(match err {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
