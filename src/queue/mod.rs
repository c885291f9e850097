#![allow(dead_code)]

//! Async step queue
//!
//! Steps flagged `is_async` are not run inline by the engine; they are queued
//! here and drained by a background pass. Each entry moves through
//! Queued -> Starting -> Running -> {Completed, Failed, Cancelled}, with the
//! Queued -> Starting claim done atomically so two drain passes never run the
//! same entry. Finished results fold back into the parent execution record.

use crate::store::ExecutionStore;
use crate::workflow::{ErrorInfo, StepResult, WorkflowExecutionEngine, WorkflowStep, codes};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// State of a queued async step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncStepStatus {
    Queued,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AsyncStepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AsyncStepStatus::Completed | AsyncStepStatus::Failed | AsyncStepStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncStepStatus::Queued => "queued",
            AsyncStepStatus::Starting => "starting",
            AsyncStepStatus::Running => "running",
            AsyncStepStatus::Completed => "completed",
            AsyncStepStatus::Failed => "failed",
            AsyncStepStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(AsyncStepStatus::Queued),
            "starting" => Some(AsyncStepStatus::Starting),
            "running" => Some(AsyncStepStatus::Running),
            "completed" => Some(AsyncStepStatus::Completed),
            "failed" => Some(AsyncStepStatus::Failed),
            "cancelled" => Some(AsyncStepStatus::Cancelled),
            _ => None,
        }
    }
}

/// One queued async step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAsyncStep {
    pub execution_id: String,
    pub step_number: u32,
    pub step: WorkflowStep,

    /// Request-level params captured at queue time, for `{{params.x}}`
    #[serde(default)]
    pub request_params: Map<String, Value>,

    pub status: AsyncStepStatus,
    pub queued_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl QueuedAsyncStep {
    pub fn new(execution_id: String, step: WorkflowStep) -> Self {
        Self {
            execution_id,
            step_number: step.step_number,
            step,
            request_params: Map::new(),
            status: AsyncStepStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// Queue of async steps awaiting a drain pass
pub struct AsyncStepQueue {
    store: Arc<ExecutionStore>,
}

impl AsyncStepQueue {
    pub fn new(store: Arc<ExecutionStore>) -> Self {
        Self { store }
    }

    /// Queue a step for background execution.
    ///
    /// Idempotent while an entry for the same (execution, step) is still in
    /// flight: re-queueing is a no-op and returns false. A terminal entry may
    /// be re-queued, which resets it.
    pub fn queue_async_step(
        &self,
        execution_id: &str,
        step: &WorkflowStep,
        request_params: &Map<String, Value>,
    ) -> Result<bool> {
        if let Some(existing) = self
            .store
            .find_queued_step(execution_id, step.step_number)?
        {
            if !existing.status.is_terminal() {
                debug!(
                    execution_id,
                    step = step.step_number,
                    "async step already queued, skipping"
                );
                return Ok(false);
            }
        }

        let mut entry = QueuedAsyncStep::new(execution_id.to_string(), step.clone());
        entry.request_params = request_params.clone();
        self.store.save_queued_step(&entry)?;

        info!(execution_id, step = step.step_number, "queued async step");
        Ok(true)
    }

    pub fn async_step_status(
        &self,
        execution_id: &str,
        step_number: u32,
    ) -> Result<Option<AsyncStepStatus>> {
        Ok(self
            .store
            .find_queued_step(execution_id, step_number)?
            .map(|entry| entry.status))
    }

    /// Queued steps for one execution, ascending by step number
    pub fn list_async_steps(&self, execution_id: &str) -> Result<Vec<QueuedAsyncStep>> {
        self.store.queued_steps_for_execution(execution_id)
    }

    /// Cancel a queued step.
    ///
    /// Legal in Queued and Starting. A Running step is marked Cancelled
    /// best-effort: the underlying call may still finish, but its result is
    /// discarded instead of folded into the execution. Terminal entries are
    /// left alone.
    pub fn cancel_async_step(&self, execution_id: &str, step_number: u32) -> Result<bool> {
        let Some(mut entry) = self.store.find_queued_step(execution_id, step_number)? else {
            return Ok(false);
        };

        if entry.status.is_terminal() {
            return Ok(false);
        }

        if entry.status == AsyncStepStatus::Running {
            warn!(
                execution_id,
                step = step_number,
                "cancelling running async step, in-flight result will be discarded"
            );
        }

        entry.status = AsyncStepStatus::Cancelled;
        entry.completed_at = Some(Utc::now());
        entry.error = Some(ErrorInfo::new("Async step cancelled", codes::CANCELLED));
        self.store.save_queued_step(&entry)?;
        Ok(true)
    }

    /// Drain one pass of the queue.
    ///
    /// Claims every Queued entry, runs each through the engine with the parent
    /// execution's accumulated results, and folds outcomes back into the
    /// parent record. Returns the number of entries processed.
    pub async fn process_queue(&self, engine: &WorkflowExecutionEngine) -> Result<usize> {
        let claimed = self.store.claim_queued_steps()?;
        if claimed.is_empty() {
            return Ok(0);
        }

        debug!(count = claimed.len(), "draining async step queue");
        let mut processed = 0;

        for mut entry in claimed {
            let Some(record) = self.store.find_execution(&entry.execution_id)? else {
                entry.status = AsyncStepStatus::Failed;
                entry.completed_at = Some(Utc::now());
                entry.error = Some(ErrorInfo::new(
                    "Parent execution not found",
                    codes::VALIDATION_ERROR,
                ));
                self.store.save_queued_step(&entry)?;
                continue;
            };

            if record.is_terminal() {
                // Parent already settled (cancelled or failed); drop the step
                entry.status = AsyncStepStatus::Cancelled;
                entry.completed_at = Some(Utc::now());
                entry.error = Some(ErrorInfo::new(
                    "Parent execution already finished",
                    codes::CANCELLED,
                ));
                self.store.save_queued_step(&entry)?;
                continue;
            }

            entry.status = AsyncStepStatus::Running;
            self.store.save_queued_step(&entry)?;

            let result = engine
                .execute_single_step(&entry.step, &record, &entry.request_params)
                .await;

            // A cancel may have landed while the step was running; if so the
            // result is discarded rather than folded
            let current = self.store.find_queued_step(&entry.execution_id, entry.step_number)?;
            if matches!(current, Some(ref c) if c.status == AsyncStepStatus::Cancelled) {
                debug!(
                    execution_id = entry.execution_id,
                    step = entry.step_number,
                    "async step cancelled mid-flight, discarding result"
                );
                continue;
            }

            entry.completed_at = Some(Utc::now());
            if result.is_success() {
                entry.status = AsyncStepStatus::Completed;
                entry.result = Some(result.value.clone());
            } else {
                entry.status = AsyncStepStatus::Failed;
                entry.error = result.error.clone();
            }

            // Waiters treat a terminal entry as "result available", so the
            // result must be in the parent record before the entry turns
            // terminal
            self.fold_into_parent(&entry, result)?;
            self.store.save_queued_step(&entry)?;
            processed += 1;
        }

        Ok(processed)
    }

    fn fold_into_parent(&self, entry: &QueuedAsyncStep, result: StepResult) -> Result<()> {
        let Some(mut record) = self.store.find_execution(&entry.execution_id)? else {
            return Ok(());
        };
        if record.is_terminal() {
            return Ok(());
        }

        let failed = !result.is_success();
        let error = result.error.clone();
        record.fold_step_result(result);

        if failed {
            let error = error.unwrap_or_else(|| {
                ErrorInfo::new("Async step failed", codes::TOOL_ERROR)
            });
            record.mark_failed(error.message, error.code);
            info!(
                execution_id = entry.execution_id,
                step = entry.step_number,
                "async step failed, execution marked failed"
            );
        }

        self.store.save_execution(&record)?;
        Ok(())
    }
}

/// Spawn the periodic drain loop
pub fn spawn_drain_loop(
    queue: Arc<AsyncStepQueue>,
    engine: Arc<WorkflowExecutionEngine>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match queue.process_queue(&engine).await {
                Ok(0) => {}
                Ok(n) => debug!(processed = n, "drain pass finished"),
                Err(err) => warn!(error = %err, "drain pass failed"),
            }
        }
    })
}
