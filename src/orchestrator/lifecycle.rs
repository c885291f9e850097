#![allow(dead_code)]

//! Execution lifecycle
//!
//! Workflow executions and agent task executions share one record shape and
//! one state machine: Queued -> Starting -> Running -> {Completed, Failed,
//! Timeout, Cancelled}. Terminal records are immutable; the engine and the
//! orchestrator both refuse to move a record out of a terminal state.

use crate::workflow::{ErrorInfo, StepResult, codes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What produced this record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Workflow,
    Task,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionKind::Workflow => "workflow",
            ExecutionKind::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workflow" => Some(ExecutionKind::Workflow),
            "task" => Some(ExecutionKind::Task),
            _ => None,
        }
    }
}

/// Execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Starting,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
        )
    }

    /// Whether a transition to `next` is legal
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Queued, Starting) | (Queued, Cancelled) | (Queued, Failed) => true,
            (Starting, Running) | (Starting, Failed) | (Starting, Cancelled) => true,
            (Running, Completed) | (Running, Failed) | (Running, Timeout) => true,
            (Running, Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Starting => "starting",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(ExecutionStatus::Queued),
            "starting" => Some(ExecutionStatus::Starting),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "timeout" => Some(ExecutionStatus::Timeout),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// One execution of a workflow or agent task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub kind: ExecutionKind,

    /// Links a task execution to the workflow execution it triggered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    pub status: ExecutionStatus,
    pub scheduled_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    pub attempt_count: u32,
    pub max_attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorInfo>,

    /// Step results accumulated so far, in step order
    #[serde(default)]
    pub results: Vec<StepResult>,
}

impl ExecutionRecord {
    pub fn new_workflow(team_id: Option<String>, workflow_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: ExecutionKind::Workflow,
            correlation_id: None,
            team_id,
            workflow_id,
            task_id: None,
            status: ExecutionStatus::Queued,
            scheduled_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            attempt_count: 0,
            max_attempts: 1,
            last_error: None,
            results: Vec::new(),
        }
    }

    pub fn new_task(task_id: String, team_id: Option<String>, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: ExecutionKind::Task,
            correlation_id: None,
            team_id,
            workflow_id: None,
            task_id: Some(task_id),
            status: ExecutionStatus::Queued,
            scheduled_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            attempt_count: 0,
            max_attempts,
            last_error: None,
            results: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to Running and stamp the start time
    pub fn mark_started(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Terminal success: clears any earlier error, records duration
    pub fn mark_completed(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.last_error = None;
        self.finish();
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, code: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.last_error = Some(ErrorInfo::new(message, code));
        self.finish();
    }

    pub fn mark_timeout(&mut self) {
        self.status = ExecutionStatus::Timeout;
        self.last_error = Some(ErrorInfo::timeout());
        self.finish();
    }

    pub fn mark_cancelled(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.last_error = Some(ErrorInfo::new("Execution cancelled", codes::CANCELLED));
        self.finish();
    }

    pub fn record_attempt(&mut self) {
        self.attempt_count += 1;
    }

    /// Insert or replace a step result, keeping results in step order
    pub fn fold_step_result(&mut self, result: StepResult) {
        match self
            .results
            .iter_mut()
            .find(|r| r.step_number == result.step_number)
        {
            Some(existing) => *existing = result,
            None => {
                self.results.push(result);
                self.results.sort_by_key(|r| r.step_number);
            }
        }
    }

    /// The final workflow value: the last step's output
    pub fn final_value(&self) -> Option<&Value> {
        self.results.last().filter(|r| r.is_success()).map(|r| &r.value)
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transition_rules() {
        use ExecutionStatus::*;
        assert!(Queued.can_transition_to(Starting));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Timeout));

        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Starting));
        assert!(!Timeout.can_transition_to(Running));
    }

    #[test]
    fn test_mark_completed_clears_error_and_records_duration() {
        let mut record = ExecutionRecord::new_workflow(None, None);
        record.mark_started();
        record.last_error = Some(ErrorInfo::new("transient", codes::TOOL_ERROR));

        record.mark_completed();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.last_error.is_none());
        assert!(record.completed_at.is_some());
        assert!(record.duration_ms.is_some());
    }

    #[test]
    fn test_mark_timeout_sets_code() {
        let mut record = ExecutionRecord::new_task("t1".into(), None, 3);
        record.mark_started();
        record.mark_timeout();

        assert_eq!(record.status, ExecutionStatus::Timeout);
        let error = record.last_error.unwrap();
        assert_eq!(error.message, "Execution timed out");
        assert_eq!(error.code, codes::TIMEOUT);
    }

    #[test]
    fn test_fold_step_result_replaces_in_place() {
        let mut record = ExecutionRecord::new_workflow(None, None);
        record.fold_step_result(StepResult::success(2, json!("b"), 5));
        record.fold_step_result(StepResult::success(1, json!("a"), 5));
        record.fold_step_result(StepResult::success(2, json!("b2"), 9));

        let numbers: Vec<u32> = record.results.iter().map(|r| r.step_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(record.results[1].value, json!("b2"));
    }

    #[test]
    fn test_final_value_is_last_successful_step() {
        let mut record = ExecutionRecord::new_workflow(None, None);
        record.fold_step_result(StepResult::success(1, json!("first"), 1));
        record.fold_step_result(StepResult::success(2, json!("last"), 1));
        assert_eq!(record.final_value(), Some(&json!("last")));
    }
}
