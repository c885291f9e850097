#![allow(dead_code)]

//! Workflow request and step result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A workflow request: a target/action pair plus an ordered list of steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub target: String,
    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    /// Request-level params, visible to every step as `{{params.x}}`
    #[serde(default)]
    pub params: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

/// One step of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// 1-based position; steps must be numbered 1..=n without gaps
    pub step_number: u32,

    pub target: String,
    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(default)]
    pub params: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Async steps are queued and drained in the background
    #[serde(default)]
    pub is_async: bool,
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failure,
}

/// Machine-readable error attached to a failed step or execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub code: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message, codes::VALIDATION_ERROR)
    }

    pub fn timeout() -> Self {
        Self::new("Execution timed out", codes::TIMEOUT)
    }
}

/// Error codes shared across the crate
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const UNRESOLVED_REFERENCE: &str = "UNRESOLVED_REFERENCE";
    pub const TOOL_ERROR: &str = "TOOL_ERROR";
    pub const TRANSIENT_ERROR: &str = "TRANSIENT_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const CANCELLED: &str = "CANCELLED";
}

/// Result of one executed step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_number: u32,
    pub status: StepStatus,

    /// The step's output value; `null` for failed steps
    #[serde(default)]
    pub value: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    pub duration_ms: i64,
    pub executed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn success(step_number: u32, value: Value, duration_ms: i64) -> Self {
        Self {
            step_number,
            status: StepStatus::Success,
            value,
            error: None,
            duration_ms,
            executed_at: Utc::now(),
        }
    }

    pub fn failure(step_number: u32, error: ErrorInfo, duration_ms: i64) -> Self {
        Self {
            step_number,
            status: StepStatus::Failure,
            value: Value::Null,
            error: Some(error),
            duration_ms,
            executed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// A stored workflow, addressable by id from trigger-by-id tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    pub name: String,
    pub request: WorkflowRequest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: WorkflowRequest = serde_json::from_value(json!({
            "target": "workflow",
            "action": "execute",
            "steps": [
                {"step_number": 1, "target": "llm", "action": "generate"}
            ]
        }))
        .unwrap();

        assert_eq!(request.steps.len(), 1);
        assert!(!request.steps[0].is_async);
        assert!(request.steps[0].params.is_empty());
        assert!(request.payload.is_none());
    }

    #[test]
    fn test_step_result_round_trip() {
        let result = StepResult::success(1, json!({"ok": true}), 120);
        let json = serde_json::to_value(&result).unwrap();
        let back: StepResult = serde_json::from_value(json).unwrap();

        assert_eq!(back.step_number, 1);
        assert!(back.is_success());
        assert_eq!(back.value, json!({"ok": true}));
    }

    #[test]
    fn test_failure_carries_error_info() {
        let result = StepResult::failure(2, ErrorInfo::timeout(), 30_000);
        assert!(!result.is_success());
        let error = result.error.unwrap();
        assert_eq!(error.code, codes::TIMEOUT);
        assert_eq!(error.message, "Execution timed out");
    }
}
