#![allow(dead_code)]

//! Agent task model

use crate::workflow::WorkflowRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Category of work a task performs, used to scale its timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskCategory {
    LlmAnalysis,
    VectorOperations,
    DataProcessing,
    CustomScript,
    ApiCall,
    Notification,
    WorkflowTrigger,
    WorkflowEmbedded,
    DataSync,
    Monitoring,
    Reporting,
}

/// How a task obtains the workflow it runs.
///
/// Resolved exactly once when an execution starts; a task either points at a
/// stored workflow by id, embeds a full request, or carries an ad-hoc request
/// supplied at trigger time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionStrategy {
    TriggerById { workflow_id: String },
    Embedded { request: WorkflowRequest },
    AdHoc { request: WorkflowRequest },
}

/// An agent task definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    pub category: TaskCategory,
    pub strategy: ExecutionStrategy,

    /// Retry budget for transient failures; 2 means up to 3 attempts
    #[serde(default)]
    pub max_retries: u32,

    /// Base timeout before the category multiplier is applied
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Default params, overridable by trigger-time input
    #[serde(default)]
    pub params: Map<String, Value>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout_minutes() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

impl AgentTask {
    /// Total attempts this task may consume
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}
