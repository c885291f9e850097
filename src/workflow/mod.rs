//! Workflow model and execution
//!
//! This module holds:
//! - The workflow request/step/result types
//! - Upfront validation (numbering, forward references)
//! - The sequential execution engine with async step hand-off

mod engine;
mod request;

pub use engine::{WorkflowError, WorkflowExecutionEngine, validate_request};
#[allow(unused_imports)]
pub use request::{
    ErrorInfo, StepResult, StepStatus, WorkflowDefinition, WorkflowRequest, WorkflowStep, codes,
};
