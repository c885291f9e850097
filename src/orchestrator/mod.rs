//! Agent task orchestration
//!
//! Tasks, the shared execution lifecycle, timeout/retry policy, and the
//! orchestrator that drives task executions through the workflow engine.

mod lifecycle;
mod policy;
mod runner;
mod task;

#[allow(unused_imports)]
pub use lifecycle::ExecutionKind;
pub use lifecycle::{ExecutionRecord, ExecutionStatus};
pub use policy::RetryPolicy;
#[allow(unused_imports)]
pub use policy::{timeout_for, timeout_multiplier};
#[allow(unused_imports)]
pub use runner::{AgentTaskOrchestrator, OrchestratorError, TriggerContext};
#[allow(unused_imports)]
pub use task::{AgentTask, ExecutionStrategy, TaskCategory};
