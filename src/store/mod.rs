//! Sqlite persistence for executions, queued steps and workflow definitions

mod schema;
mod store;

pub use store::ExecutionStore;
