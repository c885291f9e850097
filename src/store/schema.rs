//! Database schema for execution state

use anyhow::Result;
use rusqlite::Connection;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            team_id TEXT,
            workflow_id TEXT,
            task_id TEXT,
            status TEXT NOT NULL,
            scheduled_at TEXT NOT NULL,
            record TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_executions_task ON executions(task_id);
        CREATE INDEX IF NOT EXISTS idx_executions_team ON executions(team_id);
        CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id);
        CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
        CREATE INDEX IF NOT EXISTS idx_executions_scheduled ON executions(scheduled_at);

        CREATE TABLE IF NOT EXISTS queued_steps (
            execution_id TEXT NOT NULL,
            step_number INTEGER NOT NULL,
            status TEXT NOT NULL,
            queued_at TEXT NOT NULL,
            entry TEXT NOT NULL,
            PRIMARY KEY (execution_id, step_number)
        );

        CREATE INDEX IF NOT EXISTS idx_queued_steps_status ON queued_steps(status);

        CREATE TABLE IF NOT EXISTS workflows (
            id TEXT PRIMARY KEY,
            team_id TEXT,
            name TEXT NOT NULL,
            definition TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_workflows_team ON workflows(team_id);
        "#,
    )?;

    Ok(())
}
