#![allow(dead_code)]

//! Execution state storage
//!
//! Everything the engine, queue and orchestrator persist lands here: execution
//! records, queued async steps and stored workflow definitions. Rows carry the
//! serialized value plus the columns queries filter on; writes are per-row
//! upserts behind a single connection, so each save is atomic.

use super::schema::init_schema;
use crate::orchestrator::{ExecutionRecord, ExecutionStatus};
use crate::queue::{AsyncStepStatus, QueuedAsyncStep};
use crate::workflow::WorkflowDefinition;
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Sqlite-backed store for execution state
pub struct ExecutionStore {
    conn: Mutex<Connection>,
}

impl ExecutionStore {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory at {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open store database at {}", path.display()))?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests and ad-hoc CLI runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Default database path under the user config directory
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("flowmux").join("executions.db"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store mutex poisoned"))
    }

    /// Insert or replace an execution record
    pub fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO executions (id, kind, team_id, workflow_id, task_id, status, scheduled_at, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record",
            (
                &record.id,
                record.kind.as_str(),
                &record.team_id,
                &record.workflow_id,
                &record.task_id,
                record.status.as_str(),
                record.scheduled_at.to_rfc3339(),
                &json,
            ),
        )?;

        Ok(())
    }

    pub fn find_execution(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row("SELECT record FROM executions WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;

        json.map(|j| serde_json::from_str(&j).context("corrupt execution record"))
            .transpose()
    }

    pub fn executions_for_task(&self, task_id: &str) -> Result<Vec<ExecutionRecord>> {
        self.query_executions("task_id = ?1", task_id)
    }

    pub fn executions_for_team(&self, team_id: &str) -> Result<Vec<ExecutionRecord>> {
        self.query_executions("team_id = ?1", team_id)
    }

    pub fn executions_for_workflow(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>> {
        self.query_executions("workflow_id = ?1", workflow_id)
    }

    pub fn executions_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionRecord>> {
        self.query_executions("status = ?1", status.as_str())
    }

    /// All executions, newest first
    pub fn list_executions(&self) -> Result<Vec<ExecutionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT record FROM executions ORDER BY scheduled_at DESC")?;
        let records = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        records
            .iter()
            .map(|j| serde_json::from_str(j).context("corrupt execution record"))
            .collect()
    }

    fn query_executions(&self, filter: &str, param: &str) -> Result<Vec<ExecutionRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT record FROM executions WHERE {} ORDER BY scheduled_at DESC",
            filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([param], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        records
            .iter()
            .map(|j| serde_json::from_str(j).context("corrupt execution record"))
            .collect()
    }

    /// Insert or replace a queued async step entry
    pub fn save_queued_step(&self, entry: &QueuedAsyncStep) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO queued_steps (execution_id, step_number, status, queued_at, entry)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(execution_id, step_number) DO UPDATE SET
                status = excluded.status,
                entry = excluded.entry",
            (
                &entry.execution_id,
                entry.step_number,
                entry.status.as_str(),
                entry.queued_at.to_rfc3339(),
                &json,
            ),
        )?;

        Ok(())
    }

    pub fn find_queued_step(
        &self,
        execution_id: &str,
        step_number: u32,
    ) -> Result<Option<QueuedAsyncStep>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT entry FROM queued_steps WHERE execution_id = ?1 AND step_number = ?2",
                (execution_id, step_number),
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j).context("corrupt queued step"))
            .transpose()
    }

    /// Queued steps for one execution, in step order
    pub fn queued_steps_for_execution(&self, execution_id: &str) -> Result<Vec<QueuedAsyncStep>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entry FROM queued_steps WHERE execution_id = ?1 ORDER BY step_number ASC",
        )?;
        let entries = stmt
            .query_map([execution_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        entries
            .iter()
            .map(|j| serde_json::from_str(j).context("corrupt queued step"))
            .collect()
    }

    /// Atomically claim all queued entries for draining.
    ///
    /// Claimed entries move Queued -> Starting before being returned, so a
    /// concurrent drain pass cannot pick them up again. Ordered by execution
    /// then ascending step number.
    pub fn claim_queued_steps(&self) -> Result<Vec<QueuedAsyncStep>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entry FROM queued_steps WHERE status = 'queued'
             ORDER BY execution_id, step_number ASC",
        )?;
        let entries = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut claimed = Vec::new();
        for json in &entries {
            let mut entry: QueuedAsyncStep =
                serde_json::from_str(json).context("corrupt queued step")?;
            entry.status = AsyncStepStatus::Starting;
            entry.started_at = Some(Utc::now());

            let updated = serde_json::to_string(&entry)?;
            // Status guard: an entry claimed elsewhere since our read is skipped
            let rows = conn.execute(
                "UPDATE queued_steps SET status = 'starting', entry = ?3
                 WHERE execution_id = ?1 AND step_number = ?2 AND status = 'queued'",
                (&entry.execution_id, entry.step_number, &updated),
            )?;
            if rows == 1 {
                claimed.push(entry);
            }
        }

        Ok(claimed)
    }

    /// Insert or replace a stored workflow definition
    pub fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let json = serde_json::to_string(workflow)?;
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO workflows (id, team_id, name, definition)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                team_id = excluded.team_id,
                name = excluded.name,
                definition = excluded.definition",
            (&workflow.id, &workflow.team_id, &workflow.name, &json),
        )?;

        Ok(())
    }

    pub fn find_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row("SELECT definition FROM workflows WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;

        json.map(|j| serde_json::from_str(&j).context("corrupt workflow definition"))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{StepResult, WorkflowRequest, WorkflowStep};
    use serde_json::json;

    fn test_step(n: u32) -> WorkflowStep {
        WorkflowStep {
            step_number: n,
            target: "api".into(),
            action: "get".into(),
            intent: None,
            params: Default::default(),
            payload: None,
            is_async: true,
        }
    }

    #[test]
    fn test_execution_round_trip() {
        let store = ExecutionStore::open_in_memory().unwrap();

        let mut record = ExecutionRecord::new_workflow(Some("team-a".into()), None);
        record.mark_started();
        record.fold_step_result(StepResult::success(1, json!("ok"), 10));
        store.save_execution(&record).unwrap();

        let loaded = store.find_execution(&record.id).unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.results.len(), 1);
        assert_eq!(loaded.team_id.as_deref(), Some("team-a"));
    }

    #[test]
    fn test_find_missing_execution() {
        let store = ExecutionStore::open_in_memory().unwrap();
        assert!(store.find_execution("nope").unwrap().is_none());
    }

    #[test]
    fn test_save_is_upsert() {
        let store = ExecutionStore::open_in_memory().unwrap();

        let mut record = ExecutionRecord::new_workflow(None, None);
        store.save_execution(&record).unwrap();
        record.mark_started();
        record.mark_completed();
        store.save_execution(&record).unwrap();

        let loaded = store.find_execution(&record.id).unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(store.list_executions().unwrap().len(), 1);
    }

    #[test]
    fn test_executions_by_status_and_task() {
        let store = ExecutionStore::open_in_memory().unwrap();

        let mut a = ExecutionRecord::new_task("task-1".into(), None, 1);
        a.mark_started();
        a.mark_completed();
        store.save_execution(&a).unwrap();

        let b = ExecutionRecord::new_task("task-1".into(), None, 1);
        store.save_execution(&b).unwrap();

        assert_eq!(store.executions_for_task("task-1").unwrap().len(), 2);
        assert_eq!(
            store
                .executions_by_status(ExecutionStatus::Completed)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            store
                .executions_by_status(ExecutionStatus::Queued)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_claim_moves_queued_to_starting_once() {
        let store = ExecutionStore::open_in_memory().unwrap();

        let entry = QueuedAsyncStep::new("exec-1".into(), test_step(2));
        store.save_queued_step(&entry).unwrap();

        let claimed = store.claim_queued_steps().unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, AsyncStepStatus::Starting);
        assert!(claimed[0].started_at.is_some());

        // Second pass has nothing left to claim
        assert!(store.claim_queued_steps().unwrap().is_empty());
    }

    #[test]
    fn test_claim_orders_by_step_number() {
        let store = ExecutionStore::open_in_memory().unwrap();
        store
            .save_queued_step(&QueuedAsyncStep::new("exec-1".into(), test_step(3)))
            .unwrap();
        store
            .save_queued_step(&QueuedAsyncStep::new("exec-1".into(), test_step(1)))
            .unwrap();

        let claimed = store.claim_queued_steps().unwrap();
        let numbers: Vec<u32> = claimed.iter().map(|e| e.step_number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn test_workflow_definition_round_trip() {
        let store = ExecutionStore::open_in_memory().unwrap();

        let workflow = WorkflowDefinition {
            id: "wf-1".into(),
            team_id: Some("team-a".into()),
            name: "daily report".into(),
            request: WorkflowRequest {
                target: "workflow".into(),
                action: "execute".into(),
                intent: None,
                params: Default::default(),
                payload: None,
                steps: vec![],
            },
        };
        store.save_workflow(&workflow).unwrap();

        let loaded = store.find_workflow("wf-1").unwrap().unwrap();
        assert_eq!(loaded.name, "daily report");
        assert!(store.find_workflow("wf-2").unwrap().is_none());
    }

    #[test]
    fn test_open_creates_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("executions.db");
        let store = ExecutionStore::open(&path).unwrap();

        let record = ExecutionRecord::new_workflow(None, None);
        store.save_execution(&record).unwrap();
        assert!(path.exists());
    }
}
