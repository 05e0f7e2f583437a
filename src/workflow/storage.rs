/// SQLite persistence layer for workflows and run history
///
/// Two concerns live here: the workflow catalog (JSON definitions plus the
/// trigger metadata the listing endpoints surface) and the append-only run
/// history written after every engine walk. The engine itself never touches
/// this module; runs take an in-memory Workflow and results are recorded by
/// the API layer afterwards.

use crate::runtime::engine::RunResult;
use crate::workflow::types::Workflow;
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

/// How many run records a history query returns by default.
const DEFAULT_RUN_HISTORY_LIMIT: u32 = 50;

/// SQLite-backed storage for workflow definitions and run outcomes
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    /// Create new storage instance with database connection
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the storage schema
    ///
    /// Creates the workflow catalog and run history tables. Safe to call
    /// multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                trigger_count INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_runs (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                success INTEGER NOT NULL,
                message TEXT NOT NULL,
                node_states JSON NOT NULL,
                duration_ms INTEGER NOT NULL,
                started_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Run history is always read per workflow, newest first.
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflow_runs_workflow
            ON workflow_runs(workflow_id, started_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a new workflow or update an existing one
    ///
    /// The trigger count is derived from the definition at save time so
    /// listings can show entry points without deserializing every document.
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let definition_json = serde_json::to_string(workflow)?;
        let trigger_count = workflow.nodes.iter().filter(|n| n.is_trigger()).count() as i64;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, definition, trigger_count, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                trigger_count = excluded.trigger_count,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&definition_json)
        .bind(trigger_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a workflow by ID
    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                let workflow: Workflow = serde_json::from_str(&definition_json)?;
                Ok(Some(workflow))
            }
            None => Ok(None),
        }
    }

    /// List all workflows with catalog metadata
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, trigger_count, created_at, updated_at
            FROM workflows ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::new();
        for row in rows {
            workflows.push(WorkflowMetadata {
                id: row.get("id"),
                name: row.get("name"),
                trigger_count: row.get("trigger_count"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            });
        }

        Ok(workflows)
    }

    /// Load all workflows for registry initialization
    pub async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>> {
        let rows = sqlx::query("SELECT id, definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            let workflow: Workflow = serde_json::from_str(&definition_json)?;
            workflows.insert(id, workflow);
        }

        Ok(workflows)
    }

    /// Delete a workflow and its run history
    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM workflow_runs WHERE workflow_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record one finished run in the history table
    ///
    /// Per-node states are stored as the same JSON the run endpoint returns,
    /// so a history entry replays exactly what the caller saw. Returns the
    /// generated run id.
    pub async fn record_run(&self, result: &RunResult, duration_ms: i64) -> Result<String> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let node_states_json = serde_json::to_string(&result.node_states)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_runs (id, workflow_id, success, message, node_states, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run_id)
        .bind(&result.workflow_id)
        .bind(result.success)
        .bind(&result.message)
        .bind(&node_states_json)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;

        tracing::debug!("💾 Recorded run {} for workflow {}", run_id, result.workflow_id);

        Ok(run_id)
    }

    /// List the most recent runs of a workflow, newest first
    pub async fn list_runs(&self, workflow_id: &str, limit: Option<u32>) -> Result<Vec<RunRecord>> {
        let limit = limit.unwrap_or(DEFAULT_RUN_HISTORY_LIMIT);
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, success, message, node_states, duration_ms, started_at
            FROM workflow_runs
            WHERE workflow_id = ?
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::new();
        for row in rows {
            let node_states_json: String = row.get("node_states");
            runs.push(RunRecord {
                id: row.get("id"),
                workflow_id: row.get("workflow_id"),
                success: row.get("success"),
                message: row.get("message"),
                node_states: serde_json::from_str(&node_states_json)?,
                duration_ms: row.get("duration_ms"),
                started_at: row.get("started_at"),
            });
        }

        Ok(runs)
    }
}

/// Catalog metadata for listing operations
#[derive(Debug, serde::Serialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub trigger_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// One persisted run outcome
#[derive(Debug, serde::Serialize)]
pub struct RunRecord {
    pub id: String,
    pub workflow_id: String,
    pub success: bool,
    pub message: String,
    pub node_states: HashMap<String, crate::workflow::types::NodeExecutionState>,
    pub duration_ms: i64,
    pub started_at: String,
}
