//! SQLite implementation of the workflow store.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::adapters::sqlite::{parse_datetime, parse_json_or_default, parse_optional_datetime};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    TaskDefinition, TaskRecord, TaskStatus, WorkflowFilter, WorkflowRecord, WorkflowStatus,
};
use crate::domain::ports::WorkflowStore;

#[derive(Clone)]
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

impl SqliteWorkflowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_tasks(&self, workflow_id: &str) -> EngineResult<Vec<TaskRecord>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM workflow_tasks WHERE workflow_id = ? ORDER BY task_id",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn assemble(&self, row: WorkflowRow) -> EngineResult<WorkflowRecord> {
        let tasks = self.load_tasks(&row.id).await?;
        let mut record: WorkflowRecord = row.try_into()?;
        record.task_status = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Ok(record)
    }
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn save_workflow(&self, workflow: &WorkflowRecord) -> EngineResult<()> {
        upsert_workflow(&self.pool, workflow).await
    }

    async fn get_workflow(&self, id: &str) -> EngineResult<Option<WorkflowRecord>> {
        let row: Option<WorkflowRow> = sqlx::query_as("SELECT * FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> EngineResult<Vec<WorkflowRecord>> {
        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;

        let rows: Vec<WorkflowRow> = match filter.status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT * FROM workflows WHERE status = ?
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM workflows ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.assemble(row).await?);
        }
        Ok(records)
    }

    async fn delete_workflow(&self, id: &str) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM workflow_tasks WHERE workflow_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::WorkflowNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn save_task(&self, workflow_id: &str, task: &TaskRecord) -> EngineResult<()> {
        upsert_task(&self.pool, workflow_id, task).await
    }

    async fn get_task(
        &self,
        workflow_id: &str,
        task_id: &str,
    ) -> EngineResult<Option<TaskRecord>> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT * FROM workflow_tasks WHERE workflow_id = ? AND task_id = ?",
        )
        .bind(workflow_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_tasks(&self, workflow_id: &str) -> EngineResult<Vec<TaskRecord>> {
        self.load_tasks(workflow_id).await
    }

    async fn save_workflow_with_tasks(
        &self,
        workflow: &WorkflowRecord,
        tasks: &[TaskRecord],
    ) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        let tasks_json = serde_json::to_string(&workflow.tasks)?;
        let metadata_json = serde_json::to_string(&workflow.metadata)?;
        sqlx::query(
            "INSERT OR REPLACE INTO workflows
             (id, name, description, status, tasks, metadata, created_at, started_at, completed_at, error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.status.as_str())
        .bind(&tasks_json)
        .bind(&metadata_json)
        .bind(workflow.created_at.to_rfc3339())
        .bind(workflow.started_at.map(|t| t.to_rfc3339()))
        .bind(workflow.completed_at.map(|t| t.to_rfc3339()))
        .bind(&workflow.error)
        .execute(&mut *tx)
        .await?;

        for task in tasks {
            let result_json = task.result.as_ref().map(serde_json::to_string).transpose()?;
            sqlx::query(
                "INSERT OR REPLACE INTO workflow_tasks
                 (workflow_id, task_id, name, status, started_at, completed_at, error, result)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&workflow.id)
            .bind(&task.id)
            .bind(&task.name)
            .bind(task.status.as_str())
            .bind(task.started_at.map(|t| t.to_rfc3339()))
            .bind(task.completed_at.map(|t| t.to_rfc3339()))
            .bind(&task.error)
            .bind(result_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn upsert_workflow(pool: &SqlitePool, workflow: &WorkflowRecord) -> EngineResult<()> {
    let tasks_json = serde_json::to_string(&workflow.tasks)?;
    let metadata_json = serde_json::to_string(&workflow.metadata)?;
    sqlx::query(
        "INSERT OR REPLACE INTO workflows
         (id, name, description, status, tasks, metadata, created_at, started_at, completed_at, error)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&workflow.id)
    .bind(&workflow.name)
    .bind(&workflow.description)
    .bind(workflow.status.as_str())
    .bind(&tasks_json)
    .bind(&metadata_json)
    .bind(workflow.created_at.to_rfc3339())
    .bind(workflow.started_at.map(|t| t.to_rfc3339()))
    .bind(workflow.completed_at.map(|t| t.to_rfc3339()))
    .bind(&workflow.error)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_task(pool: &SqlitePool, workflow_id: &str, task: &TaskRecord) -> EngineResult<()> {
    let result_json = task.result.as_ref().map(serde_json::to_string).transpose()?;
    sqlx::query(
        "INSERT OR REPLACE INTO workflow_tasks
         (workflow_id, task_id, name, status, started_at, completed_at, error, result)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(workflow_id)
    .bind(&task.id)
    .bind(&task.name)
    .bind(task.status.as_str())
    .bind(task.started_at.map(|t| t.to_rfc3339()))
    .bind(task.completed_at.map(|t| t.to_rfc3339()))
    .bind(&task.error)
    .bind(result_json)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    description: String,
    status: String,
    tasks: String,
    metadata: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
}

impl TryFrom<WorkflowRow> for WorkflowRecord {
    type Error = EngineError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let status = WorkflowStatus::from_str(&row.status)
            .ok_or_else(|| EngineError::Serialization(format!("bad workflow status: {}", row.status)))?;
        let tasks: Vec<TaskDefinition> = serde_json::from_str(&row.tasks)?;
        let metadata: HashMap<String, String> = parse_json_or_default(Some(row.metadata))?;

        Ok(WorkflowRecord {
            id: row.id,
            name: row.name,
            description: row.description,
            status,
            tasks,
            task_status: HashMap::new(),
            metadata,
            created_at: parse_datetime(&row.created_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            error: row.error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    #[allow(dead_code)]
    workflow_id: String,
    task_id: String,
    name: String,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
    result: Option<String>,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = EngineError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| EngineError::Serialization(format!("bad task status: {}", row.status)))?;
        let result = row
            .result
            .map(|r| serde_json::from_str(&r))
            .transpose()?;

        Ok(TaskRecord {
            id: row.task_id,
            name: row.name,
            status,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            error: row.error,
            result,
        })
    }
}
