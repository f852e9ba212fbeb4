//! Persistent storage port for workflow and task records.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::{TaskRecord, WorkflowFilter, WorkflowRecord};

/// KV-backed store for workflow and task records.
///
/// Implementations must be safe under concurrent access to distinct keys.
/// `get_*` return `Ok(None)` for missing keys; other operations surface
/// `EngineError::NotFound` where a key is required to exist.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn save_workflow(&self, workflow: &WorkflowRecord) -> EngineResult<()>;

    async fn get_workflow(&self, id: &str) -> EngineResult<Option<WorkflowRecord>>;

    async fn list_workflows(&self, filter: &WorkflowFilter) -> EngineResult<Vec<WorkflowRecord>>;

    /// Removes the workflow and all its task records.
    async fn delete_workflow(&self, id: &str) -> EngineResult<()>;

    async fn save_task(&self, workflow_id: &str, task: &TaskRecord) -> EngineResult<()>;

    async fn get_task(&self, workflow_id: &str, task_id: &str)
        -> EngineResult<Option<TaskRecord>>;

    async fn list_tasks(&self, workflow_id: &str) -> EngineResult<Vec<TaskRecord>>;

    /// Persists a workflow record together with a set of task records in one
    /// transaction. Used for the initial submit persist and for bulk
    /// cancellation of pending workflows.
    async fn save_workflow_with_tasks(
        &self,
        workflow: &WorkflowRecord,
        tasks: &[TaskRecord],
    ) -> EngineResult<()>;
}
