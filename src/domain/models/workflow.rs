//! Workflow domain model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{TaskDefinition, TaskRecord, TaskStatus};

/// Persisted status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "scheduled" => Some(Self::Scheduled),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn valid_transitions(&self) -> &'static [WorkflowStatus] {
        match self {
            Self::Pending => &[Self::Scheduled, Self::Failed, Self::Cancelled],
            Self::Scheduled => &[Self::Running, Self::Failed, Self::Cancelled],
            Self::Running => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied workflow submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl WorkflowRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Whether `submit` waits for the driver to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Return once the workflow reaches a terminal state.
    Sync,
    /// Return immediately after the initial persist.
    Async,
}

impl Default for SubmitMode {
    fn default() -> Self {
        Self::Async
    }
}

/// The persisted workflow record. Mutated only by the runtime; destroyed
/// only by explicit purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: WorkflowStatus,
    pub tasks: Vec<TaskDefinition>,
    pub task_status: HashMap<String, TaskRecord>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl WorkflowRecord {
    /// Build a fresh `pending` record from a request, with one `pending`
    /// task record per declared task.
    pub fn from_request(request: WorkflowRequest) -> Self {
        let task_status = request
            .tasks
            .iter()
            .map(|def| (def.id.clone(), TaskRecord::from_definition(def)))
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            status: WorkflowStatus::Pending,
            tasks: request.tasks,
            task_status,
            metadata: request.metadata,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn task_definition(&self, task_id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Ids of tasks not yet in a terminal state.
    pub fn non_terminal_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .task_status
            .values()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn all_tasks_terminal(&self) -> bool {
        self.task_status.values().all(|t| t.status.is_terminal())
    }
}

/// Filter for workflow listings.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_transitions() {
        assert!(WorkflowStatus::Pending.can_transition_to(WorkflowStatus::Scheduled));
        assert!(WorkflowStatus::Scheduled.can_transition_to(WorkflowStatus::Running));
        assert!(WorkflowStatus::Running.can_transition_to(WorkflowStatus::Completed));
        assert!(!WorkflowStatus::Pending.can_transition_to(WorkflowStatus::Running));
        assert!(!WorkflowStatus::Running.can_transition_to(WorkflowStatus::Pending));
    }

    #[test]
    fn test_terminal_workflow_is_immutable() {
        for terminal in [
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            assert!(terminal.valid_transitions().is_empty());
        }
    }

    #[test]
    fn test_record_from_request() {
        let request = WorkflowRequest::new("etl")
            .with_task(TaskDefinition::new("a", "Extract"))
            .with_task(TaskDefinition::new("b", "Load").with_deps(["a"]));

        let record = WorkflowRecord::from_request(request);
        assert_eq!(record.status, WorkflowStatus::Pending);
        assert_eq!(record.task_status.len(), 2);
        assert!(record
            .task_status
            .values()
            .all(|t| t.status == TaskStatus::Pending));
        assert_eq!(record.non_terminal_tasks(), vec!["a", "b"]);
    }
}
