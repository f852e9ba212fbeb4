//! State-change events fanned out to observers after persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskStatus;
use super::workflow::WorkflowStatus;

/// `workflow.state_changed` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStateEvent {
    pub workflow_id: String,
    pub name: String,
    pub old_state: Option<WorkflowStatus>,
    pub new_state: WorkflowStatus,
    pub timestamp: DateTime<Utc>,
}

/// `task.state_changed` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStateEvent {
    pub workflow_id: String,
    pub task_id: String,
    pub task_name: String,
    pub old_state: Option<TaskStatus>,
    pub new_state: TaskStatus,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Union of events carried by the in-process observer registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    WorkflowStateChanged(WorkflowStateEvent),
    TaskStateChanged(TaskStateEvent),
}

impl EngineEvent {
    /// Correlation key: the owning workflow id.
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::WorkflowStateChanged(e) => &e.workflow_id,
            Self::TaskStateChanged(e) => &e.workflow_id,
        }
    }
}
