//! Task domain model.
//!
//! A workflow is declared as a set of immutable task definitions forming a
//! DAG. At runtime each definition is shadowed by a mutable task record that
//! moves through the task state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is declared but not yet admitted to a lane
    Pending,
    /// Task has been admitted (or re-admitted after a retry)
    Scheduled,
    /// Task body is executing
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed after exhausting its retry budget
    Failed,
    /// Task was cancelled
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
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

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status. `Running -> Scheduled` is the
    /// retry back-edge: a retrying attempt is re-admitted.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Scheduled, Self::Failed, Self::Cancelled],
            Self::Scheduled => &[Self::Running, Self::Failed, Self::Cancelled],
            Self::Running => &[Self::Scheduled, Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable descriptor of a task within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique within the workflow.
    pub id: String,
    pub name: String,
    /// Body selector; resolved against the function map supplied at submit.
    pub agent: String,
    /// Ids of predecessor tasks.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Target lane name; empty selects the engine default lane.
    #[serde(default)]
    pub lane: String,
    /// Max additional attempts after the first.
    #[serde(default)]
    pub retries: u32,
    /// Per-attempt timeout; `None` means unbounded.
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub priority: i32,
    /// Duration estimate used for critical-path weighting.
    #[serde(default)]
    pub estimated_duration: Option<Duration>,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent: String::new(),
            deps: Vec::new(),
            lane: String::new(),
            retries: 0,
            timeout: None,
            priority: 0,
            estimated_duration: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = lane.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimated_duration(mut self, estimate: Duration) -> Self {
        self.estimated_duration = Some(estimate);
        self
    }
}

/// Mutable per-task runtime record, persisted alongside the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl TaskRecord {
    pub fn from_definition(def: &TaskDefinition) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_retry_back_edge() {
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Scheduled));
        assert!(!TaskStatus::Scheduled.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_terminal_is_immutable() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            assert!(terminal.valid_transitions().is_empty());
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Scheduled,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("canceled"), Some(TaskStatus::Cancelled));
        assert_eq!(TaskStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_definition_builder() {
        let def = TaskDefinition::new("fetch", "Fetch input")
            .with_agent("fetcher")
            .with_deps(["seed"])
            .with_lane("io")
            .with_retries(2)
            .with_timeout(Duration::from_secs(30))
            .with_priority(5);

        assert_eq!(def.id, "fetch");
        assert_eq!(def.deps, vec!["seed"]);
        assert_eq!(def.retries, 2);
        assert_eq!(def.timeout, Some(Duration::from_secs(30)));
        assert_eq!(def.priority, 5);
    }
}
