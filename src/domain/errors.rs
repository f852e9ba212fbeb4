//! Engine error taxonomy.

use thiserror::Error;

/// Errors surfaced by the engine's core subsystems.
#[derive(Debug, Error)]
pub enum EngineError {
    // Graph validation
    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task {task} depends on unknown task {dep}")]
    UnknownDependency { task: String, dep: String },

    #[error("Dependency cycle involving tasks: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    // Lifecycle
    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Engine is not running")]
    EngineNotRunning,

    #[error("Engine is shutting down; submission rejected")]
    ShuttingDown,

    #[error("Workflow {0} is already executing")]
    WorkflowAlreadyExecuting(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Task {task} not found in workflow {workflow}")]
    TaskNotFound { workflow: String, task: String },

    #[error("Saga not found: {0}")]
    SagaNotFound(String),

    #[error("Saga definition not found: {0}")]
    SagaDefinitionNotFound(String),

    #[error("Memory hub is not running")]
    MemoryHubNotRunning,

    // Lanes
    #[error("Lane already exists: {0}")]
    LaneAlreadyExists(String),

    #[error("Invalid lane config: {0}")]
    InvalidLaneConfig(String),

    #[error("Lane not found: {0}")]
    LaneNotFound(String),

    #[error("Lane {0} is closed")]
    LaneClosed(String),

    #[error("Lane {lane} refused task {task}: {outcome}")]
    LaneRefused {
        lane: String,
        task: String,
        outcome: &'static str,
    },

    // Signals
    #[error("Task {0} is already subscribed to the signal bus")]
    AlreadySubscribed(String),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    // Execution
    #[error("Task {task_id} failed after {attempts} attempt(s): {source}")]
    TaskExecution {
        task_id: String,
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Task body error: {0}")]
    TaskBody(String),

    #[error("Step {step} compensation failed after {attempts} attempt(s): {reason}")]
    CompensationFailed {
        step: String,
        attempts: u32,
        reason: String,
    },

    // Memory
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    // Persistence
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("WAL append failed: {0}")]
    WalAppend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // External
    #[error("Broadcast error: {0}")]
    Broadcast(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether this error (or any error in its source chain) is derived from
    /// cancellation or a deadline. Drives the cancelled-vs-failed terminal
    /// classification of tasks.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled(_) | Self::Timeout(_) => true,
            Self::TaskExecution { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::NotFound(err.to_string()),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_classification() {
        assert!(EngineError::Cancelled("by request".into()).is_cancellation());
        assert!(EngineError::Timeout(std::time::Duration::from_secs(1)).is_cancellation());
        assert!(!EngineError::TaskBody("boom".into()).is_cancellation());
    }

    #[test]
    fn test_cancellation_through_wrapper() {
        let err = EngineError::TaskExecution {
            task_id: "t1".into(),
            attempts: 3,
            source: Box::new(EngineError::Cancelled("deadline".into())),
        };
        assert!(err.is_cancellation());

        let err = EngineError::TaskExecution {
            task_id: "t1".into(),
            attempts: 1,
            source: Box::new(EngineError::TaskBody("boom".into())),
        };
        assert!(!err.is_cancellation());
    }
}
