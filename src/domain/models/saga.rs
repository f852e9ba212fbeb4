//! Saga domain model: instances, WAL entries, and checkpoints.
//!
//! A saga is a compensable transaction composed of steps with forward and
//! reverse bodies. The runtime definition (with its bodies) lives in the
//! saga service; these are the persisted shapes.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Saga-level (or per-step override) compensation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationPolicy {
    /// Compensate completed steps automatically on failure.
    Auto,
    /// Hold in `pending-compensation` until triggered by an operator.
    Manual,
    /// Terminate `failed` without compensation.
    Skip,
}

impl Default for CompensationPolicy {
    fn default() -> Self {
        Self::Auto
    }
}

/// Exponential backoff bounds for compensation retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompensationRetryConfig {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
    pub max_retries: u32,
}

impl Default for CompensationRetryConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

/// State of a saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SagaState {
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
    PendingCompensation,
}

impl SagaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::CompensationFailed => "compensation-failed",
            Self::PendingCompensation => "pending-compensation",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "compensating" => Some(Self::Compensating),
            "compensated" => Some(Self::Compensated),
            "compensation-failed" => Some(Self::CompensationFailed),
            "pending-compensation" => Some(Self::PendingCompensation),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Compensated | Self::CompensationFailed
        )
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A saga instance snapshot. This is also the checkpoint payload: the
/// checkpoint for a saga id is simply its latest persisted instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    pub id: String,
    pub definition_name: String,
    pub state: SagaState,
    pub completed_steps: Vec<String>,
    pub compensated: Vec<String>,
    pub failed_step: Option<String>,
    pub failure_reason: Option<String>,
    pub step_results: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SagaInstance {
    pub fn new(id: impl Into<String>, definition_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            definition_name: definition_name.into(),
            state: SagaState::Running,
            completed_steps: Vec::new(),
            compensated: Vec::new(),
            failed_step: None,
            failure_reason: None,
            step_results: HashMap::new(),
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            completed_at: None,
        }
    }

    pub fn is_step_completed(&self, step_id: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_id)
    }

    pub fn is_step_compensated(&self, step_id: &str) -> bool {
        self.compensated.iter().any(|s| s == step_id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// WAL event kinds for step lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalEventKind {
    StepStarted,
    StepCompleted,
    StepFailed,
    StepCompensated,
}

impl WalEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepStarted => "step_started",
            Self::StepCompleted => "step_completed",
            Self::StepFailed => "step_failed",
            Self::StepCompensated => "step_compensated",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "step_started" => Some(Self::StepStarted),
            "step_completed" => Some(Self::StepCompleted),
            "step_failed" => Some(Self::StepFailed),
            "step_compensated" => Some(Self::StepCompensated),
            _ => None,
        }
    }
}

/// Append-only WAL record keyed by `(saga_id, sequence)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub saga_id: String,
    pub sequence: u64,
    pub kind: WalEventKind,
    pub step_id: String,
    /// Step result for `StepCompleted`.
    pub payload: Option<serde_json::Value>,
    /// Failure text for `StepFailed`.
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl WalEntry {
    pub fn new(
        saga_id: impl Into<String>,
        sequence: u64,
        kind: WalEventKind,
        step_id: impl Into<String>,
    ) -> Self {
        Self {
            saga_id: saga_id.into(),
            sequence,
            kind,
            step_id: step_id.into(),
            payload: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saga_state_round_trip() {
        for state in [
            SagaState::Running,
            SagaState::Completed,
            SagaState::Failed,
            SagaState::Compensating,
            SagaState::Compensated,
            SagaState::CompensationFailed,
            SagaState::PendingCompensation,
        ] {
            assert_eq!(SagaState::from_str(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(SagaState::Compensated.is_terminal());
        assert!(SagaState::CompensationFailed.is_terminal());
        assert!(!SagaState::Compensating.is_terminal());
        assert!(!SagaState::PendingCompensation.is_terminal());
    }

    #[test]
    fn test_instance_bookkeeping() {
        let mut instance = SagaInstance::new("s1", "order");
        instance.completed_steps.push("reserve".into());
        assert!(instance.is_step_completed("reserve"));
        assert!(!instance.is_step_completed("charge"));
        assert!(!instance.is_step_compensated("reserve"));
    }
}
