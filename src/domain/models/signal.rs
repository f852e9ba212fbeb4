//! In-band control signals delivered to running tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an interrupt should take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptMode {
    /// Ask the body to finish its current step and stop.
    Graceful,
    /// Cancel the task context outright.
    Forced,
}

/// Kind of control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalKind {
    /// Opaque parameter update; the body is expected to re-read parameters.
    Steer,
    Interrupt { mode: InterruptMode },
    /// Request an intermediate result fan-in.
    Collect,
}

/// A signal addressed to one runtime task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub kind: SignalKind,
    pub target_task_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(kind: SignalKind, target_task_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target_task_id: target_task_id.into(),
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn steer(target: impl Into<String>, payload: serde_json::Value) -> Self {
        let mut signal = Self::new(SignalKind::Steer, target);
        signal.payload = payload;
        signal
    }

    pub fn interrupt(target: impl Into<String>, mode: InterruptMode) -> Self {
        Self::new(SignalKind::Interrupt { mode }, target)
    }

    pub fn collect(target: impl Into<String>) -> Self {
        Self::new(SignalKind::Collect, target)
    }
}

/// Result of publishing: delivery is best-effort to a live subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    NoSubscriber,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_constructors() {
        let s = Signal::steer("task-1", serde_json::json!({"rate": 2}));
        assert_eq!(s.kind, SignalKind::Steer);
        assert_eq!(s.target_task_id, "task-1");

        let i = Signal::interrupt("task-1", InterruptMode::Forced);
        assert_eq!(
            i.kind,
            SignalKind::Interrupt {
                mode: InterruptMode::Forced
            }
        );
    }

    #[test]
    fn test_signal_serde_round_trip() {
        let s = Signal::collect("task-9");
        let json = serde_json::to_string(&s).unwrap();
        let back: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, SignalKind::Collect);
        assert_eq!(back.target_task_id, "task-9");
    }
}
