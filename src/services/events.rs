//! Typed in-process observer registry.
//!
//! Two observer patterns coexist: this registry serves in-process
//! components (global and per-workflow subscriptions), while the
//! `EventBroadcaster` port serves transport adapters. Both receive the same
//! logical events, and only after persistence.

use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

use crate::domain::models::EngineEvent;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out hub for engine events.
pub struct EventHub {
    global: broadcast::Sender<EngineEvent>,
    per_workflow: RwLock<HashMap<String, broadcast::Sender<EngineEvent>>>,
    capacity: usize,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (global, _) = broadcast::channel(capacity.max(1));
        Self {
            global,
            per_workflow: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Receives every event across all workflows.
    pub fn subscribe_all(&self) -> broadcast::Receiver<EngineEvent> {
        self.global.subscribe()
    }

    /// Receives only events whose correlation key matches `workflow_id`.
    pub async fn subscribe_workflow(&self, workflow_id: &str) -> broadcast::Receiver<EngineEvent> {
        let mut channels = self.per_workflow.write().await;
        channels
            .entry(workflow_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publishes to global subscribers and the workflow's own channel.
    /// Events are emitted in persistence order per workflow.
    pub async fn publish(&self, event: EngineEvent) {
        let workflow_id = event.workflow_id().to_string();
        {
            let channels = self.per_workflow.read().await;
            if let Some(sender) = channels.get(&workflow_id) {
                let _ = sender.send(event.clone());
            }
        }
        let _ = self.global.send(event);
    }

    /// Drops the per-workflow channel, e.g. after a purge.
    pub async fn remove_workflow(&self, workflow_id: &str) {
        self.per_workflow.write().await.remove(workflow_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{WorkflowStateEvent, WorkflowStatus};
    use chrono::Utc;

    fn event(workflow_id: &str, new_state: WorkflowStatus) -> EngineEvent {
        EngineEvent::WorkflowStateChanged(WorkflowStateEvent {
            workflow_id: workflow_id.into(),
            name: "wf".into(),
            old_state: None,
            new_state,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_global_subscriber_sees_all_workflows() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe_all();

        hub.publish(event("a", WorkflowStatus::Pending)).await;
        hub.publish(event("b", WorkflowStatus::Pending)).await;

        assert_eq!(rx.recv().await.unwrap().workflow_id(), "a");
        assert_eq!(rx.recv().await.unwrap().workflow_id(), "b");
    }

    #[tokio::test]
    async fn test_workflow_subscriber_is_filtered() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe_workflow("a").await;

        hub.publish(event("b", WorkflowStatus::Pending)).await;
        hub.publish(event("a", WorkflowStatus::Running)).await;

        let got = rx.recv().await.unwrap();
        assert_eq!(got.workflow_id(), "a");
    }
}
