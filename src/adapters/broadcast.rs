//! Broadcaster adapter backed by a transport-side event hub.
//!
//! Two observer paths coexist, and the engine drives both itself: after a
//! successful persist it publishes each event to its internal [`EventHub`]
//! (the in-process registry behind `WorkflowEngine::event_hub`) and then
//! invokes the configured `EventBroadcaster` port. The port is an
//! independent fan-out for transport shells (WebSocket, SSE, ...), not the
//! delivery mechanism for the internal hub.
//!
//! `ChannelBroadcaster` implements the port over a hub it owns, so
//! transport adapters get their own subscription surface. It deliberately
//! cannot be pointed at the engine's internal hub; doing so would deliver
//! every event twice to the same subscribers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::{EngineEvent, TaskStateEvent, WorkflowStateEvent};
use crate::domain::ports::EventBroadcaster;
use crate::services::events::EventHub;

/// Relays persisted state changes into a hub owned by this adapter.
pub struct ChannelBroadcaster {
    hub: Arc<EventHub>,
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(EventHub::default()),
        }
    }

    /// The transport-side hub; subscribe here for relayed events.
    pub fn hub(&self) -> Arc<EventHub> {
        self.hub.clone()
    }
}

#[async_trait]
impl EventBroadcaster for ChannelBroadcaster {
    async fn broadcast_workflow_state_changed(
        &self,
        event: &WorkflowStateEvent,
    ) -> EngineResult<()> {
        self.hub
            .publish(EngineEvent::WorkflowStateChanged(event.clone()))
            .await;
        Ok(())
    }

    async fn broadcast_task_state_changed(&self, event: &TaskStateEvent) -> EngineResult<()> {
        self.hub
            .publish(EngineEvent::TaskStateChanged(event.clone()))
            .await;
        Ok(())
    }
}
