//! Event broadcaster port: state-change fan-out to observers.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::{TaskStateEvent, WorkflowStateEvent};

/// Fan-out of persisted state changes. The runtime invokes these only after
/// the corresponding storage write succeeds; broadcaster failures are logged
/// by the caller and never block a transition.
#[async_trait]
pub trait EventBroadcaster: Send + Sync {
    async fn broadcast_workflow_state_changed(
        &self,
        event: &WorkflowStateEvent,
    ) -> EngineResult<()>;

    async fn broadcast_task_state_changed(&self, event: &TaskStateEvent) -> EngineResult<()>;
}

/// Broadcaster that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBroadcaster;

#[async_trait]
impl EventBroadcaster for NullBroadcaster {
    async fn broadcast_workflow_state_changed(
        &self,
        _event: &WorkflowStateEvent,
    ) -> EngineResult<()> {
        Ok(())
    }

    async fn broadcast_task_state_changed(&self, _event: &TaskStateEvent) -> EngineResult<()> {
        Ok(())
    }
}
