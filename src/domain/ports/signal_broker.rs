//! Broker port for the broker-backed signal transport.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::EngineResult;

/// Minimal publish/subscribe surface over an external message broker.
///
/// The broker-backed signal bus publishes each signal to
/// `{channel_prefix}{task_id}` and subscribes only to its local task ids.
/// Cross-node ordering is not assumed; ordering holds per topic only.
#[async_trait]
pub trait SignalBroker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> EngineResult<()>;

    /// Subscribes to a topic, returning the delivery channel.
    async fn subscribe(&self, topic: &str) -> EngineResult<mpsc::Receiver<Vec<u8>>>;

    async fn unsubscribe(&self, topic: &str) -> EngineResult<()>;
}
