//! Persistent storage port for memory entries (the hub's L2 tier).

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::MemoryEntry;

/// Session-partitioned KV store for memory entries.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn put(&self, entry: &MemoryEntry) -> EngineResult<()>;

    async fn get(&self, session_id: &str, entry_id: &str) -> EngineResult<Option<MemoryEntry>>;

    async fn delete(&self, session_id: &str, entry_id: &str) -> EngineResult<()>;

    async fn list_session(&self, session_id: &str) -> EngineResult<Vec<MemoryEntry>>;

    /// All entries across sessions; drives the decay sweep.
    async fn list_all(&self) -> EngineResult<Vec<MemoryEntry>>;
}
