//! Persistent storage port for saga WAL entries and checkpoints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::EngineResult;
use crate::domain::models::{SagaInstance, WalEntry};

/// Store for the saga write-ahead log and instance checkpoints.
///
/// WAL entries are append-only and totally ordered per saga id by their
/// monotonic sequence. The checkpoint for a saga id is the latest persisted
/// instance snapshot.
#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn append_wal(&self, entry: &WalEntry) -> EngineResult<()>;

    /// Entries for one saga, ordered by sequence.
    async fn load_wal(&self, saga_id: &str) -> EngineResult<Vec<WalEntry>>;

    /// Removes entries older than `before`; returns the purge count.
    async fn purge_wal(&self, before: DateTime<Utc>) -> EngineResult<u64>;

    async fn save_checkpoint(&self, instance: &SagaInstance) -> EngineResult<()>;

    async fn load_checkpoint(&self, saga_id: &str) -> EngineResult<Option<SagaInstance>>;

    async fn list_checkpoints(&self) -> EngineResult<Vec<SagaInstance>>;
}
