//! Saga write-ahead log writer.
//!
//! Sync mode flushes each append before returning; async mode pushes
//! entries through a bounded buffer drained by a background flusher. A
//! cleanup loop purges entries older than the retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{SagaConfig, WalEntry};
use crate::domain::ports::SagaStore;

/// WAL writer shared by the saga orchestrator.
pub struct WalWriter {
    store: Arc<dyn SagaStore>,
    /// `Some` in async mode: the bounded append buffer.
    buffer: Option<mpsc::Sender<WalEntry>>,
    stop: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl WalWriter {
    /// Creates the writer and spawns its background loops (flusher in async
    /// mode, retention cleanup always).
    pub fn new(store: Arc<dyn SagaStore>, config: &SagaConfig) -> Self {
        let stop = CancellationToken::new();
        let mut background = Vec::new();

        let buffer = if config.wal_sync {
            None
        } else {
            let (tx, mut rx) = mpsc::channel::<WalEntry>(config.wal_buffer.max(1));
            let flush_store = store.clone();
            background.push(tokio::spawn(async move {
                while let Some(entry) = rx.recv().await {
                    if let Err(err) = flush_store.append_wal(&entry).await {
                        tracing::error!(
                            saga_id = %entry.saga_id,
                            sequence = entry.sequence,
                            error = %err,
                            "async WAL flush failed"
                        );
                    }
                }
            }));
            Some(tx)
        };

        let retention = Duration::from_secs(config.wal_retention_secs.max(1));
        let cleanup_interval = Duration::from_secs(config.wal_cleanup_interval_secs.max(1));
        let cleanup_store = store.clone();
        let cleanup_stop = stop.clone();
        background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cleanup_stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let cutoff = Utc::now()
                            - chrono::Duration::from_std(retention)
                                .unwrap_or_else(|_| chrono::Duration::hours(24));
                        match cleanup_store.purge_wal(cutoff).await {
                            Ok(0) => {}
                            Ok(purged) => {
                                tracing::debug!(purged, "WAL retention purge");
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "WAL purge failed");
                            }
                        }
                    }
                }
            }
        }));

        Self {
            store,
            buffer,
            stop,
            background: Mutex::new(background),
        }
    }

    /// Appends one entry; sync mode persists before returning.
    pub async fn append(&self, entry: WalEntry) -> EngineResult<()> {
        match &self.buffer {
            None => self
                .store
                .append_wal(&entry)
                .await
                .map_err(|err| EngineError::WalAppend(err.to_string())),
            Some(tx) => tx
                .send(entry)
                .await
                .map_err(|_| EngineError::WalAppend("WAL buffer closed".into())),
        }
    }

    /// Stops the background loops. Buffered async appends that have not
    /// been flushed yet are discarded; the writer is unusable afterwards.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let handles = {
            let mut guard = self.background.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
    }
}
