//! Hybrid memory hub: tiered storage, vector + BM25 retrieval with RRF
//! fusion, and FSRS-style strength decay.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{MemoryConfig, MemoryEntry, MemoryQuery, RetrievalMode, ScoredEntry};
use crate::domain::ports::MemoryStore;
use crate::services::memory::bm25::Bm25Index;
use crate::services::memory::vector_index::VectorIndex;

/// Reciprocal rank fusion constant.
const RRF_K: f64 = 60.0;

/// Result of one decay sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecaySweep {
    pub scanned: usize,
    pub retained: usize,
    pub forgotten: usize,
}

/// The memory hub. `start` rebuilds the in-memory indices from the
/// persistent tier and launches the decay loop; the hub must not be used
/// before `start` or after `stop`.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: MemoryConfig,
    store: Arc<dyn MemoryStore>,
    l1: StdMutex<LruCache<String, MemoryEntry>>,
    vector: StdRwLock<VectorIndex>,
    bm25: StdRwLock<Bm25Index>,
    running: AtomicBool,
    decay_loop: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MemoryHub {
    pub fn new(store: Arc<dyn MemoryStore>, config: MemoryConfig) -> Self {
        let l1_capacity =
            NonZeroUsize::new(config.l1_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(HubInner {
                l1: StdMutex::new(LruCache::new(l1_capacity)),
                vector: StdRwLock::new(VectorIndex::new(config.vector_dimension)),
                bm25: StdRwLock::new(Bm25Index::new(config.bm25_k1, config.bm25_b)),
                running: AtomicBool::new(false),
                decay_loop: Mutex::new(None),
                store,
                config,
            }),
        }
    }

    /// Rebuilds indices from the persistent tier and starts the decay loop.
    pub async fn start(&self) -> EngineResult<()> {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let entries = inner.store.list_all().await?;
        {
            let mut vector = inner.write_vector();
            let mut bm25 = inner.write_bm25();
            for entry in &entries {
                bm25.add(&entry.id, &entry.session_id, &entry.content);
                if let Some(v) = &entry.vector {
                    if let Err(err) = vector.insert(&entry.id, &entry.session_id, v.clone()) {
                        tracing::warn!(entry_id = %entry.id, error = %err, "skipping vector");
                    }
                }
            }
        }
        tracing::info!(entries = entries.len(), "memory hub started");

        let stop = CancellationToken::new();
        let loop_inner = Arc::clone(inner);
        let loop_stop = stop.clone();
        let interval = Duration::from_secs(inner.config.decay_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = loop_stop.cancelled() => break,
                    _ = ticker.tick() => {
                        match loop_inner.run_decay_once().await {
                            Ok(sweep) if sweep.forgotten > 0 => {
                                tracing::debug!(
                                    scanned = sweep.scanned,
                                    forgotten = sweep.forgotten,
                                    "decay sweep"
                                );
                            }
                            Ok(_) => {}
                            Err(err) => tracing::warn!(error = %err, "decay sweep failed"),
                        }
                    }
                }
            }
        });
        *inner.decay_loop.lock().await = Some((stop, handle));
        Ok(())
    }

    /// Stops the decay loop; the hub refuses further use.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some((stop, handle)) = self.inner.decay_loop.lock().await.take() {
            stop.cancel();
            let _ = handle.await;
        }
        tracing::info!("memory hub stopped");
    }

    /// Stores a new entry: write-through to L1 + L2 and both indices.
    /// Fresh entries start at full strength with the default stability.
    pub async fn memorize(
        &self,
        session_id: &str,
        content: &str,
        vector: Option<Vec<f32>>,
        metadata: HashMap<String, String>,
        task_id: Option<String>,
    ) -> EngineResult<MemoryEntry> {
        self.inner.ensure_running()?;
        self.inner
            .memorize(session_id, content, vector, metadata, task_id)
            .await
    }

    /// Hybrid retrieval. Runs the requested branches, fuses by reciprocal
    /// rank, applies metadata filters, truncates to `top_k`, and boosts the
    /// returned entries.
    pub async fn retrieve(&self, query: &MemoryQuery) -> EngineResult<Vec<ScoredEntry>> {
        self.inner.ensure_running()?;
        self.inner.retrieve(query).await
    }

    /// L1-then-L2 read with promotion on L2 hits.
    pub async fn get(&self, session_id: &str, entry_id: &str) -> EngineResult<Option<MemoryEntry>> {
        self.inner.ensure_running()?;
        self.inner.fetch(session_id, entry_id).await
    }

    /// Removes an entry from both tiers and both indices.
    pub async fn forget(&self, session_id: &str, entry_id: &str) -> EngineResult<()> {
        self.inner.ensure_running()?;
        self.inner.store.delete(session_id, entry_id).await?;
        self.inner.evict(entry_id);
        Ok(())
    }

    /// One decay sweep; also runs on the background loop every
    /// `decay_interval`.
    pub async fn run_decay_once(&self) -> EngineResult<DecaySweep> {
        self.inner.ensure_running()?;
        self.inner.run_decay_once().await
    }
}

impl HubInner {
    fn ensure_running(&self) -> EngineResult<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::MemoryHubNotRunning)
        }
    }

    async fn memorize(
        &self,
        session_id: &str,
        content: &str,
        vector: Option<Vec<f32>>,
        metadata: HashMap<String, String>,
        task_id: Option<String>,
    ) -> EngineResult<MemoryEntry> {
        if session_id.is_empty() {
            return Err(EngineError::InvalidQuery("session_id cannot be empty".into()));
        }
        if let Some(v) = &vector {
            self.read_vector().check_dimension(v)?;
        }

        let mut entry = MemoryEntry::new(session_id, content, self.config.default_stability_hours);
        entry.metadata = metadata;
        entry.task_id = task_id;
        entry.vector = vector;

        self.store.put(&entry).await?;
        self.index_entry(&entry);
        self.cache_put(entry.clone());
        Ok(entry)
    }

    async fn retrieve(&self, query: &MemoryQuery) -> EngineResult<Vec<ScoredEntry>> {
        if query.session_id.is_empty() {
            return Err(EngineError::InvalidQuery("session_id cannot be empty".into()));
        }
        if query.is_empty() {
            return Err(EngineError::InvalidQuery(
                "query must carry text or a vector".into(),
            ));
        }

        let candidate_limit = query.top_k.max(1) * 4;
        let ranked: Vec<(String, f64)> = match query.mode {
            RetrievalMode::Vector => self.vector_branch(query, candidate_limit)?,
            RetrievalMode::Bm25 => self.bm25_branch(query, candidate_limit)?,
            RetrievalMode::Hybrid => {
                // Both branches run concurrently; a single failing index
                // degrades retrieval to the survivor.
                let (vector_res, bm25_res) = tokio::join!(
                    async { self.vector_branch(query, candidate_limit) },
                    async { self.bm25_branch(query, candidate_limit) },
                );
                match (vector_res, bm25_res) {
                    (Ok(v), Ok(b)) => {
                        fuse(&v, &b, self.config.weight_vector, self.config.weight_bm25)
                    }
                    (Ok(v), Err(err)) => {
                        tracing::warn!(error = %err, "BM25 branch failed; vector only");
                        v
                    }
                    (Err(err), Ok(b)) => {
                        tracing::warn!(error = %err, "vector branch failed; BM25 only");
                        b
                    }
                    (Err(err), Err(_)) => return Err(err),
                }
            }
        };

        // Materialize, filter (AND semantics), truncate.
        let mut results = Vec::new();
        for (id, score) in ranked {
            if results.len() >= query.top_k {
                break;
            }
            let Some(entry) = self.fetch(&query.session_id, &id).await? else {
                continue;
            };
            if !entry.matches_filters(&query.filters) {
                continue;
            }
            results.push(ScoredEntry { entry, score });
        }

        // Successful retrieval boosts strength and stretches stability.
        let now = Utc::now();
        for scored in &mut results {
            scored.entry.boost(now);
            self.store.put(&scored.entry).await?;
            self.cache_put(scored.entry.clone());
        }

        Ok(results)
    }

    async fn run_decay_once(&self) -> EngineResult<DecaySweep> {
        let now = Utc::now();
        let entries = self.store.list_all().await?;
        let mut sweep = DecaySweep {
            scanned: entries.len(),
            ..DecaySweep::default()
        };

        for mut entry in entries {
            let decayed = entry.decayed_strength(now);
            if decayed < self.config.forget_threshold {
                self.store.delete(&entry.session_id, &entry.id).await?;
                self.evict(&entry.id);
                sweep.forgotten += 1;
            } else {
                entry.strength = decayed;
                entry.last_review = now;
                self.store.put(&entry).await?;
                self.cache_put(entry);
                sweep.retained += 1;
            }
        }

        Ok(sweep)
    }

    fn vector_branch(&self, query: &MemoryQuery, limit: usize) -> EngineResult<Vec<(String, f64)>> {
        let Some(vector) = query.vector.as_deref().filter(|v| !v.is_empty()) else {
            return Err(EngineError::InvalidQuery("vector query without vector".into()));
        };
        self.read_vector().search(&query.session_id, vector, limit)
    }

    fn bm25_branch(&self, query: &MemoryQuery, limit: usize) -> EngineResult<Vec<(String, f64)>> {
        let Some(text) = query.text.as_deref().filter(|t| !t.is_empty()) else {
            return Err(EngineError::InvalidQuery("keyword query without text".into()));
        };
        Ok(self.read_bm25().search(&query.session_id, text, limit))
    }

    async fn fetch(&self, session_id: &str, entry_id: &str) -> EngineResult<Option<MemoryEntry>> {
        {
            let mut l1 = self.lock_l1();
            if let Some(entry) = l1.get(entry_id) {
                if entry.session_id == session_id {
                    return Ok(Some(entry.clone()));
                }
                return Ok(None);
            }
        }
        match self.store.get(session_id, entry_id).await? {
            Some(entry) => {
                self.cache_put(entry.clone());
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn index_entry(&self, entry: &MemoryEntry) {
        self.write_bm25()
            .add(&entry.id, &entry.session_id, &entry.content);
        if let Some(v) = &entry.vector {
            if let Err(err) = self
                .write_vector()
                .insert(&entry.id, &entry.session_id, v.clone())
            {
                tracing::warn!(entry_id = %entry.id, error = %err, "vector indexing failed");
            }
        }
    }

    fn evict(&self, entry_id: &str) {
        self.lock_l1().pop(entry_id);
        self.write_bm25().remove(entry_id);
        self.write_vector().remove(entry_id);
    }

    fn cache_put(&self, entry: MemoryEntry) {
        self.lock_l1().put(entry.id.clone(), entry);
    }

    fn lock_l1(&self) -> std::sync::MutexGuard<'_, LruCache<String, MemoryEntry>> {
        self.l1.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_vector(&self) -> std::sync::RwLockReadGuard<'_, VectorIndex> {
        self.vector
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_vector(&self) -> std::sync::RwLockWriteGuard<'_, VectorIndex> {
        self.vector
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_bm25(&self) -> std::sync::RwLockReadGuard<'_, Bm25Index> {
        self.bm25
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_bm25(&self) -> std::sync::RwLockWriteGuard<'_, Bm25Index> {
        self.bm25
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Reciprocal rank fusion: `score(id) = w / (k + rank)` summed over the
/// lists the id appears in, with `k = 60` and 1-based ranks.
fn fuse(
    vector_ranked: &[(String, f64)],
    bm25_ranked: &[(String, f64)],
    weight_vector: f64,
    weight_bm25: f64,
) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for (rank, (id, _)) in vector_ranked.iter().enumerate() {
        *scores.entry(id.as_str()).or_insert(0.0) += weight_vector / (RRF_K + rank as f64 + 1.0);
    }
    for (rank, (id, _)) in bm25_ranked.iter().enumerate() {
        *scores.entry(id.as_str()).or_insert(0.0) += weight_bm25 / (RRF_K + rank as f64 + 1.0);
    }

    let mut fused: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rrf_fusion_prefers_doubly_ranked() {
        let vector = vec![("a".to_string(), 0.99), ("b".to_string(), 0.5)];
        let bm25 = vec![("a".to_string(), 12.0), ("c".to_string(), 3.0)];
        let fused = fuse(&vector, &bm25, 1.0, 1.0);

        assert_eq!(fused[0].0, "a");
        let expected_a = 1.0 / 61.0 + 1.0 / 61.0;
        assert!((fused[0].1 - expected_a).abs() < 1e-12);
        // b and c each appear once at rank 2 of their list.
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_rrf_weights_shift_ranking() {
        let vector = vec![("v".to_string(), 0.9)];
        let bm25 = vec![("k".to_string(), 5.0)];
        let fused = fuse(&vector, &bm25, 2.0, 1.0);
        assert_eq!(fused[0].0, "v");
    }
}
