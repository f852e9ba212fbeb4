//! Memory hub scenarios: hybrid retrieval, decay, session isolation.

use std::collections::HashMap;
use std::sync::Arc;

use cascade::adapters::sqlite::{create_migrated_test_pool, SqliteMemoryStore};
use cascade::domain::models::{MemoryConfig, MemoryQuery, RetrievalMode};
use cascade::domain::ports::MemoryStore;
use cascade::services::MemoryHub;
use cascade::EngineError;

async fn test_hub() -> (MemoryHub, Arc<SqliteMemoryStore>) {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(SqliteMemoryStore::new(pool));
    let config = MemoryConfig {
        vector_dimension: 3,
        default_stability_hours: 24.0,
        forget_threshold: 0.05,
        ..MemoryConfig::default()
    };
    let hub = MemoryHub::new(store.clone(), config);
    hub.start().await.unwrap();
    (hub, store)
}

// S6: hybrid retrieval fuses vector and keyword hits and boosts strength.
#[tokio::test]
async fn test_hybrid_retrieval_with_boost() {
    let (hub, store) = test_hub().await;

    let first = hub
        .memorize(
            "s1",
            "machine learning",
            Some(vec![1.0, 0.0, 0.0]),
            HashMap::new(),
            None,
        )
        .await
        .unwrap();
    let second = hub
        .memorize(
            "s1",
            "deep learning",
            Some(vec![0.9, 0.1, 0.0]),
            HashMap::new(),
            None,
        )
        .await
        .unwrap();

    let query = MemoryQuery::hybrid("s1", "machine learning", vec![1.0, 0.0, 0.0]).with_top_k(2);
    let results = hub.retrieve(&query).await.unwrap();

    assert_eq!(results.len(), 2);
    // "machine learning" tops both branches, so it tops the fusion.
    assert_eq!(results[0].entry.id, first.id);
    assert_eq!(results[1].entry.id, second.id);
    assert!(results[0].score > results[1].score);

    // Retrieval boosted the returned entries.
    for scored in &results {
        assert!((scored.entry.strength - 1.0).abs() < f64::EPSILON);
    }
    let stored = store.get("s1", &first.id).await.unwrap().unwrap();
    assert!((stored.stability - 36.0).abs() < 1e-9, "stability stretched by 1.5x");
}

#[tokio::test]
async fn test_vector_only_and_bm25_only_modes() {
    let (hub, _store) = test_hub().await;

    hub.memorize("s1", "rust ownership rules", Some(vec![0.0, 1.0, 0.0]), HashMap::new(), None)
        .await
        .unwrap();
    hub.memorize("s1", "borrow checker notes", Some(vec![0.0, 0.0, 1.0]), HashMap::new(), None)
        .await
        .unwrap();

    let by_vector = hub
        .retrieve(&MemoryQuery::vector("s1", vec![0.0, 1.0, 0.0]).with_top_k(1))
        .await
        .unwrap();
    assert_eq!(by_vector.len(), 1);
    assert!(by_vector[0].entry.content.contains("ownership"));

    let by_text = hub
        .retrieve(&MemoryQuery::text("s1", "borrow checker").with_top_k(1))
        .await
        .unwrap();
    assert_eq!(by_text.len(), 1);
    assert!(by_text[0].entry.content.contains("borrow"));
}

// Hybrid degrades to the surviving index on a single-branch error.
#[tokio::test]
async fn test_hybrid_degrades_to_survivor() {
    let (hub, _store) = test_hub().await;

    hub.memorize("s1", "graceful degradation", None, HashMap::new(), None)
        .await
        .unwrap();

    // Wrong-dimension vector: the vector branch fails, BM25 survives.
    let query = MemoryQuery {
        session_id: "s1".into(),
        text: Some("graceful degradation".into()),
        vector: Some(vec![1.0]),
        mode: RetrievalMode::Hybrid,
        top_k: 5,
        filters: HashMap::new(),
    };
    let results = hub.retrieve(&query).await.unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let (hub, _store) = test_hub().await;
    let query = MemoryQuery {
        session_id: "s1".into(),
        top_k: 5,
        ..MemoryQuery::default()
    };
    let err = hub.retrieve(&query).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidQuery(_)));
}

#[tokio::test]
async fn test_dimension_mismatch_on_memorize() {
    let (hub, _store) = test_hub().await;
    let err = hub
        .memorize("s1", "short vector", Some(vec![1.0]), HashMap::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DimensionMismatch { expected: 3, actual: 1 }));
}

// Entries never leak across sessions.
#[tokio::test]
async fn test_session_isolation() {
    let (hub, _store) = test_hub().await;

    hub.memorize("alpha", "shared secret phrase", None, HashMap::new(), None)
        .await
        .unwrap();
    hub.memorize("beta", "shared secret phrase", None, HashMap::new(), None)
        .await
        .unwrap();

    let results = hub
        .retrieve(&MemoryQuery::text("alpha", "secret phrase").with_top_k(10))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.session_id, "alpha");
}

// Metadata filters apply AND semantics after fusion.
#[tokio::test]
async fn test_metadata_filters() {
    let (hub, _store) = test_hub().await;

    let mut tagged = HashMap::new();
    tagged.insert("kind".to_string(), "decision".to_string());
    hub.memorize("s1", "chose sqlite for storage", None, tagged, None)
        .await
        .unwrap();
    hub.memorize("s1", "chose sqlite for cache", None, HashMap::new(), None)
        .await
        .unwrap();

    let query = MemoryQuery::text("s1", "chose sqlite")
        .with_top_k(10)
        .with_filter("kind", "decision");
    let results = hub.retrieve(&query).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].entry.content.contains("storage"));
}

// Decay removes weak entries everywhere and keeps strong ones.
#[tokio::test]
async fn test_decay_sweep_forgets_weak_entries() {
    let (hub, store) = test_hub().await;

    let strong = hub
        .memorize("s1", "strong memory", None, HashMap::new(), None)
        .await
        .unwrap();
    let weak = hub
        .memorize("s1", "weak memory", None, HashMap::new(), None)
        .await
        .unwrap();

    // Backdate the weak entry far past its stability horizon.
    let mut stale = weak.clone();
    stale.stability = 1.0;
    stale.last_review = chrono::Utc::now() - chrono::Duration::hours(100);
    store.put(&stale).await.unwrap();

    let sweep = hub.run_decay_once().await.unwrap();
    assert_eq!(sweep.scanned, 2);
    assert_eq!(sweep.forgotten, 1);
    assert_eq!(sweep.retained, 1);

    // Gone from the store and from retrieval.
    assert!(store.get("s1", &weak.id).await.unwrap().is_none());
    let results = hub
        .retrieve(&MemoryQuery::text("s1", "weak memory").with_top_k(10))
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.entry.id != weak.id));

    // The survivor's decayed strength still clears the threshold.
    let kept = store.get("s1", &strong.id).await.unwrap().unwrap();
    assert!(kept.strength >= 0.05);
}

// The hub refuses use before start and after stop.
#[tokio::test]
async fn test_hub_lifecycle_guard() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(SqliteMemoryStore::new(pool));
    let hub = MemoryHub::new(store, MemoryConfig::default());

    let err = hub
        .memorize("s1", "too early", None, HashMap::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MemoryHubNotRunning));

    hub.start().await.unwrap();
    hub.memorize("s1", "now it works", None, HashMap::new(), None)
        .await
        .unwrap();

    hub.stop().await;
    let err = hub
        .retrieve(&MemoryQuery::text("s1", "now"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MemoryHubNotRunning));
}

// Forget removes an entry from both tiers and both indices.
#[tokio::test]
async fn test_forget_removes_everywhere() {
    let (hub, store) = test_hub().await;

    let entry = hub
        .memorize("s1", "ephemeral note", Some(vec![1.0, 0.0, 0.0]), HashMap::new(), None)
        .await
        .unwrap();

    hub.forget("s1", &entry.id).await.unwrap();
    assert!(store.get("s1", &entry.id).await.unwrap().is_none());
    assert!(hub.get("s1", &entry.id).await.unwrap().is_none());

    let by_text = hub
        .retrieve(&MemoryQuery::text("s1", "ephemeral note"))
        .await
        .unwrap();
    assert!(by_text.is_empty());
    let by_vector = hub
        .retrieve(&MemoryQuery::vector("s1", vec![1.0, 0.0, 0.0]))
        .await
        .unwrap();
    assert!(by_vector.is_empty());
}

// Start rebuilds indices from the persistent tier.
#[tokio::test]
async fn test_start_rebuilds_indices() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(SqliteMemoryStore::new(pool));
    let config = MemoryConfig {
        vector_dimension: 3,
        ..MemoryConfig::default()
    };

    // First hub writes an entry, then stops.
    let first = MemoryHub::new(store.clone(), config.clone());
    first.start().await.unwrap();
    first
        .memorize("s1", "durable knowledge", Some(vec![0.5, 0.5, 0.0]), HashMap::new(), None)
        .await
        .unwrap();
    first.stop().await;

    // A fresh hub over the same store can retrieve it.
    let second = MemoryHub::new(store, config);
    second.start().await.unwrap();
    let results = second
        .retrieve(&MemoryQuery::text("s1", "durable knowledge"))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}
