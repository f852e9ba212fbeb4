//! Shared helpers for integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use cascade::adapters::sqlite::{create_migrated_test_pool, SqliteWorkflowStore};
use cascade::domain::models::{EngineConfig, WorkflowRecord, WorkflowStatus};
use cascade::services::{TaskFn, WorkflowEngine};

/// Engine backed by an in-memory migrated pool, started with defaults.
pub async fn test_engine() -> Arc<WorkflowEngine> {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(SqliteWorkflowStore::new(pool));
    let engine = Arc::new(WorkflowEngine::new(store, EngineConfig::default()));
    engine.start(Vec::new()).await.unwrap();
    engine
}

/// Body that completes immediately with a fixed value.
pub fn ok_body() -> TaskFn {
    Arc::new(|_| async { Ok(serde_json::json!("ok")) }.boxed())
}

/// Body that always fails with a generic (non-cancellation) error.
pub fn failing_body() -> TaskFn {
    Arc::new(|_| {
        async { Err(cascade::EngineError::TaskBody("intentional failure".into())) }.boxed()
    })
}

/// Body that parks until its context is cancelled.
pub fn blocking_body() -> TaskFn {
    Arc::new(|ctx: cascade::services::TaskContext| {
        async move {
            ctx.cancellation.cancelled().await;
            Err(cascade::EngineError::Cancelled("context cancelled".into()))
        }
        .boxed()
    })
}

pub fn body_map(entries: Vec<(&str, TaskFn)>) -> HashMap<String, TaskFn> {
    entries
        .into_iter()
        .map(|(agent, body)| (agent.to_string(), body))
        .collect()
}

/// Polls the store until the workflow reaches `status` or the deadline hits.
pub async fn wait_for_status(
    engine: &WorkflowEngine,
    workflow_id: &str,
    status: WorkflowStatus,
    deadline: Duration,
) -> WorkflowRecord {
    let start = tokio::time::Instant::now();
    loop {
        let record = engine.workflow(workflow_id).await.unwrap();
        if record.status == status {
            return record;
        }
        assert!(
            start.elapsed() < deadline,
            "workflow {workflow_id} stuck in {:?} waiting for {status:?}",
            record.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
