//! Storage adapter round-trips over the in-memory database.

use cascade::adapters::sqlite::{
    create_migrated_test_pool, SqliteSagaStore, SqliteWorkflowStore,
};
use cascade::domain::models::{
    TaskRecord, TaskStatus, WorkflowFilter, WorkflowRecord, WorkflowRequest, WorkflowStatus,
};
use cascade::domain::ports::{SagaStore, WorkflowStore};
use cascade::{EngineError, TaskDefinition};

fn sample_record(name: &str) -> WorkflowRecord {
    WorkflowRecord::from_request(
        WorkflowRequest::new(name)
            .with_description("round trip")
            .with_metadata("team", "core")
            .with_task(TaskDefinition::new("a", "First").with_agent("noop"))
            .with_task(
                TaskDefinition::new("b", "Second")
                    .with_agent("noop")
                    .with_deps(["a"])
                    .with_retries(1),
            ),
    )
}

#[tokio::test]
async fn test_workflow_round_trip() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = SqliteWorkflowStore::new(pool);

    let record = sample_record("round-trip");
    let tasks: Vec<TaskRecord> = record.task_status.values().cloned().collect();
    store.save_workflow_with_tasks(&record, &tasks).await.unwrap();

    let loaded = store.get_workflow(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "round-trip");
    assert_eq!(loaded.status, WorkflowStatus::Pending);
    assert_eq!(loaded.tasks.len(), 2);
    assert_eq!(loaded.task_status.len(), 2);
    assert_eq!(loaded.metadata["team"], "core");
    assert_eq!(loaded.tasks[1].retries, 1);

    assert!(store.get_workflow("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_task_update_round_trip() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = SqliteWorkflowStore::new(pool);

    let record = sample_record("tasks");
    let tasks: Vec<TaskRecord> = record.task_status.values().cloned().collect();
    store.save_workflow_with_tasks(&record, &tasks).await.unwrap();

    let mut task = store.get_task(&record.id, "a").await.unwrap().unwrap();
    task.status = TaskStatus::Scheduled;
    store.save_task(&record.id, &task).await.unwrap();
    task.status = TaskStatus::Running;
    task.started_at = Some(chrono::Utc::now());
    store.save_task(&record.id, &task).await.unwrap();
    task.status = TaskStatus::Completed;
    task.completed_at = Some(chrono::Utc::now());
    task.result = Some(serde_json::json!({"rows": 10}));
    store.save_task(&record.id, &task).await.unwrap();

    let loaded = store.get_task(&record.id, "a").await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Completed);
    assert_eq!(loaded.result, Some(serde_json::json!({"rows": 10})));
    assert!(loaded.started_at.is_some());

    let all = store.list_tasks(&record.id).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_list_workflows_filters() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = SqliteWorkflowStore::new(pool);

    let mut done = sample_record("done");
    done.status = WorkflowStatus::Completed;
    store.save_workflow(&done).await.unwrap();
    let pending = sample_record("waiting");
    store.save_workflow(&pending).await.unwrap();

    let completed = store
        .list_workflows(&WorkflowFilter {
            status: Some(WorkflowStatus::Completed),
            ..WorkflowFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].name, "done");

    let limited = store
        .list_workflows(&WorkflowFilter {
            limit: Some(1),
            ..WorkflowFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    let all = store.list_workflows(&WorkflowFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_delete_workflow_cascades() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = SqliteWorkflowStore::new(pool);

    let record = sample_record("doomed");
    let tasks: Vec<TaskRecord> = record.task_status.values().cloned().collect();
    store.save_workflow_with_tasks(&record, &tasks).await.unwrap();

    store.delete_workflow(&record.id).await.unwrap();
    assert!(store.get_workflow(&record.id).await.unwrap().is_none());
    assert!(store.list_tasks(&record.id).await.unwrap().is_empty());

    let err = store.delete_workflow(&record.id).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowNotFound(_)));
}

#[tokio::test]
async fn test_checkpoint_round_trip() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = SqliteSagaStore::new(pool);

    let mut instance = cascade::domain::models::SagaInstance::new("cp-1", "orders");
    instance.completed_steps.push("reserve".into());
    instance
        .step_results
        .insert("reserve".into(), serde_json::json!({"hold": 7}));
    store.save_checkpoint(&instance).await.unwrap();

    let loaded = store.load_checkpoint("cp-1").await.unwrap().unwrap();
    assert_eq!(loaded.definition_name, "orders");
    assert_eq!(loaded.completed_steps, vec!["reserve"]);
    assert_eq!(loaded.step_results["reserve"], serde_json::json!({"hold": 7}));

    // Upsert keeps one checkpoint per saga id.
    instance.completed_steps.push("charge".into());
    store.save_checkpoint(&instance).await.unwrap();
    let all = store.list_checkpoints().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].completed_steps.len(), 2);
}
