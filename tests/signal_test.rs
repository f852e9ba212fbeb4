//! In-band signal delivery to running tasks through the engine.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use cascade::domain::models::{
    InterruptMode, PublishOutcome, SignalKind, TaskStatus, WorkflowStatus,
};
use cascade::services::{SignalBus, SubmitOptions, TaskContext, TaskFn};
use cascade::{Signal, TaskDefinition, WorkflowRequest};

use common::{body_map, test_engine, wait_for_status};

// A steered task reads the payload off its signal channel.
#[tokio::test]
async fn test_steer_signal_reaches_task() {
    let engine = test_engine().await;

    let body: TaskFn = Arc::new(|ctx: TaskContext| {
        async move {
            let signals = ctx.signals.expect("signal channel attached");
            let Some(signal) = signals.recv().await else {
                return Err(cascade::EngineError::TaskBody("channel closed".into()));
            };
            assert_eq!(signal.kind, SignalKind::Steer);
            Ok(signal.payload)
        }
        .boxed()
    });

    let request = WorkflowRequest::new("steerable")
        .with_task(TaskDefinition::new("nav", "Navigator").with_agent("steer"));
    let record = engine
        .submit(
            request,
            SubmitOptions::background(body_map(vec![("steer", body)])),
        )
        .await
        .unwrap();

    // Wait for the task to subscribe and run.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = engine.workflow(&record.id).await.unwrap();
        if current.task_status["nav"].status == TaskStatus::Running {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let outcome = engine
        .signal(Signal::steer("nav", serde_json::json!({"heading": "north"})))
        .await
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Delivered);

    let final_record =
        wait_for_status(&engine, &record.id, WorkflowStatus::Completed, Duration::from_secs(5))
            .await;
    assert_eq!(
        final_record.task_status["nav"].result,
        Some(serde_json::json!({"heading": "north"}))
    );
}

// A forced interrupt cancels the task's context even if the body ignores
// its signal channel.
#[tokio::test]
async fn test_forced_interrupt_cancels_task() {
    let engine = test_engine().await;

    let body: TaskFn = Arc::new(|ctx: TaskContext| {
        async move {
            ctx.cancellation.cancelled().await;
            Err(cascade::EngineError::Cancelled("interrupted".into()))
        }
        .boxed()
    });

    let request = WorkflowRequest::new("interruptible")
        .with_task(TaskDefinition::new("loop", "Busy loop").with_agent("busy"));
    let record = engine
        .submit(
            request,
            SubmitOptions::background(body_map(vec![("busy", body)])),
        )
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = engine.workflow(&record.id).await.unwrap();
        if current.task_status["loop"].status == TaskStatus::Running {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    engine
        .signal(Signal::interrupt("loop", InterruptMode::Forced))
        .await
        .unwrap();

    // The task lands cancelled; the workflow surfaces the failure.
    let final_record =
        wait_for_status(&engine, &record.id, WorkflowStatus::Failed, Duration::from_secs(5)).await;
    assert_eq!(final_record.task_status["loop"].status, TaskStatus::Cancelled);
}

// Publishing to a finished task finds no subscriber and is counted.
#[tokio::test]
async fn test_signal_after_completion_is_dropped() {
    let engine = test_engine().await;

    let request = WorkflowRequest::new("done")
        .with_task(TaskDefinition::new("quick", "Quick").with_agent("ok"));
    engine
        .submit(
            request,
            SubmitOptions::sync(body_map(vec![("ok", common::ok_body())])),
        )
        .await
        .unwrap();

    let before = engine.signal_bus().dropped_count();
    let outcome = engine.signal(Signal::collect("quick")).await.unwrap();
    assert_eq!(outcome, PublishOutcome::NoSubscriber);
    assert_eq!(engine.signal_bus().dropped_count(), before + 1);
}
