//! Task runner: drives one task body through its retry/timeout envelope.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::TaskDefinition;
use crate::services::signal_bus::SignalReceiver;
use crate::services::state_tracker::{RunState, StateTracker};

/// Fixed pause between attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Context handed to a task body. Bodies are opaque unit-of-work functions
/// supplied by the host; they are expected to honor `cancellation` and may
/// poll `signals` for steer/interrupt/collect messages.
#[derive(Clone)]
pub struct TaskContext {
    pub workflow_id: String,
    pub task_id: String,
    /// Zero-based attempt number.
    pub attempt: u32,
    pub cancellation: CancellationToken,
    pub signals: Option<SignalReceiver>,
}

/// A task body: async function from context to a JSON result.
pub type TaskFn =
    Arc<dyn Fn(TaskContext) -> BoxFuture<'static, EngineResult<serde_json::Value>> + Send + Sync>;

/// Executes one task definition against its body, reporting transitions to
/// the state tracker.
pub struct TaskRunner {
    workflow_id: String,
    definition: TaskDefinition,
    body: TaskFn,
    tracker: Arc<StateTracker>,
    /// Workflow-level token; drives cancelled-vs-failed classification.
    parent: CancellationToken,
    /// Per-task token; cancelled by forced interrupts and parent cancel.
    task_token: CancellationToken,
    signals: Option<SignalReceiver>,
}

impl TaskRunner {
    pub fn new(
        workflow_id: impl Into<String>,
        definition: TaskDefinition,
        body: TaskFn,
        tracker: Arc<StateTracker>,
        parent: CancellationToken,
        task_token: CancellationToken,
        signals: Option<SignalReceiver>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            definition,
            body,
            tracker,
            parent,
            task_token,
            signals,
        }
    }

    /// Runs attempts `0..=retries`. Terminal classification: a final error
    /// chain containing cancellation or a deadline yields `cancelled`;
    /// anything else yields `failed`.
    pub async fn execute(&self) -> EngineResult<()> {
        let task_id = self.definition.id.clone();

        // Queued-but-cancelled tasks are marked without invoking the body.
        if self.parent.is_cancelled() {
            self.tracker
                .set_cancelled(&task_id, "cancelled before start")
                .await;
            return Err(EngineError::TaskExecution {
                task_id,
                attempts: 0,
                source: Box::new(EngineError::Cancelled("cancelled before start".into())),
            });
        }

        let mut last_error: Option<EngineError> = None;
        let mut attempts_used = 0u32;

        for attempt in 0..=self.definition.retries {
            if attempt > 0 {
                if self.parent.is_cancelled() {
                    break;
                }
                self.tracker.set_state(&task_id, RunState::Retrying).await;
                metrics::counter!("task_retries_total").increment(1);
            }
            self.tracker.set_state(&task_id, RunState::Running).await;

            attempts_used += 1;
            let result = self.run_attempt(attempt).await;

            match result {
                Ok(value) if !self.parent.is_cancelled() => {
                    self.tracker.set_completed(&task_id, Some(value)).await;
                    return Ok(());
                }
                Ok(_) => {
                    // Completed under a cancelled workflow: cancellation wins.
                    break;
                }
                Err(err) => {
                    tracing::debug!(
                        workflow_id = %self.workflow_id,
                        task_id = %task_id,
                        attempt,
                        error = %err,
                        "task attempt failed"
                    );
                    last_error = Some(err);
                    if self.parent.is_cancelled() {
                        break;
                    }
                    if attempt < self.definition.retries {
                        tokio::select! {
                            () = self.parent.cancelled() => {}
                            () = tokio::time::sleep(RETRY_BACKOFF) => {}
                        }
                    }
                }
            }
        }

        let cause = last_error
            .unwrap_or_else(|| EngineError::Cancelled("workflow cancelled".into()));

        let cancelled = self.parent.is_cancelled() || cause.is_cancellation();
        if cancelled {
            self.tracker.set_cancelled(&task_id, cause.to_string()).await;
        } else {
            self.tracker
                .set_failed(&task_id, cause.to_string(), attempts_used.saturating_sub(1))
                .await;
        }

        Err(EngineError::TaskExecution {
            task_id,
            attempts: attempts_used,
            source: Box::new(cause),
        })
    }

    /// One attempt: derive the attempt context, apply the per-attempt
    /// timeout, and race the body against the task token.
    async fn run_attempt(&self, attempt: u32) -> EngineResult<serde_json::Value> {
        let ctx = TaskContext {
            workflow_id: self.workflow_id.clone(),
            task_id: self.definition.id.clone(),
            attempt,
            cancellation: self.task_token.clone(),
            signals: self.signals.clone(),
        };
        let body = (self.body)(ctx);

        match self.definition.timeout {
            Some(limit) if !limit.is_zero() => {
                tokio::select! {
                    () = self.task_token.cancelled() => {
                        Err(EngineError::Cancelled("task context cancelled".into()))
                    }
                    outcome = tokio::time::timeout(limit, body) => match outcome {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::Timeout(limit)),
                    },
                }
            }
            _ => {
                tokio::select! {
                    () = self.task_token.cancelled() => {
                        Err(EngineError::Cancelled("task context cancelled".into()))
                    }
                    result = body => result,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn tracker_for(id: &str) -> Arc<StateTracker> {
        let tracker = Arc::new(StateTracker::new());
        tracker.init_tasks([id.to_string()]).await;
        tracker
    }

    fn runner(
        definition: TaskDefinition,
        body: TaskFn,
        tracker: Arc<StateTracker>,
        parent: CancellationToken,
    ) -> TaskRunner {
        let task_token = parent.child_token();
        TaskRunner::new("wf", definition, body, tracker, parent, task_token, None)
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let tracker = tracker_for("t").await;
        let body: TaskFn = Arc::new(|_| async { Ok(serde_json::json!("done")) }.boxed());
        let parent = CancellationToken::new();
        let r = runner(TaskDefinition::new("t", "t"), body, tracker.clone(), parent);

        r.execute().await.unwrap();
        assert_eq!(tracker.state("t").await, Some(RunState::Completed));
        assert_eq!(tracker.get_result("t").await, Some(serde_json::json!("done")));
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let tracker = tracker_for("t").await;
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let body: TaskFn = Arc::new(move |_| {
            let seen = seen.clone();
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(EngineError::TaskBody("transient".into()))
                } else {
                    Ok(serde_json::json!(null))
                }
            }
            .boxed()
        });

        let parent = CancellationToken::new();
        let def = TaskDefinition::new("t", "t").with_retries(2);
        let r = runner(def, body, tracker.clone(), parent);

        r.execute().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.state("t").await, Some(RunState::Completed));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let tracker = tracker_for("t").await;
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let body: TaskFn = Arc::new(move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::TaskBody("always fails".into()))
            }
            .boxed()
        });

        let parent = CancellationToken::new();
        let def = TaskDefinition::new("t", "t").with_retries(2);
        let r = runner(def, body, tracker.clone(), parent);

        let err = r.execute().await.unwrap_err();
        // Three invocations: first attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.state("t").await, Some(RunState::Failed));
        assert!(matches!(err, EngineError::TaskExecution { attempts: 3, .. }));
        assert!(!err.is_cancellation());
    }

    #[tokio::test]
    async fn test_zero_retries_single_attempt() {
        let tracker = tracker_for("t").await;
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let body: TaskFn = Arc::new(move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::TaskBody("boom".into()))
            }
            .boxed()
        });

        let parent = CancellationToken::new();
        let r = runner(TaskDefinition::new("t", "t"), body, tracker.clone(), parent);

        let _ = r.execute().await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.state("t").await, Some(RunState::Failed));
    }

    #[tokio::test]
    async fn test_timeout_classified_as_cancelled() {
        let tracker = tracker_for("t").await;
        let body: TaskFn = Arc::new(|ctx: TaskContext| {
            async move {
                ctx.cancellation.cancelled().await;
                Err(EngineError::Cancelled("ctx".into()))
            }
            .boxed()
        });

        let parent = CancellationToken::new();
        let def = TaskDefinition::new("t", "t").with_timeout(Duration::from_millis(20));
        let r = runner(def, body, tracker.clone(), parent);

        let err = r.execute().await.unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(tracker.state("t").await, Some(RunState::Cancelled));
    }

    #[tokio::test]
    async fn test_parent_cancel_marks_cancelled() {
        let tracker = tracker_for("t").await;
        let body: TaskFn = Arc::new(|ctx: TaskContext| {
            async move {
                ctx.cancellation.cancelled().await;
                Err(EngineError::Cancelled("ctx".into()))
            }
            .boxed()
        });

        let parent = CancellationToken::new();
        let r = runner(TaskDefinition::new("t", "t"), body, tracker.clone(), parent.clone());

        let cancel = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = r.execute().await.unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(tracker.state("t").await, Some(RunState::Cancelled));
    }

    #[tokio::test]
    async fn test_queued_cancel_skips_body() {
        let tracker = tracker_for("t").await;
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let body: TaskFn = Arc::new(move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!(null))
            }
            .boxed()
        });

        let parent = CancellationToken::new();
        parent.cancel();
        let r = runner(TaskDefinition::new("t", "t"), body, tracker.clone(), parent);

        let err = r.execute().await.unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.state("t").await, Some(RunState::Cancelled));
    }
}
