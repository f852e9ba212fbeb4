//! Per-workflow task run-state map with transition hooks.
//!
//! The tracker is owned by a single workflow execution and never shared
//! across workflows. The runtime registers a hook that fires after each
//! in-memory transition and performs the persist-then-emit step.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::domain::models::TaskStatus;

/// Runtime-only task state; `Retrying` maps to persisted `Scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl RunState {
    /// Persisted status this run state maps to.
    pub fn persisted(&self) -> TaskStatus {
        match self {
            Self::Pending => TaskStatus::Pending,
            Self::Scheduled | Self::Retrying => TaskStatus::Scheduled,
            Self::Running => TaskStatus::Running,
            Self::Completed => TaskStatus::Completed,
            Self::Failed => TaskStatus::Failed,
            Self::Cancelled => TaskStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.persisted().is_terminal()
    }
}

/// One tracked transition, handed to the state-change hook.
#[derive(Debug, Clone)]
pub struct TaskTransition {
    pub task_id: String,
    pub old: RunState,
    pub new: RunState,
    pub error: Option<String>,
    pub retries: u32,
    pub result: Option<serde_json::Value>,
}

/// Hook invoked after each in-memory transition.
pub type StateChangeHook =
    Arc<dyn Fn(TaskTransition) -> BoxFuture<'static, ()> + Send + Sync + 'static>;

#[derive(Debug, Clone)]
struct TaskRunInfo {
    state: RunState,
    error: Option<String>,
    retries: u32,
    result: Option<serde_json::Value>,
}

/// Thread-safe per-workflow state map.
#[derive(Default)]
pub struct StateTracker {
    tasks: RwLock<HashMap<String, TaskRunInfo>>,
    hook: RwLock<Option<StateChangeHook>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every task id in `Pending`.
    pub async fn init_tasks<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tasks = self.tasks.write().await;
        for id in ids {
            tasks.insert(
                id.into(),
                TaskRunInfo {
                    state: RunState::Pending,
                    error: None,
                    retries: 0,
                    result: None,
                },
            );
        }
    }

    pub async fn set_on_state_change(&self, hook: StateChangeHook) {
        *self.hook.write().await = Some(hook);
    }

    /// Transitions a task, then fires the hook.
    pub async fn set_state(&self, task_id: &str, state: RunState) {
        self.apply(task_id, state, None, None, None).await;
    }

    /// Marks a task completed with its result.
    pub async fn set_completed(&self, task_id: &str, result: Option<serde_json::Value>) {
        self.apply(task_id, RunState::Completed, None, None, result)
            .await;
    }

    /// Marks a task failed, recording the error text and retries used.
    pub async fn set_failed(&self, task_id: &str, error: impl Into<String>, retries: u32) {
        self.apply(task_id, RunState::Failed, Some(error.into()), Some(retries), None)
            .await;
    }

    /// Marks a task cancelled, recording the reason.
    pub async fn set_cancelled(&self, task_id: &str, reason: impl Into<String>) {
        self.apply(task_id, RunState::Cancelled, Some(reason.into()), None, None)
            .await;
    }

    async fn apply(
        &self,
        task_id: &str,
        state: RunState,
        error: Option<String>,
        retries: Option<u32>,
        result: Option<serde_json::Value>,
    ) {
        let transition = {
            let mut tasks = self.tasks.write().await;
            let Some(info) = tasks.get_mut(task_id) else {
                tracing::warn!(task_id, "state change for untracked task ignored");
                return;
            };
            // Terminal states are immutable.
            if info.state.is_terminal() {
                tracing::debug!(
                    task_id,
                    from = ?info.state,
                    to = ?state,
                    "transition from terminal state ignored"
                );
                return;
            }
            let old = info.state;
            info.state = state;
            if let Some(err) = &error {
                info.error = Some(err.clone());
            }
            if let Some(r) = retries {
                info.retries = r;
            }
            if let Some(value) = &result {
                info.result = Some(value.clone());
            }
            TaskTransition {
                task_id: task_id.to_string(),
                old,
                new: state,
                error,
                retries: info.retries,
                result,
            }
        };

        let hook = self.hook.read().await.clone();
        if let Some(hook) = hook {
            hook(transition).await;
        }
    }

    pub async fn state(&self, task_id: &str) -> Option<RunState> {
        self.tasks.read().await.get(task_id).map(|i| i.state)
    }

    pub async fn get_result(&self, task_id: &str) -> Option<serde_json::Value> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .and_then(|i| i.result.clone())
    }

    /// Snapshot of every task's state.
    pub async fn results(&self) -> HashMap<String, RunState> {
        self.tasks
            .read()
            .await
            .iter()
            .map(|(id, info)| (id.clone(), info.state))
            .collect()
    }

    /// Ids of tasks not yet terminal, sorted for determinism.
    pub async fn non_terminal(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|(_, info)| !info.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retrying_maps_to_scheduled() {
        assert_eq!(RunState::Retrying.persisted(), TaskStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_hook_fires_after_transition() {
        let tracker = Arc::new(StateTracker::new());
        tracker.init_tasks(["a"]).await;

        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        tracker
            .set_on_state_change(Arc::new(move |t: TaskTransition| {
                let seen = seen.clone();
                Box::pin(async move {
                    assert_eq!(t.task_id, "a");
                    seen.fetch_add(1, Ordering::SeqCst);
                })
            }))
            .await;

        tracker.set_state("a", RunState::Running).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.state("a").await, Some(RunState::Running));
    }

    #[tokio::test]
    async fn test_terminal_state_is_immutable() {
        let tracker = StateTracker::new();
        tracker.init_tasks(["a"]).await;
        tracker.set_completed("a", Some(serde_json::json!(42))).await;
        tracker.set_failed("a", "late failure", 0).await;

        assert_eq!(tracker.state("a").await, Some(RunState::Completed));
        assert_eq!(tracker.get_result("a").await, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn test_non_terminal_listing() {
        let tracker = StateTracker::new();
        tracker.init_tasks(["b", "a", "c"]).await;
        tracker.set_completed("b", None).await;
        assert_eq!(tracker.non_terminal().await, vec!["a", "c"]);
    }
}
