//! Layer scheduler: runs a compiled plan over the lane manager.
//!
//! Layers run sequentially; within a layer every task is submitted to its
//! lane and the layer completes when all submitted tasks have returned. On
//! any task error the layer still drains to a deterministic conclusion and
//! no further layers are started.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{ExecutionPlan, SubmitOutcome, TaskDefinition};
use crate::services::lane::{JobDisposition, LaneManager, LaneTask};
use crate::services::signal_bus::SignalBus;
use crate::services::state_tracker::{RunState, StateTracker};
use crate::services::task_runner::{TaskFn, TaskRunner};

/// Schedules plan layers onto lanes for one workflow execution.
pub struct LayerScheduler {
    lanes: Arc<LaneManager>,
    signals: Arc<dyn SignalBus>,
    default_lane: String,
}

impl LayerScheduler {
    pub fn new(lanes: Arc<LaneManager>, signals: Arc<dyn SignalBus>, default_lane: String) -> Self {
        Self {
            lanes,
            signals,
            default_lane,
        }
    }

    /// Drives the plan to completion. Returns the first task error in
    /// submission order, or `Cancelled` when the workflow token fired.
    #[allow(clippy::too_many_lines)]
    pub async fn run_plan(
        &self,
        workflow_id: &str,
        plan: &ExecutionPlan,
        definitions: &HashMap<String, TaskDefinition>,
        bodies: &HashMap<String, TaskFn>,
        tracker: Arc<StateTracker>,
        workflow_token: &CancellationToken,
        task_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    ) -> EngineResult<()> {
        let mut first_error: Option<EngineError> = None;

        for (layer_idx, layer) in plan.layers.iter().enumerate() {
            if workflow_token.is_cancelled() {
                self.cancel_remaining(&plan.layers[layer_idx..], &tracker, "workflow cancelled")
                    .await;
                return Err(EngineError::Cancelled("workflow cancelled".into()));
            }
            if first_error.is_some() {
                // Drained the failing layer already; later layers never start.
                self.cancel_remaining(&plan.layers[layer_idx..], &tracker, "upstream task failed")
                    .await;
                break;
            }

            tracing::debug!(
                workflow_id,
                layer = layer_idx,
                width = layer.len(),
                "starting layer"
            );

            let mut waiters: Vec<(String, oneshot::Receiver<EngineResult<()>>)> = Vec::new();
            let mut submitted = 0usize;

            for (pos, task_id) in layer.iter().enumerate() {
                if workflow_token.is_cancelled() {
                    // Remaining un-submitted tasks of this layer.
                    for unsubmitted in &layer[pos..] {
                        tracker
                            .set_cancelled(unsubmitted, "workflow cancelled")
                            .await;
                    }
                    break;
                }

                let Some(definition) = definitions.get(task_id) else {
                    tracker
                        .set_failed(task_id, "task definition missing from plan", 0)
                        .await;
                    first_error.get_or_insert(EngineError::TaskNotFound {
                        workflow: workflow_id.to_string(),
                        task: task_id.clone(),
                    });
                    continue;
                };

                let Some(body) = self.resolve_body(definition, bodies) else {
                    let reason = format!("no body registered for agent '{}'", definition.agent);
                    tracker.set_failed(task_id, reason.clone(), 0).await;
                    first_error.get_or_insert(EngineError::TaskBody(reason));
                    continue;
                };

                tracker.set_state(task_id, RunState::Scheduled).await;

                // Attach the in-band signal channel before invocation.
                let signals = match self.signals.subscribe(task_id).await {
                    Ok(rx) => Some(rx),
                    Err(err) => {
                        tracing::warn!(task_id, error = %err, "signal subscribe failed");
                        None
                    }
                };

                let task_token = workflow_token.child_token();
                task_tokens
                    .write()
                    .await
                    .insert(task_id.clone(), task_token.clone());

                let runner = TaskRunner::new(
                    workflow_id,
                    definition.clone(),
                    body,
                    tracker.clone(),
                    workflow_token.clone(),
                    task_token,
                    signals,
                );

                let (done_tx, done_rx) = oneshot::channel();
                let job_tracker = tracker.clone();
                let job_signals = self.signals.clone();
                let job_tokens = task_tokens.clone();
                let job_task_id = task_id.clone();
                let lane_name = self.lane_for(definition);
                let job_lane = lane_name.clone();

                let job = LaneTask::new(definition.priority, move |disposition| {
                    async move {
                        let result = match disposition {
                            JobDisposition::Run => runner.execute().await,
                            JobDisposition::LaneClosed => {
                                job_tracker
                                    .set_failed(&job_task_id, "lane closed before dispatch", 0)
                                    .await;
                                Err(EngineError::LaneClosed(job_lane))
                            }
                        };
                        job_signals.unsubscribe(&job_task_id).await;
                        job_tokens.write().await.remove(&job_task_id);
                        let _ = done_tx.send(result);
                    }
                    .boxed()
                });

                match self.lanes.submit(&lane_name, workflow_token, job).await {
                    Ok(SubmitOutcome::Accepted | SubmitOutcome::Redirected) => {
                        submitted += 1;
                        waiters.push((task_id.clone(), done_rx));
                    }
                    Ok(outcome @ (SubmitOutcome::Rejected | SubmitOutcome::Dropped)) => {
                        self.signals.unsubscribe(task_id).await;
                        task_tokens.write().await.remove(task_id);
                        let err = EngineError::LaneRefused {
                            lane: lane_name,
                            task: task_id.clone(),
                            outcome: outcome.as_str(),
                        };
                        if workflow_token.is_cancelled() {
                            tracker.set_cancelled(task_id, "workflow cancelled").await;
                        } else {
                            tracker.set_failed(task_id, err.to_string(), 0).await;
                            first_error.get_or_insert(err);
                        }
                    }
                    Err(err) => {
                        self.signals.unsubscribe(task_id).await;
                        task_tokens.write().await.remove(task_id);
                        tracker.set_failed(task_id, err.to_string(), 0).await;
                        first_error.get_or_insert(err);
                    }
                }
            }

            tracing::debug!(workflow_id, layer = layer_idx, submitted, "layer submitted");

            // Drain: the layer concludes even when a task errors.
            for (task_id, done_rx) in waiters {
                match done_rx.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        first_error.get_or_insert(err);
                    }
                    Err(_) => {
                        first_error.get_or_insert(EngineError::TaskExecution {
                            task_id: task_id.clone(),
                            attempts: 0,
                            source: Box::new(EngineError::TaskBody(
                                "task worker dropped without reporting".into(),
                            )),
                        });
                    }
                }
            }
        }

        if workflow_token.is_cancelled() {
            return Err(EngineError::Cancelled("workflow cancelled".into()));
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn lane_for(&self, definition: &TaskDefinition) -> String {
        if definition.lane.is_empty() {
            self.default_lane.clone()
        } else {
            definition.lane.clone()
        }
    }

    /// Body lookup: agent selector first, task id as fallback.
    fn resolve_body(
        &self,
        definition: &TaskDefinition,
        bodies: &HashMap<String, TaskFn>,
    ) -> Option<TaskFn> {
        bodies
            .get(&definition.agent)
            .or_else(|| bodies.get(&definition.id))
            .cloned()
    }

    /// Marks every still-pending task in the given layers cancelled.
    async fn cancel_remaining(
        &self,
        layers: &[Vec<String>],
        tracker: &Arc<StateTracker>,
        reason: &str,
    ) {
        for layer in layers {
            for task_id in layer {
                if let Some(state) = tracker.state(task_id).await {
                    if !state.is_terminal() {
                        tracker.set_cancelled(task_id, reason).await;
                    }
                }
            }
        }
    }
}
