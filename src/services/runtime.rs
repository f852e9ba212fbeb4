//! Workflow runtime: admission, lifecycle driving, and cancellation.
//!
//! The engine owns the lifecycle of every registered workflow execution.
//! Every state change follows persist-then-emit: validate the transition,
//! mutate the in-memory record, persist it, and only on persistence success
//! emit the event to observers. Persistence failure reverts the in-memory
//! state and the event is never emitted. Emission feeds two independent
//! observer paths with the same logical event: the engine's internal event
//! hub and the configured `EventBroadcaster` port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    EngineConfig, EngineEvent, InterruptMode, LaneConfig, PublishOutcome, Signal, SignalKind,
    SubmitMode, TaskRecord, TaskStateEvent, TaskStatus, WorkflowFilter, WorkflowRecord,
    WorkflowRequest, WorkflowStateEvent, WorkflowStatus,
};
use crate::domain::ports::{EventBroadcaster, NullBroadcaster, WorkflowStore};
use crate::services::dag_compiler;
use crate::services::events::EventHub;
use crate::services::lane::LaneManager;
use crate::services::scheduler::LayerScheduler;
use crate::services::signal_bus::{LocalSignalBus, SignalBus};
use crate::services::state_tracker::{RunState, StateTracker, TaskTransition};
use crate::services::task_runner::TaskFn;

/// Options accompanying a workflow submission.
#[derive(Default)]
pub struct SubmitOptions {
    pub mode: SubmitMode,
    /// Body selector map. Empty leaves the workflow `pending` for external
    /// completion.
    pub task_fns: HashMap<String, TaskFn>,
}

impl SubmitOptions {
    pub fn sync(task_fns: HashMap<String, TaskFn>) -> Self {
        Self {
            mode: SubmitMode::Sync,
            task_fns,
        }
    }

    pub fn background(task_fns: HashMap<String, TaskFn>) -> Self {
        Self {
            mode: SubmitMode::Async,
            task_fns,
        }
    }

    /// No bodies: persist only, workflow completed externally.
    pub fn external() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Stopped,
    Running,
    ShuttingDown,
}

/// Monotonic engine counters, exposed as a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub workflows_submitted: u64,
    pub workflows_completed: u64,
    pub workflows_failed: u64,
    pub workflows_cancelled: u64,
    pub task_retries: u64,
}

#[derive(Default)]
struct EngineCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    task_retries: AtomicU64,
}

/// One in-flight workflow execution.
#[derive(Clone)]
struct ExecutionHandle {
    token: CancellationToken,
    task_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    record: Arc<Mutex<WorkflowRecord>>,
}

/// The workflow orchestration engine.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    broadcaster: Arc<dyn EventBroadcaster>,
    hub: Arc<EventHub>,
    lanes: Arc<LaneManager>,
    signals: Arc<dyn SignalBus>,
    config: EngineConfig,
    state: RwLock<EngineState>,
    shutdown_token: CancellationToken,
    executions: Arc<RwLock<HashMap<String, ExecutionHandle>>>,
    driver_handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<EngineCounters>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, config: EngineConfig) -> Self {
        Self {
            store,
            broadcaster: Arc::new(NullBroadcaster),
            hub: Arc::new(EventHub::default()),
            lanes: Arc::new(LaneManager::new()),
            signals: Arc::new(LocalSignalBus::new(&crate::domain::models::SignalConfig::default())),
            config,
            state: RwLock::new(EngineState::Stopped),
            shutdown_token: CancellationToken::new(),
            executions: Arc::new(RwLock::new(HashMap::new())),
            driver_handles: Mutex::new(Vec::new()),
            counters: Arc::new(EngineCounters::default()),
        }
    }

    /// External fan-out port, invoked after each successful persist in
    /// addition to the internal hub. Each observer path sees every event
    /// exactly once; do not wire a broadcaster back into `event_hub()`.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn EventBroadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_signal_bus(mut self, signals: Arc<dyn SignalBus>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_lane_manager(mut self, lanes: Arc<LaneManager>) -> Self {
        self.lanes = lanes;
        self
    }

    /// In-process observer registry. The engine publishes here directly
    /// after every persisted transition, independently of the broadcaster
    /// port.
    pub fn event_hub(&self) -> Arc<EventHub> {
        self.hub.clone()
    }

    pub fn lane_manager(&self) -> Arc<LaneManager> {
        self.lanes.clone()
    }

    pub fn signal_bus(&self) -> Arc<dyn SignalBus> {
        self.signals.clone()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            workflows_submitted: self.counters.submitted.load(Ordering::Relaxed),
            workflows_completed: self.counters.completed.load(Ordering::Relaxed),
            workflows_failed: self.counters.failed.load(Ordering::Relaxed),
            workflows_cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            task_retries: self.counters.task_retries.load(Ordering::Relaxed),
        }
    }

    /// Registers the default lane (plus any extra configs) and accepts
    /// submissions from here on.
    pub async fn start(&self, extra_lanes: Vec<LaneConfig>) -> EngineResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != EngineState::Stopped {
                return Ok(());
            }
            *state = EngineState::Running;
        }

        let default = LaneConfig::new(
            self.config.default_lane.clone(),
            self.config.default_lane_capacity,
            self.config.default_lane_concurrency,
        );
        self.lanes.register(default).await?;
        for lane in extra_lanes {
            self.lanes.register(lane).await?;
        }
        tracing::info!(default_lane = %self.config.default_lane, "workflow engine started");
        Ok(())
    }

    /// Rejects new submissions, cancels running workflows, waits for their
    /// drivers, then closes all lanes.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            if *state != EngineState::Running {
                return;
            }
            *state = EngineState::ShuttingDown;
        }
        tracing::info!("engine shutting down");

        self.shutdown_token.cancel();
        let handles = {
            let mut guard = self.driver_handles.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "workflow driver panicked during shutdown");
            }
        }
        self.lanes.close_all().await;

        *self.state.write().await = EngineState::Stopped;
        tracing::info!("engine stopped");
    }

    /// Submits a workflow. Graph validation failures are returned without
    /// persistence; accepted submissions are persisted (workflow plus every
    /// task record, transactionally) before any event is emitted.
    pub async fn submit(
        &self,
        request: WorkflowRequest,
        options: SubmitOptions,
    ) -> EngineResult<WorkflowRecord> {
        match *self.state.read().await {
            EngineState::Running => {}
            EngineState::ShuttingDown => return Err(EngineError::ShuttingDown),
            EngineState::Stopped => return Err(EngineError::EngineNotRunning),
        }

        // Validation without persistence.
        dag_compiler::compile(&request.tasks)?;

        let record = WorkflowRecord::from_request(request);
        let mut task_records: Vec<TaskRecord> = record
            .tasks
            .iter()
            .filter_map(|def| record.task_status.get(&def.id).cloned())
            .collect();
        task_records.sort_by(|a, b| a.id.cmp(&b.id));

        self.store
            .save_workflow_with_tasks(&record, &task_records)
            .await?;

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("workflow_submissions_total", "status" => "pending").increment(1);

        // Initial pending events, emitted only after the persist succeeded.
        self.emit_workflow_event(&record, None, WorkflowStatus::Pending).await;
        for def in &record.tasks {
            if let Some(task) = record.task_status.get(&def.id) {
                self.emit_task_event(&record.id, task, None).await;
            }
        }

        // Bodiless submissions stay pending for external completion.
        if options.task_fns.is_empty() && !record.tasks.is_empty() {
            return Ok(record);
        }

        let handle = self.register_execution(&record).await?;
        let driver = self.spawn_driver(record.clone(), options.task_fns, handle);

        {
            let mut handles = self.driver_handles.lock().await;
            handles.retain(|h| !h.is_finished());
            handles.push(driver.join);
        }

        match options.mode {
            SubmitMode::Async => Ok(record),
            SubmitMode::Sync => driver
                .finished
                .await
                .map_err(|_| EngineError::Storage("workflow driver dropped".into())),
        }
    }

    async fn register_execution(&self, record: &WorkflowRecord) -> EngineResult<ExecutionHandle> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&record.id) {
            return Err(EngineError::WorkflowAlreadyExecuting(record.id.clone()));
        }
        let handle = ExecutionHandle {
            token: self.shutdown_token.child_token(),
            task_tokens: Arc::new(RwLock::new(HashMap::new())),
            record: Arc::new(Mutex::new(record.clone())),
        };
        executions.insert(record.id.clone(), handle.clone());
        Ok(handle)
    }

    /// Cancels a workflow. Running executions are cancelled through their
    /// context; pending workflows are marked cancelled transactionally.
    /// Cancelling an already-cancelled workflow is a no-op.
    pub async fn cancel(&self, workflow_id: &str) -> EngineResult<()> {
        let handle = self.executions.read().await.get(workflow_id).cloned();
        if let Some(handle) = handle {
            {
                let mut record = handle.record.lock().await;
                if record.error.is_none() {
                    record.error = Some("cancelled by request".into());
                }
            }
            handle.token.cancel();
            return Ok(());
        }

        let Some(record) = self.store.get_workflow(workflow_id).await? else {
            return Err(EngineError::WorkflowNotFound(workflow_id.to_string()));
        };

        match record.status {
            WorkflowStatus::Cancelled => Ok(()),
            status if status.is_terminal() => Err(EngineError::InvalidTransition {
                entity: "workflow",
                from: status.as_str().into(),
                to: WorkflowStatus::Cancelled.as_str().into(),
            }),
            _ => self.cancel_unregistered(record).await,
        }
    }

    /// Marks a non-executing workflow and its non-terminal tasks cancelled
    /// in one transaction, then emits the corresponding events.
    async fn cancel_unregistered(&self, mut record: WorkflowRecord) -> EngineResult<()> {
        let now = Utc::now();
        let old_status = record.status;
        let mut changed_tasks: Vec<(TaskStatus, TaskRecord)> = Vec::new();

        for task in record.task_status.values_mut() {
            if !task.status.is_terminal() {
                let old = task.status;
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
                task.error = Some("cancelled by request".into());
                changed_tasks.push((old, task.clone()));
            }
        }
        changed_tasks.sort_by(|a, b| a.1.id.cmp(&b.1.id));

        record.status = WorkflowStatus::Cancelled;
        record.completed_at = Some(now);
        record.error = Some("cancelled by request".into());

        let tasks: Vec<TaskRecord> = changed_tasks.iter().map(|(_, t)| t.clone()).collect();
        self.store.save_workflow_with_tasks(&record, &tasks).await?;

        for (old, task) in &changed_tasks {
            self.emit_task_event(&record.id, task, Some(*old)).await;
        }
        self.emit_workflow_event(&record, Some(old_status), WorkflowStatus::Cancelled)
            .await;

        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Publishes a signal to its target task. A forced interrupt also
    /// cancels the task's context.
    pub async fn signal(&self, signal: Signal) -> EngineResult<PublishOutcome> {
        if let SignalKind::Interrupt {
            mode: InterruptMode::Forced,
        } = signal.kind
        {
            let executions = self.executions.read().await;
            for handle in executions.values() {
                if let Some(token) = handle.task_tokens.read().await.get(&signal.target_task_id) {
                    token.cancel();
                }
            }
        }
        self.signals.publish(signal).await
    }

    pub async fn workflow(&self, workflow_id: &str) -> EngineResult<WorkflowRecord> {
        self.store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))
    }

    pub async fn list_workflows(&self, filter: &WorkflowFilter) -> EngineResult<Vec<WorkflowRecord>> {
        self.store.list_workflows(filter).await
    }

    /// Destroys a terminal workflow record and its tasks.
    pub async fn purge_workflow(&self, workflow_id: &str) -> EngineResult<()> {
        let record = self.workflow(workflow_id).await?;
        if !record.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                entity: "workflow",
                from: record.status.as_str().into(),
                to: "purged".into(),
            });
        }
        self.store.delete_workflow(workflow_id).await?;
        self.hub.remove_workflow(workflow_id).await;
        Ok(())
    }

    // ---- driver ----------------------------------------------------------

    fn spawn_driver(
        &self,
        record: WorkflowRecord,
        bodies: HashMap<String, TaskFn>,
        handle: ExecutionHandle,
    ) -> Driver {
        let (finished_tx, finished_rx) = oneshot::channel();
        let ctx = DriverContext {
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
            hub: self.hub.clone(),
            lanes: self.lanes.clone(),
            signals: self.signals.clone(),
            executions: self.executions.clone(),
            default_lane: self.config.default_lane.clone(),
        };
        let counters = self.counters.clone();
        let workflow_id = record.id.clone();
        let join = tokio::spawn(async move {
            let final_record = drive_workflow(ctx, counters, record, bodies, handle).await;
            let _ = finished_tx.send(final_record);
        });

        tracing::debug!(workflow_id, "workflow driver spawned");
        Driver {
            join,
            finished: finished_rx,
        }
    }

    async fn emit_workflow_event(
        &self,
        record: &WorkflowRecord,
        old: Option<WorkflowStatus>,
        new: WorkflowStatus,
    ) {
        let event = WorkflowStateEvent {
            workflow_id: record.id.clone(),
            name: record.name.clone(),
            old_state: old,
            new_state: new,
            timestamp: Utc::now(),
        };
        if let Err(err) = self
            .broadcaster
            .broadcast_workflow_state_changed(&event)
            .await
        {
            tracing::warn!(workflow_id = %record.id, error = %err, "broadcast failed");
        }
        self.hub
            .publish(EngineEvent::WorkflowStateChanged(event))
            .await;
    }

    async fn emit_task_event(
        &self,
        workflow_id: &str,
        task: &TaskRecord,
        old: Option<TaskStatus>,
    ) {
        let event = TaskStateEvent {
            workflow_id: workflow_id.to_string(),
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            old_state: old,
            new_state: task.status,
            error_message: task.error.clone(),
            result: task.result.clone(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.broadcaster.broadcast_task_state_changed(&event).await {
            tracing::warn!(workflow_id, task_id = %task.id, error = %err, "broadcast failed");
        }
        self.hub.publish(EngineEvent::TaskStateChanged(event)).await;
    }
}

struct Driver {
    join: JoinHandle<()>,
    finished: oneshot::Receiver<WorkflowRecord>,
}

/// Everything the driver needs, detached from the engine's lifetime.
#[derive(Clone)]
struct DriverContext {
    store: Arc<dyn WorkflowStore>,
    broadcaster: Arc<dyn EventBroadcaster>,
    hub: Arc<EventHub>,
    lanes: Arc<LaneManager>,
    signals: Arc<dyn SignalBus>,
    executions: Arc<RwLock<HashMap<String, ExecutionHandle>>>,
    default_lane: String,
}

async fn drive_workflow(
    ctx: DriverContext,
    counters: Arc<EngineCounters>,
    record: WorkflowRecord,
    bodies: HashMap<String, TaskFn>,
    handle: ExecutionHandle,
) -> WorkflowRecord {
    let workflow_id = record.id.clone();
    let shared = handle.record.clone();

    // pending -> scheduled -> running
    let _ = transition_workflow(&ctx, &shared, WorkflowStatus::Scheduled, None).await;
    let _ = transition_workflow(&ctx, &shared, WorkflowStatus::Running, None).await;

    let definitions: HashMap<String, _> = record
        .tasks
        .iter()
        .map(|def| (def.id.clone(), def.clone()))
        .collect();

    let tracker = Arc::new(StateTracker::new());
    tracker.init_tasks(definitions.keys().cloned()).await;
    install_task_hook(&ctx, &tracker, &shared, &counters, &workflow_id).await;

    let outcome = match dag_compiler::compile(&record.tasks) {
        Ok(plan) => {
            let scheduler = LayerScheduler::new(
                ctx.lanes.clone(),
                ctx.signals.clone(),
                ctx.default_lane.clone(),
            );
            scheduler
                .run_plan(
                    &workflow_id,
                    &plan,
                    &definitions,
                    &bodies,
                    tracker.clone(),
                    &handle.token,
                    handle.task_tokens.clone(),
                )
                .await
        }
        Err(err) => {
            for task_id in tracker.non_terminal().await {
                tracker
                    .set_failed(&task_id, format!("workflow compilation failed: {err}"), 0)
                    .await;
            }
            Err(err)
        }
    };

    // Defensive sweep: terminal workflows require terminal tasks.
    let sweep_reason = if handle.token.is_cancelled() {
        "workflow cancelled"
    } else {
        "workflow terminated"
    };
    for task_id in tracker.non_terminal().await {
        tracker.set_cancelled(&task_id, sweep_reason).await;
    }

    let (final_status, error_text) = if handle.token.is_cancelled() {
        let reason = shared
            .lock()
            .await
            .error
            .clone()
            .unwrap_or_else(|| "cancelled by request".into());
        (WorkflowStatus::Cancelled, Some(reason))
    } else {
        match outcome {
            Ok(()) => (WorkflowStatus::Completed, None),
            Err(err) => (WorkflowStatus::Failed, Some(err.to_string())),
        }
    };

    let _ = transition_workflow(&ctx, &shared, final_status, error_text).await;

    match final_status {
        WorkflowStatus::Completed => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("workflows_total", "status" => "completed").increment(1);
        }
        WorkflowStatus::Failed => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("workflows_total", "status" => "failed").increment(1);
        }
        WorkflowStatus::Cancelled => {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("workflows_total", "status" => "cancelled").increment(1);
        }
        _ => {}
    }

    ctx.executions.write().await.remove(&workflow_id);
    let final_record = shared.lock().await.clone();
    tracing::info!(
        workflow_id,
        status = %final_record.status,
        "workflow finished"
    );
    final_record
}

/// Wires tracker transitions into persist-then-emit for task records.
async fn install_task_hook(
    ctx: &DriverContext,
    tracker: &Arc<StateTracker>,
    shared: &Arc<Mutex<WorkflowRecord>>,
    counters: &Arc<EngineCounters>,
    workflow_id: &str,
) {
    let ctx = ctx.clone();
    let shared = shared.clone();
    let workflow_id = workflow_id.to_string();
    let counters = counters.clone();

    tracker
        .set_on_state_change(Arc::new(move |transition: TaskTransition| {
            let ctx = ctx.clone();
            let shared = shared.clone();
            let workflow_id = workflow_id.clone();
            let counters = counters.clone();
            Box::pin(async move {
                if transition.new == RunState::Retrying {
                    counters.task_retries.fetch_add(1, Ordering::Relaxed);
                }
                persist_and_emit_task(&ctx, &shared, &workflow_id, transition).await;
            })
        }))
        .await;
}

/// Task-level persist-then-emit with in-memory revert on failure.
async fn persist_and_emit_task(
    ctx: &DriverContext,
    shared: &Arc<Mutex<WorkflowRecord>>,
    workflow_id: &str,
    transition: TaskTransition,
) {
    let new_status = transition.new.persisted();
    let now = Utc::now();

    let prepared = {
        let mut record = shared.lock().await;
        let Some(task) = record.task_status.get_mut(&transition.task_id) else {
            return;
        };
        let old_status = task.status;
        if old_status == new_status {
            return;
        }
        if !old_status.can_transition_to(new_status) {
            tracing::warn!(
                workflow_id,
                task_id = %transition.task_id,
                from = %old_status,
                to = %new_status,
                "illegal task transition ignored"
            );
            return;
        }

        let snapshot = task.clone();
        task.status = new_status;
        if new_status == TaskStatus::Running && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if new_status.is_terminal() {
            task.completed_at = Some(now);
        }
        if let Some(error) = &transition.error {
            task.error = Some(error.clone());
        }
        // Results are withheld until the task is terminal.
        if new_status == TaskStatus::Completed {
            task.result = transition.result.clone();
        }
        Some((old_status, snapshot, task.clone()))
    };

    let Some((old_status, snapshot, updated)) = prepared else {
        return;
    };

    match ctx.store.save_task(workflow_id, &updated).await {
        Ok(()) => {
            let event = TaskStateEvent {
                workflow_id: workflow_id.to_string(),
                task_id: updated.id.clone(),
                task_name: updated.name.clone(),
                old_state: Some(old_status),
                new_state: updated.status,
                error_message: updated.error.clone(),
                result: updated.result.clone(),
                timestamp: now,
            };
            if let Err(err) = ctx.broadcaster.broadcast_task_state_changed(&event).await {
                tracing::warn!(workflow_id, task_id = %updated.id, error = %err, "broadcast failed");
            }
            ctx.hub.publish(EngineEvent::TaskStateChanged(event)).await;
        }
        Err(err) => {
            tracing::error!(
                workflow_id,
                task_id = %updated.id,
                error = %err,
                "task persist failed; reverting in-memory transition"
            );
            let mut record = shared.lock().await;
            if let Some(task) = record.task_status.get_mut(&updated.id) {
                *task = snapshot;
            }
        }
    }
}

/// Workflow-level persist-then-emit with in-memory revert on failure.
async fn transition_workflow(
    ctx: &DriverContext,
    shared: &Arc<Mutex<WorkflowRecord>>,
    new_status: WorkflowStatus,
    error: Option<String>,
) -> EngineResult<()> {
    let now = Utc::now();
    let (old_status, snapshot, updated) = {
        let mut record = shared.lock().await;
        let old_status = record.status;
        if !old_status.can_transition_to(new_status) {
            return Err(EngineError::InvalidTransition {
                entity: "workflow",
                from: old_status.as_str().into(),
                to: new_status.as_str().into(),
            });
        }
        let snapshot = (
            record.status,
            record.started_at,
            record.completed_at,
            record.error.clone(),
        );
        record.status = new_status;
        if new_status == WorkflowStatus::Running && record.started_at.is_none() {
            record.started_at = Some(now);
        }
        if new_status.is_terminal() {
            record.completed_at = Some(now);
        }
        if let Some(error) = error {
            record.error = Some(error);
        }
        (old_status, snapshot, record.clone())
    };

    match ctx.store.save_workflow(&updated).await {
        Ok(()) => {
            let event = WorkflowStateEvent {
                workflow_id: updated.id.clone(),
                name: updated.name.clone(),
                old_state: Some(old_status),
                new_state: new_status,
                timestamp: now,
            };
            if let Err(err) = ctx
                .broadcaster
                .broadcast_workflow_state_changed(&event)
                .await
            {
                tracing::warn!(workflow_id = %updated.id, error = %err, "broadcast failed");
            }
            ctx.hub
                .publish(EngineEvent::WorkflowStateChanged(event))
                .await;
            Ok(())
        }
        Err(err) => {
            tracing::error!(
                workflow_id = %updated.id,
                error = %err,
                "workflow persist failed; reverting in-memory transition"
            );
            let mut record = shared.lock().await;
            let (status, started_at, completed_at, error_text) = snapshot;
            record.status = status;
            record.started_at = started_at;
            record.completed_at = completed_at;
            record.error = error_text;
            Err(err)
        }
    }
}
