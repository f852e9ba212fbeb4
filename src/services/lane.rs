//! Worker lanes: bounded admission + execution resources.
//!
//! Each lane owns a bounded FIFO (or priority) queue consumed by a fixed
//! pool of workers. Admission is gated by an optional governor token bucket
//! and the lane's backpressure policy. Every submission records exactly one
//! outcome: accepted, rejected, redirected, or dropped.

use std::collections::{BinaryHeap, VecDeque};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{BackpressurePolicy, LaneConfig, LaneStats, SubmitOutcome};

/// Why a queued job is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// Dispatched to a worker.
    Run,
    /// The lane closed before dispatch; the job must fail fast.
    LaneClosed,
}

type JobFn = Box<dyn FnOnce(JobDisposition) -> BoxFuture<'static, ()> + Send + 'static>;

/// A unit of work submitted to a lane.
pub struct LaneTask {
    pub priority: i32,
    job: JobFn,
}

impl LaneTask {
    pub fn new<F>(priority: i32, job: F) -> Self
    where
        F: FnOnce(JobDisposition) -> BoxFuture<'static, ()> + Send + 'static,
    {
        Self {
            priority,
            job: Box::new(job),
        }
    }
}

struct QueuedTask {
    seq: u64,
    priority: i32,
    job: JobFn,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Max-heap: priority desc, then submit sequence asc.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum LaneQueue {
    Fifo(VecDeque<QueuedTask>),
    Priority(BinaryHeap<QueuedTask>),
}

impl LaneQueue {
    fn push(&mut self, task: QueuedTask) {
        match self {
            Self::Fifo(q) => q.push_back(task),
            Self::Priority(q) => q.push(task),
        }
    }

    fn pop(&mut self) -> Option<QueuedTask> {
        match self {
            Self::Fifo(q) => q.pop_front(),
            Self::Priority(q) => q.pop(),
        }
    }
}

#[derive(Default)]
struct AtomicLaneStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    redirected: AtomicU64,
    dropped: AtomicU64,
}

/// A registered lane. Obtained from [`LaneManager::register`].
pub struct Lane {
    config: LaneConfig,
    queue: Mutex<LaneQueue>,
    /// Free queue slots; permits move queue-ward on push and back on pop.
    slots: Arc<Semaphore>,
    /// Queued items awaiting a worker.
    items: Arc<Semaphore>,
    limiter: Option<DefaultDirectRateLimiter>,
    closed: CancellationToken,
    close_started: AtomicBool,
    seq: AtomicU64,
    stats: AtomicLaneStats,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane").field("config", &self.config).finish()
    }
}

impl Lane {
    fn new(config: LaneConfig) -> Arc<Self> {
        let queue = if config.priority_enabled {
            LaneQueue::Priority(BinaryHeap::new())
        } else {
            LaneQueue::Fifo(VecDeque::new())
        };

        let limiter = config.rate_limit.map(|rl| {
            let refill = NonZeroU32::new(rl.refill_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
            let burst = NonZeroU32::new(rl.capacity.max(1)).unwrap_or(NonZeroU32::MIN);
            RateLimiter::direct(Quota::per_second(refill).allow_burst(burst))
        });

        let lane = Arc::new(Self {
            slots: Arc::new(Semaphore::new(config.capacity)),
            items: Arc::new(Semaphore::new(0)),
            queue: Mutex::new(queue),
            limiter,
            closed: CancellationToken::new(),
            close_started: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            stats: AtomicLaneStats::default(),
            workers: Mutex::new(Vec::new()),
            config,
        });

        {
            let mut workers = lane
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for _ in 0..lane.config.max_concurrency {
                let worker = Arc::clone(&lane);
                workers.push(tokio::spawn(async move { worker.worker_loop().await }));
            }
        }
        lane
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                biased;
                () = self.closed.cancelled() => break,
                permit = self.items.acquire() => {
                    let Ok(permit) = permit else { break };
                    permit.forget();
                    let Some(task) = self.pop() else { continue };
                    (task.job)(JobDisposition::Run).await;
                }
            }
        }
    }

    fn pop(&self) -> Option<QueuedTask> {
        let task = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop();
        if task.is_some() {
            self.slots.add_permits(1);
        }
        task
    }

    fn push(&self, task: LaneTask) {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        queue.push(QueuedTask {
            seq,
            priority: task.priority,
            job: task.job,
        });
        drop(queue);
        self.items.add_permits(1);
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &LaneConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn stats(&self) -> LaneStats {
        LaneStats {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            redirected: self.stats.redirected.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: SubmitOutcome) {
        let counter = match outcome {
            SubmitOutcome::Accepted => &self.stats.accepted,
            SubmitOutcome::Rejected => &self.stats.rejected,
            SubmitOutcome::Redirected => &self.stats.redirected,
            SubmitOutcome::Dropped => &self.stats.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "lane_submit_outcomes_total",
            "lane" => self.config.name.clone(),
            "outcome" => outcome.as_str(),
        )
        .increment(1);
    }

    /// Non-blocking admission: token then slot, or the task handed back.
    fn try_admit(&self, task: LaneTask) -> Result<(), LaneTask> {
        if self.is_closed() {
            return Err(task);
        }
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                return Err(task);
            }
        }
        match self.slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.push(task);
                Ok(())
            }
            Err(_) => Err(task),
        }
    }

    /// Blocking admission; waits for a token and a slot, honoring the
    /// caller's cancellation and lane close.
    async fn admit_blocking(&self, cancel: &CancellationToken, task: LaneTask) -> SubmitOutcome {
        if self.is_closed() {
            return SubmitOutcome::Rejected;
        }
        if let Some(limiter) = &self.limiter {
            tokio::select! {
                () = cancel.cancelled() => return SubmitOutcome::Rejected,
                () = self.closed.cancelled() => return SubmitOutcome::Rejected,
                () = limiter.until_ready() => {}
            }
        }
        let permit = tokio::select! {
            () = cancel.cancelled() => return SubmitOutcome::Rejected,
            () = self.closed.cancelled() => return SubmitOutcome::Rejected,
            permit = self.slots.acquire() => permit,
        };
        let Ok(permit) = permit else {
            return SubmitOutcome::Rejected;
        };
        permit.forget();
        self.push(task);
        SubmitOutcome::Accepted
    }

    /// Drains workers, then fails queued-but-undispatched tasks with a
    /// lane-closed disposition. Repeated close is a no-op.
    pub async fn close(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();

        let workers = {
            let mut guard = self
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for handle in workers {
            if let Err(err) = handle.await {
                tracing::warn!(lane = %self.config.name, error = %err, "lane worker panicked");
            }
        }

        while let Some(task) = self.pop() {
            (task.job)(JobDisposition::LaneClosed).await;
        }
        tracing::debug!(lane = %self.config.name, "lane closed");
    }
}

/// Registry and submission front-end for all lanes.
#[derive(Default)]
pub struct LaneManager {
    lanes: RwLock<HashMap<String, Arc<Lane>>>,
}

impl LaneManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a lane and starts its worker pool.
    pub async fn register(&self, config: LaneConfig) -> EngineResult<Arc<Lane>> {
        config.validate().map_err(EngineError::InvalidLaneConfig)?;

        let mut lanes = self.lanes.write().await;
        if lanes.contains_key(&config.name) {
            return Err(EngineError::LaneAlreadyExists(config.name));
        }
        let lane = Lane::new(config);
        lanes.insert(lane.name().to_string(), Arc::clone(&lane));
        Ok(lane)
    }

    pub async fn get(&self, name: &str) -> EngineResult<Arc<Lane>> {
        self.lanes
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::LaneNotFound(name.to_string()))
    }

    pub async fn stats(&self, name: &str) -> Option<LaneStats> {
        self.lanes.read().await.get(name).map(|l| l.stats())
    }

    /// Submits a task to the named lane, applying its backpressure policy.
    /// A redirect is attempted at most once and the destination must admit
    /// directly.
    pub async fn submit(
        &self,
        lane_name: &str,
        cancel: &CancellationToken,
        task: LaneTask,
    ) -> EngineResult<SubmitOutcome> {
        let lane = self.get(lane_name).await?;

        let outcome = match lane.config().backpressure.clone() {
            BackpressurePolicy::Block => lane.admit_blocking(cancel, task).await,
            BackpressurePolicy::Drop => match lane.try_admit(task) {
                Ok(()) => SubmitOutcome::Accepted,
                Err(_task) => SubmitOutcome::Dropped,
            },
            BackpressurePolicy::Redirect(target) => match lane.try_admit(task) {
                Ok(()) => SubmitOutcome::Accepted,
                Err(task) => self.redirect(&lane, &target, task).await,
            },
        };

        lane.record(outcome);
        Ok(outcome)
    }

    async fn redirect(&self, source: &Arc<Lane>, target: &str, task: LaneTask) -> SubmitOutcome {
        let Ok(dest) = self.get(target).await else {
            tracing::warn!(
                source = %source.name(),
                target,
                "redirect target does not exist; dropping task"
            );
            return SubmitOutcome::Dropped;
        };
        match dest.try_admit(task) {
            Ok(()) => {
                dest.record(SubmitOutcome::Accepted);
                SubmitOutcome::Redirected
            }
            Err(_task) => SubmitOutcome::Dropped,
        }
    }

    /// Closes every lane; waits for workers to drain.
    pub async fn close_all(&self) {
        let lanes: Vec<Arc<Lane>> = self.lanes.read().await.values().cloned().collect();
        for lane in lanes {
            lane.close().await;
        }
    }
}
