//! Saga orchestrator: forward execution and reverse compensation.
//!
//! Every step follows the write discipline: WAL event, then checkpoint.
//! Failure branches by compensation policy; compensation retries with
//! exponential backoff and terminates the saga `compensation-failed` when
//! the budget is exhausted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    CompensationPolicy, SagaConfig, SagaInstance, SagaState, WalEntry, WalEventKind,
};
use crate::domain::ports::SagaStore;
use crate::services::saga::definition::{SagaDefinition, SagaStep, StepContext, StepFn};
use crate::services::saga::wal::WalWriter;

/// Orchestrates saga instances over registered definitions.
pub struct SagaOrchestrator {
    definitions: RwLock<HashMap<String, Arc<SagaDefinition>>>,
    store: Arc<dyn SagaStore>,
    wal: Arc<WalWriter>,
    config: SagaConfig,
    sequences: Mutex<HashMap<String, Arc<AtomicU64>>>,
    shutdown: CancellationToken,
}

impl SagaOrchestrator {
    pub fn new(store: Arc<dyn SagaStore>, config: SagaConfig) -> Self {
        let wal = Arc::new(WalWriter::new(store.clone(), &config));
        Self {
            definitions: RwLock::new(HashMap::new()),
            store,
            wal,
            config,
            sequences: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn register(&self, definition: SagaDefinition) {
        self.definitions
            .write()
            .await
            .insert(definition.name().to_string(), Arc::new(definition));
    }

    pub async fn definition(&self, name: &str) -> EngineResult<Arc<SagaDefinition>> {
        self.definitions
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::SagaDefinitionNotFound(name.to_string()))
    }

    pub fn store(&self) -> Arc<dyn SagaStore> {
        self.store.clone()
    }

    pub async fn instance(&self, saga_id: &str) -> EngineResult<SagaInstance> {
        self.store
            .load_checkpoint(saga_id)
            .await?
            .ok_or_else(|| EngineError::SagaNotFound(saga_id.to_string()))
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.wal.shutdown().await;
    }

    /// Starts a new instance of a registered definition and drives it to a
    /// terminal state (or `pending-compensation` under the manual policy).
    pub async fn execute(&self, definition_name: &str) -> EngineResult<SagaInstance> {
        let definition = self.definition(definition_name).await?;
        let instance = SagaInstance::new(Uuid::new_v4().to_string(), definition_name);
        self.sequences
            .lock()
            .await
            .insert(instance.id.clone(), Arc::new(AtomicU64::new(0)));
        self.checkpoint(&instance).await?;
        tracing::info!(saga_id = %instance.id, definition = definition_name, "saga started");
        self.run_forward(&definition, instance).await
    }

    /// Resumes a recovered non-terminal instance according to its state.
    pub async fn resume(&self, instance: SagaInstance) -> EngineResult<SagaInstance> {
        let definition = self.definition(&instance.definition_name).await?;

        // Restore the WAL sequence past everything already logged.
        let next_seq = self
            .store
            .load_wal(&instance.id)
            .await?
            .iter()
            .map(|e| e.sequence + 1)
            .max()
            .unwrap_or(0);
        self.sequences
            .lock()
            .await
            .insert(instance.id.clone(), Arc::new(AtomicU64::new(next_seq)));

        match instance.state {
            SagaState::Running => self.run_forward(&definition, instance).await,
            SagaState::Compensating => self.compensate(&definition, instance).await,
            other => Err(EngineError::InvalidTransition {
                entity: "saga",
                from: other.as_str().into(),
                to: "resumed".into(),
            }),
        }
    }

    /// Moves a `pending-compensation` saga into compensation.
    pub async fn trigger_compensation(
        &self,
        saga_id: &str,
        reason: &str,
    ) -> EngineResult<SagaInstance> {
        let mut instance = self.instance(saga_id).await?;
        if instance.state != SagaState::PendingCompensation {
            return Err(EngineError::InvalidTransition {
                entity: "saga",
                from: instance.state.as_str().into(),
                to: SagaState::Compensating.as_str().into(),
            });
        }
        let definition = self.definition(&instance.definition_name).await?;

        if self.sequences.lock().await.get(saga_id).is_none() {
            let next_seq = self
                .store
                .load_wal(saga_id)
                .await?
                .iter()
                .map(|e| e.sequence + 1)
                .max()
                .unwrap_or(0);
            self.sequences
                .lock()
                .await
                .insert(saga_id.to_string(), Arc::new(AtomicU64::new(next_seq)));
        }

        instance.failure_reason = Some(reason.to_string());
        instance.state = SagaState::Compensating;
        instance.touch();
        self.checkpoint(&instance).await?;
        tracing::info!(saga_id, reason, "manual compensation triggered");
        self.compensate(&definition, instance).await
    }

    // ---- forward path ----------------------------------------------------

    async fn run_forward(
        &self,
        definition: &SagaDefinition,
        mut instance: SagaInstance,
    ) -> EngineResult<SagaInstance> {
        let mut failure: Option<(String, String)> = None;

        'layers: for layer in &definition.plan().layers {
            for step_id in layer {
                if instance.is_step_completed(step_id) {
                    continue;
                }
                let Some(step) = definition.step(step_id) else {
                    failure = Some((step_id.clone(), "step missing from definition".into()));
                    break 'layers;
                };
                if let Err(reason) = self.execute_step(definition, &mut instance, step).await? {
                    failure = Some((step_id.clone(), reason));
                    break 'layers;
                }
            }
        }

        match failure {
            None => {
                instance.state = SagaState::Completed;
                instance.completed_at = Some(Utc::now());
                instance.touch();
                self.checkpoint(&instance).await?;
                tracing::info!(saga_id = %instance.id, "saga completed");
                Ok(instance)
            }
            Some((step_id, reason)) => self.handle_failure(definition, instance, step_id, reason).await,
        }
    }

    /// Runs one step under the WAL-then-checkpoint discipline. Returns
    /// `Ok(Err(reason))` when the action failed (saga-level branching
    /// decides what happens next); `Err` only for persistence faults.
    async fn execute_step(
        &self,
        definition: &SagaDefinition,
        instance: &mut SagaInstance,
        step: &SagaStep,
    ) -> EngineResult<Result<(), String>> {
        let saga_id = instance.id.clone();

        self.append_wal(WalEntry::new(
            &saga_id,
            self.next_sequence(&saga_id).await,
            WalEventKind::StepStarted,
            &step.id,
        ))
        .await?;
        self.checkpoint(instance).await?;

        let ctx = StepContext {
            saga_id: saga_id.clone(),
            step_id: step.id.clone(),
            results: instance.step_results.clone(),
            cancellation: self.shutdown.child_token(),
        };

        let outcome = self
            .invoke_body(&step.action, ctx, self.effective_timeout(definition, &step.id))
            .await;

        match outcome {
            Ok(result) => {
                self.append_wal(
                    WalEntry::new(
                        &saga_id,
                        self.next_sequence(&saga_id).await,
                        WalEventKind::StepCompleted,
                        &step.id,
                    )
                    .with_payload(result.clone()),
                )
                .await?;
                instance.completed_steps.push(step.id.clone());
                instance.step_results.insert(step.id.clone(), result);
                instance.touch();
                self.checkpoint(instance).await?;
                tracing::debug!(saga_id = %instance.id, step = %step.id, "step completed");
                Ok(Ok(()))
            }
            Err(err) => {
                let reason = err.to_string();
                self.append_wal(
                    WalEntry::new(
                        &saga_id,
                        self.next_sequence(&saga_id).await,
                        WalEventKind::StepFailed,
                        &step.id,
                    )
                    .with_error(reason.clone()),
                )
                .await?;
                instance.touch();
                self.checkpoint(instance).await?;
                tracing::warn!(saga_id = %instance.id, step = %step.id, error = %reason, "step failed");
                Ok(Err(reason))
            }
        }
    }

    async fn handle_failure(
        &self,
        definition: &SagaDefinition,
        mut instance: SagaInstance,
        step_id: String,
        reason: String,
    ) -> EngineResult<SagaInstance> {
        instance.failed_step = Some(step_id);
        instance.failure_reason = Some(reason);

        match definition.policy() {
            CompensationPolicy::Skip => {
                instance.state = SagaState::Failed;
                instance.completed_at = Some(Utc::now());
                instance.touch();
                self.checkpoint(&instance).await?;
                Ok(instance)
            }
            CompensationPolicy::Manual => {
                instance.state = SagaState::PendingCompensation;
                instance.touch();
                self.checkpoint(&instance).await?;
                tracing::info!(saga_id = %instance.id, "awaiting manual compensation trigger");
                Ok(instance)
            }
            CompensationPolicy::Auto => {
                instance.state = SagaState::Compensating;
                instance.touch();
                self.checkpoint(&instance).await?;
                self.compensate(definition, instance).await
            }
        }
    }

    // ---- reverse path ----------------------------------------------------

    /// Compensates completed steps in reverse dependency order, skipping
    /// `Skip`-policy steps and anything already compensated.
    async fn compensate(
        &self,
        definition: &SagaDefinition,
        mut instance: SagaInstance,
    ) -> EngineResult<SagaInstance> {
        for layer in definition.plan().layers.iter().rev() {
            for step_id in layer {
                if !instance.is_step_completed(step_id)
                    || instance.is_step_compensated(step_id)
                {
                    continue;
                }
                let Some(step) = definition.step(step_id) else {
                    continue;
                };
                if definition.effective_policy(step_id) == CompensationPolicy::Skip
                    || step.compensation.is_none()
                {
                    // Nothing to undo; recorded so recovery does not revisit.
                    instance.compensated.push(step_id.clone());
                    instance.touch();
                    self.checkpoint(&instance).await?;
                    continue;
                }

                match self.compensate_step(definition, &mut instance, step).await? {
                    Ok(()) => {}
                    Err(reason) => {
                        instance.state = SagaState::CompensationFailed;
                        instance.failure_reason = Some(reason);
                        instance.completed_at = Some(Utc::now());
                        instance.touch();
                        self.checkpoint(&instance).await?;
                        tracing::error!(
                            saga_id = %instance.id,
                            step = %step_id,
                            "compensation failed"
                        );
                        return Ok(instance);
                    }
                }
            }
        }

        instance.state = SagaState::Compensated;
        instance.completed_at = Some(Utc::now());
        instance.touch();
        self.checkpoint(&instance).await?;
        tracing::info!(saga_id = %instance.id, "saga compensated");
        Ok(instance)
    }

    /// One step's compensation with bounded exponential backoff.
    /// Compensation bodies are required to be idempotent; a body may be
    /// invoked more than once under retry.
    async fn compensate_step(
        &self,
        definition: &SagaDefinition,
        instance: &mut SagaInstance,
        step: &SagaStep,
    ) -> EngineResult<Result<(), String>> {
        let Some(compensation) = step.compensation.clone() else {
            return Ok(Ok(()));
        };
        let retry = definition.retry();
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(retry.initial)
            .with_multiplier(retry.factor)
            .with_max_interval(retry.max)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let saga_id = instance.id.clone();
        let mut last_error = String::new();

        for attempt in 0..=retry.max_retries {
            let ctx = StepContext {
                saga_id: saga_id.clone(),
                step_id: step.id.clone(),
                results: instance.step_results.clone(),
                cancellation: self.shutdown.child_token(),
            };
            match self
                .invoke_body(&compensation, ctx, self.effective_timeout(definition, &step.id))
                .await
            {
                Ok(_) => {
                    self.append_wal(WalEntry::new(
                        &saga_id,
                        self.next_sequence(&saga_id).await,
                        WalEventKind::StepCompensated,
                        &step.id,
                    ))
                    .await?;
                    instance.compensated.push(step.id.clone());
                    instance.touch();
                    self.checkpoint(instance).await?;
                    tracing::debug!(saga_id = %saga_id, step = %step.id, "step compensated");
                    return Ok(Ok(()));
                }
                Err(err) => {
                    last_error = err.to_string();
                    tracing::warn!(
                        saga_id = %saga_id,
                        step = %step.id,
                        attempt,
                        error = %last_error,
                        "compensation attempt failed"
                    );
                    if attempt < retry.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Ok(Err(EngineError::CompensationFailed {
            step: step.id.clone(),
            attempts: retry.max_retries + 1,
            reason: last_error,
        }
        .to_string()))
    }

    // ---- plumbing --------------------------------------------------------

    /// Step/definition timeout, falling back to the configured default.
    fn effective_timeout(
        &self,
        definition: &SagaDefinition,
        step_id: &str,
    ) -> Option<std::time::Duration> {
        definition.step_timeout(step_id).or_else(|| {
            (self.config.step_timeout_ms > 0)
                .then(|| std::time::Duration::from_millis(self.config.step_timeout_ms))
        })
    }

    async fn invoke_body(
        &self,
        body: &StepFn,
        ctx: StepContext,
        timeout: Option<std::time::Duration>,
    ) -> EngineResult<serde_json::Value> {
        let fut = body(ctx);
        match timeout {
            Some(limit) if !limit.is_zero() => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(limit)),
            },
            _ => fut.await,
        }
    }

    async fn next_sequence(&self, saga_id: &str) -> u64 {
        let counter = {
            let mut sequences = self.sequences.lock().await;
            sequences
                .entry(saga_id.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .clone()
        };
        counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn append_wal(&self, entry: WalEntry) -> EngineResult<()> {
        self.wal.append(entry).await
    }

    async fn checkpoint(&self, instance: &SagaInstance) -> EngineResult<()> {
        self.store.save_checkpoint(instance).await
    }
}
