//! Crash recovery: resume non-terminal sagas from their checkpoints.

use std::sync::Arc;

use crate::domain::errors::EngineResult;
use crate::domain::models::SagaState;
use crate::domain::ports::SagaStore;
use crate::services::saga::orchestrator::SagaOrchestrator;

/// Summary of one recovery pass.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Sagas resumed forward from `running`.
    pub resumed_forward: Vec<String>,
    /// Sagas resumed in reverse from `compensating`.
    pub resumed_compensation: Vec<String>,
    /// `pending-compensation` sagas left for an operator.
    pub left_pending: Vec<String>,
    /// Sagas that could not be recovered (e.g. unknown definition).
    pub failed: Vec<String>,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.resumed_forward.len()
            + self.resumed_compensation.len()
            + self.left_pending.len()
            + self.failed.len()
    }
}

/// Scans checkpoints on startup and resumes what can be resumed.
pub struct RecoveryManager {
    orchestrator: Arc<SagaOrchestrator>,
}

impl RecoveryManager {
    pub fn new(orchestrator: Arc<SagaOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Recovers every non-terminal checkpoint. A fresh checkpoint is
    /// written for each saga regardless of outcome.
    pub async fn recover_all(&self) -> EngineResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let checkpoints = self.orchestrator.store().list_checkpoints().await?;

        for instance in checkpoints {
            if instance.state.is_terminal() {
                continue;
            }
            let saga_id = instance.id.clone();
            match instance.state {
                SagaState::PendingCompensation => {
                    // Operator-gated; refresh the checkpoint and move on.
                    let mut refreshed = instance;
                    refreshed.touch();
                    self.orchestrator
                        .store()
                        .save_checkpoint(&refreshed)
                        .await?;
                    report.left_pending.push(saga_id);
                }
                SagaState::Running | SagaState::Compensating => {
                    let state = instance.state;
                    match self.orchestrator.resume(instance).await {
                        Ok(recovered) => {
                            tracing::info!(
                                saga_id,
                                from = %state,
                                to = %recovered.state,
                                "saga recovered"
                            );
                            if state == SagaState::Running {
                                report.resumed_forward.push(saga_id);
                            } else {
                                report.resumed_compensation.push(saga_id);
                            }
                        }
                        Err(err) => {
                            tracing::error!(saga_id, error = %err, "saga recovery failed");
                            report.failed.push(saga_id);
                        }
                    }
                }
                _ => {}
            }
        }

        tracing::info!(
            forward = report.resumed_forward.len(),
            compensation = report.resumed_compensation.len(),
            pending = report.left_pending.len(),
            failed = report.failed.len(),
            "saga recovery pass finished"
        );
        Ok(report)
    }
}
