//! Saga sub-system: definitions, orchestration, WAL, and recovery.

pub mod definition;
pub mod orchestrator;
pub mod recovery;
pub mod wal;

pub use definition::{SagaBuilder, SagaDefinition, SagaStep, Step, StepContext, StepFn};
pub use orchestrator::SagaOrchestrator;
pub use recovery::{RecoveryManager, RecoveryReport};
pub use wal::WalWriter;
