//! Engine services: compilation, scheduling, execution, sagas, memory.

pub mod dag_compiler;
pub mod events;
pub mod lane;
pub mod memory;
pub mod runtime;
pub mod saga;
pub mod scheduler;
pub mod signal_bus;
pub mod state_tracker;
pub mod task_runner;

pub use dag_compiler::{compile, GraphNode};
pub use events::EventHub;
pub use lane::{JobDisposition, Lane, LaneManager, LaneTask};
pub use memory::{DecaySweep, MemoryHub};
pub use runtime::{EngineStats, SubmitOptions, WorkflowEngine};
pub use saga::{
    RecoveryManager, RecoveryReport, SagaDefinition, SagaOrchestrator, Step, StepContext, StepFn,
};
pub use scheduler::LayerScheduler;
pub use signal_bus::{
    build_signal_bus, BrokerSignalBus, InProcessBroker, LocalSignalBus, SignalBus, SignalReceiver,
};
pub use state_tracker::{RunState, StateTracker, TaskTransition};
pub use task_runner::{TaskContext, TaskFn, TaskRunner};
