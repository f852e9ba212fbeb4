//! Cascade - workflow orchestration engine
//!
//! Callers submit workflows as named task graphs; the engine compiles them
//! into layered execution plans, schedules task bodies onto bounded worker
//! lanes, drives a strict persist-then-emit lifecycle, and streams state
//! changes to observers. Two sibling sub-systems share the core: a saga
//! orchestrator (forward execution with reverse compensation, WAL +
//! checkpoint recovery) and a hybrid memory hub (vector + BM25 retrieval
//! with strength decay).

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{EngineError, EngineResult};
pub use domain::models::{
    Config, LaneConfig, MemoryQuery, Signal, SubmitMode, TaskDefinition, WorkflowRequest,
    WorkflowStatus,
};
pub use services::{
    MemoryHub, SagaDefinition, SagaOrchestrator, Step, SubmitOptions, WorkflowEngine,
};
