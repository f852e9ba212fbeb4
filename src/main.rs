//! Cascade host binary: loads configuration, opens storage, recovers
//! sagas, and serves the engine until interrupted.
//!
//! Exit codes: 0 on clean shutdown, 1 on configuration failure, 2 on
//! storage initialization failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use cascade::adapters::sqlite::{
    initialize_database, SqliteMemoryStore, SqliteSagaStore, SqliteWorkflowStore,
};
use cascade::infrastructure::{ConfigLoader, Logger};
use cascade::services::{MemoryHub, RecoveryManager, SagaOrchestrator, WorkflowEngine};

#[derive(Parser, Debug)]
#[command(name = "cascaded", about = "Cascade workflow orchestration engine")]
struct Args {
    /// Path to a configuration file (defaults to .cascade/config.yaml).
    #[arg(long, env = "CASCADE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            return ExitCode::from(1);
        }
    };

    let _logger = match Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("logger initialization failed: {err:#}");
            return ExitCode::from(1);
        }
    };

    let pool = match initialize_database(&config.database).await {
        Ok(pool) => pool,
        Err(err) => {
            tracing::error!(error = %err, "storage initialization failed");
            return ExitCode::from(2);
        }
    };

    let workflow_store = Arc::new(SqliteWorkflowStore::new(pool.clone()));
    let saga_store = Arc::new(SqliteSagaStore::new(pool.clone()));
    let memory_store = Arc::new(SqliteMemoryStore::new(pool));

    let orchestrator = Arc::new(SagaOrchestrator::new(saga_store, config.saga.clone()));
    let recovery = RecoveryManager::new(orchestrator.clone());
    match recovery.recover_all().await {
        Ok(report) if report.total() > 0 => {
            tracing::info!(recovered = report.total(), "saga recovery complete");
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "saga recovery pass failed"),
    }

    let hub = MemoryHub::new(memory_store, config.memory.clone());
    if let Err(err) = hub.start().await {
        tracing::error!(error = %err, "memory hub failed to start");
        return ExitCode::from(2);
    }

    let engine = Arc::new(WorkflowEngine::new(workflow_store, config.engine.clone()));
    if let Err(err) = engine.start(config.lanes.clone()).await {
        tracing::error!(error = %err, "engine failed to start");
        return ExitCode::from(2);
    }

    tracing::info!("cascaded is running; press ctrl-c to stop");
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }

    tracing::info!("shutdown requested");
    engine.shutdown().await;
    hub.stop().await;
    orchestrator.stop().await;

    ExitCode::SUCCESS
}
