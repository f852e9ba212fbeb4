//! SQLite adapters for the engine's storage ports.

pub mod connection;
pub mod memory_store;
pub mod migrations;
pub mod saga_store;
pub mod workflow_store;

pub use connection::{connect, create_test_pool, verify_connection, ConnectionError};
pub use memory_store::SqliteMemoryStore;
pub use migrations::{migrate, MigrationError};
pub use saga_store::SqliteSagaStore;
pub use workflow_store::SqliteWorkflowStore;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::DatabaseConfig;

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> EngineResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| EngineError::Serialization(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> EngineResult<Option<DateTime<Utc>>> {
    s.map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| EngineError::Serialization(e.to_string()))
}

/// Parse a JSON string from a SQLite row field, falling back to the type's
/// default.
pub fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(
    s: Option<String>,
) -> EngineResult<T> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| EngineError::Serialization(e.to_string()))
        .map(Option::unwrap_or_default)
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Opens (creating if missing) and migrates the engine database.
pub async fn initialize_database(config: &DatabaseConfig) -> Result<SqlitePool, DatabaseError> {
    let pool = connect(config).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    migrate(&pool).await?;
    Ok(pool)
}
