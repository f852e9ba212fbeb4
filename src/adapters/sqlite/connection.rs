//! SQLite pool construction for the engine database.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::domain::models::DatabaseConfig;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid database path: {0}")]
    InvalidPath(String),
    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[source] std::io::Error),
    #[error("Failed to open database: {0}")]
    OpenFailed(#[source] sqlx::Error),
}

/// Opens the engine database described by `config`, creating the file and
/// its parent directory when missing. WAL journal mode, normal sync.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool, ConnectionError> {
    if config.path.is_empty() {
        return Err(ConnectionError::InvalidPath("empty path".into()));
    }
    if config.path != ":memory:" {
        if let Some(parent) = Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(ConnectionError::DirectoryCreation)?;
            }
        }
    }

    let url = format!("sqlite:{}", config.path);
    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|_| ConnectionError::InvalidPath(config.path.clone()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));

    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(3))
        .connect_with(options)
        .await
        .map_err(ConnectionError::OpenFailed)
}

/// Single-connection in-memory database for tests.
pub async fn create_test_pool() -> Result<SqlitePool, ConnectionError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|_| ConnectionError::InvalidPath(":memory:".into()))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .shared_cache(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(ConnectionError::OpenFailed)
}

/// Cheap liveness probe used by the host binary at startup.
pub async fn verify_connection(pool: &SqlitePool) -> Result<(), ConnectionError> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(ConnectionError::OpenFailed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pool() {
        let pool = create_test_pool().await.unwrap();
        verify_connection(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_path() {
        let config = DatabaseConfig {
            path: String::new(),
            max_connections: 1,
        };
        assert!(matches!(
            connect(&config).await,
            Err(ConnectionError::InvalidPath(_))
        ));
    }
}
