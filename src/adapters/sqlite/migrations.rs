//! Embedded schema migrations.

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration {version} failed: {source}")]
    Failed {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
}

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "workflow, saga, and memory tables",
    sql: r"
CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    tasks TEXT NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status);
CREATE INDEX IF NOT EXISTS idx_workflows_created ON workflows(created_at);

CREATE TABLE IF NOT EXISTS workflow_tasks (
    workflow_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error TEXT,
    result TEXT,
    PRIMARY KEY (workflow_id, task_id)
);

CREATE TABLE IF NOT EXISTS saga_wal (
    saga_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    kind TEXT NOT NULL,
    step_id TEXT NOT NULL,
    payload TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (saga_id, sequence)
);
CREATE INDEX IF NOT EXISTS idx_saga_wal_created ON saga_wal(created_at);

CREATE TABLE IF NOT EXISTS saga_checkpoints (
    saga_id TEXT PRIMARY KEY,
    definition_name TEXT NOT NULL,
    state TEXT NOT NULL,
    instance TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_saga_checkpoints_state ON saga_checkpoints(state);

CREATE TABLE IF NOT EXISTS memories (
    session_id TEXT NOT NULL,
    entry_id TEXT NOT NULL,
    task_id TEXT,
    content TEXT NOT NULL,
    vector TEXT,
    metadata TEXT NOT NULL,
    strength REAL NOT NULL,
    stability REAL NOT NULL,
    last_review TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (session_id, entry_id)
);
",
}];

/// Applies every embedded migration newer than the stored schema version.
/// Returns the number applied.
pub async fn migrate(pool: &SqlitePool) -> Result<usize, MigrationError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now')),
            description TEXT
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| MigrationError::Failed {
        version: 0,
        source: e,
    })?;

    let current: Option<(i64,)> =
        sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_optional(pool)
            .await
            .map_err(|e| MigrationError::Failed {
                version: 0,
                source: e,
            })?;
    let current = current.map_or(0, |(v,)| v);

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        sqlx::raw_sql(migration.sql)
            .execute(pool)
            .await
            .map_err(|e| MigrationError::Failed {
                version: migration.version,
                source: e,
            })?;
        sqlx::query("INSERT OR IGNORE INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(pool)
            .await
            .map_err(|e| MigrationError::Failed {
                version: migration.version,
                source: e,
            })?;
        tracing::debug!(version = migration.version, "migration applied");
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = create_test_pool().await.unwrap();
        assert_eq!(migrate(&pool).await.unwrap(), 1);
        assert_eq!(migrate(&pool).await.unwrap(), 0);
    }
}
