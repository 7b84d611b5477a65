//! SQLite connection pool with WAL mode.
//!
//! The sync engine is the only writer; dashboard readers run concurrently
//! against the same file, which WAL allows without blocking.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Create a new connection pool with WAL mode enabled.
///
/// The parent directory must already exist; `create_if_missing` only
/// creates the file.
pub async fn create_pool(db_path: &Path) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        // Dashboard reads may overlap a long sync pass
        .busy_timeout(Duration::from_secs(30))
        .pragma("wal_autocheckpoint", "1000");

    SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_pool_with_wal() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir.path().join("test.db")).await.unwrap();

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");

        let fk: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fk.0, 1);
    }

    #[tokio::test]
    async fn test_pool_requires_parent_directory() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("missing/test.db");

        assert!(create_pool(&db_path).await.is_err());

        std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
        let pool = create_pool(&db_path).await.unwrap();
        let result: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(result.0, 1);
    }
}
