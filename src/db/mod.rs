//! Database layer for the local SQLite mirror.
//!
//! This module handles:
//! - Connection pool management with WAL mode
//! - Named, idempotent schema migrations

pub mod pool;

use std::path::Path;
use thiserror::Error;

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Migrations in application order. Names are recorded once applied.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial_schema",
    include_str!("migrations/0001_initial_schema.sql"),
)];

/// Initialize the database: create the file if needed and run migrations.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file
///
/// # Returns
/// A connection pool configured with WAL mode
pub async fn initialize(db_path: &Path) -> Result<pool::DbPool, DbError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Migration(format!("Failed to create database directory: {}", e))
            })?;
        }
    }

    let pool = pool::create_pool(db_path).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Apply every migration not yet recorded in `_migrations`.
async fn run_migrations(pool: &pool::DbPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (name, sql) in MIGRATIONS {
        let applied: Option<(i64,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = ?")
            .bind(*name)
            .fetch_optional(pool)
            .await?;

        if applied.is_some() {
            continue;
        }

        log::info!("[db] Applying migration {}", name);

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("{}: {}", name, e)))?;
        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(*name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}
