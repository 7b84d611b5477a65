//! Sync history model.
//!
//! One row per (session, repository, data type). Rows are append-only; a
//! trigger in the schema rejects updates.

use crate::db::pool::DbPool;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Which listing a sub-operation synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Issues,
    Prs,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issues => "issues",
            Self::Prs => "prs",
        }
    }
}

impl From<&str> for DataType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prs" | "pulls" | "pull_requests" => Self::Prs,
            _ => Self::Issues,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    /// Some items or repositories failed; the rest completed.
    Partial,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }
}

impl From<&str> for SyncStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "success" => Self::Success,
            "partial" => Self::Partial,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded sync sub-operation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncHistory {
    pub id: i64,

    /// Groups every row written by one trigger.
    pub session_id: String,

    /// `owner/name`.
    pub repository: String,

    /// `issues` or `prs`.
    pub data_type: String,

    pub new_count: i64,

    pub updated_count: i64,

    pub unchanged_count: i64,

    pub pages_fetched: i64,

    /// `success`, `partial`, or `error`.
    pub status: String,

    pub error_message: Option<String>,

    /// Error class such as `network` or `rate_limited`.
    pub error_kind: Option<String>,

    pub duration_ms: Option<i64>,

    /// Unix seconds.
    pub created_at: i64,
}

impl SyncHistory {
    pub fn status_enum(&self) -> SyncStatus {
        SyncStatus::from(self.status.as_str())
    }

    pub fn data_type_enum(&self) -> DataType {
        DataType::from(self.data_type.as_str())
    }

    pub fn is_error(&self) -> bool {
        self.status_enum() != SyncStatus::Success
    }
}

/// Row to append at the end of a sub-operation.
#[derive(Debug, Clone)]
pub struct NewSyncHistory {
    pub session_id: String,
    pub repository: String,
    pub data_type: DataType,
    pub new_count: i64,
    pub updated_count: i64,
    pub unchanged_count: i64,
    pub pages_fetched: i64,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub duration_ms: i64,
}

const SYNC_HISTORY_COLUMNS: &str = "id, session_id, repository, data_type, new_count, updated_count, unchanged_count, pages_fetched, status, error_message, error_kind, duration_ms, created_at";

/// Append a history row.
pub async fn insert_sync_history(
    pool: &DbPool,
    entry: &NewSyncHistory,
) -> Result<SyncHistory, AppError> {
    let now = chrono::Utc::now().timestamp();
    let query = format!(
        r#"INSERT INTO sync_history
           (session_id, repository, data_type, new_count, updated_count, unchanged_count,
            pages_fetched, status, error_message, error_kind, duration_ms, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING {}"#,
        SYNC_HISTORY_COLUMNS
    );

    let row = sqlx::query_as::<_, SyncHistory>(&query)
        .bind(&entry.session_id)
        .bind(&entry.repository)
        .bind(entry.data_type.as_str())
        .bind(entry.new_count)
        .bind(entry.updated_count)
        .bind(entry.unchanged_count)
        .bind(entry.pages_fetched)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .bind(&entry.error_kind)
        .bind(entry.duration_ms)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| AppError::database_with_op(e.to_string(), "insert_sync_history"))?;

    Ok(row)
}

/// Most recent history rows, newest first.
pub async fn list_sync_history(
    pool: &DbPool,
    repository: Option<&str>,
    limit: i64,
) -> Result<Vec<SyncHistory>, AppError> {
    let limit = limit.clamp(1, 1000);
    let rows = match repository {
        Some(repository) => {
            let query = format!(
                "SELECT {} FROM sync_history WHERE repository = ? COLLATE NOCASE ORDER BY created_at DESC, id DESC LIMIT ?",
                SYNC_HISTORY_COLUMNS
            );
            sqlx::query_as::<_, SyncHistory>(&query)
                .bind(repository)
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
        None => {
            let query = format!(
                "SELECT {} FROM sync_history ORDER BY created_at DESC, id DESC LIMIT ?",
                SYNC_HISTORY_COLUMNS
            );
            sqlx::query_as::<_, SyncHistory>(&query)
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows)
}

/// All rows of one session in write order.
pub async fn list_session(pool: &DbPool, session_id: &str) -> Result<Vec<SyncHistory>, AppError> {
    let query = format!(
        "SELECT {} FROM sync_history WHERE session_id = ? ORDER BY id ASC",
        SYNC_HISTORY_COLUMNS
    );
    let rows = sqlx::query_as::<_, SyncHistory>(&query)
        .bind(session_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Recent rows that did not fully succeed, for the dashboard's error list.
pub async fn recent_errors(pool: &DbPool, limit: i64) -> Result<Vec<SyncHistory>, AppError> {
    let query = format!(
        "SELECT {} FROM sync_history WHERE status != 'success' ORDER BY created_at DESC, id DESC LIMIT ?",
        SYNC_HISTORY_COLUMNS
    );
    let rows = sqlx::query_as::<_, SyncHistory>(&query)
        .bind(limit.clamp(1, 1000))
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
