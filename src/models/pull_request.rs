//! Pull request model.

use super::issue::{AnnotationUpdate, ItemState, Label};
use super::query::{ItemFilter, Page};
use super::reference::RelatedReference;
use crate::db::pool::DbPool;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite};

/// A requested reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub login: String,
    pub url: String,
}

/// A mirrored GitHub pull request.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PullRequest {
    pub id: i64,

    /// Owning repository as `owner/name`.
    pub repository: String,

    pub number: i64,

    pub github_id: i64,

    pub title: String,

    pub body: Option<String>,

    /// `open` or `closed`. Merged pull requests are closed with `merged` set.
    pub state: String,

    pub author: String,

    pub assignees: Json<Vec<String>>,

    pub labels: Json<Vec<Label>>,

    pub requested_reviewers: Json<Vec<Reviewer>>,

    pub html_url: String,

    pub draft: bool,

    pub merged: bool,

    /// Target branch.
    pub base_ref: String,

    /// Source branch.
    pub head_ref: String,

    pub created_at: i64,

    pub updated_at: i64,

    pub closed_at: Option<i64>,

    pub merged_at: Option<i64>,

    pub related_references: Json<Vec<RelatedReference>>,

    pub triage: bool,

    pub priority: Option<String>,

    pub synced_at: i64,
}

impl PullRequest {
    pub fn state_enum(&self) -> ItemState {
        ItemState::from(self.state.as_str())
    }
}

pub(crate) const PULL_REQUEST_COLUMNS: &str = "id, repository, number, github_id, title, body, state, author, assignees, labels, requested_reviewers, html_url, draft, merged, base_ref, head_ref, created_at, updated_at, closed_at, merged_at, related_references, triage, priority, synced_at";

pub async fn get_pull_request(
    pool: &DbPool,
    repository: &str,
    number: i64,
) -> Result<Option<PullRequest>, AppError> {
    let query = format!(
        "SELECT {} FROM pull_requests WHERE repository = ? COLLATE NOCASE AND number = ?",
        PULL_REQUEST_COLUMNS
    );
    let pr = sqlx::query_as::<_, PullRequest>(&query)
        .bind(repository)
        .bind(number)
        .fetch_optional(pool)
        .await?;
    Ok(pr)
}

/// List pull requests matching the dashboard filter.
pub async fn list_pull_requests(
    pool: &DbPool,
    filter: &ItemFilter,
) -> Result<Page<PullRequest>, AppError> {
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM pull_requests");
    filter.push_where(&mut count_qb);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM pull_requests",
        PULL_REQUEST_COLUMNS
    ));
    filter.push_where(&mut qb);
    filter.push_order_and_page(&mut qb);
    let items = qb.build_query_as::<PullRequest>().fetch_all(pool).await?;

    Ok(Page {
        total,
        limit: filter.limit(),
        offset: filter.offset(),
        items,
    })
}

/// Set dashboard annotations on a pull request.
pub async fn update_pull_request_annotations(
    pool: &DbPool,
    repository: &str,
    number: i64,
    update: &AnnotationUpdate,
) -> Result<PullRequest, AppError> {
    let not_found =
        || AppError::not_found_with_id("Pull request", format!("{}#{}", repository, number));

    let existing = get_pull_request(pool, repository, number)
        .await?
        .ok_or_else(not_found)?;

    let priority = match update.priority {
        Some(p) => p.map(|p| p.as_str().to_string()),
        None => existing.priority.clone(),
    };

    sqlx::query("UPDATE pull_requests SET triage = ?, priority = ? WHERE id = ?")
        .bind(update.triage.unwrap_or(existing.triage))
        .bind(priority)
        .bind(existing.id)
        .execute(pool)
        .await?;

    get_pull_request(pool, &existing.repository, number)
        .await?
        .ok_or_else(not_found)
}

/// Open pull request count per repository.
pub async fn open_pull_request_counts(pool: &DbPool) -> Result<Vec<(String, i64)>, AppError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT repository, COUNT(*) FROM pull_requests WHERE state = 'open' GROUP BY repository",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
