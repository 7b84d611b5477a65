//! Per-item reconciliation of fetched GitHub records into the store.
//!
//! Each item is written in its own transaction keyed on
//! (repository, number). A stored row is only overwritten when the remote
//! `updated_at` is strictly newer, and `triage`/`priority` are never part of
//! the write.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::issue::Label;
use crate::models::pull_request::Reviewer;
use crate::models::reference::RelatedReference;
use crate::services::github_client::{GitHubIssue, GitHubLabel, GitHubPullRequest, GitHubUser};
use crate::services::references::extract_references;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{Sqlite, Transaction};

/// What reconciliation did with one fetched item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileOutcome {
    New,
    Updated,
    Unchanged,
}

/// Running counts for one sub-operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounts {
    pub new: i64,
    pub updated: i64,
    pub unchanged: i64,
}

impl ReconcileCounts {
    pub fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::New => self.new += 1,
            ReconcileOutcome::Updated => self.updated += 1,
            ReconcileOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn add(&mut self, other: &ReconcileCounts) {
        self.new += other.new;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }

    pub fn total(&self) -> i64 {
        self.new + self.updated + self.unchanged
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn login(user: &Option<GitHubUser>) -> String {
    user.as_ref()
        .map(|u| u.login.clone())
        .unwrap_or_else(|| "ghost".to_string())
}

fn logins(users: &[GitHubUser]) -> Vec<String> {
    users.iter().map(|u| u.login.clone()).collect()
}

fn labels(labels: &[GitHubLabel]) -> Vec<Label> {
    labels
        .iter()
        .map(|l| Label {
            name: l.name.clone(),
            color: l.color.clone(),
        })
        .collect()
}

fn references(body: &Option<String>, repository: &str) -> Vec<RelatedReference> {
    body.as_deref()
        .map(|b| extract_references(b, repository))
        .unwrap_or_default()
}

/// Stored `updated_at` for a key inside the item's transaction.
async fn stored_updated_at(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    repository: &str,
    number: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let query = format!(
        "SELECT updated_at FROM {} WHERE repository = ? COLLATE NOCASE AND number = ?",
        table
    );
    let row: Option<(i64,)> = sqlx::query_as(&query)
        .bind(repository)
        .bind(number)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.map(|(t,)| t))
}

/// Decide what to do given the stored and remote timestamps.
fn decide(stored: Option<i64>, remote: i64) -> ReconcileOutcome {
    match stored {
        None => ReconcileOutcome::New,
        Some(stored) if remote > stored => ReconcileOutcome::Updated,
        Some(_) => ReconcileOutcome::Unchanged,
    }
}

/// Reconcile one fetched issue.
pub async fn reconcile_issue(
    pool: &DbPool,
    repository: &str,
    issue: &GitHubIssue,
) -> Result<ReconcileOutcome, AppError> {
    let fail = |e: sqlx::Error| AppError::reconciliation(repository, issue.number, e.to_string());

    let updated_at = issue.updated_at.timestamp();
    let mut tx = pool.begin().await.map_err(fail)?;

    let outcome = decide(
        stored_updated_at(&mut tx, "issues", repository, issue.number)
            .await
            .map_err(fail)?,
        updated_at,
    );

    let created_at = issue.created_at.timestamp();
    let closed_at = issue.closed_at.map(|t| t.timestamp());
    let assignees = Json(logins(&issue.assignees));
    let labels = Json(labels(&issue.labels));
    let refs = Json(references(&issue.body, repository));

    match outcome {
        ReconcileOutcome::New => {
            sqlx::query(
                r#"
                INSERT INTO issues (
                    repository, number, github_id, title, body, state, author,
                    assignees, labels, html_url, comments, created_at, updated_at,
                    closed_at, related_references, synced_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(repository)
            .bind(issue.number)
            .bind(issue.id)
            .bind(&issue.title)
            .bind(&issue.body)
            .bind(&issue.state)
            .bind(login(&issue.user))
            .bind(&assignees)
            .bind(&labels)
            .bind(&issue.html_url)
            .bind(issue.comments)
            .bind(created_at)
            .bind(updated_at)
            .bind(closed_at)
            .bind(&refs)
            .bind(now())
            .execute(&mut *tx)
            .await
            .map_err(fail)?;
        }
        ReconcileOutcome::Updated => {
            sqlx::query(
                r#"
                UPDATE issues SET
                    github_id = ?, title = ?, body = ?, state = ?, author = ?,
                    assignees = ?, labels = ?, html_url = ?, comments = ?,
                    created_at = ?, updated_at = ?, closed_at = ?,
                    related_references = ?, synced_at = ?
                WHERE repository = ? COLLATE NOCASE AND number = ?
                "#,
            )
            .bind(issue.id)
            .bind(&issue.title)
            .bind(&issue.body)
            .bind(&issue.state)
            .bind(login(&issue.user))
            .bind(&assignees)
            .bind(&labels)
            .bind(&issue.html_url)
            .bind(issue.comments)
            .bind(created_at)
            .bind(updated_at)
            .bind(closed_at)
            .bind(&refs)
            .bind(now())
            .bind(repository)
            .bind(issue.number)
            .execute(&mut *tx)
            .await
            .map_err(fail)?;
        }
        ReconcileOutcome::Unchanged => {}
    }

    tx.commit().await.map_err(fail)?;
    Ok(outcome)
}

/// Reconcile one fetched pull request.
pub async fn reconcile_pull_request(
    pool: &DbPool,
    repository: &str,
    pr: &GitHubPullRequest,
) -> Result<ReconcileOutcome, AppError> {
    let fail = |e: sqlx::Error| AppError::reconciliation(repository, pr.number, e.to_string());

    let updated_at = pr.updated_at.timestamp();
    let mut tx = pool.begin().await.map_err(fail)?;

    let outcome = decide(
        stored_updated_at(&mut tx, "pull_requests", repository, pr.number)
            .await
            .map_err(fail)?,
        updated_at,
    );

    let created_at = pr.created_at.timestamp();
    let closed_at = pr.closed_at.map(|t| t.timestamp());
    let merged_at = pr.merged_at.map(|t| t.timestamp());
    let assignees = Json(logins(&pr.assignees));
    let labels = Json(labels(&pr.labels));
    let reviewers = Json(
        pr.requested_reviewers
            .iter()
            .map(|u| Reviewer {
                login: u.login.clone(),
                url: u.html_url.clone(),
            })
            .collect::<Vec<_>>(),
    );
    let refs = Json(references(&pr.body, repository));

    match outcome {
        ReconcileOutcome::New => {
            sqlx::query(
                r#"
                INSERT INTO pull_requests (
                    repository, number, github_id, title, body, state, author,
                    assignees, labels, requested_reviewers, html_url, draft, merged,
                    base_ref, head_ref, created_at, updated_at, closed_at, merged_at,
                    related_references, synced_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(repository)
            .bind(pr.number)
            .bind(pr.id)
            .bind(&pr.title)
            .bind(&pr.body)
            .bind(&pr.state)
            .bind(login(&pr.user))
            .bind(&assignees)
            .bind(&labels)
            .bind(&reviewers)
            .bind(&pr.html_url)
            .bind(pr.draft)
            .bind(pr.is_merged())
            .bind(&pr.base.ref_name)
            .bind(&pr.head.ref_name)
            .bind(created_at)
            .bind(updated_at)
            .bind(closed_at)
            .bind(merged_at)
            .bind(&refs)
            .bind(now())
            .execute(&mut *tx)
            .await
            .map_err(fail)?;
        }
        ReconcileOutcome::Updated => {
            sqlx::query(
                r#"
                UPDATE pull_requests SET
                    github_id = ?, title = ?, body = ?, state = ?, author = ?,
                    assignees = ?, labels = ?, requested_reviewers = ?, html_url = ?,
                    draft = ?, merged = ?, base_ref = ?, head_ref = ?,
                    created_at = ?, updated_at = ?, closed_at = ?, merged_at = ?,
                    related_references = ?, synced_at = ?
                WHERE repository = ? COLLATE NOCASE AND number = ?
                "#,
            )
            .bind(pr.id)
            .bind(&pr.title)
            .bind(&pr.body)
            .bind(&pr.state)
            .bind(login(&pr.user))
            .bind(&assignees)
            .bind(&labels)
            .bind(&reviewers)
            .bind(&pr.html_url)
            .bind(pr.draft)
            .bind(pr.is_merged())
            .bind(&pr.base.ref_name)
            .bind(&pr.head.ref_name)
            .bind(created_at)
            .bind(updated_at)
            .bind(closed_at)
            .bind(merged_at)
            .bind(&refs)
            .bind(now())
            .bind(repository)
            .bind(pr.number)
            .execute(&mut *tx)
            .await
            .map_err(fail)?;
        }
        ReconcileOutcome::Unchanged => {}
    }

    tx.commit().await.map_err(fail)?;
    Ok(outcome)
}
