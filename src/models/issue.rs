//! Issue model.
//!
//! Synced columns are written only by reconciliation. `triage` and
//! `priority` are dashboard annotations and are written only by
//! [`update_issue_annotations`].

use super::query::{ItemFilter, Page};
use super::reference::RelatedReference;
use crate::db::pool::DbPool;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite};

/// State of an issue or pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Open,
    Closed,
}

impl From<&str> for ItemState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "closed" => Self::Closed,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Dashboard priority annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(AppError::invalid_input_field(
                format!("Unknown priority '{}'", other),
                "priority",
            )),
        }
    }
}

/// A label as shown on GitHub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub color: String,
}

/// A mirrored GitHub issue.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Issue {
    pub id: i64,

    /// Owning repository as `owner/name`.
    pub repository: String,

    pub number: i64,

    pub github_id: i64,

    pub title: String,

    pub body: Option<String>,

    /// `open` or `closed`.
    pub state: String,

    /// Author login.
    pub author: String,

    /// Assignee logins.
    pub assignees: Json<Vec<String>>,

    pub labels: Json<Vec<Label>>,

    pub html_url: String,

    /// Comment count reported by GitHub.
    pub comments: i64,

    /// Unix seconds.
    pub created_at: i64,

    /// Unix seconds; never regresses.
    pub updated_at: i64,

    pub closed_at: Option<i64>,

    pub related_references: Json<Vec<RelatedReference>>,

    pub triage: bool,

    pub priority: Option<String>,

    /// When the row was last written by sync (Unix).
    pub synced_at: i64,
}

impl Issue {
    pub fn state_enum(&self) -> ItemState {
        ItemState::from(self.state.as_str())
    }

    pub fn is_open(&self) -> bool {
        self.state_enum() == ItemState::Open
    }
}

/// Annotation change; `None` leaves a field unchanged.
///
/// `priority: Some(None)` clears the priority.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnotationUpdate {
    pub triage: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub priority: Option<Option<Priority>>,
}

/// Distinguishes an explicit `null` from an absent field.
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

pub(crate) const ISSUE_COLUMNS: &str = "id, repository, number, github_id, title, body, state, author, assignees, labels, html_url, comments, created_at, updated_at, closed_at, related_references, triage, priority, synced_at";

/// Fetch one issue by its key.
pub async fn get_issue(
    pool: &DbPool,
    repository: &str,
    number: i64,
) -> Result<Option<Issue>, AppError> {
    let query = format!(
        "SELECT {} FROM issues WHERE repository = ? COLLATE NOCASE AND number = ?",
        ISSUE_COLUMNS
    );
    let issue = sqlx::query_as::<_, Issue>(&query)
        .bind(repository)
        .bind(number)
        .fetch_optional(pool)
        .await?;
    Ok(issue)
}

/// List issues matching the dashboard filter.
pub async fn list_issues(pool: &DbPool, filter: &ItemFilter) -> Result<Page<Issue>, AppError> {
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM issues");
    filter.push_where(&mut count_qb);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM issues", ISSUE_COLUMNS));
    filter.push_where(&mut qb);
    filter.push_order_and_page(&mut qb);
    let items = qb.build_query_as::<Issue>().fetch_all(pool).await?;

    Ok(Page {
        total,
        limit: filter.limit(),
        offset: filter.offset(),
        items,
    })
}

/// Set dashboard annotations on an issue.
pub async fn update_issue_annotations(
    pool: &DbPool,
    repository: &str,
    number: i64,
    update: &AnnotationUpdate,
) -> Result<Issue, AppError> {
    let existing = get_issue(pool, repository, number)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("Issue", format!("{}#{}", repository, number)))?;

    let priority = match update.priority {
        Some(p) => p.map(|p| p.as_str().to_string()),
        None => existing.priority.clone(),
    };

    sqlx::query("UPDATE issues SET triage = ?, priority = ? WHERE id = ?")
        .bind(update.triage.unwrap_or(existing.triage))
        .bind(priority)
        .bind(existing.id)
        .execute(pool)
        .await?;

    get_issue(pool, &existing.repository, number)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("Issue", format!("{}#{}", repository, number)))
}

/// Open issue count per repository.
pub async fn open_issue_counts(pool: &DbPool) -> Result<Vec<(String, i64)>, AppError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT repository, COUNT(*) FROM issues WHERE state = 'open' GROUP BY repository",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::{tempdir, TempDir};

    async fn setup_test_db() -> (TempDir, DbPool) {
        let dir = tempdir().unwrap();
        let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();

        for (repo, number, state, labels, title) in [
            ("o/r", 1, "open", r#"[{"name":"bug","color":"d73a4a"}]"#, "Crash on start"),
            ("o/r", 2, "closed", "[]", "Typo in docs"),
            ("o/other", 3, "open", r#"[{"name":"bug","color":"d73a4a"}]"#, "Panic in parser"),
        ] {
            sqlx::query(
                "INSERT INTO issues (repository, number, github_id, title, state, author, labels, html_url, created_at, updated_at, synced_at) VALUES (?, ?, ?, ?, ?, 'alice', ?, 'https://github.com', ?, ?, 0)",
            )
            .bind(repo)
            .bind(number)
            .bind(number * 100)
            .bind(title)
            .bind(state)
            .bind(labels)
            .bind(number * 10)
            .bind(number * 10)
            .execute(&pool)
            .await
            .unwrap();
        }

        (dir, pool)
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!(ItemState::from("open"), ItemState::Open);
        assert_eq!(ItemState::from("CLOSED"), ItemState::Closed);
        assert_eq!(ItemState::from("unknown"), ItemState::Open);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("High".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_annotation_update_distinguishes_null() {
        let update: AnnotationUpdate = serde_json::from_str(r#"{"triage": true}"#).unwrap();
        assert!(update.priority.is_none());

        let update: AnnotationUpdate = serde_json::from_str(r#"{"priority": null}"#).unwrap();
        assert_eq!(update.priority, Some(None));

        let update: AnnotationUpdate = serde_json::from_str(r#"{"priority": "high"}"#).unwrap();
        assert_eq!(update.priority, Some(Some(Priority::High)));
    }

    #[tokio::test]
    async fn test_list_issues_filters() {
        let (_dir, pool) = setup_test_db().await;

        let all = list_issues(&pool, &ItemFilter::default()).await.unwrap();
        assert_eq!(all.total, 3);
        // Most recently updated first
        assert_eq!(all.items[0].number, 3);

        let open_in_repo = list_issues(
            &pool,
            &ItemFilter {
                repository: Some("o/r".to_string()),
                state: Some("open".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(open_in_repo.total, 1);
        assert_eq!(open_in_repo.items[0].title, "Crash on start");

        let bugs = list_issues(
            &pool,
            &ItemFilter {
                label: Some("bug".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(bugs.total, 2);
        assert_eq!(bugs.items[0].labels.0[0].color, "d73a4a");

        let search = list_issues(
            &pool,
            &ItemFilter {
                search: Some("parser".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(search.total, 1);
    }

    #[tokio::test]
    async fn test_update_annotations() {
        let (_dir, pool) = setup_test_db().await;

        let issue = update_issue_annotations(
            &pool,
            "o/r",
            1,
            &AnnotationUpdate {
                triage: Some(true),
                priority: Some(Some(Priority::High)),
            },
        )
        .await
        .unwrap();
        assert!(issue.triage);
        assert_eq!(issue.priority.as_deref(), Some("high"));

        // Leaving priority out keeps it
        let issue = update_issue_annotations(
            &pool,
            "o/r",
            1,
            &AnnotationUpdate {
                triage: Some(false),
                priority: None,
            },
        )
        .await
        .unwrap();
        assert!(!issue.triage);
        assert_eq!(issue.priority.as_deref(), Some("high"));

        let err = update_issue_annotations(&pool, "o/r", 404, &AnnotationUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_open_issue_counts() {
        let (_dir, pool) = setup_test_db().await;
        let mut counts = open_issue_counts(&pool).await.unwrap();
        counts.sort();
        assert_eq!(
            counts,
            vec![("o/other".to_string(), 1), ("o/r".to_string(), 1)]
        );
    }
}
