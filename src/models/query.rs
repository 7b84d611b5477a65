//! Dashboard list filters shared by issues and pull requests.

use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};

/// Maximum page size a caller may request.
pub const MAX_LIMIT: i64 = 500;

/// Default page size.
pub const DEFAULT_LIMIT: i64 = 100;

/// Sort key for item lists. All sorts are descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Updated,
    Created,
    Number,
}

impl SortKey {
    fn column(self) -> &'static str {
        match self {
            Self::Updated => "updated_at",
            Self::Created => "created_at",
            Self::Number => "number",
        }
    }
}

/// Filters accepted by the issue and pull request list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemFilter {
    /// `owner/name`.
    pub repository: Option<String>,
    /// `open`, `closed`, or `all` (default all).
    pub state: Option<String>,
    /// Exact label name.
    pub label: Option<String>,
    pub triage: Option<bool>,
    pub priority: Option<String>,
    /// Substring of title or body.
    pub search: Option<String>,
    /// Repository category.
    pub category: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ItemFilter {
    /// Effective page size, clamped to `1..=MAX_LIMIT`.
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Append ` WHERE ...` for every set filter.
    pub(crate) fn push_where<'a>(&'a self, qb: &mut QueryBuilder<'a, Sqlite>) {
        qb.push(" WHERE 1 = 1");

        if let Some(repository) = &self.repository {
            qb.push(" AND repository = ")
                .push_bind(repository.as_str())
                .push(" COLLATE NOCASE");
        }
        if let Some(state) = self.state.as_deref().filter(|s| *s != "all") {
            qb.push(" AND state = ").push_bind(state);
        }
        if let Some(label) = &self.label {
            qb.push(
                " AND EXISTS (SELECT 1 FROM json_each(labels) WHERE json_extract(json_each.value, '$.name') = ",
            )
            .push_bind(label.as_str())
            .push(")");
        }
        if let Some(triage) = self.triage {
            qb.push(" AND triage = ").push_bind(triage);
        }
        if let Some(priority) = &self.priority {
            qb.push(" AND priority = ").push_bind(priority.as_str());
        }
        if let Some(search) = &self.search {
            let pattern = format!("%{}%", search);
            qb.push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" OR body LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(category) = &self.category {
            qb.push(" AND repository IN (SELECT full_name FROM repositories WHERE category = ")
                .push_bind(category.as_str())
                .push(")");
        }
    }

    /// Append ordering and paging.
    pub(crate) fn push_order_and_page(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" ORDER BY ")
            .push(self.sort.column())
            .push(" DESC, repository ASC, number DESC LIMIT ")
            .push_bind(self.limit())
            .push(" OFFSET ")
            .push_bind(self.offset());
    }
}

/// One page of list results.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub items: Vec<T>,
}
