//! Monitored repository model and queries.

use crate::config::RepositorySeed;
use crate::db::pool::DbPool;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// A GitHub repository the sync engine mirrors.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Repository {
    pub id: i64,

    pub owner: String,

    pub name: String,

    /// `owner/name`; the key issues and PRs are stored under.
    pub full_name: String,

    /// Name shown in the dashboard instead of `full_name`.
    pub display_name: Option<String>,

    /// Grouping used by the dashboard.
    pub category: Option<String>,

    /// Free-form classification tags.
    pub tags: Json<Vec<String>>,

    /// Higher values sync first and sort first.
    pub priority: i64,

    /// Inactive repositories are skipped by full passes.
    pub active: bool,

    pub created_at: i64,

    pub updated_at: i64,
}

/// Input for adding a repository.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRepository {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl From<&RepositorySeed> for NewRepository {
    fn from(seed: &RepositorySeed) -> Self {
        Self {
            owner: seed.owner.clone(),
            name: seed.name.clone(),
            display_name: seed.display_name.clone(),
            category: seed.category.clone(),
            tags: seed.tags.clone(),
            priority: seed.priority,
            active: seed.active,
        }
    }
}

/// Partial update for repository metadata. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryUpdate {
    pub display_name: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub priority: Option<i64>,
    pub active: Option<bool>,
}

const REPOSITORY_COLUMNS: &str =
    "id, owner, name, full_name, display_name, category, tags, priority, active, created_at, updated_at";

/// Split `owner/name`, rejecting anything else.
pub fn split_full_name(full_name: &str) -> Result<(&str, &str), AppError> {
    match full_name.split_once('/') {
        Some((owner, name))
            if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((owner, name))
        }
        _ => Err(AppError::invalid_input_field(
            format!("Expected owner/name, got '{}'", full_name),
            "repository",
        )),
    }
}

fn validate_new(input: &NewRepository) -> Result<(), AppError> {
    let valid = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !valid(&input.owner) {
        return Err(AppError::invalid_input_field("Invalid owner", "owner"));
    }
    if !valid(&input.name) {
        return Err(AppError::invalid_input_field("Invalid name", "name"));
    }
    Ok(())
}

/// List repositories, highest priority first.
pub async fn list_repositories(
    pool: &DbPool,
    active_only: bool,
) -> Result<Vec<Repository>, AppError> {
    let query = format!(
        "SELECT {} FROM repositories {} ORDER BY priority DESC, full_name ASC",
        REPOSITORY_COLUMNS,
        if active_only { "WHERE active = 1" } else { "" }
    );
    let repos = sqlx::query_as::<_, Repository>(&query)
        .fetch_all(pool)
        .await?;
    Ok(repos)
}

/// Look up a repository by `owner/name` (case-insensitive).
pub async fn get_repository(
    pool: &DbPool,
    full_name: &str,
) -> Result<Option<Repository>, AppError> {
    let query = format!(
        "SELECT {} FROM repositories WHERE full_name = ? COLLATE NOCASE",
        REPOSITORY_COLUMNS
    );
    let repo = sqlx::query_as::<_, Repository>(&query)
        .bind(full_name)
        .fetch_optional(pool)
        .await?;
    Ok(repo)
}

/// Add a repository. Fails with `InvalidInput` if it already exists.
pub async fn create_repository(
    pool: &DbPool,
    input: &NewRepository,
) -> Result<Repository, AppError> {
    validate_new(input)?;
    let full_name = format!("{}/{}", input.owner, input.name);

    if get_repository(pool, &full_name).await?.is_some() {
        return Err(AppError::invalid_input_field(
            format!("Repository {} already exists", full_name),
            "repository",
        ));
    }

    let query = format!(
        r#"
        INSERT INTO repositories (owner, name, full_name, display_name, category, tags, priority, active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING {}
        "#,
        REPOSITORY_COLUMNS
    );
    let now = chrono::Utc::now().timestamp();
    let repo = sqlx::query_as::<_, Repository>(&query)
        .bind(&input.owner)
        .bind(&input.name)
        .bind(&full_name)
        .bind(&input.display_name)
        .bind(&input.category)
        .bind(Json(&input.tags))
        .bind(input.priority)
        .bind(input.active)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;

    Ok(repo)
}

/// Apply a partial metadata update.
pub async fn update_repository(
    pool: &DbPool,
    full_name: &str,
    update: &RepositoryUpdate,
) -> Result<Repository, AppError> {
    let existing = get_repository(pool, full_name)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("Repository", full_name))?;

    let tags = update.tags.as_ref().unwrap_or(&existing.tags.0);

    sqlx::query(
        r#"
        UPDATE repositories SET
            display_name = ?,
            category = ?,
            tags = ?,
            priority = ?,
            active = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(update.display_name.as_ref().or(existing.display_name.as_ref()))
    .bind(update.category.as_ref().or(existing.category.as_ref()))
    .bind(Json(tags))
    .bind(update.priority.unwrap_or(existing.priority))
    .bind(update.active.unwrap_or(existing.active))
    .bind(chrono::Utc::now().timestamp())
    .bind(existing.id)
    .execute(pool)
    .await?;

    get_repository(pool, &existing.full_name)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("Repository", full_name))
}

/// Stop monitoring a repository. Mirrored issues and PRs are kept.
pub async fn delete_repository(pool: &DbPool, full_name: &str) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM repositories WHERE full_name = ? COLLATE NOCASE")
        .bind(full_name)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found_with_id("Repository", full_name));
    }
    Ok(())
}

/// Insert configured repositories that are not yet stored.
///
/// Existing rows are left untouched so management edits survive restarts.
/// Returns the number of rows inserted.
pub async fn seed_repositories(pool: &DbPool, seeds: &[RepositorySeed]) -> Result<u64, AppError> {
    let mut inserted = 0;
    let now = chrono::Utc::now().timestamp();

    for seed in seeds {
        let input = NewRepository::from(seed);
        validate_new(&input)?;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO repositories (owner, name, full_name, display_name, category, tags, priority, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&input.owner)
        .bind(&input.name)
        .bind(format!("{}/{}", input.owner, input.name))
        .bind(&input.display_name)
        .bind(&input.category)
        .bind(Json(&input.tags))
        .bind(input.priority)
        .bind(input.active)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }

    if inserted > 0 {
        log::info!("[db] Seeded {} repositories from configuration", inserted);
    }
    Ok(inserted)
}
