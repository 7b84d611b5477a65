//! Layered configuration for both services.
//!
//! Precedence (lowest to highest):
//! 1. Programmatic defaults
//! 2. YAML file (`repo-radar.yaml`, or the path in `REPO_RADAR_CONFIG`)
//! 3. Environment variables prefixed `REPO_RADAR_` (nested keys split on `__`)
//!
//! `GITHUB_TOKEN` is used when no token was configured any other way.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "repo-radar.yaml";

/// Environment variable that overrides the config file path.
pub const CONFIG_PATH_ENV: &str = "REPO_RADAR_CONFIG";

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid per_page: {0}. Must be between 1 and 100")]
    InvalidPerPage(u32),

    #[error("Invalid page cap: {0}. Must be at least 1")]
    InvalidPageCap(u32),

    #[error("Invalid schedule time {0:02}:{1:02}")]
    InvalidScheduleTime(u32, u32),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Repository entry {0} must have a non-empty owner and name")]
    InvalidRepository(usize),
}

/// Top-level configuration shared by `sync-service` and `dashboard`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// `pretty` or `json`.
    pub log_format: String,

    /// GitHub client settings.
    pub github: GitHubSettings,

    /// Daily scheduler settings.
    pub scheduler: SchedulerSettings,

    /// Bind address of the sync service HTTP API.
    pub sync_bind: String,

    /// Bind address of the dashboard HTTP API.
    pub dashboard_bind: String,

    /// Optional directory of built front-end assets served by the dashboard.
    pub static_dir: Option<PathBuf>,

    /// Repositories seeded into the store at start-up (insert if absent).
    pub repositories: Vec<RepositorySeed>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/repo-radar.db"),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            github: GitHubSettings::default(),
            scheduler: SchedulerSettings::default(),
            sync_bind: "127.0.0.1:8081".to_string(),
            dashboard_bind: "127.0.0.1:8080".to_string(),
            static_dir: None,
            repositories: Vec::new(),
        }
    }
}

/// GitHub API access and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSettings {
    pub base_url: String,

    /// Personal access token. Absent means unauthenticated mode.
    pub token: Option<String>,

    pub timeout_secs: u64,

    pub per_page: u32,

    /// Page cap per repository and data type when a token is configured.
    pub max_pages_authenticated: u32,

    /// Page cap per repository and data type without a token.
    pub max_pages_unauthenticated: u32,

    /// Pause between page requests.
    pub request_delay_ms: u64,

    /// Pause between repositories in a full pass.
    pub repository_delay_ms: u64,

    /// Retries for network and 5xx failures.
    pub max_retries: u32,

    /// First retry delay; doubles on each attempt.
    pub retry_backoff_ms: u64,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token: None,
            timeout_secs: 30,
            per_page: 100,
            max_pages_authenticated: 5,
            max_pages_unauthenticated: 2,
            request_delay_ms: 500,
            repository_delay_ms: 1000,
            max_retries: 2,
            retry_backoff_ms: 1000,
        }
    }
}

impl GitHubSettings {
    /// Page cap for the current authentication mode.
    pub fn max_pages(&self) -> u32 {
        if self.has_token() {
            self.max_pages_authenticated
        } else {
            self.max_pages_unauthenticated
        }
    }

    /// Whether a non-blank token is configured.
    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Daily sync schedule (UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Whether the scheduler starts enabled.
    pub enabled: bool,
    pub hour: u32,
    pub minute: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hour: 6,
            minute: 0,
        }
    }
}

/// A repository listed in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySeed {
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

impl AppConfig {
    /// Load configuration from the default file location and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Load configuration from a specific YAML file plus environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("REPO_RADAR_").split("__"))
            .extract()
            .map_err(Box::new)?;

        if !config.github.has_token() {
            config.github.token = std::env::var("GITHUB_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty());
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges after extraction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if !(1..=100).contains(&self.github.per_page) {
            return Err(ConfigError::InvalidPerPage(self.github.per_page));
        }
        for cap in [
            self.github.max_pages_authenticated,
            self.github.max_pages_unauthenticated,
        ] {
            if cap == 0 {
                return Err(ConfigError::InvalidPageCap(cap));
            }
        }
        if self.scheduler.hour >= 24 || self.scheduler.minute >= 60 {
            return Err(ConfigError::InvalidScheduleTime(
                self.scheduler.hour,
                self.scheduler.minute,
            ));
        }
        for (index, repo) in self.repositories.iter().enumerate() {
            if repo.owner.trim().is_empty() || repo.name.trim().is_empty() {
                return Err(ConfigError::InvalidRepository(index));
            }
        }
        Ok(())
    }
}
