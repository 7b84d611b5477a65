//! Application error types.
//!
//! These errors are serializable so the HTTP layer can return them as
//! structured JSON to the dashboard and management UI.

use crate::services::github_client::GitHubError;
use serde::Serialize;
use thiserror::Error;

/// Application-level errors.
///
/// All variants serialize to a structured JSON object for frontend consumption.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// GitHub API request failed with a non-success status.
    #[error("GitHub API error: {message}")]
    GitHubApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// GitHub rate limit exhausted.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reset_at: Option<i64>,
    },

    /// Network request failed (connection refused, timeout).
    #[error("Network error: {message}")]
    Network { message: String },

    /// Bad or missing credential for the requested resource.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// A sync pass is already running; the trigger was not queued.
    #[error("Sync already running (session {session_id})")]
    SyncInProgress { session_id: String },

    /// A single item could not be written to the local store.
    #[error("Reconciliation error for {repository}#{number}: {message}")]
    Reconciliation {
        repository: String,
        number: i64,
        message: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create a GitHub API error with status code and endpoint.
    pub fn github_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::GitHubApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create the "already running" signal for a busy engine.
    pub fn sync_in_progress(session_id: impl Into<String>) -> Self {
        Self::SyncInProgress {
            session_id: session_id.into(),
        }
    }

    /// Create a reconciliation error for one item.
    pub fn reconciliation(
        repository: impl Into<String>,
        number: i64,
        message: impl Into<String>,
    ) -> Self {
        Self::Reconciliation {
            repository: repository.into(),
            number,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short snake_case name of the variant, stored with failed sync operations.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database { .. } => "database",
            Self::GitHubApi { .. } => "github_api",
            Self::RateLimited { .. } => "rate_limited",
            Self::Network { .. } => "network",
            Self::Authentication { .. } => "authentication",
            Self::NotFound { .. } => "not_found",
            Self::InvalidInput { .. } => "invalid_input",
            Self::SyncInProgress { .. } => "sync_in_progress",
            Self::Reconciliation { .. } => "reconciliation",
            Self::Config { .. } => "config",
            Self::Internal { .. } => "internal",
        }
    }

    /// Check if this is the "already running" signal.
    pub fn is_sync_in_progress(&self) -> bool {
        matches!(self, Self::SyncInProgress { .. })
    }
}

// Conversions from common error types

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}

impl From<GitHubError> for AppError {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::RateLimited { reset_at } => Self::RateLimited {
                message: err.to_string(),
                reset_at: reset_at.map(|t| t.timestamp()),
            },
            GitHubError::Unauthorized | GitHubError::Forbidden { .. } => {
                Self::authentication(err.to_string())
            }
            GitHubError::NotFound { ref endpoint } => {
                Self::not_found_with_id("GitHub resource", endpoint.clone())
            }
            GitHubError::Network(ref message) => Self::network(message.clone()),
            GitHubError::Server {
                status,
                ref endpoint,
            }
            | GitHubError::UnexpectedStatus {
                status,
                ref endpoint,
            } => Self::github_api_full(err.to_string(), status, endpoint.clone()),
            GitHubError::Decode(_) | GitHubError::Client(_) => Self::internal(err.to_string()),
        }
    }
}
