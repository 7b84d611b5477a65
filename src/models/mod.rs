//! Data models for the local mirror.
//!
//! These models represent the entities stored in the SQLite database and
//! returned as JSON by both HTTP services. Query functions live next to the
//! model they read or write.
//!
//! All row models derive Serialize for the HTTP layer and FromRow for SQLx.

pub mod issue;
pub mod pull_request;
pub mod query;
pub mod reference;
pub mod repository;
pub mod sync_history;

// Re-exports for convenient access
pub use issue::{AnnotationUpdate, Issue, ItemState, Label, Priority};
pub use pull_request::{PullRequest, Reviewer};
pub use query::{ItemFilter, Page, SortKey};
pub use reference::{ReferenceForm, ReferenceTarget, RelatedReference};
pub use repository::{NewRepository, Repository, RepositoryUpdate};
pub use sync_history::{DataType, NewSyncHistory, SyncHistory, SyncStatus};
