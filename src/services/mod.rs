//! Business logic services.
//!
//! This module contains the GitHub client, the sync engine and its helpers,
//! the daily scheduler, and the HTTP routes of both binaries.
//!
//! Services take a `DbPool` and trait objects so they can be exercised
//! against a temp-file database and scripted fakes.

pub mod dashboard_api;
pub mod github_client;
pub mod http_server;
pub mod reconcile;
pub mod references;
pub mod scheduler;
pub mod sync_api;
pub mod sync_engine;

pub use github_client::{GitHubApi, GitHubClient, GitHubError};
pub use references::extract_references;
pub use scheduler::{Clock, Scheduler, SystemClock};
pub use sync_engine::{SyncEngine, SyncReport, SyncScope, SyncSettings};
