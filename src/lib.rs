//! Repo Radar - local mirror of GitHub issues and pull requests.
//!
//! This library backs two binaries: `sync-service`, which pulls issues and
//! pull requests into SQLite on demand or on a daily schedule, and
//! `dashboard`, which serves the mirrored data over a JSON API.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
