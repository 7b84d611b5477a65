//! Sync engine tests against a real SQLite file and a scripted GitHub.
//!
//! Scenarios:
//! 1. Re-running a sync with identical data changes nothing
//! 2. Older data arriving later never overwrites newer rows
//! 3. Dashboard annotations survive an update from GitHub
//! 4. A failing repository does not stop the pass
//! 5. Only one pass runs at a time
//! 6. Page caps follow the authentication mode
//! 7. One item failing to write leaves the rest of the page committed
//! 8. Repository names differing only in case are one repository

mod common;

use common::{
    add_repository, fast_settings, issue, pull_request, setup_test_db, BlockingGitHub,
    ScriptedGitHub,
};
use repo_radar::models::issue::{self as issue_model, AnnotationUpdate, Priority};
use repo_radar::models::pull_request as pr_model;
use repo_radar::models::query::ItemFilter;
use repo_radar::config::RepositorySeed;
use repo_radar::models::repository::{self, RepositoryUpdate};
use repo_radar::models::sync_history::{self, DataType, SyncStatus};
use repo_radar::services::reconcile::{self, ReconcileOutcome};
use repo_radar::services::sync_engine::{SyncEngine, SyncScope};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_resync_is_idempotent() {
    let (_dir, pool) = setup_test_db().await;
    add_repository(&pool, "o", "r", 0).await;

    let github = Arc::new(ScriptedGitHub::new(true));
    github.set_issues(
        "o/r",
        vec![vec![
            issue(1, "First", "2024-03-01T00:00:00Z"),
            issue(2, "Second", "2024-03-02T00:00:00Z"),
        ]],
    );
    github.set_pull_requests("o/r", vec![vec![pull_request(3, "Fix", "2024-03-03T00:00:00Z")]]);

    let engine = SyncEngine::new(pool.clone(), github.clone(), fast_settings());

    let first = engine.sync_repository_all("o/r").await.unwrap();
    assert_eq!(first.status, SyncStatus::Success);
    assert_eq!(first.totals.new, 3);
    assert_eq!(first.operations.len(), 2);

    let second = engine.sync_repository_all("o/r").await.unwrap();
    assert_eq!(second.totals.new, 0);
    assert_eq!(second.totals.updated, 0);
    assert_eq!(second.totals.unchanged, 3);
    assert_ne!(first.session_id, second.session_id);

    let issues = issue_model::list_issues(&pool, &ItemFilter::default())
        .await
        .unwrap();
    assert_eq!(issues.total, 2);

    let history = sync_history::list_sync_history(&pool, Some("o/r"), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 4);

    let session = sync_history::list_session(&pool, &second.session_id)
        .await
        .unwrap();
    assert_eq!(session.len(), 2);
    assert_eq!(session[0].data_type_enum(), DataType::Issues);
    assert_eq!(session[1].data_type_enum(), DataType::Prs);
    assert_eq!(session[0].unchanged_count, 2);
}

#[tokio::test]
async fn test_older_data_never_overwrites_newer() {
    let (_dir, pool) = setup_test_db().await;
    add_repository(&pool, "o", "r", 0).await;

    let github = Arc::new(ScriptedGitHub::new(true));
    let engine = SyncEngine::new(pool.clone(), github.clone(), fast_settings());

    github.set_issues("o/r", vec![vec![issue(1, "Newer title", "2024-05-02T00:00:00Z")]]);
    engine.sync_repository_issues("o/r").await.unwrap();

    // A stale copy arrives, e.g. from a reordered page.
    github.set_issues("o/r", vec![vec![issue(1, "Older title", "2024-05-01T00:00:00Z")]]);
    let report = engine.sync_repository_issues("o/r").await.unwrap();
    assert_eq!(report.totals.unchanged, 1);
    assert_eq!(report.totals.updated, 0);

    let stored = issue_model::get_issue(&pool, "o/r", 1).await.unwrap().unwrap();
    assert_eq!(stored.title, "Newer title");
    assert_eq!(
        stored.updated_at,
        chrono::DateTime::parse_from_rfc3339("2024-05-02T00:00:00Z")
            .unwrap()
            .timestamp()
    );

    // Equal timestamps are unchanged too.
    github.set_issues("o/r", vec![vec![issue(1, "Same time", "2024-05-02T00:00:00Z")]]);
    let report = engine.sync_repository_issues("o/r").await.unwrap();
    assert_eq!(report.totals.unchanged, 1);
    let stored = issue_model::get_issue(&pool, "o/r", 1).await.unwrap().unwrap();
    assert_eq!(stored.title, "Newer title");
}

#[tokio::test]
async fn test_annotations_survive_updates() {
    let (_dir, pool) = setup_test_db().await;
    add_repository(&pool, "o", "r", 0).await;

    let github = Arc::new(ScriptedGitHub::new(true));
    let engine = SyncEngine::new(pool.clone(), github.clone(), fast_settings());

    github.set_issues("o/r", vec![vec![issue(7, "Crash", "2024-01-10T00:00:00Z")]]);
    github.set_pull_requests("o/r", vec![vec![pull_request(8, "Fix crash", "2024-01-10T00:00:00Z")]]);
    engine.sync_repository_all("o/r").await.unwrap();

    let update = AnnotationUpdate {
        triage: Some(true),
        priority: Some(Some(Priority::High)),
    };
    issue_model::update_issue_annotations(&pool, "o/r", 7, &update)
        .await
        .unwrap();
    pr_model::update_pull_request_annotations(&pool, "o/r", 8, &update)
        .await
        .unwrap();

    github.set_issues("o/r", vec![vec![issue(7, "Crash on start", "2024-01-11T00:00:00Z")]]);
    github.set_pull_requests(
        "o/r",
        vec![vec![pull_request(8, "Fix crash on start", "2024-01-11T00:00:00Z")]],
    );
    let report = engine.sync_repository_all("o/r").await.unwrap();
    assert_eq!(report.totals.updated, 2);

    let stored = issue_model::get_issue(&pool, "o/r", 7).await.unwrap().unwrap();
    assert_eq!(stored.title, "Crash on start");
    assert!(stored.triage);
    assert_eq!(stored.priority.as_deref(), Some("high"));

    let stored = pr_model::get_pull_request(&pool, "o/r", 8)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.title, "Fix crash on start");
    assert!(stored.triage);
    assert_eq!(stored.priority.as_deref(), Some("high"));
}

#[tokio::test]
async fn test_failing_repository_does_not_stop_pass() {
    let (_dir, pool) = setup_test_db().await;
    add_repository(&pool, "a", "one", 3).await;
    add_repository(&pool, "b", "two", 2).await;
    add_repository(&pool, "c", "three", 1).await;

    let github = Arc::new(ScriptedGitHub::new(true));
    github.set_issues("a/one", vec![vec![issue(1, "A", "2024-02-01T00:00:00Z")]]);
    github.set_issues("c/three", vec![vec![issue(1, "C", "2024-02-01T00:00:00Z")]]);
    github.fail("b/two");

    let engine = SyncEngine::new(pool.clone(), github.clone(), fast_settings());
    let report = engine.trigger(SyncScope::All).await.unwrap();

    assert_eq!(report.status, SyncStatus::Partial);
    assert_eq!(report.operations.len(), 6);
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().all(|e| e.starts_with("b/two")));

    let order: Vec<&str> = report
        .operations
        .iter()
        .map(|op| op.repository.as_str())
        .collect();
    assert_eq!(order, ["a/one", "a/one", "b/two", "b/two", "c/three", "c/three"]);

    let failed = sync_history::list_sync_history(&pool, Some("b/two"), 10)
        .await
        .unwrap();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|row| row.status_enum() == SyncStatus::Error));
    assert!(failed.iter().all(|row| row.error_message.is_some()));
    assert!(failed
        .iter()
        .all(|row| row.error_kind.as_deref() == Some("network")));

    let after = sync_history::list_sync_history(&pool, Some("c/three"), 10)
        .await
        .unwrap();
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|row| row.status_enum() == SyncStatus::Success));
    assert!(issue_model::get_issue(&pool, "c/three", 1).await.unwrap().is_some());

    let errors = sync_history::recent_errors(&pool, 10).await.unwrap();
    assert_eq!(errors.len(), 2);
}

#[tokio::test]
async fn test_inactive_repositories_are_skipped() {
    let (_dir, pool) = setup_test_db().await;
    add_repository(&pool, "o", "active", 0).await;
    add_repository(&pool, "o", "paused", 0).await;
    repository::update_repository(
        &pool,
        "o/paused",
        &RepositoryUpdate {
            active: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let github = Arc::new(ScriptedGitHub::new(true));
    let engine = SyncEngine::new(pool.clone(), github.clone(), fast_settings());
    let report = engine.sync_all_repositories().await.unwrap();

    assert_eq!(report.operations.len(), 2);
    assert!(report.operations.iter().all(|op| op.repository == "o/active"));
}

#[tokio::test]
async fn test_second_trigger_is_rejected_while_running() {
    let (_dir, pool) = setup_test_db().await;
    add_repository(&pool, "o", "r", 0).await;

    let github = Arc::new(BlockingGitHub::default());
    let engine = Arc::new(SyncEngine::new(pool.clone(), github.clone(), fast_settings()));

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.trigger(SyncScope::All).await })
    };
    github.entered.notified().await;

    assert!(engine.is_busy());
    let status = engine.status().await;
    assert!(status.is_syncing);
    let session = status.session_id.clone().unwrap();

    let err = engine
        .trigger(SyncScope::Repository {
            repository: "o/r".to_string(),
        })
        .await
        .unwrap_err();
    assert!(err.is_sync_in_progress());
    assert!(err.to_string().contains(&session));
    assert_eq!(github.calls.load(Ordering::SeqCst), 1);

    github.release.notify_one();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.session_id, session);
    assert_eq!(github.calls.load(Ordering::SeqCst), 2);

    assert!(!engine.is_busy());
    let status = engine.status().await;
    assert!(!status.is_syncing);
    assert_eq!(status.last_report.unwrap().session_id, session);

    // Free again.
    engine.trigger(SyncScope::All).await.unwrap();
}

#[tokio::test]
async fn test_page_cap_follows_authentication() {
    let (_dir, pool) = setup_test_db().await;
    add_repository(&pool, "o", "r", 0).await;

    let anonymous = Arc::new(ScriptedGitHub::new(false).endless());
    anonymous.set_issues(
        "o/r",
        (1..=10)
            .map(|n| vec![issue(n, "Paged", "2024-04-01T00:00:00Z")])
            .collect(),
    );
    let engine = SyncEngine::new(pool.clone(), anonymous.clone(), fast_settings());
    assert_eq!(engine.max_pages(), 2);

    let report = engine.sync_repository_issues("o/r").await.unwrap();
    assert_eq!(anonymous.issue_calls.load(Ordering::SeqCst), 2);
    assert_eq!(anonymous.pr_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.operations[0].pages_fetched, 2);
    assert_eq!(report.totals.new, 2);

    let token = Arc::new(ScriptedGitHub::new(true).endless());
    let engine = SyncEngine::new(pool.clone(), token.clone(), fast_settings());
    let report = engine.sync_repository_prs("o/r").await.unwrap();
    assert_eq!(token.pr_calls.load(Ordering::SeqCst), 5);
    assert_eq!(token.total_calls(), 5);
    assert_eq!(report.operations[0].pages_fetched, 5);
}

#[tokio::test]
async fn test_unknown_repository_is_not_found() {
    let (_dir, pool) = setup_test_db().await;
    let github = Arc::new(ScriptedGitHub::new(true));
    let engine = SyncEngine::new(pool.clone(), github.clone(), fast_settings());

    let err = engine.sync_repository_issues("nobody/nothing").await.unwrap_err();
    assert!(matches!(err, repo_radar::error::AppError::NotFound { .. }));
    assert_eq!(github.total_calls(), 0);
}

#[tokio::test]
async fn test_references_are_extracted_on_sync() {
    let (_dir, pool) = setup_test_db().await;
    add_repository(&pool, "o", "r", 0).await;

    let github = Arc::new(ScriptedGitHub::new(true));
    github.set_issues("o/r", vec![vec![issue(4, "Linked", "2024-02-01T00:00:00Z")]]);
    let engine = SyncEngine::new(pool.clone(), github.clone(), fast_settings());
    engine.sync_repository_issues("o/r").await.unwrap();

    let stored = issue_model::get_issue(&pool, "o/r", 4).await.unwrap().unwrap();
    let refs = &stored.related_references.0;
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].repository, "o/r");
    assert_eq!(refs[0].number, 5);
}

#[tokio::test]
async fn test_item_write_failure_marks_operation_partial() {
    let (_dir, pool) = setup_test_db().await;
    add_repository(&pool, "o", "r", 0).await;
    sqlx::query(
        "CREATE TRIGGER reject_issue_two BEFORE INSERT ON issues WHEN NEW.number = 2
         BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let github = Arc::new(ScriptedGitHub::new(true));
    github.set_issues(
        "o/r",
        vec![vec![
            issue(1, "One", "2024-04-01T00:00:00Z"),
            issue(2, "Two", "2024-04-01T00:00:00Z"),
            issue(3, "Three", "2024-04-01T00:00:00Z"),
        ]],
    );

    let engine = SyncEngine::new(pool.clone(), github.clone(), fast_settings());
    let report = engine.sync_repository_issues("o/r").await.unwrap();

    assert_eq!(report.status, SyncStatus::Partial);
    assert_eq!(report.totals.new, 2);
    let op = &report.operations[0];
    assert_eq!(op.status, SyncStatus::Partial);
    assert_eq!(op.error_kind.as_deref(), Some("reconciliation"));

    assert!(issue_model::get_issue(&pool, "o/r", 1).await.unwrap().is_some());
    assert!(issue_model::get_issue(&pool, "o/r", 2).await.unwrap().is_none());
    assert!(issue_model::get_issue(&pool, "o/r", 3).await.unwrap().is_some());

    let history = sync_history::list_session(&pool, &report.session_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status_enum(), SyncStatus::Partial);
    assert_eq!(history[0].new_count, 2);
    assert!(history[0].error_message.as_deref().unwrap().contains("o/r#2"));
    assert_eq!(history[0].error_kind.as_deref(), Some("reconciliation"));
}

#[tokio::test]
async fn test_case_variant_names_share_rows() {
    let (_dir, pool) = setup_test_db().await;
    add_repository(&pool, "o", "r", 0).await;

    let seeds = vec![RepositorySeed {
        owner: "O".to_string(),
        name: "R".to_string(),
        display_name: None,
        category: None,
        tags: vec![],
        priority: 0,
        active: true,
    }];
    let inserted = repository::seed_repositories(&pool, &seeds).await.unwrap();
    assert_eq!(inserted, 0);

    let active = repository::list_repositories(&pool, true).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].full_name, "o/r");

    let github = Arc::new(ScriptedGitHub::new(true));
    github.set_issues("o/r", vec![vec![issue(1, "First", "2024-06-01T00:00:00Z")]]);
    let engine = SyncEngine::new(pool.clone(), github.clone(), fast_settings());
    let report = engine.sync_all_repositories().await.unwrap();
    assert_eq!(report.totals.new, 1);

    // A write under a differently cased name lands on the same row.
    let renamed = issue(1, "Renamed", "2024-06-02T00:00:00Z");
    let outcome = reconcile::reconcile_issue(&pool, "O/R", &renamed)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Updated);

    let issues = issue_model::list_issues(&pool, &ItemFilter::default())
        .await
        .unwrap();
    assert_eq!(issues.total, 1);
    assert_eq!(issues.items[0].title, "Renamed");
}
