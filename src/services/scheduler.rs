//! Daily sync scheduler.
//!
//! Runs a full pass once a day at a fixed UTC time of day. The schedule can be
//! enabled and disabled at runtime; a failed pass never disables it.

use crate::config::SchedulerSettings;
use crate::error::AppError;
use crate::models::sync_history::SyncStatus;
use crate::services::sync_engine::SyncEngine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Longest the background loop sleeps before re-checking the clock.
const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Next occurrence of `hour:minute` UTC strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Disabled,
    EnabledIdle,
    EnabledRunning,
}

/// How a scheduled run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Partial,
    /// The pass could not start.
    Failed,
    /// Another sync was already running.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    /// Unix seconds.
    pub at: i64,
    pub outcome: RunOutcome,
    pub session_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub enabled: bool,
    pub running: bool,
    /// Unix seconds; absent while disabled.
    pub next_run: Option<i64>,
    pub last_run: Option<LastRun>,
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Default)]
struct State {
    enabled: bool,
    running: bool,
    next_run: Option<DateTime<Utc>>,
    last_run: Option<LastRun>,
}

/// Process-wide scheduler; share behind an `Arc`.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    clock: Arc<dyn Clock>,
    hour: u32,
    minute: u32,
    state: Mutex<State>,
    wake: Notify,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, clock: Arc<dyn Clock>, settings: &SchedulerSettings) -> Self {
        let next_run = settings
            .enabled
            .then(|| next_run_after(clock.now(), settings.hour, settings.minute));
        Self {
            engine,
            clock,
            hour: settings.hour,
            minute: settings.minute,
            state: Mutex::new(State {
                enabled: settings.enabled,
                next_run,
                ..Default::default()
            }),
            wake: Notify::new(),
        }
    }

    fn snapshot(&self, state: &State) -> SchedulerStatus {
        let scheduler_state = match (state.enabled, state.running) {
            (false, _) => SchedulerState::Disabled,
            (true, false) => SchedulerState::EnabledIdle,
            (true, true) => SchedulerState::EnabledRunning,
        };
        SchedulerStatus {
            state: scheduler_state,
            enabled: state.enabled,
            running: state.running,
            next_run: state.next_run.map(|t| t.timestamp()),
            last_run: state.last_run.clone(),
            hour: self.hour,
            minute: self.minute,
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        self.snapshot(&state)
    }

    /// Enable the schedule. Enabling twice keeps the existing next run.
    pub async fn enable(&self) -> SchedulerStatus {
        let mut state = self.state.lock().await;
        if !state.enabled {
            state.enabled = true;
            state.next_run = Some(next_run_after(self.clock.now(), self.hour, self.minute));
            log::info!(
                "[scheduler] Enabled, next run at {}",
                state.next_run.map(|t| t.to_rfc3339()).unwrap_or_default()
            );
            self.wake.notify_one();
        }
        self.snapshot(&state)
    }

    /// Disable the schedule. A run already in progress finishes.
    pub async fn disable(&self) -> SchedulerStatus {
        let mut state = self.state.lock().await;
        if state.enabled {
            state.enabled = false;
            state.next_run = None;
            log::info!("[scheduler] Disabled");
            self.wake.notify_one();
        }
        self.snapshot(&state)
    }

    /// Run the full pass if it is due. Returns the run's record when one happened.
    pub async fn tick(&self) -> Option<LastRun> {
        {
            let mut state = self.state.lock().await;
            let due = state.enabled && state.next_run.is_some_and(|t| t <= self.clock.now());
            if !due || state.running {
                return None;
            }
            state.running = true;
        }

        log::info!("[scheduler] Starting scheduled sync");
        let result = self.engine.sync_all_repositories().await;
        let run = self.record(result);

        let mut state = self.state.lock().await;
        state.running = false;
        state.last_run = Some(run.clone());
        if state.enabled {
            state.next_run = Some(next_run_after(self.clock.now(), self.hour, self.minute));
        }
        Some(run)
    }

    fn record(
        &self,
        result: Result<crate::services::sync_engine::SyncReport, AppError>,
    ) -> LastRun {
        let at = self.clock.now().timestamp();
        match result {
            Ok(report) => {
                let outcome = match report.status {
                    SyncStatus::Success => RunOutcome::Success,
                    _ => RunOutcome::Partial,
                };
                LastRun {
                    at,
                    outcome,
                    message: (!report.errors.is_empty()).then(|| report.errors.join("; ")),
                    session_id: Some(report.session_id),
                }
            }
            Err(e) if e.is_sync_in_progress() => {
                log::info!("[scheduler] Skipped, a sync is already running");
                LastRun {
                    at,
                    outcome: RunOutcome::Skipped,
                    session_id: None,
                    message: Some(e.to_string()),
                }
            }
            Err(e) => {
                log::error!("[scheduler] Scheduled sync failed to start: {}", e);
                LastRun {
                    at,
                    outcome: RunOutcome::Failed,
                    session_id: None,
                    message: Some(e.to_string()),
                }
            }
        }
    }

    /// How long the loop may sleep before the next due time.
    async fn sleep_budget(&self) -> Duration {
        let state = self.state.lock().await;
        match state.next_run.filter(|_| state.enabled) {
            Some(next) => (next - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(POLL_INTERVAL),
            None => POLL_INTERVAL,
        }
    }

    /// Start the background loop. It stops when `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::info!("[scheduler] Background loop started");
            loop {
                self.tick().await;

                let budget = self.sleep_budget().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(budget) => {}
                }
            }
            log::info!("[scheduler] Background loop stopped");
        })
    }
}
