//! Background jobs run under the [`Supervisor`](crate::supervisor::Supervisor).
//!
//! Every job is an endless loop that sleeps between iterations, checks the
//! [`ActivityGate`] before doing anything user-visible, and reports through the
//! notification sink. One failed iteration is logged and the loop carries on;
//! a run of consecutive failures ends the attempt with an error so the
//! supervisor restarts the job with backoff.

pub mod heartbeat;
pub mod monitoring;
pub mod nightly;
pub mod reminders;

use crate::activity::ActivityGate;
use crate::config::KiyomiConfig;
use crate::executor::AiExecutor;
use crate::kiyomi_dirs::DataPaths;
use crate::notify::NotificationSink;
use crate::session::{SessionLimits, SessionManager};
use crate::store::write_atomic;
use crate::supervisor::{RestartPolicy, Supervisor, job_factory};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use reminders::ReminderStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Consecutive failed iterations after which a job gives up its attempt.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Everything a job (or the live message path) needs, passed explicitly.
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<KiyomiConfig>,
    pub paths: DataPaths,
    pub activity: ActivityGate,
    pub sessions: Arc<SessionManager>,
    pub reminders: Arc<ReminderStore>,
    pub executor: Arc<dyn AiExecutor>,
    pub sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("paths", &self.paths)
            .field("executor", &self.executor.name())
            .field("sink", &self.sink.id())
            .finish_non_exhaustive()
    }
}

impl JobContext {
    /// Wire shared state for `config`, rooted at its data directory.
    pub fn new(
        config: KiyomiConfig,
        executor: Arc<dyn AiExecutor>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let paths = config.data_paths();
        let sessions = SessionManager::new(&paths, SessionLimits::from(&config.session));
        let reminders = ReminderStore::new(paths.reminders_file());
        Self {
            config: Arc::new(config),
            paths,
            activity: ActivityGate::new(),
            sessions: Arc::new(sessions),
            reminders: Arc::new(reminders),
            executor,
            sink,
        }
    }

    /// Hard limit for one AI call.
    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.config.executor.timeout_secs)
    }

    pub fn quiet_hours(&self) -> QuietHours {
        QuietHours::from(&self.config.schedule)
    }

    /// Current time in the configured local offset.
    pub fn local_now(&self) -> DateTime<FixedOffset> {
        to_local(Utc::now(), self.config.schedule.utc_offset_hours)
    }
}

/// Convert to the configured local offset; out-of-range offsets fall back to UTC.
pub fn to_local(now: DateTime<Utc>, utc_offset_hours: i32) -> DateTime<FixedOffset> {
    let offset =
        FixedOffset::east_opt(utc_offset_hours.saturating_mul(3600)).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset)
}

/// Hours during which nothing proactive happens. May span midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: u32,
    pub end: u32,
}

impl From<&crate::config::ScheduleConfig> for QuietHours {
    fn from(config: &crate::config::ScheduleConfig) -> Self {
        Self {
            start: config.quiet_hours_start,
            end: config.quiet_hours_end,
        }
    }
}

impl QuietHours {
    /// Whether `hour` (0-23) falls inside the window. Equal bounds mean never quiet.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start > self.end {
            hour >= self.start || hour < self.end
        } else {
            self.start <= hour && hour < self.end
        }
    }

    pub fn is_quiet_at(&self, local: DateTime<FixedOffset>) -> bool {
        self.contains(local.hour())
    }
}

/// File holding the last date a once-per-day job ran.
#[derive(Debug, Clone)]
pub struct DailyMarker {
    path: PathBuf,
}

impl DailyMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// True if the marker names `date`. Unreadable markers count as "not done".
    pub fn done_on(&self, date: NaiveDate) -> bool {
        std::fs::read_to_string(&self.path)
            .map(|s| s.trim() == date.format("%Y-%m-%d").to_string())
            .unwrap_or(false)
    }

    /// Record `date` atomically.
    ///
    /// # Errors
    ///
    /// Returns the store error if the marker cannot be written.
    pub fn mark(&self, date: NaiveDate) -> crate::Result<()> {
        write_atomic(&self.path, date.format("%Y-%m-%d").to_string().as_bytes())
    }
}

/// Tracks consecutive failed iterations of a job loop.
#[derive(Debug)]
pub(crate) struct FailureBudget {
    job: &'static str,
    consecutive: u32,
    limit: u32,
}

impl FailureBudget {
    pub(crate) fn new(job: &'static str) -> Self {
        Self {
            job,
            consecutive: 0,
            limit: MAX_CONSECUTIVE_FAILURES,
        }
    }

    /// Log a failed iteration; escalate once the budget is spent.
    pub(crate) fn observe<T>(&mut self, result: anyhow::Result<T>) -> anyhow::Result<Option<T>> {
        match result {
            Ok(value) => {
                self.consecutive = 0;
                Ok(Some(value))
            }
            Err(e) => {
                self.consecutive += 1;
                warn!(job = self.job, failures = self.consecutive, "job iteration failed: {e:#}");
                if self.consecutive >= self.limit {
                    Err(e.context(format!(
                        "{} failed {} times in a row",
                        self.job, self.consecutive
                    )))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Register every enabled job with `supervisor`.
///
/// # Errors
///
/// Returns a supervisor error if a job name is already registered and running.
pub fn register_all(supervisor: &mut Supervisor, ctx: &JobContext) -> crate::Result<()> {
    let policy = RestartPolicy::from(&ctx.config.supervisor);
    let mut registered = Vec::new();

    if ctx.config.heartbeat.enabled {
        let c = ctx.clone();
        supervisor.add_with_policy(
            "heartbeat",
            job_factory(move || heartbeat::heartbeat_loop(c.clone())),
            policy.clone(),
        )?;
        registered.push("heartbeat");
    }
    if ctx.config.reminders.enabled {
        let c = ctx.clone();
        supervisor.add_with_policy(
            "reminders",
            job_factory(move || reminders::reminder_loop(c.clone())),
            policy.clone(),
        )?;
        registered.push("reminders");
    }
    if ctx.config.monitoring.enabled {
        let c = ctx.clone();
        supervisor.add_with_policy(
            "monitoring",
            job_factory(move || monitoring::monitoring_loop(c.clone())),
            policy.clone(),
        )?;
        registered.push("monitoring");
    }
    if ctx.config.nightly.enabled {
        let c = ctx.clone();
        supervisor.add_with_policy(
            "nightly_work",
            job_factory(move || nightly::nightly_loop(c.clone())),
            policy,
        )?;
        registered.push("nightly_work");
    }

    info!(jobs = ?registered, "background jobs registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    #[test]
    fn quiet_hours_span_midnight() {
        let q = QuietHours { start: 23, end: 8 };
        assert!(q.contains(23));
        assert!(q.contains(0));
        assert!(q.contains(7));
        assert!(!q.contains(8));
        assert!(!q.contains(22));
    }

    #[test]
    fn quiet_hours_same_day_window() {
        let q = QuietHours { start: 13, end: 15 };
        assert!(q.contains(13));
        assert!(q.contains(14));
        assert!(!q.contains(15));
        assert!(!QuietHours { start: 9, end: 9 }.contains(9));
    }

    #[test]
    fn local_time_uses_offset() {
        let utc = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
        let local = to_local(utc, -5);
        assert_eq!(local.hour(), 22);
        assert!(QuietHours { start: 23, end: 8 }.is_quiet_at(to_local(utc, 0)));
    }

    #[test]
    fn daily_marker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let marker = DailyMarker::new(dir.path().join("marker.txt"));
        let day = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();
        assert!(!marker.done_on(day));
        marker.mark(day).unwrap();
        assert!(marker.done_on(day));
        assert!(!marker.done_on(day.succ_opt().unwrap()));
    }

    #[test]
    fn failure_budget_escalates_after_limit() {
        let mut budget = FailureBudget::new("test");
        assert!(budget.observe::<()>(Err(anyhow::anyhow!("a"))).unwrap().is_none());
        assert!(budget.observe::<()>(Err(anyhow::anyhow!("b"))).unwrap().is_none());
        assert_eq!(budget.observe(Ok(5)).unwrap(), Some(5));
        assert!(budget.observe::<()>(Err(anyhow::anyhow!("c"))).is_ok());
        assert!(budget.observe::<()>(Err(anyhow::anyhow!("d"))).is_ok());
        let err = budget.observe::<()>(Err(anyhow::anyhow!("e"))).unwrap_err();
        assert!(format!("{err:#}").contains("test failed 3 times in a row"));
    }
}
