//! User reminders: storage, time parsing and the delivery loop.

use super::{FailureBudget, JobContext, to_local};
use crate::error::Result;
use crate::notify::{NotificationSink, notify_best_effort};
use crate::store::JsonDocument;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// How a reminder recurs after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    Daily,
    Weekly,
}

impl Repeat {
    fn period(self) -> ChronoDuration {
        match self {
            Self::Daily => ChronoDuration::days(1),
            Self::Weekly => ChronoDuration::weeks(1),
        }
    }

    /// Parse `daily` / `weekly` (case-insensitive).
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "daily" | "every day" => Some(Self::Daily),
            "weekly" | "every week" => Some(Self::Weekly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub message: String,
    pub remind_at: DateTime<Utc>,
    #[serde(default)]
    pub repeat: Option<Repeat>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub sent: bool,
}

impl Reminder {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.sent && self.remind_at <= now
    }

    /// Text pushed to the user when the reminder fires.
    pub fn notification_text(&self) -> String {
        format!("⏰ **Reminder:** {}", self.message)
    }

    /// After firing: move a repeating reminder to its next future slot, or
    /// retire a one-shot.
    fn advance(&mut self, now: DateTime<Utc>) {
        match self.repeat {
            Some(repeat) => {
                while self.remind_at <= now {
                    self.remind_at += repeat.period();
                }
                self.sent = false;
            }
            None => self.sent = true,
        }
    }

    /// One line for listings, in the user's local offset.
    pub fn describe(&self, utc_offset_hours: i32) -> String {
        let at = to_local(self.remind_at, utc_offset_hours).format("%Y-%m-%d %H:%M");
        match self.repeat {
            Some(Repeat::Daily) => format!("{}: {} at {at} (daily)", self.id, self.message),
            Some(Repeat::Weekly) => format!("{}: {} at {at} (weekly)", self.id, self.message),
            None => format!("{}: {} at {at}", self.id, self.message),
        }
    }
}

/// Reminders persisted in one JSON array.
///
/// The live command path and the delivery loop both write the file; every
/// read-modify-write runs under `lock` and never across an await.
#[derive(Debug)]
pub struct ReminderStore {
    doc: JsonDocument<Vec<Reminder>>,
    lock: Mutex<()>,
}

impl ReminderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            doc: JsonDocument::new(path),
            lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a new reminder.
    ///
    /// # Errors
    ///
    /// Returns a store error if the reminders file cannot be read or written.
    pub fn add(
        &self,
        message: &str,
        remind_at: DateTime<Utc>,
        repeat: Option<Repeat>,
    ) -> Result<Reminder> {
        let id = Uuid::new_v4().simple().to_string();
        let reminder = Reminder {
            id: format!("rem_{}", &id[..8]),
            message: message.trim().to_owned(),
            remind_at,
            repeat,
            created: Utc::now(),
            sent: false,
        };
        let _guard = self.guard();
        self.doc.update(|list| list.push(reminder.clone()))?;
        info!(id = %reminder.id, at = %reminder.remind_at, "reminder added");
        Ok(reminder)
    }

    /// Delete by id. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the reminders file cannot be read or written.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.guard();
        self.doc.update(|list| {
            let before = list.len();
            list.retain(|r| r.id != id);
            list.len() != before
        })
    }

    /// Reminders still to fire (unsent or repeating), soonest first.
    pub fn list_pending(&self) -> Vec<Reminder> {
        let mut list: Vec<_> = {
            let _guard = self.guard();
            self.doc.load_or_default()
        }
        .into_iter()
        .filter(|r| !r.sent || r.repeat.is_some())
        .collect();
        list.sort_by_key(|r| r.remind_at);
        list
    }

    /// Send every due reminder, then reschedule or retire it.
    ///
    /// A failed send still advances the reminder so one broken transport does
    /// not produce a flood of retries. Returns how many reminders fired.
    ///
    /// # Errors
    ///
    /// Returns a store error if the reminders file cannot be read or written.
    pub async fn deliver_due(&self, now: DateTime<Utc>, sink: &dyn NotificationSink) -> Result<usize> {
        let due: Vec<Reminder> = {
            let _guard = self.guard();
            self.doc.load()?.into_iter().filter(|r| r.is_due(now)).collect()
        };
        if due.is_empty() {
            return Ok(0);
        }

        for reminder in &due {
            notify_best_effort(sink, &reminder.notification_text()).await;
        }

        let _guard = self.guard();
        self.doc.update(|list| {
            for reminder in list.iter_mut() {
                let fired = due
                    .iter()
                    .any(|d| d.id == reminder.id && d.remind_at == reminder.remind_at);
                if fired {
                    reminder.advance(now);
                }
            }
        })?;
        info!(count = due.len(), "reminders delivered");
        Ok(due.len())
    }
}

static IN_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^in\s+(\d+)\s*(minutes?|mins?|m|hours?|hrs?|h|days?|d)$").expect("valid regex")
});

static TOMORROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^tomorrow(?:\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?)?$").expect("valid regex")
});

static AT_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").expect("valid regex")
});

/// Resolve a natural-language time relative to `now` (in the user's offset).
///
/// Understands `in N minutes|hours|days`, `tomorrow` (09:00),
/// `tomorrow at 3pm`, `at 14:30` / `at 5pm` (tomorrow if already past), and
/// `YYYY-MM-DD HH:MM`.
pub fn parse_reminder_time(text: &str, now: DateTime<FixedOffset>) -> Option<DateTime<Utc>> {
    let text = text.trim().to_lowercase();

    if let Some(caps) = IN_DURATION.captures(&text) {
        let n: i64 = caps[1].parse().ok()?;
        let delta = match caps[2].chars().next()? {
            'm' => ChronoDuration::try_minutes(n)?,
            'h' => ChronoDuration::try_hours(n)?,
            _ => ChronoDuration::try_days(n)?,
        };
        return now.checked_add_signed(delta).map(|t| t.with_timezone(&Utc));
    }

    if let Some(caps) = TOMORROW.captures(&text) {
        let (hour, minute) = match caps.get(1) {
            Some(h) => clock_time(h.as_str(), caps.get(2).map(|m| m.as_str()), caps.get(3).map(|m| m.as_str()))?,
            None => (9, 0),
        };
        let day = now.date_naive().succ_opt()?;
        return at_local(day.and_hms_opt(hour, minute, 0)?, now.offset());
    }

    if let Some(caps) = AT_TIME.captures(&text) {
        let (hour, minute) = clock_time(
            &caps[1],
            caps.get(2).map(|m| m.as_str()),
            caps.get(3).map(|m| m.as_str()),
        )?;
        let today = now.date_naive().and_hms_opt(hour, minute, 0)?;
        let target = at_local(today, now.offset())?;
        if target <= now.with_timezone(&Utc) {
            return at_local(today.checked_add_signed(ChronoDuration::days(1))?, now.offset());
        }
        return Some(target);
    }

    let absolute = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M").ok()?;
    at_local(absolute, now.offset())
}

/// 24-hour `(hour, minute)` from clock parts, applying the 12am/12pm rules.
fn clock_time(hour: &str, minute: Option<&str>, meridiem: Option<&str>) -> Option<(u32, u32)> {
    let mut hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.map_or(Ok(0), str::parse::<u32>).ok()?;
    match meridiem {
        Some("pm") if hour > 12 || hour == 0 => return None,
        Some("am") if hour > 12 || hour == 0 => return None,
        Some("pm") if hour != 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }
    (hour < 24 && minute < 60).then_some((hour, minute))
}

fn at_local(local: NaiveDateTime, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    local
        .and_local_timezone(*offset)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

/// Supervised reminder delivery loop.
///
/// # Errors
///
/// Returns once [`MAX_CONSECUTIVE_FAILURES`](super::MAX_CONSECUTIVE_FAILURES)
/// polls in a row could not read or write the reminders file.
pub async fn reminder_loop(ctx: JobContext) -> anyhow::Result<()> {
    let cfg = ctx.config.reminders.clone();
    let poll = Duration::from_secs(cfg.poll_secs.max(1));
    let mut budget = FailureBudget::new("reminders");
    loop {
        if ctx.activity.is_active(cfg.activity_window_mins) {
            debug!("reminders: deferring while user is active");
        } else {
            let delivered = ctx
                .reminders
                .deliver_due(Utc::now(), ctx.sink.as_ref())
                .await
                .map_err(anyhow::Error::from);
            budget.observe(delivered)?;
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::notify::ChannelSink;
    use chrono::{TimeZone, Timelike};

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parses_relative_durations() {
        let now = local(2026, 3, 10, 12, 0);
        assert_eq!(parse_reminder_time("in 10 minutes", now), Some(utc(2026, 3, 10, 12, 10)));
        assert_eq!(parse_reminder_time("in 1 hour", now), Some(utc(2026, 3, 10, 13, 0)));
        assert_eq!(parse_reminder_time("In 2 days", now), Some(utc(2026, 3, 12, 12, 0)));
    }

    #[test]
    fn parses_tomorrow_variants() {
        let now = local(2026, 3, 10, 22, 15);
        assert_eq!(parse_reminder_time("tomorrow", now), Some(utc(2026, 3, 11, 9, 0)));
        assert_eq!(parse_reminder_time("tomorrow at 3pm", now), Some(utc(2026, 3, 11, 15, 0)));
        assert_eq!(parse_reminder_time("tomorrow at 12am", now), Some(utc(2026, 3, 11, 0, 0)));
        assert_eq!(parse_reminder_time("tomorrow at 12pm", now), Some(utc(2026, 3, 11, 12, 0)));
    }

    #[test]
    fn at_time_rolls_to_next_day_when_past() {
        let now = local(2026, 3, 10, 18, 0);
        assert_eq!(parse_reminder_time("at 9pm", now), Some(utc(2026, 3, 10, 21, 0)));
        assert_eq!(parse_reminder_time("at 7:30am", now), Some(utc(2026, 3, 11, 7, 30)));
        assert_eq!(parse_reminder_time("at 18", now), Some(utc(2026, 3, 11, 18, 0)));
    }

    #[test]
    fn honours_utc_offset() {
        let now = FixedOffset::east_opt(-5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 10, 8, 0, 0)
            .unwrap();
        let at = parse_reminder_time("at 5pm", now).unwrap();
        assert_eq!(at, utc(2026, 3, 10, 22, 0));
    }

    #[test]
    fn parses_absolute_and_rejects_garbage() {
        let now = local(2026, 3, 10, 12, 0);
        assert_eq!(parse_reminder_time("2026-04-01 08:45", now), Some(utc(2026, 4, 1, 8, 45)));
        assert_eq!(parse_reminder_time("whenever", now), None);
        assert_eq!(parse_reminder_time("at 13pm", now), None);
        assert_eq!(parse_reminder_time("at 25", now), None);
    }

    #[tokio::test]
    async fn deliver_due_fires_and_reschedules() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::new(dir.path().join("reminders.json"));
        let now = utc(2026, 3, 10, 12, 0);

        let once = store.add("stretch", utc(2026, 3, 10, 11, 0), None).unwrap();
        let daily = store
            .add("water plants", utc(2026, 3, 10, 11, 30), Some(Repeat::Daily))
            .unwrap();
        store.add("later", utc(2026, 3, 10, 13, 0), None).unwrap();

        let (sink, mut rx) = ChannelSink::pair();
        assert_eq!(store.deliver_due(now, &sink).await.unwrap(), 2);
        assert_eq!(rx.recv().await.unwrap(), "⏰ **Reminder:** stretch");
        assert_eq!(rx.recv().await.unwrap(), "⏰ **Reminder:** water plants");

        let pending = store.list_pending();
        let ids: Vec<_> = pending.iter().map(|r| r.id.clone()).collect();
        assert!(!ids.contains(&once.id));
        let rescheduled = pending.iter().find(|r| r.id == daily.id).unwrap();
        assert_eq!(rescheduled.remind_at, utc(2026, 3, 11, 11, 30));
        assert!(!rescheduled.sent);
        // Soonest first.
        assert_eq!(pending[0].message, "later");

        assert_eq!(store.deliver_due(now, &sink).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_repeating_reminder_skips_missed_periods() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::new(dir.path().join("reminders.json"));
        store
            .add("standup", utc(2026, 3, 1, 9, 0), Some(Repeat::Weekly))
            .unwrap();

        let (sink, _rx) = ChannelSink::pair();
        let now = utc(2026, 3, 20, 10, 0);
        assert_eq!(store.deliver_due(now, &sink).await.unwrap(), 1);
        let next = store.list_pending().remove(0);
        assert_eq!(next.remind_at, utc(2026, 3, 22, 9, 0));
        assert_eq!(next.remind_at.hour(), 9);
    }

    #[tokio::test]
    async fn failed_send_still_advances() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::new(dir.path().join("reminders.json"));
        store.add("call home", utc(2026, 3, 10, 11, 0), None).unwrap();

        let (sink, rx) = ChannelSink::pair();
        drop(rx);
        assert_eq!(store.deliver_due(utc(2026, 3, 10, 12, 0), &sink).await.unwrap(), 1);
        assert!(store.list_pending().is_empty());
    }

    #[test]
    fn remove_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::new(dir.path().join("reminders.json"));
        let r = store.add("x", utc(2026, 3, 10, 11, 0), None).unwrap();
        assert!(r.id.starts_with("rem_"));
        assert!(store.remove(&r.id).unwrap());
        assert!(!store.remove(&r.id).unwrap());
    }

    #[test]
    fn describe_uses_local_offset() {
        let r = Reminder {
            id: "rem_1".to_owned(),
            message: "tea".to_owned(),
            remind_at: utc(2026, 3, 10, 15, 0),
            repeat: Some(Repeat::Daily),
            created: utc(2026, 3, 10, 0, 0),
            sent: false,
        };
        assert_eq!(r.describe(2), "rem_1: tea at 2026-03-10 17:00 (daily)");
        assert_eq!(Repeat::parse("Weekly"), Some(Repeat::Weekly));
    }
}
