//! Durable owner of the live work session.
//!
//! The session lives in memory and is written through to `active_session.json`
//! on every change; finished sessions are summarized into a bounded
//! `session_history.json`. Expiry is lazy: an idle session is archived by the
//! first read that notices it, never by a timer.
//!
//! Disk failures are logged and swallowed. The in-memory copy stays
//! authoritative and the next successful write heals the file.

use super::continuation;
use super::types::{SessionLimits, SessionSummary, SessionUpdate, WorkSession};
use crate::kiyomi_dirs::DataPaths;
use crate::store::JsonDocument;
use crate::text::truncate_chars;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Task name used when an update arrives with no session and no task.
pub const DEFAULT_TASK: &str = "General task";

#[derive(Debug, Default)]
struct Slot {
    loaded: bool,
    current: Option<WorkSession>,
}

/// Thread-safe manager of the single live [`WorkSession`].
///
/// Every accessor returns a cloned snapshot; hold on to it only as long as no
/// other code may have written in the meantime.
#[derive(Debug)]
pub struct SessionManager {
    live: JsonDocument<Option<WorkSession>>,
    history: JsonDocument<Vec<SessionSummary>>,
    limits: SessionLimits,
    slot: Mutex<Slot>,
}

impl SessionManager {
    pub fn new(paths: &DataPaths, limits: SessionLimits) -> Self {
        Self {
            live: JsonDocument::new(paths.session_file()),
            history: JsonDocument::new(paths.session_history_file()),
            limits,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// The live session, or `None` if there is none or it just expired.
    pub fn current_session(&self) -> Option<WorkSession> {
        self.current_session_at(Utc::now())
    }

    pub fn current_session_at(&self, now: DateTime<Utc>) -> Option<WorkSession> {
        let mut slot = self.lock();
        self.refresh(&mut slot, now);
        slot.current.clone()
    }

    /// Begin a new session, archiving any session that is still live.
    pub fn start_session(&self, task: &str, project: Option<&str>) -> WorkSession {
        self.start_session_at(task, project, Utc::now())
    }

    pub fn start_session_at(
        &self,
        task: &str,
        project: Option<&str>,
        now: DateTime<Utc>,
    ) -> WorkSession {
        let mut slot = self.lock();
        self.refresh(&mut slot, now);
        self.begin(&mut slot, task, project, now)
    }

    /// Apply an incremental change, creating a session if none is live.
    pub fn update_session(&self, update: SessionUpdate) -> WorkSession {
        self.update_session_at(update, Utc::now())
    }

    pub fn update_session_at(&self, update: SessionUpdate, now: DateTime<Utc>) -> WorkSession {
        let mut slot = self.lock();
        self.refresh(&mut slot, now);

        let mut session = match slot.current.take() {
            Some(session) => session,
            None => {
                let task = update
                    .task
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .unwrap_or(DEFAULT_TASK);
                let project = update.project.as_deref().filter(|p| !p.is_empty());
                self.create(task, project, now)
            }
        };
        apply_update(&mut session, update, &self.limits, now);
        self.persist(&session);
        slot.current = Some(session.clone());
        session
    }

    /// Flag the live session as cut short (timeout, cancel, crash).
    pub fn mark_interrupted(&self) -> bool {
        self.modify(|session| {
            session.was_interrupted = true;
            session.needs_continuation = true;
        })
    }

    /// Flag the live session as unfinished, optionally naming the next step.
    pub fn mark_needs_continuation(&self, reason: Option<&str>) -> bool {
        self.modify(|session| {
            session.needs_continuation = true;
            if let Some(reason) = reason.filter(|r| !r.is_empty()) {
                session.pending_action = Some(reason.to_owned());
            }
        })
    }

    /// Clear the continuation flags once resumed work has succeeded.
    pub fn clear_continuation(&self) -> bool {
        self.modify(|session| {
            session.needs_continuation = false;
            session.was_interrupted = false;
            session.pending_action = None;
        })
    }

    /// Deactivate, archive, and clear the live session.
    pub fn end_session(&self) -> Option<SessionSummary> {
        self.end_session_at(Utc::now())
    }

    pub fn end_session_at(&self, now: DateTime<Utc>) -> Option<SessionSummary> {
        let mut slot = self.lock();
        self.refresh(&mut slot, now);
        let mut session = slot.current.take()?;
        let summary = self.archive(&mut session);
        self.clear_live_file();
        info!(session = %session.session_id, "work session ended");
        Some(summary)
    }

    pub fn should_continue(&self) -> bool {
        self.should_continue_at(Utc::now())
    }

    pub fn should_continue_at(&self, now: DateTime<Utc>) -> bool {
        self.current_session_at(now)
            .is_some_and(|s| continuation::should_continue(&s))
    }

    /// Markdown context block for resuming work, if a session is live.
    pub fn continuation_context(&self) -> Option<String> {
        self.current_session()
            .map(|s| continuation::continuation_context(&s))
    }

    /// Prompt the AI receives when the user says "continue".
    pub fn continue_prompt(&self) -> Option<String> {
        self.continue_prompt_at(Utc::now())
    }

    pub fn continue_prompt_at(&self, now: DateTime<Utc>) -> Option<String> {
        self.current_session_at(now)
            .map(|s| continuation::continue_prompt(&s))
    }

    /// Short status text for the user.
    pub fn session_summary(&self) -> Option<String> {
        let now = Utc::now();
        self.current_session_at(now)
            .map(|s| continuation::session_summary(&s, now))
    }

    /// The session as last written to disk, read without loading it into this
    /// manager and without expiring it.
    ///
    /// For inspecting a data directory whose live session belongs to another
    /// process: only the owning manager may archive it.
    pub fn peek_persisted(&self) -> Option<WorkSession> {
        match self.live.load_existing() {
            Ok(Some(session)) => session,
            Ok(None) => None,
            Err(e) => {
                warn!("cannot read work session: {e}");
                None
            }
        }
    }

    /// Archived sessions, oldest first.
    pub fn history(&self) -> Vec<SessionSummary> {
        self.history.load_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load from disk on first access, then archive the session if it expired.
    fn refresh(&self, slot: &mut Slot, now: DateTime<Utc>) {
        if !slot.loaded {
            slot.loaded = true;
            match self.live.load_existing() {
                Ok(Some(Some(session))) => {
                    debug!(session = %session.session_id, "restored work session from disk");
                    slot.current = Some(session);
                }
                Ok(_) => {}
                Err(e) => error!("cannot load work session: {e}"),
            }
        }

        let expired = slot
            .current
            .as_ref()
            .is_some_and(|s| s.is_expired_at(self.limits.timeout, now));
        if expired {
            if let Some(mut session) = slot.current.take() {
                info!(session = %session.session_id, "work session expired after inactivity");
                self.archive(&mut session);
                self.clear_live_file();
            }
        }
    }

    fn begin(
        &self,
        slot: &mut Slot,
        task: &str,
        project: Option<&str>,
        now: DateTime<Utc>,
    ) -> WorkSession {
        if let Some(mut previous) = slot.current.take() {
            self.archive(&mut previous);
        }
        let session = self.create(task, project, now);
        slot.current = Some(session.clone());
        session
    }

    fn create(&self, task: &str, project: Option<&str>, now: DateTime<Utc>) -> WorkSession {
        let session = WorkSession::new(task, project.map(str::to_owned), now);
        info!(session = %session.session_id, task, "work session started");
        self.persist(&session);
        session
    }

    fn modify(&self, f: impl FnOnce(&mut WorkSession)) -> bool {
        let mut slot = self.lock();
        self.refresh(&mut slot, Utc::now());
        let Some(session) = slot.current.as_mut() else {
            return false;
        };
        f(session);
        let snapshot = session.clone();
        self.persist(&snapshot);
        true
    }

    fn persist(&self, session: &WorkSession) {
        if let Err(e) = self.live.save(&Some(session.clone())) {
            warn!(session = %session.session_id, "cannot persist work session: {e}");
        }
    }

    fn clear_live_file(&self) {
        if let Err(e) = self.live.remove() {
            warn!("cannot remove live session file: {e}");
        }
    }

    /// Deactivate `session` and append its summary to the history file.
    ///
    /// An unreadable history file is left untouched rather than replaced.
    fn archive(&self, session: &mut WorkSession) -> SessionSummary {
        session.is_active = false;
        let summary = session.summary();
        let mut history = match self.history.load() {
            Ok(history) => history,
            Err(e) => {
                error!(session = %session.session_id, "cannot archive work session: {e}");
                return summary;
            }
        };
        history.push(summary.clone());
        trim_front(&mut history, self.limits.history_limit);
        if let Err(e) = self.history.save(&history) {
            error!(session = %session.session_id, "cannot archive work session: {e}");
        }
        summary
    }
}

fn apply_update(
    session: &mut WorkSession,
    update: SessionUpdate,
    limits: &SessionLimits,
    now: DateTime<Utc>,
) {
    session.last_activity = now;

    if let Some(task) = update.task.filter(|t| !t.is_empty()) {
        session.current_task = Some(task);
    }
    if let Some(project) = update.project.filter(|p| !p.is_empty()) {
        session.current_project = Some(project);
    }
    if let Some(context) = update.context.filter(|c| !c.is_empty()) {
        session.task_context = Some(context);
    }
    if let Some(message) = update.message {
        session.messages.push(message);
        trim_front(&mut session.messages, limits.max_messages);
    }
    if let Some(step) = update.step_completed.filter(|s| !s.is_empty()) {
        session.steps_completed.push(step);
        trim_front(&mut session.steps_completed, limits.max_steps);
    }
    if let Some(file) = update.file_modified.filter(|f| !f.is_empty()) {
        if !session.files_modified.contains(&file) {
            session.files_modified.push(file);
            trim_front(&mut session.files_modified, limits.max_files);
        }
    }
    if let Some(result) = update.result.filter(|r| !r.is_empty()) {
        session.last_result = Some(truncate_chars(&result, limits.result_max_chars));
        session.last_error = None;
    }
    if let Some(err) = update.error.filter(|e| !e.is_empty()) {
        session.last_error = Some(truncate_chars(&err, limits.error_max_chars));
    }
}

/// Drop the oldest entries until at most `max` remain.
fn trim_front<T>(items: &mut Vec<T>, max: usize) {
    if items.len() > max {
        let drop_count = items.len() - max;
        items.drain(0..drop_count);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::session::types::ChatMessage;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn manager(dir: &std::path::Path) -> SessionManager {
        SessionManager::new(&DataPaths::new(dir), SessionLimits::default())
    }

    #[test]
    fn update_without_session_starts_general_task() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let s = m.update_session_at(SessionUpdate::new().message(ChatMessage::user("hi")), t0());
        assert_eq!(s.current_task.as_deref(), Some(DEFAULT_TASK));
        assert_eq!(s.messages.len(), 1);
        assert!(dir.path().join("active_session.json").exists());
    }

    #[test]
    fn bounded_fifo_lists() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        m.start_session_at("build", None, t0());
        for i in 0..25 {
            m.update_session_at(
                SessionUpdate::new()
                    .step_completed(format!("step {i}"))
                    .message(ChatMessage::user(format!("msg {i}")))
                    .file_modified(format!("file{}.rs", i % 12)),
                t0(),
            );
        }
        let s = m.current_session_at(t0()).unwrap();
        assert_eq!(s.steps_completed.len(), 20);
        assert_eq!(s.steps_completed.first().unwrap(), "step 5");
        assert_eq!(s.messages.len(), 10);
        assert_eq!(s.messages.last().unwrap().content, "msg 24");
        assert_eq!(s.files_modified.len(), 10);
        let mut unique = s.files_modified.clone();
        unique.dedup();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn result_clears_error_and_both_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let s = m.update_session_at(SessionUpdate::new().error("e".repeat(900)), t0());
        assert_eq!(s.last_error.unwrap().len(), 500);

        let s = m.update_session_at(SessionUpdate::new().result("r".repeat(5000)), t0());
        assert_eq!(s.last_result.unwrap().len(), 1000);
        assert!(s.last_error.is_none());
    }

    #[test]
    fn starting_a_new_session_archives_the_old_one() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        m.start_session_at("first", Some("alpha"), t0());
        m.start_session_at("second", None, t0() + chrono::Duration::seconds(1));
        let history = m.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].task.as_deref(), Some("first"));
        assert_eq!(history[0].project.as_deref(), Some("alpha"));
        assert_eq!(
            m.current_session_at(t0()).unwrap().current_task.as_deref(),
            Some("second")
        );
    }

    #[test]
    fn end_session_clears_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        m.start_session_at("work", None, t0());
        let summary = m.end_session_at(t0()).unwrap();
        assert_eq!(summary.task.as_deref(), Some("work"));
        assert!(m.current_session_at(t0()).is_none());
        assert!(!dir.path().join("active_session.json").exists());
        assert!(m.end_session_at(t0()).is_none());
    }

    #[test]
    fn marks_require_a_live_session() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        assert!(!m.mark_interrupted());
        assert!(!m.mark_needs_continuation(Some("x")));

        m.start_session("work", None);
        assert!(m.mark_needs_continuation(Some("review the diff")));
        let s = m.current_session().unwrap();
        assert!(s.needs_continuation);
        assert!(!s.was_interrupted);
        assert_eq!(s.pending_action.as_deref(), Some("review the diff"));
        assert!(m.should_continue());

        assert!(m.clear_continuation());
        assert!(!m.should_continue());
        assert!(m.current_session().unwrap().pending_action.is_none());
    }

    #[test]
    fn unwritable_directory_keeps_in_memory_session() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data directory should be makes every write fail.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "x").unwrap();
        let m = manager(&blocker);

        let s = m.update_session_at(SessionUpdate::new().task("offline work"), t0());
        assert_eq!(s.current_task.as_deref(), Some("offline work"));
        let again = m.current_session_at(t0()).unwrap();
        assert_eq!(again, s);
    }

    #[test]
    fn archiving_deactivates_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let mut s = WorkSession::new("old", None, t0());
        assert!(s.is_active);
        m.archive(&mut s);
        assert!(!s.is_active);
        assert_eq!(m.history().len(), 1);
    }

    #[test]
    fn corrupt_history_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let history_file = dir.path().join("session_history.json");
        std::fs::write(&history_file, "{not json").unwrap();
        let m = manager(dir.path());

        m.start_session_at("first", None, t0());
        m.start_session_at("second", None, t0());
        assert!(m.end_session_at(t0()).is_some());

        assert_eq!(std::fs::read_to_string(&history_file).unwrap(), "{not json");
        assert!(m.current_session_at(t0()).is_none());
    }

    #[test]
    fn peeking_never_expires_another_owners_session() {
        let dir = tempfile::tempdir().unwrap();
        let owner = manager(dir.path());
        owner.start_session_at("long job", None, t0());
        let late = t0() + chrono::Duration::hours(5);

        let inspector = manager(dir.path());
        let seen = inspector.peek_persisted().unwrap();
        assert_eq!(seen.current_task.as_deref(), Some("long job"));
        assert!(seen.is_expired_at(inspector.limits().timeout, late));
        assert!(inspector.history().is_empty());
        assert!(dir.path().join("active_session.json").exists());

        assert!(owner.current_session_at(late).is_none());
        assert_eq!(owner.history().len(), 1);
        assert!(inspector.peek_persisted().is_none());
    }

    #[test]
    fn corrupt_live_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("active_session.json"), "garbage").unwrap();
        let m = manager(dir.path());
        assert!(m.current_session_at(t0()).is_none());
        let s = m.start_session_at("fresh", None, t0());
        assert_eq!(m.current_session_at(t0()).unwrap(), s);
    }
}
