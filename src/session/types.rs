//! Work-session data model.

use crate::config::SessionConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Who said a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One remembered conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The single live "what am I working on" record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSession {
    /// `YYYYMMDD_HHMMSS` of creation.
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,

    #[serde(default)]
    pub current_project: Option<String>,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub task_context: Option<String>,

    /// Most recent last.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// What the user still has to confirm or the next concrete step.
    #[serde(default)]
    pub pending_action: Option<String>,

    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub steps_completed: Vec<String>,
    #[serde(default)]
    pub last_result: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub needs_continuation: bool,
    #[serde(default)]
    pub was_interrupted: bool,
}

fn default_true() -> bool {
    true
}

impl WorkSession {
    /// A fresh active session created at `now`.
    pub fn new(task: impl Into<String>, project: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: now.format("%Y%m%d_%H%M%S").to_string(),
            started_at: now,
            last_activity: now,
            current_project: project,
            current_task: Some(task.into()),
            task_context: None,
            messages: Vec::new(),
            pending_action: None,
            files_modified: Vec::new(),
            steps_completed: Vec::new(),
            last_result: None,
            last_error: None,
            is_active: true,
            needs_continuation: false,
            was_interrupted: false,
        }
    }

    /// Compact record kept in the history log.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            ended_at: self.last_activity,
            project: self.current_project.clone(),
            task: self.current_task.clone(),
            steps_completed: self.steps_completed.len(),
            files_modified: self.files_modified.iter().take(5).cloned().collect(),
        }
    }

    /// Whether the session has been idle longer than `timeout` at `now`.
    pub fn is_expired_at(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        let idle = now.signed_duration_since(self.last_activity);
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => idle > timeout,
            Err(_) => false,
        }
    }
}

/// Archived session entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub project: Option<String>,
    pub task: Option<String>,
    /// Number of steps, not the steps themselves.
    pub steps_completed: usize,
    /// First few files only.
    pub files_modified: Vec<String>,
}

/// Incremental change applied by [`SessionManager::update_session`](super::SessionManager::update_session).
///
/// Empty strings are treated as "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub task: Option<String>,
    pub project: Option<String>,
    pub message: Option<ChatMessage>,
    pub step_completed: Option<String>,
    pub file_modified: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub context: Option<String>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.message = Some(message);
        self
    }

    pub fn step_completed(mut self, step: impl Into<String>) -> Self {
        self.step_completed = Some(step.into());
        self
    }

    pub fn file_modified(mut self, path: impl Into<String>) -> Self {
        self.file_modified = Some(path.into());
        self
    }

    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Caps and timeout applied by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLimits {
    pub timeout: Duration,
    pub max_messages: usize,
    pub max_steps: usize,
    pub max_files: usize,
    pub history_limit: usize,
    pub result_max_chars: usize,
    pub error_max_chars: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_messages: config.max_messages,
            max_steps: config.max_steps,
            max_files: config.max_files,
            history_limit: config.history_limit,
            result_max_chars: config.result_max_chars,
            error_max_chars: config.error_max_chars,
        }
    }
}
