//! Live-chat activity gate.
//!
//! Background jobs consult [`ActivityGate::is_active`] before doing anything
//! user-visible. The check is advisory: a message can land right after a job
//! decided to fire, and that is acceptable.
//!
//! The timestamp lives only in memory, so a freshly started process always
//! reports "inactive".

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Shared "last user message" timestamp. Cloning shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct ActivityGate {
    last_message: Arc<Mutex<Option<Instant>>>,
}

impl ActivityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound user message at the current instant.
    pub fn update_last_message_time(&self) {
        let mut slot = self.last_message.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Instant::now());
    }

    /// True if a user message arrived within the trailing `window_minutes`.
    pub fn is_active(&self, window_minutes: u64) -> bool {
        self.idle_for()
            .is_some_and(|idle| idle < Duration::from_secs(window_minutes.saturating_mul(60)))
    }

    /// Time since the last user message, or `None` if none was seen.
    pub fn idle_for(&self) -> Option<Duration> {
        let slot = self.last_message.lock().unwrap_or_else(|e| e.into_inner());
        (*slot).map(|at| at.elapsed())
    }
}
