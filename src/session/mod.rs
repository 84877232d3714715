//! Resumable work sessions.
//!
//! A session moves through `none → active → (idle-expired) → archived`.
//! [`SessionManager`] owns the transitions; [`continuation`] renders a live
//! session into prompts when the user asks to pick up where they left off.

pub mod continuation;
pub mod manager;
pub mod types;

pub use continuation::is_continue_command;
pub use manager::{DEFAULT_TASK, SessionManager};
pub use types::{ChatMessage, Role, SessionLimits, SessionSummary, SessionUpdate, WorkSession};
