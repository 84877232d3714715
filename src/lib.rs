//! Kiyomi: a personal AI assistant daemon built around an external AI CLI.
//!
//! The crate keeps a handful of long-running background jobs alive and makes
//! interrupted work resumable:
//!
//! - **Supervisor**: restarts crashed jobs with exponential backoff and gives
//!   up after a fixed number of restarts, without affecting siblings
//! - **Sessions**: a durable "what am I working on" record that survives
//!   restarts and turns into a continuation prompt on "continue"
//! - **Activity gate**: background jobs defer while the user is chatting
//! - **Jobs**: heartbeat checklist, reminders, site monitoring, nightly work
//!
//! Everything that needs intelligence goes through [`executor::AiExecutor`];
//! everything user-visible goes through [`notify::NotificationSink`].

pub mod activity;
pub mod app;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod jobs;
pub mod kiyomi_dirs;
pub mod notify;
pub mod plugins;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod text;

pub use activity::ActivityGate;
pub use app::App;
pub use config::KiyomiConfig;
pub use error::{KiyomiError, Result};
pub use handler::MessageHandler;
pub use session::SessionManager;
pub use supervisor::{RestartPolicy, SupervisedTask, Supervisor, TaskStatus};
