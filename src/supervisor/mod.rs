//! Crash-isolated background jobs.
//!
//! A [`Supervisor`] owns named [`SupervisedTask`]s. Each task keeps one job
//! running, restarting it with exponential [`Backoff`] after a crash, and gives
//! up once its [`RestartPolicy::max_restarts`] ceiling is reached. A failing
//! job never affects its siblings or the hosting process.
//!
//! ```rust,ignore
//! use kiyomi::supervisor::{Supervisor, job_factory};
//!
//! let mut supervisor = Supervisor::new();
//! supervisor.add("heartbeat", job_factory(move || heartbeat_loop(ctx.clone())))?;
//! supervisor.start_all();
//! // ...
//! supervisor.stop_all().await;
//! ```

pub mod backoff;
pub mod registry;
pub mod task;

pub use backoff::{Backoff, RestartPolicy};
pub use registry::{Supervisor, format_statuses};
pub use task::{JobFactory, JobFuture, SupervisedTask, TaskStatus, job_factory};
