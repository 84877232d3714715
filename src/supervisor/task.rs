//! A single supervised background job.
//!
//! [`SupervisedTask`] keeps one job alive by invoking its [`JobFactory`] again
//! after every crash. Each attempt runs as its own tokio task and the
//! supervising loop awaits it before deciding anything, so two attempts of the
//! same job never overlap.
//!
//! Outcomes of an attempt:
//!
//! | Attempt result | Effect |
//! |----------------|--------|
//! | `Ok(())` | supervision ends, no restart |
//! | `Err(_)` or panic | crash: counted, backoff, restart |
//! | cancelled by [`SupervisedTask::stop`] | supervision ends, not counted |

use super::backoff::{Backoff, RestartPolicy};
use crate::text::truncate_chars;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Maximum length of the stored `last_error` text.
pub const LAST_ERROR_MAX_CHARS: usize = 200;

/// One attempt of a job.
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Produces a fresh attempt. Arguments are captured by the closure.
pub type JobFactory = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wrap an async closure as a [`JobFactory`].
pub fn job_factory<F, Fut>(f: F) -> JobFactory
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Point-in-time view of a supervised task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub name: String,
    /// True while the supervising loop is alive and not stopped.
    pub running: bool,
    pub restarts: u32,
    pub max_restarts: u32,
    pub last_error: Option<String>,
    /// When the current (or last) attempt began.
    pub started_at: Option<DateTime<Utc>>,
    pub last_crash: Option<DateTime<Utc>>,
    /// The restart ceiling was hit; the job is dead until the process restarts.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Stopped,
}

#[derive(Debug, Default)]
struct RuntimeState {
    running: bool,
    restarts: u32,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    last_crash: Option<DateTime<Utc>>,
    exhausted: bool,
}

struct TaskInner {
    name: String,
    factory: JobFactory,
    policy: RestartPolicy,
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
    state: Mutex<RuntimeState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a supervised job. Clones refer to the same job.
#[derive(Clone)]
pub struct SupervisedTask {
    inner: Arc<TaskInner>,
}

impl std::fmt::Debug for SupervisedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedTask")
            .field("name", &self.inner.name)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl SupervisedTask {
    /// Create an inert task. Nothing runs until [`start`](Self::start).
    pub fn new(name: impl Into<String>, factory: JobFactory, policy: RestartPolicy) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                name: name.into(),
                factory,
                policy,
                cancel: CancellationToken::new(),
                lifecycle: Mutex::new(Lifecycle::Created),
                state: Mutex::new(RuntimeState::default()),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.inner.policy
    }

    /// Spawn the supervising loop and return immediately.
    ///
    /// Must be called from within a tokio runtime. A second call, or a call
    /// after [`stop`](Self::stop), is ignored with a warning; a stopped task
    /// cannot be revived.
    pub fn start(&self) -> bool {
        {
            let mut lifecycle = self.inner.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            if *lifecycle != Lifecycle::Created {
                warn!(task = %self.inner.name, state = ?*lifecycle, "ignoring start of a task that is not fresh");
                return false;
            }
            *lifecycle = Lifecycle::Started;
        }
        self.lock_state().running = true;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(supervise(inner));
        *self.inner.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(task = %self.inner.name, "supervised task started");
        true
    }

    /// Cancel the in-flight attempt and wait for the supervising loop to exit.
    ///
    /// After this returns the job factory is never invoked again. Cancellation
    /// is cooperative: an attempt is interrupted at its next `.await`.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            *lifecycle = Lifecycle::Stopped;
        }
        self.lock_state().running = false;
        self.inner.cancel.cancel();

        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(task = %self.inner.name, "supervising loop panicked during stop");
                }
            }
        }
        info!(task = %self.inner.name, "supervised task stopped");
    }

    /// Snapshot of the task's runtime fields.
    pub fn status(&self) -> TaskStatus {
        let state = self.lock_state();
        TaskStatus {
            name: self.inner.name.clone(),
            running: state.running,
            restarts: state.restarts,
            max_restarts: self.inner.policy.max_restarts,
            last_error: state.last_error.clone(),
            started_at: state.started_at,
            last_crash: state.last_crash,
            exhausted: state.exhausted,
        }
    }

    /// Whether [`start`](Self::start) has been called (successfully) on this task.
    pub fn is_started(&self) -> bool {
        *self.inner.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) != Lifecycle::Created
    }

    /// True once the supervising loop has exited for any reason.
    pub fn is_finished(&self) -> bool {
        self.is_started() && !self.lock_state().running
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum AttemptOutcome {
    Finished,
    Cancelled,
    Crashed(String),
}

async fn supervise(inner: Arc<TaskInner>) {
    let name = inner.name.as_str();
    let policy = &inner.policy;
    let mut backoff = Backoff::new(policy);

    loop {
        if inner.cancel.is_cancelled() {
            break;
        }
        let restarts = lock(&inner.state).restarts;
        if restarts >= policy.max_restarts {
            give_up(&inner, restarts);
            break;
        }

        let attempt_started = Instant::now();
        lock(&inner.state).started_at = Some(Utc::now());
        debug!(task = %name, "starting attempt");

        let mut attempt = tokio::spawn((inner.factory)());
        let joined = tokio::select! {
            joined = &mut attempt => Some(joined),
            () = inner.cancel.cancelled() => None,
        };
        let outcome = match joined {
            Some(joined) => classify(joined),
            None => {
                attempt.abort();
                let _ = attempt.await;
                AttemptOutcome::Cancelled
            }
        };

        let message = match outcome {
            AttemptOutcome::Finished => {
                info!(task = %name, "job returned; supervision finished");
                break;
            }
            AttemptOutcome::Cancelled => break,
            AttemptOutcome::Crashed(message) => message,
        };

        let restarts = {
            let mut state = lock(&inner.state);
            state.restarts += 1;
            state.last_crash = Some(Utc::now());
            state.last_error = Some(truncate_chars(&message, LAST_ERROR_MAX_CHARS));
            state.restarts
        };
        error!(
            task = %name,
            restarts,
            max_restarts = policy.max_restarts,
            error = %message,
            "supervised task crashed"
        );

        if inner.cancel.is_cancelled() {
            break;
        }
        if restarts >= policy.max_restarts {
            give_up(&inner, restarts);
            break;
        }

        let delay = backoff.next_delay(attempt_started.elapsed());
        info!(task = %name, delay_ms = delay.as_millis() as u64, "restarting after backoff");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = inner.cancel.cancelled() => break,
        }
    }

    lock(&inner.state).running = false;
}

fn give_up(inner: &TaskInner, restarts: u32) {
    lock(&inner.state).exhausted = true;
    error!(
        task = %inner.name,
        critical = true,
        restarts,
        "supervised task exceeded max restarts; giving up"
    );
}

fn classify(joined: Result<anyhow::Result<()>, JoinError>) -> AttemptOutcome {
    match joined {
        Ok(Ok(())) => AttemptOutcome::Finished,
        Ok(Err(e)) => AttemptOutcome::Crashed(format!("{e:#}")),
        Err(e) if e.is_cancelled() => AttemptOutcome::Cancelled,
        Err(e) => AttemptOutcome::Crashed(panic_message(e)),
    }
}

fn panic_message(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                format!("panic: {s}")
            } else if let Some(s) = payload.downcast_ref::<String>() {
                format!("panic: {s}")
            } else {
                "panic: <non-string payload>".to_owned()
            }
        }
        Err(e) => e.to_string(),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy::default()
            .with_max_restarts(max_restarts)
            .with_delays(Duration::from_secs(1), Duration::from_secs(8))
    }

    #[tokio::test(start_paused = true)]
    async fn zero_restart_budget_is_exhausted_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let task = SupervisedTask::new(
            "never",
            job_factory(move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            fast_policy(0),
        );
        assert!(task.start());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let status = task.status();
        assert!(status.exhausted);
        assert!(!status.running);
        assert_eq!(status.restarts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_return_ends_supervision_without_restart() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let task = SupervisedTask::new(
            "once",
            job_factory(move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            fast_policy(5),
        );
        assert!(task.start());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let status = task.status();
        assert_eq!(status.restarts, 0);
        assert!(!status.running);
        assert!(!status.exhausted);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn panic_counts_as_crash() {
        async fn explode() -> anyhow::Result<()> {
            panic!("boom")
        }
        let task = SupervisedTask::new("panicky", job_factory(explode), fast_policy(2));
        task.start();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let status = task.status();
        assert_eq!(status.restarts, 2);
        assert!(status.exhausted);
        assert_eq!(status.last_error.as_deref(), Some("panic: boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn last_error_is_truncated() {
        let task = SupervisedTask::new(
            "verbose",
            job_factory(|| async { Err::<(), _>(anyhow::anyhow!("{}", "x".repeat(500))) }),
            fast_policy(1),
        );
        task.start();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = task.status();
        assert_eq!(status.last_error.unwrap().chars().count(), LAST_ERROR_MAX_CHARS);
        assert!(status.last_crash.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_is_ignored() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let task = SupervisedTask::new(
            "single",
            job_factory(move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }),
            fast_policy(3),
        );
        assert!(task.start());
        assert!(!task.start());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        task.stop().await;
        assert!(!task.start());
        assert!(!task.status().running);
    }

    #[tokio::test]
    async fn stop_before_start_is_harmless() {
        let task = SupervisedTask::new("idle", job_factory(|| async { Ok(()) }), fast_policy(1));
        task.stop().await;
        assert!(!task.status().running);
        assert!(!task.start());
    }
}
