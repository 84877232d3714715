//! Process-wide registry of supervised jobs.

use super::backoff::RestartPolicy;
use super::task::{JobFactory, SupervisedTask, TaskStatus};
use crate::error::{KiyomiError, Result};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Owns every named background job and drives their bulk lifecycle.
#[derive(Debug, Default)]
pub struct Supervisor {
    tasks: BTreeMap<String, SupervisedTask>,
    default_policy: RestartPolicy,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy applied by [`add`](Self::add).
    pub fn with_default_policy(mut self, policy: RestartPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn default_policy(&self) -> &RestartPolicy {
        &self.default_policy
    }

    /// Register a job under the default restart policy.
    ///
    /// # Errors
    ///
    /// See [`add_with_policy`](Self::add_with_policy).
    pub fn add(&mut self, name: impl Into<String>, factory: JobFactory) -> Result<SupervisedTask> {
        let policy = self.default_policy.clone();
        self.add_with_policy(name, factory, policy)
    }

    /// Register a job with its own restart policy.
    ///
    /// The task is inert until [`start_all`](Self::start_all) or
    /// [`start`](Self::start). Re-registering a name that was never started
    /// replaces the old descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`KiyomiError::Supervisor`] if a task with the same name is
    /// already running.
    pub fn add_with_policy(
        &mut self,
        name: impl Into<String>,
        factory: JobFactory,
        policy: RestartPolicy,
    ) -> Result<SupervisedTask> {
        let name = name.into();
        if let Some(existing) = self.tasks.get(&name) {
            if existing.is_started() {
                return Err(KiyomiError::Supervisor(format!(
                    "task '{name}' is already registered and started"
                )));
            }
            warn!(task = %name, "replacing unstarted task descriptor");
        }
        let task = SupervisedTask::new(name.clone(), factory, policy);
        self.tasks.insert(name, task.clone());
        Ok(task)
    }

    /// Start every registered task that has not been started yet.
    ///
    /// Only issues the spawns; no job has necessarily done any work on return.
    pub fn start_all(&self) -> usize {
        let started = self
            .tasks
            .values()
            .filter(|task| !task.is_started())
            .filter(|task| task.start())
            .count();
        info!(started, total = self.tasks.len(), "supervisor started tasks");
        started
    }

    /// Start one task by name (for jobs added after [`start_all`](Self::start_all)).
    pub fn start(&self, name: &str) -> bool {
        match self.tasks.get(name) {
            Some(task) => task.start(),
            None => {
                warn!(task = %name, "start requested for unknown task");
                false
            }
        }
    }

    /// Stop every task concurrently.
    ///
    /// Each stop runs in its own tokio task, so a panic while shutting one job
    /// down is logged and does not prevent the others from stopping.
    pub async fn stop_all(&self) {
        let stops: Vec<_> = self
            .tasks
            .values()
            .cloned()
            .map(|task| {
                let name = task.name().to_owned();
                (name, tokio::spawn(async move { task.stop().await }))
            })
            .collect();

        let (names, handles): (Vec<_>, Vec<_>) = stops.into_iter().unzip();
        let results = futures_util::future::join_all(handles).await;
        let mut failed = 0usize;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                failed += 1;
                error!(task = %name, "error while stopping task: {e}");
            }
        }
        info!(total = self.tasks.len(), failed, "supervisor stopped all tasks");
    }

    /// Status snapshots of every task, sorted by name.
    pub fn status(&self) -> Vec<TaskStatus> {
        self.tasks.values().map(SupervisedTask::status).collect()
    }

    pub fn get(&self, name: &str) -> Option<&SupervisedTask> {
        self.tasks.get(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Human-readable health block for status commands.
    pub fn format_status(&self) -> String {
        format_statuses(&self.status())
    }
}

/// Render task snapshots as one line per task.
pub fn format_statuses(statuses: &[TaskStatus]) -> String {
    if statuses.is_empty() {
        return "No background tasks registered.".to_owned();
    }
    let mut out = String::from("Background tasks:");
    for status in statuses {
        let icon = if status.running {
            "✅"
        } else if status.exhausted {
            "💀"
        } else {
            "⏹"
        };
        out.push_str(&format!(
            "\n{icon} {} (restarts: {}/{})",
            status.name, status.restarts, status.max_restarts
        ));
        if let Some(err) = &status.last_error {
            out.push_str(&format!(" last error: {err}"));
        }
    }
    out
}
