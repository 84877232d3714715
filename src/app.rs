//! Process wiring: shared context, supervised jobs, plugins and the message handler.

use crate::config::KiyomiConfig;
use crate::error::Result;
use crate::executor::AiExecutor;
use crate::handler::MessageHandler;
use crate::jobs::{self, JobContext};
use crate::notify::NotificationSink;
use crate::plugins::{PluginContext, PluginRegistry, builtin_plugins};
use crate::supervisor::{RestartPolicy, Supervisor, TaskStatus};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// A fully wired kiyomi instance. Nothing runs until [`start`](Self::start).
pub struct App {
    ctx: JobContext,
    supervisor: Arc<Mutex<Supervisor>>,
    plugins: Arc<PluginRegistry>,
    handler: Arc<MessageHandler>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("ctx", &self.ctx)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Wire every component for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a job or plugin cannot be registered.
    pub fn build(
        config: KiyomiConfig,
        executor: Arc<dyn AiExecutor>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let ctx = JobContext::new(config, executor, sink);

        let mut supervisor =
            Supervisor::new().with_default_policy(RestartPolicy::from(&ctx.config.supervisor));
        jobs::register_all(&mut supervisor, &ctx)?;

        let mut plugins = PluginRegistry::new(PluginContext {
            executor: ctx.executor.clone(),
            sink: ctx.sink.clone(),
            sessions: ctx.sessions.clone(),
            storage_dir: ctx.paths.plugin_storage_dir(),
            timeout: ctx.executor_timeout(),
        });
        for plugin in builtin_plugins(&ctx.config.plugins.enabled) {
            plugins.register(plugin)?;
        }

        let supervisor = Arc::new(Mutex::new(supervisor));
        let plugins = Arc::new(plugins);
        let handler = Arc::new(MessageHandler::new(
            ctx.clone(),
            Arc::clone(&plugins),
            Arc::clone(&supervisor),
        ));

        Ok(Self {
            ctx,
            supervisor,
            plugins,
            handler,
        })
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    pub fn handler(&self) -> Arc<MessageHandler> {
        Arc::clone(&self.handler)
    }

    pub fn supervisor(&self) -> Arc<Mutex<Supervisor>> {
        Arc::clone(&self.supervisor)
    }

    /// Load plugins and start every background job. Returns the number of jobs started.
    pub async fn start(&self) -> usize {
        let plugins = self.plugins.load_all().await;
        let jobs = self.supervisor.lock().await.start_all();
        info!(jobs, plugins, executor = self.ctx.executor.name(), "kiyomi started");
        jobs
    }

    pub async fn status(&self) -> Vec<TaskStatus> {
        self.supervisor.lock().await.status()
    }

    /// Stop all jobs, then unload plugins.
    pub async fn shutdown(&self) {
        info!("kiyomi shutting down");
        self.supervisor.lock().await.stop_all().await;
        self.plugins.unload_all().await;
        info!("kiyomi shut down cleanly");
    }
}
