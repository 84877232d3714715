//! Statically registered chat plugins.
//!
//! A [`Plugin`] can claim slash commands, react to regex triggers, or inspect
//! every message. The [`PluginRegistry`] compiles triggers once at
//! registration, tracks load state, and isolates plugin errors: a failing
//! plugin is logged and skipped, never propagated to the message path.

pub mod ping;

pub use ping::PingPlugin;

use crate::error::{KiyomiError, Result};
use crate::executor::{AiExecutor, ExecutionRequest, ExecutionResult, execute_with_timeout};
use crate::notify::{NotificationSink, notify_best_effort};
use crate::session::SessionManager;
use crate::store::JsonDocument;
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Static description of a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginInfo {
    /// Unique machine-readable name (e.g. `"ping"`).
    pub name: String,
    pub version: String,
    pub description: String,
    /// Slash commands this plugin handles, without the leading `/`.
    pub commands: Vec<String>,
    /// Regex patterns matched case-insensitively against every message.
    pub triggers: Vec<String>,
}

/// Capabilities handed to plugins.
#[derive(Clone)]
pub struct PluginContext {
    pub executor: Arc<dyn AiExecutor>,
    pub sink: Arc<dyn NotificationSink>,
    pub sessions: Arc<SessionManager>,
    pub storage_dir: PathBuf,
    pub timeout: Duration,
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("executor", &self.executor.name())
            .field("sink", &self.sink.id())
            .field("storage_dir", &self.storage_dir)
            .finish_non_exhaustive()
    }
}

impl PluginContext {
    /// Per-plugin JSON storage at `<storage_dir>/<plugin>.json`.
    pub fn storage<T>(&self, plugin: &str) -> JsonDocument<T>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        JsonDocument::new(self.storage_dir.join(format!("{plugin}.json")))
    }

    /// Run a prompt through the AI executor with the configured timeout.
    pub async fn execute(&self, prompt: &str) -> ExecutionResult {
        execute_with_timeout(self.executor.as_ref(), ExecutionRequest::new(prompt), self.timeout).await
    }

    /// Push a message to the user; returns whether it was delivered.
    pub async fn send_message(&self, text: &str) -> bool {
        notify_best_effort(self.sink.as_ref(), text).await
    }
}

/// A chat extension. Every hook defaults to "not handled".
#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    async fn on_load(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_unload(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called for every plain message; `Some` claims it.
    async fn on_message(&self, _message: &str, _ctx: &PluginContext) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn on_command(
        &self,
        _command: &str,
        _args: &[String],
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    /// `trigger` is the pattern that matched, `matched` the matching text.
    async fn on_trigger(
        &self,
        _trigger: &str,
        _matched: &str,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadState {
    Registered,
    Loaded,
    Failed(String),
    Unloaded,
}

struct Entry {
    plugin: Box<dyn Plugin>,
    info: PluginInfo,
    triggers: Vec<(String, Regex)>,
    state: Mutex<LoadState>,
}

impl Entry {
    fn state(&self) -> LoadState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, state: LoadState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }
}

/// Registered plugins in registration order.
pub struct PluginRegistry {
    entries: Vec<Entry>,
    ctx: PluginContext,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.entries.iter().map(|e| e.info.name.as_str()).collect();
        f.debug_struct("PluginRegistry")
            .field("plugins", &names)
            .finish_non_exhaustive()
    }
}

impl PluginRegistry {
    pub fn new(ctx: PluginContext) -> Self {
        Self {
            entries: Vec::new(),
            ctx,
        }
    }

    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    /// Add a plugin, compiling its triggers.
    ///
    /// # Errors
    ///
    /// Returns [`KiyomiError::Plugin`] for a duplicate name or an invalid trigger regex.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        let info = plugin.info();
        if self.entries.iter().any(|e| e.info.name == info.name) {
            return Err(KiyomiError::Plugin(format!(
                "plugin '{}' is already registered",
                info.name
            )));
        }
        let triggers = info
            .triggers
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (pattern.clone(), re))
                    .map_err(|e| {
                        KiyomiError::Plugin(format!(
                            "plugin '{}' has invalid trigger '{pattern}': {e}",
                            info.name
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        self.entries.push(Entry {
            plugin,
            info,
            triggers,
            state: Mutex::new(LoadState::Registered),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of plugins that loaded successfully.
    pub fn loaded(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_loaded())
            .map(|e| e.info.name.clone())
            .collect()
    }

    /// Run `on_load` for every plugin not yet loaded. Returns how many loaded.
    pub async fn load_all(&self) -> usize {
        let mut loaded = 0;
        for entry in &self.entries {
            if entry.is_loaded() {
                continue;
            }
            match entry.plugin.on_load(&self.ctx).await {
                Ok(()) => {
                    entry.set_state(LoadState::Loaded);
                    loaded += 1;
                    info!(plugin = %entry.info.name, version = %entry.info.version, "plugin loaded");
                }
                Err(e) => {
                    error!(plugin = %entry.info.name, "plugin failed to load: {e:#}");
                    entry.set_state(LoadState::Failed(format!("{e:#}")));
                }
            }
        }
        loaded
    }

    /// Run `on_unload` for every loaded plugin.
    pub async fn unload_all(&self) {
        for entry in self.entries.iter().filter(|e| e.is_loaded()) {
            if let Err(e) = entry.plugin.on_unload(&self.ctx).await {
                warn!(plugin = %entry.info.name, "plugin unload failed: {e:#}");
            }
            entry.set_state(LoadState::Unloaded);
        }
    }

    /// First non-`None` answer from `on_message`.
    pub async fn dispatch_message(&self, message: &str) -> Option<String> {
        for entry in self.entries.iter().filter(|e| e.is_loaded()) {
            match entry.plugin.on_message(message, &self.ctx).await {
                Ok(Some(reply)) => return Some(reply),
                Ok(None) => {}
                Err(e) => error!(plugin = %entry.info.name, "plugin error in on_message: {e:#}"),
            }
        }
        None
    }

    /// Route a command to the first loaded plugin that declares it.
    ///
    /// `None` means no plugin claims the command.
    pub async fn dispatch_command(&self, command: &str, args: &[String]) -> Option<String> {
        let entry = self
            .entries
            .iter()
            .filter(|e| e.is_loaded())
            .find(|e| e.info.commands.iter().any(|c| c == command))?;
        match entry.plugin.on_command(command, args, &self.ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(plugin = %entry.info.name, "plugin error in on_command: {e:#}");
                Some(format!("Plugin error: {e}"))
            }
        }
    }

    /// First non-empty answer from a plugin whose trigger matches `message`.
    pub async fn dispatch_trigger(&self, message: &str) -> Option<String> {
        for entry in self.entries.iter().filter(|e| e.is_loaded()) {
            for (pattern, regex) in &entry.triggers {
                let Some(found) = regex.find(message) else {
                    continue;
                };
                match entry.plugin.on_trigger(pattern, found.as_str(), &self.ctx).await {
                    Ok(Some(reply)) if !reply.is_empty() => return Some(reply),
                    Ok(_) => {}
                    Err(e) => error!(plugin = %entry.info.name, "plugin error in on_trigger: {e:#}"),
                }
            }
        }
        None
    }

    /// Human-readable plugin list with load status.
    pub fn format_list(&self) -> String {
        if self.entries.is_empty() {
            return "No plugins loaded.".to_owned();
        }
        let mut out = String::from("**Plugins:**\n");
        for entry in &self.entries {
            let state = entry.state();
            let icon = match state {
                LoadState::Loaded => "✅",
                LoadState::Failed(_) => "❌",
                LoadState::Registered | LoadState::Unloaded => "⏹",
            };
            out.push_str(&format!(
                "\n{icon} **{}** v{}\n   {}\n",
                entry.info.name, entry.info.version, entry.info.description
            ));
            if !entry.info.commands.is_empty() {
                out.push_str(&format!("   Commands: {}\n", entry.info.commands.join(", ")));
            }
            if let LoadState::Failed(err) = state {
                out.push_str(&format!("   Error: {err}\n"));
            }
        }
        out
    }
}

/// Instantiate the built-in plugins named in `enabled`.
pub fn builtin_plugins(enabled: &[String]) -> Vec<Box<dyn Plugin>> {
    enabled
        .iter()
        .filter_map(|name| match name.as_str() {
            "ping" => Some(Box::new(PingPlugin::new()) as Box<dyn Plugin>),
            other => {
                warn!(plugin = other, "unknown built-in plugin in config");
                None
            }
        })
        .collect()
}
