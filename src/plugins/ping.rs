//! Minimal built-in plugin: liveness command, greeting trigger and a
//! persisted invocation counter.

use super::{Plugin, PluginContext, PluginInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

const NAME: &str = "ping";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PingState {
    counter: u64,
}

#[derive(Debug, Default)]
pub struct PingPlugin {
    counter: AtomicU64,
}

impl PingPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Plugin for PingPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: NAME.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            description: "Liveness check and plugin demo".to_owned(),
            commands: vec!["ping".to_owned(), "example".to_owned()],
            triggers: vec![r"hello\s+kiyomi".to_owned()],
        }
    }

    async fn on_load(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        let state: PingState = ctx.storage(NAME).load()?;
        self.counter.store(state.counter, Ordering::Relaxed);
        Ok(())
    }

    async fn on_unload(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        ctx.storage(NAME).save(&PingState {
            counter: self.counter(),
        })?;
        Ok(())
    }

    async fn on_command(
        &self,
        command: &str,
        _args: &[String],
        ctx: &PluginContext,
    ) -> anyhow::Result<Option<String>> {
        match command {
            "ping" => Ok(Some("Pong! 🏓".to_owned())),
            "example" => {
                let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
                ctx.storage(NAME).save(&PingState { counter: count })?;
                Ok(Some(format!("Example plugin called {count} times!")))
            }
            _ => Ok(None),
        }
    }

    async fn on_trigger(
        &self,
        _trigger: &str,
        matched: &str,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<String>> {
        Ok(matched
            .to_lowercase()
            .contains("hello")
            .then(|| "Hello! I'm the ping plugin. 👋".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::plugins::PluginRegistry;
    use crate::plugins::tests::plugin_context;

    #[tokio::test]
    async fn counter_survives_reload() {
        let dir = tempfile::tempdir().unwrap();

        let mut registry = PluginRegistry::new(plugin_context(dir.path()));
        registry.register(Box::new(PingPlugin::new())).unwrap();
        registry.load_all().await;
        registry.dispatch_command("example", &[]).await;
        assert_eq!(
            registry.dispatch_command("example", &[]).await.as_deref(),
            Some("Example plugin called 2 times!")
        );
        registry.unload_all().await;

        let mut registry = PluginRegistry::new(plugin_context(dir.path()));
        registry.register(Box::new(PingPlugin::new())).unwrap();
        registry.load_all().await;
        assert_eq!(
            registry.dispatch_command("example", &[]).await.as_deref(),
            Some("Example plugin called 3 times!")
        );
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = PingPlugin::new();
        let ctx = plugin_context(dir.path());
        assert_eq!(
            plugin.on_command("ping", &[], &ctx).await.unwrap().as_deref(),
            Some("Pong! 🏓")
        );
        assert_eq!(plugin.on_command("other", &[], &ctx).await.unwrap(), None);
    }
}
