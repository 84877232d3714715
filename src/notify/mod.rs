//! Proactive message delivery.
//!
//! Background jobs never call a transport directly; they hand text to a
//! [`NotificationSink`] through [`notify_best_effort`], which logs failures
//! instead of returning them so a flaky transport cannot crash a job.

pub mod telegram;

pub use telegram::TelegramSink;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Destination for proactive messages.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Stable sink identifier (e.g. `telegram`, `log`).
    fn id(&self) -> &'static str;

    /// Deliver one message.
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

/// Send and swallow failures. Returns whether delivery succeeded.
pub async fn notify_best_effort(sink: &dyn NotificationSink, text: &str) -> bool {
    match sink.send(text).await {
        Ok(()) => true,
        Err(e) => {
            warn!(sink = sink.id(), "notification failed: {e:#}");
            false
        }
    }
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn id(&self) -> &'static str {
        "log"
    }

    async fn send(&self, text: &str) -> anyhow::Result<()> {
        info!(target: "kiyomi::notification", "{text}");
        Ok(())
    }
}

/// Forwards notifications into an in-process channel (console front-end, tests).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end of its channel.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    fn id(&self) -> &'static str {
        "channel"
    }

    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.tx
            .send(text.to_owned())
            .map_err(|_| anyhow::anyhow!("notification receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::pair();
        assert!(notify_best_effort(&sink, "one").await);
        assert!(notify_best_effort(&sink, "two").await);
        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn dropped_receiver_is_swallowed() {
        let (sink, rx) = ChannelSink::pair();
        drop(rx);
        assert!(sink.send("lost").await.is_err());
        assert!(!notify_best_effort(&sink, "lost").await);
    }

    #[tokio::test]
    async fn log_sink_always_succeeds() {
        assert!(notify_best_effort(&LogSink, "hello").await);
    }
}
