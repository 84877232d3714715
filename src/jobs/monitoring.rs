//! Uptime checks for configured sites with down/recovered alerts.

use super::JobContext;
use crate::config::SiteConfig;
use crate::notify::notify_best_effort;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Wait between sites within one round.
pub const SITE_SPACING: Duration = Duration::from_secs(1);
/// Retry delay while the user is chatting.
const DEFER_DELAY: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteEvent {
    Down { name: String, url: String },
    Recovered { name: String, url: String },
}

impl SiteEvent {
    pub fn message(&self) -> String {
        match self {
            Self::Down { name, url } => format!("⚠️ **{name}** is DOWN ({url})"),
            Self::Recovered { name, .. } => format!("✅ **{name}** is back up"),
        }
    }
}

/// Consecutive-failure bookkeeping per URL.
#[derive(Debug)]
pub struct SiteMonitor {
    threshold: u32,
    spacing: Duration,
    failures: HashMap<String, u32>,
}

impl SiteMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            spacing: SITE_SPACING,
            failures: HashMap::new(),
        }
    }

    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn failures(&self, url: &str) -> u32 {
        self.failures.get(url).copied().unwrap_or(0)
    }

    /// Record one check. Alerts once when failures reach the threshold, and
    /// once when a site that had alerted comes back.
    pub fn record(&mut self, site: &SiteConfig, up: bool) -> Option<SiteEvent> {
        if up {
            let previous = self.failures.remove(&site.url).unwrap_or(0);
            return (previous >= self.threshold).then(|| SiteEvent::Recovered {
                name: site.name.clone(),
                url: site.url.clone(),
            });
        }
        let count = self.failures.entry(site.url.clone()).or_insert(0);
        *count += 1;
        (*count == self.threshold).then(|| SiteEvent::Down {
            name: site.name.clone(),
            url: site.url.clone(),
        })
    }
}

/// A site is up when it answers with any status below 500.
pub async fn check_site(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) => {
            let up = response.status().as_u16() < 500;
            if !up {
                warn!(url, status = %response.status(), "site check failed");
            }
            up
        }
        Err(e) => {
            warn!(url, "site unreachable: {e}");
            false
        }
    }
}

/// Check every configured site once and notify on transitions.
pub async fn run_monitoring_once(
    ctx: &JobContext,
    monitor: &mut SiteMonitor,
    client: &reqwest::Client,
) -> Vec<SiteEvent> {
    let mut events = Vec::new();
    for (i, site) in ctx.config.monitoring.sites.iter().enumerate() {
        if i > 0 && !monitor.spacing.is_zero() {
            tokio::time::sleep(monitor.spacing).await;
        }
        let up = check_site(client, &site.url).await;
        if let Some(event) = monitor.record(site, up) {
            info!(site = %site.name, ?event, "site state changed");
            notify_best_effort(ctx.sink.as_ref(), &event.message()).await;
            events.push(event);
        }
    }
    events
}

/// Supervised monitoring loop.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub async fn monitoring_loop(ctx: JobContext) -> anyhow::Result<()> {
    let cfg = ctx.config.monitoring.clone();
    let interval = Duration::from_secs(cfg.interval_mins.max(1) * 60);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
        .build()?;
    let mut monitor = SiteMonitor::new(cfg.failure_threshold);

    loop {
        if cfg.sites.is_empty() {
            tokio::time::sleep(interval).await;
            continue;
        }
        if ctx.activity.is_active(cfg.activity_window_mins) {
            debug!("monitoring: deferring while user is active");
            tokio::time::sleep(DEFER_DELAY).await;
            continue;
        }
        run_monitoring_once(&ctx, &mut monitor, &client).await;
        tokio::time::sleep(interval).await;
    }
}
