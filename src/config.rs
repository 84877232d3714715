//! Configuration types for the assistant daemon.
//!
//! Every section is `#[serde(default)]`, so a config file only needs the keys
//! it wants to change.

use crate::executor::CliKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KiyomiConfig {
    /// Data directory override (defaults to the platform data dir).
    pub data_dir: Option<PathBuf>,
    /// Restart policy shared by all background jobs.
    pub supervisor: SupervisorConfig,
    /// Work-session limits.
    pub session: SessionConfig,
    /// AI CLI backend.
    pub executor: ExecutorConfig,
    /// Quiet hours and local-time offset.
    pub schedule: ScheduleConfig,
    /// Pending-task checklist job.
    pub heartbeat: HeartbeatConfig,
    /// Reminder delivery job.
    pub reminders: RemindersConfig,
    /// Overnight autonomous work job.
    pub nightly: NightlyConfig,
    /// Site uptime checks.
    pub monitoring: MonitoringConfig,
    /// Outbound notification target.
    pub telegram: TelegramConfig,
    /// Builtin plugin selection.
    pub plugins: PluginsConfig,
}

/// Restart policy for supervised jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Crashes tolerated before a job is abandoned.
    pub max_restarts: u32,
    /// First retry delay in seconds.
    pub base_delay_secs: f64,
    /// Upper bound for the retry delay in seconds.
    pub max_delay_secs: f64,
    /// Uptime after which a crash resets the delay to `base_delay_secs`.
    pub stability_threshold_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 50,
            base_delay_secs: 5.0,
            max_delay_secs: 300.0,
            stability_threshold_secs: 300,
        }
    }
}

/// Work-session limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity after which the live session is archived on next read.
    pub timeout_secs: u64,
    pub max_messages: usize,
    pub max_steps: usize,
    pub max_files: usize,
    /// Archived session summaries kept on disk.
    pub history_limit: usize,
    pub result_max_chars: usize,
    pub error_max_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 4 * 60 * 60,
            max_messages: 10,
            max_steps: 20,
            max_files: 10,
            history_limit: 20,
            result_max_chars: 1000,
            error_max_chars: 500,
        }
    }
}

/// AI CLI backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Which CLI to drive.
    pub cli: CliKind,
    /// Explicit binary path (otherwise looked up on `PATH`).
    pub binary: Option<PathBuf>,
    /// Model override passed to the CLI.
    pub model: Option<String>,
    /// Hard limit for one CLI invocation.
    pub timeout_secs: u64,
    /// Working directory for the CLI (defaults to the workspace dir).
    pub workdir: Option<PathBuf>,
    /// Responses longer than this are truncated.
    pub max_response_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cli: CliKind::Claude,
            binary: None,
            model: None,
            timeout_secs: 1800,
            workdir: None,
            max_response_chars: 50_000,
        }
    }
}

/// Quiet hours, expressed in local hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub quiet_hours_start: u32,
    pub quiet_hours_end: u32,
    /// Offset from UTC used to compute local hours.
    pub utc_offset_hours: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            quiet_hours_start: 23,
            quiet_hours_end: 8,
            utc_offset_hours: 0,
        }
    }
}

/// Heartbeat job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_mins: u64,
    /// Pending checklist items executed per run.
    pub max_tasks_per_run: usize,
    /// Skip the run if the user chatted within this window.
    pub activity_window_mins: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_mins: 30,
            max_tasks_per_run: 2,
            activity_window_mins: 5,
        }
    }
}

/// Reminder job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemindersConfig {
    pub enabled: bool,
    pub poll_secs: u64,
    pub activity_window_mins: u64,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_secs: 60,
            activity_window_mins: 1,
        }
    }
}

/// Nightly work job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NightlyConfig {
    pub enabled: bool,
    /// Local hour the window opens.
    pub hour: u32,
    pub minute: u32,
    /// Window length in minutes.
    pub window_mins: u32,
    pub activity_window_mins: u64,
    pub poll_secs: u64,
}

impl Default for NightlyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 1,
            minute: 0,
            window_mins: 90,
            activity_window_mins: 10,
            poll_secs: 300,
        }
    }
}

/// A monitored site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub url: String,
}

/// Site monitoring job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub interval_mins: u64,
    pub activity_window_mins: u64,
    /// Consecutive failures before a down alert.
    pub failure_threshold: u32,
    pub request_timeout_secs: u64,
    pub sites: Vec<SiteConfig>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_mins: 30,
            activity_window_mins: 2,
            failure_threshold: 2,
            request_timeout_secs: 10,
            sites: Vec::new(),
        }
    }
}

/// Telegram Bot API target for proactive notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    /// API base URL override.
    pub api_base: Option<String>,
}

impl TelegramConfig {
    /// Whether both the token and chat are configured.
    pub fn is_configured(&self) -> bool {
        self.bot_token.as_deref().is_some_and(|t| !t.is_empty())
            && self.chat_id.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Builtin plugin selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub enabled: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["ping".to_owned()],
        }
    }
}

impl KiyomiConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::KiyomiError::Config(e.to_string()))
    }

    /// Load the file if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error only if an existing file cannot be parsed or read.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        match Self::from_file(path) {
            Ok(config) => Ok(config),
            Err(crate::error::KiyomiError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::KiyomiError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::kiyomi_dirs::config_file()
    }

    /// Resolved data paths, honouring `data_dir`.
    pub fn data_paths(&self) -> crate::kiyomi_dirs::DataPaths {
        match &self.data_dir {
            Some(dir) => crate::kiyomi_dirs::DataPaths::new(dir.clone()),
            None => crate::kiyomi_dirs::DataPaths::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = KiyomiConfig::default();
        assert_eq!(config.supervisor.max_restarts, 50);
        assert!((config.supervisor.base_delay_secs - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.session.timeout_secs, 14_400);
        assert_eq!(config.session.history_limit, 20);
        assert_eq!(config.heartbeat.max_tasks_per_run, 2);
        assert_eq!(config.executor.timeout_secs, 1800);
        assert_eq!(config.plugins.enabled, vec!["ping".to_owned()]);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: KiyomiConfig = toml::from_str(
            r#"
            [supervisor]
            max_restarts = 3

            [executor]
            cli = "codex"

            [[monitoring.sites]]
            name = "blog"
            url = "https://example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.supervisor.max_restarts, 3);
        assert_eq!(config.supervisor.stability_threshold_secs, 300);
        assert_eq!(config.executor.cli, CliKind::Codex);
        assert_eq!(config.monitoring.sites.len(), 1);
        assert_eq!(config.reminders.poll_secs, 60);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = KiyomiConfig::default();
        config.schedule.quiet_hours_start = 22;
        config.save_to_file(&path).unwrap();

        let loaded = KiyomiConfig::from_file(&path).unwrap();
        assert_eq!(loaded.schedule.quiet_hours_start, 22);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = KiyomiConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.supervisor.max_restarts, 50);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(matches!(
            KiyomiConfig::load_or_default(&path),
            Err(crate::error::KiyomiError::Config(_))
        ));
    }

    #[test]
    fn telegram_requires_token_and_chat() {
        let mut telegram = TelegramConfig::default();
        assert!(!telegram.is_configured());
        telegram.bot_token = Some("123:abc".to_owned());
        assert!(!telegram.is_configured());
        telegram.chat_id = Some("42".to_owned());
        assert!(telegram.is_configured());
    }
}
