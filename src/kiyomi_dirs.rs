//! Centralized filesystem paths for kiyomi.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Directory Layout
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/kiyomi/` | `~/.local/share/kiyomi/` |
//! | Config | `~/Library/Application Support/kiyomi/` | `~/.config/kiyomi/` |
//!
//! # Environment Overrides
//!
//! - `KIYOMI_DATA_DIR` overrides [`data_dir`]
//! - `KIYOMI_CONFIG_DIR` overrides [`config_dir`]
//!
//! Components never call these functions directly; paths are resolved once
//! into [`DataPaths`] at startup and passed down, so tests can point a whole
//! daemon at a temporary directory.

use std::path::{Path, PathBuf};

/// Application data root directory.
///
/// Holds sessions, reminders, the heartbeat file, reports, and logs.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("KIYOMI_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("kiyomi"))
        .unwrap_or_else(|| PathBuf::from("/tmp/kiyomi-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("KIYOMI_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("kiyomi"))
        .unwrap_or_else(|| PathBuf::from("/tmp/kiyomi-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Resolved set of files the daemon reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    /// Root every other path hangs off.
    pub root: PathBuf,
}

impl DataPaths {
    /// Paths rooted at an explicit directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths rooted at [`data_dir`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(data_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Live work-session slot.
    #[must_use]
    pub fn session_file(&self) -> PathBuf {
        self.root.join("active_session.json")
    }

    /// Bounded archive of finished sessions.
    #[must_use]
    pub fn session_history_file(&self) -> PathBuf {
        self.root.join("session_history.json")
    }

    #[must_use]
    pub fn reminders_file(&self) -> PathBuf {
        self.root.join("reminders.json")
    }

    /// Markdown checklist scanned by the heartbeat job.
    #[must_use]
    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    #[must_use]
    pub fn heartbeat_file(&self) -> PathBuf {
        self.workspace_dir().join("HEARTBEAT.md")
    }

    #[must_use]
    pub fn commitments_file(&self) -> PathBuf {
        self.workspace_dir().join("COMMITMENTS.md")
    }

    /// Daily notes directory (`workspace/memory/YYYY-MM-DD.md`).
    #[must_use]
    pub fn memory_dir(&self) -> PathBuf {
        self.workspace_dir().join("memory")
    }

    /// Date marker proving nightly work already ran today.
    #[must_use]
    pub fn nightly_marker_file(&self) -> PathBuf {
        self.root.join("last_nightly_run.txt")
    }

    #[must_use]
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    #[must_use]
    pub fn plugin_storage_dir(&self) -> PathBuf {
        self.root.join("plugins")
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn default_dirs_end_with_kiyomi() {
        // Overrides may be set in CI, so only check the unset shape.
        if std::env::var_os("KIYOMI_DATA_DIR").is_none() {
            let dir = data_dir();
            assert!(dir.to_string_lossy().contains("kiyomi"));
        }
        assert!(config_file().to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn data_paths_are_rooted() {
        let paths = DataPaths::new("/var/lib/kiyomi-test");
        assert_eq!(
            paths.session_file(),
            PathBuf::from("/var/lib/kiyomi-test/active_session.json")
        );
        assert!(paths.heartbeat_file().starts_with(paths.workspace_dir()));
        assert!(paths.reports_dir().starts_with(paths.root()));
    }
}
