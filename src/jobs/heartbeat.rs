//! Silent background work from a markdown checklist.
//!
//! `workspace/HEARTBEAT.md` holds a `## Pending Tasks` section of `- [ ]`
//! items. Every interval the heartbeat runs up to `max_tasks_per_run` of them
//! through the AI executor and ticks off the ones that succeeded.

use super::{FailureBudget, JobContext};
use crate::executor::{ExecutionRequest, execute_with_timeout};
use crate::store::write_atomic;
use crate::text::truncate_chars;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

static PENDING_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)##\s*pending\s*tasks\s*\n(.*?)(?:\n##|\z)").expect("valid section regex")
});

static OPEN_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\s*\[\s*\]\s*(.+)").expect("valid item regex"));

/// Result of one heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The user is chatting or it is quiet hours.
    Skipped,
    /// Tasks were attempted; `completed` were ticked off.
    Ran { attempted: usize, completed: usize },
}

/// Descriptions of unchecked items under `## Pending Tasks`.
pub fn parse_pending_tasks(content: &str) -> Vec<String> {
    let Some(section) = PENDING_SECTION.captures(content).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    OPEN_ITEM
        .captures_iter(section.as_str())
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_owned())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Tick off the first `- [ ] description` line.
pub fn mark_task_completed(content: &str, description: &str) -> String {
    content.replacen(
        &format!("- [ ] {description}"),
        &format!("- [x] {description}"),
        1,
    )
}

/// One heartbeat tick.
///
/// # Errors
///
/// Returns an error if HEARTBEAT.md exists but cannot be read, or a ticked-off
/// checklist cannot be written back.
pub async fn run_heartbeat_once(ctx: &JobContext) -> anyhow::Result<HeartbeatOutcome> {
    let cfg = &ctx.config.heartbeat;
    if ctx.activity.is_active(cfg.activity_window_mins) || ctx.quiet_hours().is_quiet_at(ctx.local_now()) {
        debug!("heartbeat: skipping (active chat or quiet hours)");
        return Ok(HeartbeatOutcome::Skipped);
    }

    let path = ctx.paths.heartbeat_file();
    let mut content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(anyhow::anyhow!("cannot read {}: {e}", path.display())),
    };

    let tasks = parse_pending_tasks(&content);
    let mut attempted = 0;
    let mut completed = 0;
    for description in tasks.into_iter().take(cfg.max_tasks_per_run) {
        attempted += 1;
        info!(task = %truncate_chars(&description, 50), "heartbeat task");
        let result = execute_with_timeout(
            ctx.executor.as_ref(),
            ExecutionRequest::new(description.clone()),
            ctx.executor_timeout(),
        )
        .await;
        if !result.success {
            warn!(task = %truncate_chars(&description, 50), "heartbeat task failed: {}", truncate_chars(&result.output, 200));
            continue;
        }
        content = mark_task_completed(&content, &description);
        write_atomic(&path, content.as_bytes())?;
        completed += 1;
    }

    if completed > 0 {
        info!(completed, "completed background task(s) silently");
    }
    Ok(HeartbeatOutcome::Ran {
        attempted,
        completed,
    })
}

/// Supervised heartbeat loop.
///
/// # Errors
///
/// Returns once [`MAX_CONSECUTIVE_FAILURES`](super::MAX_CONSECUTIVE_FAILURES)
/// ticks in a row have failed.
pub async fn heartbeat_loop(ctx: JobContext) -> anyhow::Result<()> {
    let interval = Duration::from_secs(ctx.config.heartbeat.interval_mins.max(1) * 60);
    let mut budget = FailureBudget::new("heartbeat");
    loop {
        budget.observe(run_heartbeat_once(&ctx).await)?;
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::KiyomiConfig;
    use crate::executor::ScriptedExecutor;
    use crate::notify::LogSink;
    use std::sync::Arc;

    const CHECKLIST: &str = "# Heartbeat\n\n## Pending Tasks\n- [ ] tidy the notes\n- [x] already done\n- [ ] check the build\n- [ ] write summary\n\n## Done\n- [ ] not a pending task\n";

    fn context(dir: &std::path::Path, executor: Arc<ScriptedExecutor>) -> JobContext {
        let mut config = KiyomiConfig::default();
        config.data_dir = Some(dir.to_path_buf());
        // Never quiet, so the tests do not depend on the wall clock.
        config.schedule.quiet_hours_start = 0;
        config.schedule.quiet_hours_end = 0;
        JobContext::new(config, executor, Arc::new(LogSink))
    }

    #[test]
    fn parses_only_open_items_in_pending_section() {
        let tasks = parse_pending_tasks(CHECKLIST);
        assert_eq!(tasks, vec!["tidy the notes", "check the build", "write summary"]);
    }

    #[test]
    fn missing_section_yields_nothing() {
        assert!(parse_pending_tasks("# Notes\n- [ ] stray item\n").is_empty());
        assert!(parse_pending_tasks("").is_empty());
    }

    #[test]
    fn section_header_is_case_insensitive() {
        let tasks = parse_pending_tasks("## pending tasks\n-[ ] lower case\n");
        assert_eq!(tasks, vec!["lower case"]);
    }

    #[test]
    fn marking_touches_only_first_match() {
        let content = "- [ ] a\n- [ ] a\n";
        assert_eq!(mark_task_completed(content, "a"), "- [x] a\n- [ ] a\n");
    }

    #[tokio::test]
    async fn runs_at_most_two_tasks_and_ticks_successes() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push_ok("done");
        executor.push_failed("broken");
        let ctx = context(dir.path(), executor.clone());
        std::fs::create_dir_all(ctx.paths.workspace_dir()).unwrap();
        std::fs::write(ctx.paths.heartbeat_file(), CHECKLIST).unwrap();

        let outcome = run_heartbeat_once(&ctx).await.unwrap();
        assert_eq!(
            outcome,
            HeartbeatOutcome::Ran {
                attempted: 2,
                completed: 1
            }
        );

        let prompts: Vec<_> = executor.requests().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec!["tidy the notes", "check the build"]);

        let after = std::fs::read_to_string(ctx.paths.heartbeat_file()).unwrap();
        assert!(after.contains("- [x] tidy the notes"));
        assert!(after.contains("- [ ] check the build"));
        assert!(after.contains("- [ ] write summary"));
    }

    #[tokio::test]
    async fn skips_while_user_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = context(dir.path(), executor.clone());
        std::fs::create_dir_all(ctx.paths.workspace_dir()).unwrap();
        std::fs::write(ctx.paths.heartbeat_file(), CHECKLIST).unwrap();

        ctx.activity.update_last_message_time();
        assert_eq!(run_heartbeat_once(&ctx).await.unwrap(), HeartbeatOutcome::Skipped);
        assert!(executor.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(ScriptedExecutor::new()));
        assert_eq!(
            run_heartbeat_once(&ctx).await.unwrap(),
            HeartbeatOutcome::Ran {
                attempted: 0,
                completed: 0
            }
        );
    }
}
