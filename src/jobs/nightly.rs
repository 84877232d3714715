//! Once-a-night autonomous work session.

use super::{DailyMarker, FailureBudget, JobContext};
use crate::config::NightlyConfig;
use crate::executor::{ExecutionRequest, ExecutionResult, execute_with_timeout};
use crate::notify::notify_best_effort;
use crate::store::write_atomic;
use crate::text::truncate_chars;
use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

const NOTES_TAIL_CHARS: usize = 2000;
const REPORT_RESULT_CHARS: usize = 5000;
const SUMMARY_CHARS: usize = 3000;
const ISSUE_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NightlyOutcome {
    OutsideWindow,
    AlreadyDone,
    /// In the window but the user is chatting; retried on the next poll.
    Deferred,
    Completed { success: bool },
}

/// Whether `local` falls in `[hour:minute, hour:minute + window_mins)`, wrapping midnight.
pub fn in_window(local: DateTime<FixedOffset>, cfg: &NightlyConfig) -> bool {
    let now = i64::from(local.hour() * 60 + local.minute());
    let start = i64::from(cfg.hour * 60 + cfg.minute);
    (now - start).rem_euclid(24 * 60) < i64::from(cfg.window_mins)
}

fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

async fn read_or_empty(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            error!(path = %path.display(), "cannot read nightly input: {e}");
            String::new()
        }
    }
}

/// Prompt for the nightly run.
pub fn build_nightly_prompt(
    commitments: &str,
    today_notes: &str,
    continuation: Option<&str>,
) -> String {
    let mut prompt = String::from(
        "You are Kiyomi running the nightly autonomous work session. \
         The user is asleep; work on your own.\n\n\
         RULES:\n\
         - Create branches and pull requests only. Never push to main or production.\n\
         - Follow the priority order from COMMITMENTS.\n\
         - Finish with a short report of what you accomplished.\n\n",
    );
    prompt.push_str("COMMITMENTS:\n");
    prompt.push_str(if commitments.trim().is_empty() {
        "(none recorded)"
    } else {
        commitments.trim()
    });
    prompt.push_str("\n\nTODAY'S NOTES (most recent):\n");
    prompt.push_str(if today_notes.trim().is_empty() {
        "(none)"
    } else {
        tail_chars(today_notes, NOTES_TAIL_CHARS)
    });
    if let Some(context) = continuation {
        prompt.push_str("\n\nUNFINISHED DAYTIME WORK:\n");
        prompt.push_str(context);
    }
    prompt.push_str(
        "\n\nINSTRUCTIONS:\n\
         1. Check known projects for open issues or improvements.\n\
         2. Pick the highest-priority work you can do.\n\
         3. Do the work on feature branches.\n\
         4. Report what you accomplished.\n",
    );
    prompt
}

/// Markdown report saved under `reports/`.
pub fn format_report(date: NaiveDate, started: DateTime<FixedOffset>, result: &ExecutionResult) -> String {
    format!(
        "# Overnight Work Report - {date}\n\n**Started:** {}\n**Status:** {}\n\n## Results\n\n{}\n",
        started.format("%H:%M %:z"),
        if result.success { "Success" } else { "Partial/Error" },
        truncate_chars(&result.output, REPORT_RESULT_CHARS),
    )
}

/// One nightly poll at `local` time.
///
/// # Errors
///
/// Returns an error if the run completed but the daily marker could not be
/// written.
pub async fn run_nightly_once(
    ctx: &JobContext,
    local: DateTime<FixedOffset>,
) -> anyhow::Result<NightlyOutcome> {
    let cfg = &ctx.config.nightly;
    if !in_window(local, cfg) {
        return Ok(NightlyOutcome::OutsideWindow);
    }
    let date = local.date_naive();
    let marker = DailyMarker::new(ctx.paths.nightly_marker_file());
    if marker.done_on(date) {
        return Ok(NightlyOutcome::AlreadyDone);
    }
    if ctx.activity.is_active(cfg.activity_window_mins) {
        debug!("nightly: deferring while user is active");
        return Ok(NightlyOutcome::Deferred);
    }

    info!(%date, "starting nightly work session");
    notify_best_effort(
        ctx.sink.as_ref(),
        "🌙 Starting nightly work session. I'll report back in the morning.",
    )
    .await;

    let commitments = read_or_empty(&ctx.paths.commitments_file()).await;
    let notes_path = ctx.paths.memory_dir().join(format!("{}.md", date.format("%Y-%m-%d")));
    let today_notes = read_or_empty(&notes_path).await;
    let continuation = ctx.sessions.continuation_context();
    let prompt = build_nightly_prompt(&commitments, &today_notes, continuation.as_deref());

    let result = execute_with_timeout(
        ctx.executor.as_ref(),
        ExecutionRequest::new(prompt),
        ctx.executor_timeout(),
    )
    .await;

    let report_path = ctx
        .paths
        .reports_dir()
        .join(format!("{}-overnight.md", date.format("%Y-%m-%d")));
    if let Err(e) = write_atomic(&report_path, format_report(date, local, &result).as_bytes()) {
        error!("failed to write overnight report: {e}");
    }

    marker.mark(date)?;

    let message = if result.success {
        format!(
            "🌙 Nightly work done. Full report saved to {}.\n\n{}",
            report_path.display(),
            truncate_chars(&result.output, SUMMARY_CHARS)
        )
    } else {
        format!(
            "🌙 Nightly work finished with issues: {}",
            truncate_chars(&result.output, ISSUE_CHARS)
        )
    };
    notify_best_effort(ctx.sink.as_ref(), &message).await;
    info!(success = result.success, "nightly work session finished");

    Ok(NightlyOutcome::Completed {
        success: result.success,
    })
}

/// Supervised nightly loop; polls every `nightly.poll_secs`.
///
/// # Errors
///
/// Returns once [`MAX_CONSECUTIVE_FAILURES`](super::MAX_CONSECUTIVE_FAILURES)
/// polls in a row have failed.
pub async fn nightly_loop(ctx: JobContext) -> anyhow::Result<()> {
    let poll = Duration::from_secs(ctx.config.nightly.poll_secs.max(1));
    let mut budget = FailureBudget::new("nightly_work");
    loop {
        budget.observe(run_nightly_once(&ctx, ctx.local_now()).await)?;
        tokio::time::sleep(poll).await;
    }
}
