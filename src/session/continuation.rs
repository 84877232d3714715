//! Turning a saved session back into something the AI can pick up from.

use super::types::{Role, WorkSession};
use crate::text::truncate_chars;
use chrono::{DateTime, Utc};

const CONTINUE_PHRASES: &[&str] = &[
    "continue",
    "keep going",
    "go on",
    "proceed",
    "resume",
    "pick up where we left off",
    "where were we",
    "what were we doing",
    "carry on",
];

/// Whether a user message asks to resume the previous task.
pub fn is_continue_command(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    !lowered.is_empty() && CONTINUE_PHRASES.iter().any(|p| lowered.contains(p))
}

/// Continuation is offered only for sessions explicitly flagged for it.
pub fn should_continue(session: &WorkSession) -> bool {
    session.needs_continuation || session.was_interrupted
}

/// Prompt sent to the AI when the user says "continue".
///
/// A pending action wins over the last error, which wins over the bare task.
pub fn continue_prompt(session: &WorkSession) -> String {
    let mut prompt = String::from("Continue with the previous task.");
    if let Some(pending) = non_empty(&session.pending_action) {
        prompt.push_str(&format!(" Specifically: {pending}"));
    } else if let Some(err) = non_empty(&session.last_error) {
        prompt.push_str(&format!(" Last error was: {err}. Fix it and continue."));
    } else if let Some(task) = non_empty(&session.current_task) {
        prompt.push_str(&format!(" The task was: {task}"));
    }
    prompt
}

/// Markdown block describing where the work stands, for prompt injection.
pub fn continuation_context(session: &WorkSession) -> String {
    let mut parts = vec!["## Session Context (Continuing from earlier)".to_owned()];

    if let Some(task) = non_empty(&session.current_task) {
        parts.push(format!("**Task:** {task}"));
    }
    if let Some(project) = non_empty(&session.current_project) {
        parts.push(format!("**Project:** {project}"));
    }
    if let Some(context) = non_empty(&session.task_context) {
        parts.push(format!("**Context:** {context}"));
    }

    if !session.steps_completed.is_empty() {
        parts.push("\n**Completed:**".to_owned());
        for step in last_n(&session.steps_completed, 5) {
            parts.push(format!("  ✓ {step}"));
        }
    }

    if !session.files_modified.is_empty() {
        parts.push(format!(
            "\n**Files modified:** {}",
            last_n(&session.files_modified, 5).join(", ")
        ));
    }

    if let Some(err) = non_empty(&session.last_error) {
        parts.push(format!("\n**Last error:** {err}"));
    } else if let Some(result) = non_empty(&session.last_result) {
        parts.push(format!("\n**Last result:** {}...", truncate_chars(result, 200)));
    }

    if let Some(pending) = non_empty(&session.pending_action) {
        parts.push(format!("\n**Pending:** {pending}"));
    } else if session.was_interrupted {
        parts.push("\n**Status:** Task was interrupted - needs to be resumed".to_owned());
    } else if session.needs_continuation {
        parts.push("\n**Status:** Task needs continuation".to_owned());
    }

    if !session.messages.is_empty() {
        parts.push("\n**Recent conversation:**".to_owned());
        for msg in last_n(&session.messages, 3) {
            let who = match msg.role {
                Role::User => "User",
                Role::Assistant => "Kiyomi",
            };
            parts.push(format!("  {who}: {}...", truncate_chars(&msg.content, 100)));
        }
    }

    parts.join("\n")
}

/// Short human-readable status of the live session.
pub fn session_summary(session: &WorkSession, now: DateTime<Utc>) -> String {
    let minutes_ago = now
        .signed_duration_since(session.last_activity)
        .num_minutes()
        .max(0);

    let mut summary = String::from("**Current Session**\n");
    if let Some(project) = non_empty(&session.current_project) {
        summary.push_str(&format!("Project: {project}\n"));
    }
    if let Some(task) = non_empty(&session.current_task) {
        let short = truncate_chars(task, 50);
        let ellipsis = if short.len() < task.len() { "..." } else { "" };
        summary.push_str(&format!("Task: {short}{ellipsis}\n"));
    }
    summary.push_str(&format!(
        "Steps completed: {}\n",
        session.steps_completed.len()
    ));
    summary.push_str(&format!("Last activity: {minutes_ago} minutes ago\n"));

    if should_continue(session) {
        summary.push_str("\n⚠️ **Task needs continuation**");
        if let Some(pending) = non_empty(&session.pending_action) {
            summary.push_str(&format!("\nPending: {pending}"));
        }
    }
    summary
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

fn last_n<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}
