//! The live request path: one inbound user message in, one reply out.
//!
//! Every message first refreshes the [`ActivityGate`](crate::activity::ActivityGate)
//! so background jobs back off, then goes to slash commands, the continue
//! shortcut, plugins, and finally the AI executor with session bookkeeping.

use crate::executor::{ExecutionRequest, ExecutionResult, execute_with_timeout};
use crate::jobs::JobContext;
use crate::jobs::reminders::{Repeat, parse_reminder_time};
use crate::plugins::PluginRegistry;
use crate::session::{ChatMessage, SessionUpdate, is_continue_command};
use crate::supervisor::Supervisor;
use crate::text::truncate_chars;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const TASK_CHARS: usize = 200;
const MESSAGE_CHARS: usize = 500;
const STEP_CHARS: usize = 100;

const HELP: &str = "Commands:\n\
/status - background job health and current work\n\
/session - current work session\n\
/endsession - finish and archive the current session\n\
/remind <when> | <message> [| daily|weekly] - set a reminder\n\
/reminders - list pending reminders\n\
/cancelremind <id> - delete a reminder\n\
/plugins - list plugins\n\
/help - this message\n\n\
Say \"continue\" to resume interrupted work.";

pub struct MessageHandler {
    ctx: JobContext,
    plugins: Arc<PluginRegistry>,
    supervisor: Arc<tokio::sync::Mutex<Supervisor>>,
    last_response: Mutex<Option<String>>,
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("ctx", &self.ctx)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

impl MessageHandler {
    pub fn new(
        ctx: JobContext,
        plugins: Arc<PluginRegistry>,
        supervisor: Arc<tokio::sync::Mutex<Supervisor>>,
    ) -> Self {
        Self {
            ctx,
            plugins,
            supervisor,
            last_response: Mutex::new(None),
        }
    }

    /// Answer one user message.
    pub async fn handle_text(&self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return "Say something and I'll get to work.".to_owned();
        }
        self.ctx.activity.update_last_message_time();
        info!(message = %truncate_chars(text, 100), "inbound message");

        if let Some(command) = text.strip_prefix('/') {
            return self.handle_command(command).await;
        }
        if is_continue_command(text) {
            return self.handle_continue().await;
        }
        if let Some(reply) = self.plugins.dispatch_trigger(text).await {
            return reply;
        }
        if let Some(reply) = self.plugins.dispatch_message(text).await {
            return reply;
        }
        self.handle_request(text).await
    }

    async fn handle_request(&self, text: &str) -> String {
        let sessions = &self.ctx.sessions;
        let context = sessions.continuation_context();
        sessions.update_session(
            SessionUpdate::new()
                .task(truncate_chars(text, TASK_CHARS))
                .message(ChatMessage::user(truncate_chars(text, MESSAGE_CHARS))),
        );

        let mut request = ExecutionRequest::new(text);
        if let Some(context) = context {
            request = request.with_context(context);
        }
        let result = self.execute(request).await;
        self.record_outcome(text, &result);
        result.output
    }

    async fn handle_continue(&self) -> String {
        let sessions = &self.ctx.sessions;
        if !sessions.should_continue() {
            return "No previous task to continue.".to_owned();
        }
        let (Some(prompt), Some(context)) =
            (sessions.continue_prompt(), sessions.continuation_context())
        else {
            return "No previous task to continue.".to_owned();
        };
        let summary = sessions.session_summary().unwrap_or_default();

        let result = self
            .execute(ExecutionRequest::new(prompt.clone()).with_context(context))
            .await;
        self.record_outcome(&prompt, &result);
        if result.success {
            sessions.clear_continuation();
        }
        format!("▶️ Resuming...\n\n{summary}\n\n{}", result.output)
    }

    async fn execute(&self, mut request: ExecutionRequest) -> ExecutionResult {
        let previous = self
            .last_response
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(previous) = previous {
            request = request.with_last_response(previous);
        }
        let result =
            execute_with_timeout(self.ctx.executor.as_ref(), request, self.ctx.executor_timeout()).await;
        if result.success {
            *self.last_response.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(truncate_chars(&result.output, MESSAGE_CHARS));
        }
        result
    }

    fn record_outcome(&self, prompt: &str, result: &ExecutionResult) {
        let sessions = &self.ctx.sessions;
        if result.success {
            sessions.update_session(
                SessionUpdate::new()
                    .result(result.output.clone())
                    .message(ChatMessage::assistant(truncate_chars(&result.output, MESSAGE_CHARS)))
                    .step_completed(truncate_chars(prompt, STEP_CHARS)),
            );
        } else {
            warn!(executor = self.ctx.executor.name(), "request failed: {}", truncate_chars(&result.output, 200));
            sessions.update_session(SessionUpdate::new().error(result.output.clone()));
            sessions.mark_interrupted();
        }
    }

    async fn handle_command(&self, command_line: &str) -> String {
        let (command, rest) = match command_line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (command_line, ""),
        };
        // Telegram-style `/cmd@botname`.
        let command = command.split('@').next().unwrap_or(command).to_lowercase();

        match command.as_str() {
            "status" => self.status_text().await,
            "session" => self
                .ctx
                .sessions
                .session_summary()
                .unwrap_or_else(|| "No active work session.".to_owned()),
            "endsession" => match self.ctx.sessions.end_session() {
                Some(summary) => format!(
                    "Session ended: {} ({} steps).",
                    summary.task.as_deref().unwrap_or("untitled"),
                    summary.steps_completed
                ),
                None => "No active work session.".to_owned(),
            },
            "remind" => self.add_reminder(rest),
            "reminders" => self.list_reminders(),
            "cancelremind" => self.cancel_reminder(rest),
            "plugins" => self.plugins.format_list(),
            "help" | "start" => HELP.to_owned(),
            other => {
                let args: Vec<String> = rest.split_whitespace().map(str::to_owned).collect();
                match self.plugins.dispatch_command(other, &args).await {
                    Some(reply) => reply,
                    None => format!("Unknown command: /{other}. Try /help."),
                }
            }
        }
    }

    async fn status_text(&self) -> String {
        let tasks = self.supervisor.lock().await.format_status();
        let session = self
            .ctx
            .sessions
            .session_summary()
            .unwrap_or_else(|| "No active work session.".to_owned());
        let reminders = self.ctx.reminders.list_pending().len();
        format!("{tasks}\n\n{session}\n\nPending reminders: {reminders}")
    }

    fn add_reminder(&self, args: &str) -> String {
        const USAGE: &str = "Usage: /remind <when> | <message> [| daily|weekly]\n\
                             e.g. /remind in 20 minutes | stretch";
        let mut parts = args.split('|').map(str::trim);
        let (Some(when), Some(message)) = (parts.next(), parts.next()) else {
            return USAGE.to_owned();
        };
        if when.is_empty() || message.is_empty() {
            return USAGE.to_owned();
        }
        let repeat = match parts.next() {
            Some(r) => match Repeat::parse(r) {
                Some(repeat) => Some(repeat),
                None => return format!("Unknown repeat '{r}'. Use daily or weekly."),
            },
            None => None,
        };
        let Some(at) = parse_reminder_time(when, self.ctx.local_now()) else {
            return format!(
                "I couldn't understand '{when}'. Try 'in 10 minutes', 'tomorrow at 9am', \
                 'at 5pm' or 'YYYY-MM-DD HH:MM'."
            );
        };
        match self.ctx.reminders.add(message, at, repeat) {
            Ok(reminder) => format!(
                "⏰ Reminder set: {}",
                reminder.describe(self.ctx.config.schedule.utc_offset_hours)
            ),
            Err(e) => {
                warn!("cannot save reminder: {e}");
                format!("Couldn't save the reminder: {e}")
            }
        }
    }

    fn list_reminders(&self) -> String {
        let pending = self.ctx.reminders.list_pending();
        if pending.is_empty() {
            return "No pending reminders.".to_owned();
        }
        let offset = self.ctx.config.schedule.utc_offset_hours;
        let lines: Vec<String> = pending.iter().map(|r| format!("• {}", r.describe(offset))).collect();
        format!("Pending reminders:\n{}", lines.join("\n"))
    }

    fn cancel_reminder(&self, id: &str) -> String {
        if id.is_empty() {
            return "Usage: /cancelremind <id>".to_owned();
        }
        match self.ctx.reminders.remove(id) {
            Ok(true) => format!("Reminder {id} cancelled."),
            Ok(false) => format!("No reminder with id {id}."),
            Err(e) => {
                warn!("cannot update reminders: {e}");
                format!("Couldn't update reminders: {e}")
            }
        }
    }
}
