//! Subprocess-backed executor driving the Claude, Codex, or Gemini CLI.

use super::{AiExecutor, ExecutionRequest, ExecutionResult};
use crate::config::ExecutorConfig;
use crate::text::truncate_chars;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Supported AI command-line tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliKind {
    #[default]
    Claude,
    Codex,
    Gemini,
}

/// What a CLI run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOutput {
    pub text: String,
    /// Conversation id to pass back with `--resume`.
    pub session_id: Option<String>,
    /// False when the text is an error description.
    pub success: bool,
}

impl CliKind {
    /// Default executable name looked up on `PATH`.
    pub fn binary_name(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
            Self::Gemini => "Gemini",
        }
    }

    fn login_hint(self) -> &'static str {
        match self {
            Self::Claude => "Run `claude` in your terminal to log in again.",
            Self::Codex => "Run `codex login` in your terminal.",
            Self::Gemini => "Run `gemini` in your terminal to log in again.",
        }
    }

    /// Non-interactive argument list for one prompt.
    pub fn build_args(self, prompt: &str, model: Option<&str>, session: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            Self::Claude => {
                args.extend(["-p", prompt, "--output-format", "json"].map(str::to_owned));
                args.push("--dangerously-skip-permissions".to_owned());
                if let Some(sid) = session {
                    args.extend(["--resume".to_owned(), sid.to_owned()]);
                }
                if let Some(model) = model {
                    args.extend(["--model".to_owned(), model.to_owned()]);
                }
            }
            Self::Codex => {
                args.push("exec".to_owned());
                if let Some(sid) = session {
                    args.extend(["resume".to_owned(), sid.to_owned()]);
                }
                args.push(prompt.to_owned());
                args.extend(
                    [
                        "--json",
                        "--dangerously-bypass-approvals-and-sandbox",
                        "--skip-git-repo-check",
                    ]
                    .map(str::to_owned),
                );
                if let Some(model) = model {
                    args.extend(["-m".to_owned(), model.to_owned()]);
                }
            }
            Self::Gemini => {
                args.extend(["-p", prompt, "-o", "json", "-y"].map(str::to_owned));
                if let Some(sid) = session {
                    args.extend(["--resume".to_owned(), sid.to_owned()]);
                }
                if let Some(model) = model {
                    args.extend(["-m".to_owned(), model.to_owned()]);
                }
            }
        }
        args
    }

    /// Interpret a finished run.
    ///
    /// Any non-zero exit, and a Claude result flagged `is_error`, is a
    /// failure. Whatever text the CLI printed is kept as the error description.
    pub fn parse_output(self, stdout: &str, stderr: &str, exit_code: Option<i32>) -> ParsedOutput {
        let trimmed = stdout.trim();
        let exited_ok = exit_code == Some(0);
        if !exited_ok && trimmed.is_empty() {
            error!(cli = self.binary_name(), ?exit_code, stderr = %stderr.trim(), "AI CLI failed");
            return ParsedOutput {
                text: self.failure_text(stderr),
                session_id: None,
                success: false,
            };
        }

        let parsed = match self {
            Self::Claude => parse_single_json(trimmed, "result"),
            Self::Gemini => parse_single_json(trimmed, "response"),
            Self::Codex => parse_codex_jsonl(trimmed),
        };
        let has_text = !parsed.text.trim().is_empty();

        if !exited_ok || parsed.is_error {
            warn!(
                cli = self.binary_name(),
                ?exit_code,
                is_error = parsed.is_error,
                stderr = %stderr.trim(),
                "AI CLI reported an error"
            );
            return ParsedOutput {
                text: if has_text {
                    parsed.text
                } else {
                    self.failure_text(stderr)
                },
                session_id: parsed.session_id,
                success: false,
            };
        }

        ParsedOutput {
            text: if has_text {
                parsed.text
            } else {
                format!("{} returned an empty response.", self.display_name())
            },
            session_id: parsed.session_id,
            success: has_text,
        }
    }

    fn failure_text(self, stderr: &str) -> String {
        let lowered = stderr.to_lowercase();
        if lowered.contains("auth") || lowered.contains("login") {
            format!(
                "{} needs to be re-authenticated. {}",
                self.display_name(),
                self.login_hint()
            )
        } else {
            format!(
                "{} had trouble responding. Try again or start a new session.",
                self.display_name()
            )
        }
    }
}

/// Text, resume id and error flag pulled out of one CLI run.
struct RawReply {
    text: String,
    session_id: Option<String>,
    is_error: bool,
}

fn parse_single_json(stdout: &str, field: &str) -> RawReply {
    match serde_json::from_str::<serde_json::Value>(stdout) {
        Ok(value) if value.is_object() => RawReply {
            text: value
                .get(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned(),
            session_id: value
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            is_error: value
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        },
        _ => RawReply {
            text: stdout.to_owned(),
            session_id: None,
            is_error: false,
        },
    }
}

fn parse_codex_jsonl(stdout: &str) -> RawReply {
    let mut text = String::new();
    let mut session_id = None;

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(event) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        match event.get("type").and_then(|t| t.as_str()) {
            Some("thread.started") => {
                session_id = event
                    .get("thread_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned);
            }
            Some("item.completed") => {
                let Some(item) = event.get("item") else {
                    continue;
                };
                if item.get("type").and_then(|t| t.as_str()) != Some("agent_message") {
                    continue;
                }
                if let Some(blocks) = item.get("content").and_then(|c| c.as_array()) {
                    for block in blocks {
                        if block.get("type").and_then(|t| t.as_str()) == Some("output_text") {
                            if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                                text = t.to_owned();
                            }
                        }
                    }
                } else if let Some(t) = item.get("text").and_then(|t| t.as_str()) {
                    text = t.to_owned();
                }
            }
            _ => {}
        }
    }

    if text.is_empty() {
        text = stdout.to_owned();
    }
    RawReply {
        text,
        session_id,
        is_error: false,
    }
}

/// Runs the configured CLI once per request.
#[derive(Debug)]
pub struct CliExecutor {
    kind: CliKind,
    binary: PathBuf,
    model: Option<String>,
    workdir: Option<PathBuf>,
    timeout: Duration,
    max_response_chars: usize,
    cli_session: Mutex<Option<String>>,
}

impl CliExecutor {
    /// Build from config, resolving the binary on `PATH` when not explicit.
    ///
    /// # Errors
    ///
    /// Returns [`KiyomiError::Executor`](crate::KiyomiError::Executor) if the
    /// binary cannot be found.
    pub fn from_config(config: &ExecutorConfig) -> crate::Result<Self> {
        let binary = match &config.binary {
            Some(path) => path.clone(),
            None => which::which(config.cli.binary_name()).map_err(|e| {
                crate::KiyomiError::Executor(format!(
                    "{} CLI not found on PATH: {e}",
                    config.cli.binary_name()
                ))
            })?,
        };
        info!(cli = config.cli.binary_name(), binary = %binary.display(), "AI executor ready");
        Ok(Self::new(config.cli, binary)
            .with_model(config.model.clone())
            .with_workdir(config.workdir.clone())
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_max_response_chars(config.max_response_chars))
    }

    pub fn new(kind: CliKind, binary: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            binary: binary.into(),
            model: None,
            workdir: None,
            timeout: Duration::from_secs(1800),
            max_response_chars: 50_000,
            cli_session: Mutex::new(None),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_response_chars(mut self, max: usize) -> Self {
        self.max_response_chars = max;
        self
    }

    pub fn kind(&self) -> CliKind {
        self.kind
    }

    /// Forget the remembered CLI conversation so the next call starts fresh.
    pub fn reset_conversation(&self) {
        *self.cli_session.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn current_cli_session(&self) -> Option<String> {
        self.cli_session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AiExecutor for CliExecutor {
    fn name(&self) -> &str {
        self.kind.binary_name()
    }

    async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let prompt = request.render_prompt();
        let session = self.current_cli_session();
        let args = self
            .kind
            .build_args(&prompt, self.model.as_deref(), session.as_deref());

        let mut command = tokio::process::Command::new(&self.binary);
        command
            .args(&args)
            .env("CI", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        debug!(cli = self.kind.binary_name(), resume = session.is_some(), "spawning AI CLI");
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(binary = %self.binary.display(), "cannot spawn AI CLI: {e}");
                return ExecutionResult::failed(format!(
                    "Could not start {}: {e}",
                    self.kind.binary_name()
                ));
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("AI CLI I/O failure: {e}");
                return ExecutionResult::failed(format!("AI CLI failed: {e}"));
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "AI CLI timed out; killed");
                return ExecutionResult::failed(format!(
                    "Timed out after {} seconds without a response.",
                    self.timeout.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let parsed = self
            .kind
            .parse_output(&stdout, &stderr, output.status.code());

        if let Some(sid) = parsed.session_id.clone() {
            *self.cli_session.lock().unwrap_or_else(|e| e.into_inner()) = Some(sid);
        }

        let text = if parsed.text.chars().count() > self.max_response_chars {
            let mut cut = truncate_chars(&parsed.text, self.max_response_chars);
            cut.push_str("\n\n... (response truncated)");
            cut
        } else {
            parsed.text
        };

        ExecutionResult {
            output: text,
            success: parsed.success,
        }
    }
}
