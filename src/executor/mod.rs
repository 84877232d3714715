//! The AI backend seen as a black box.
//!
//! Everything that needs "intelligence" goes through [`AiExecutor`]. The core
//! never inspects how an answer was produced; it only bounds the call with a
//! timeout and checks [`ExecutionResult::success`]. Failures are values, not
//! errors: a timed-out or crashed backend yields `success = false` with a
//! human-readable description in `output`.

pub mod cli;
pub mod scripted;

pub use cli::{CliExecutor, CliKind, ParsedOutput};
pub use scripted::ScriptedExecutor;

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// One prompt for the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub prompt: String,
    /// Session or background context prepended to the prompt.
    pub context: Option<String>,
    /// Prior answer the prompt continues from.
    pub last_response: Option<String>,
}

impl ExecutionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_last_response(mut self, response: impl Into<String>) -> Self {
        self.last_response = Some(response.into());
        self
    }

    /// Full text handed to the backend.
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();
        if let Some(context) = self.context.as_deref().filter(|c| !c.trim().is_empty()) {
            out.push_str(context);
            out.push_str("\n\n");
        }
        if let Some(previous) = self.last_response.as_deref().filter(|r| !r.trim().is_empty()) {
            out.push_str("## Your previous response\n");
            out.push_str(previous);
            out.push_str("\n\n");
        }
        out.push_str(&self.prompt);
        out
    }
}

/// Outcome of one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Answer text, or an error description when `success` is false.
    pub output: String,
    pub success: bool,
}

impl ExecutionResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
        }
    }
}

/// Pluggable AI backend.
#[async_trait]
pub trait AiExecutor: Send + Sync {
    /// Stable backend name for logs and status output.
    fn name(&self) -> &str;

    /// Run one prompt to completion. Must not panic on backend failure.
    async fn execute(&self, request: ExecutionRequest) -> ExecutionResult;
}

/// Call `executor` with a hard time limit; a timeout becomes a failed result.
pub async fn execute_with_timeout(
    executor: &dyn AiExecutor,
    request: ExecutionRequest,
    limit: Duration,
) -> ExecutionResult {
    match tokio::time::timeout(limit, executor.execute(request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                executor = executor.name(),
                limit_secs = limit.as_secs(),
                "AI executor timed out"
            );
            ExecutionResult::failed(format!(
                "Timed out after {} seconds without a response.",
                limit.as_secs()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn prompt_rendering_orders_context_previous_prompt() {
        let req = ExecutionRequest::new("do it")
            .with_context("## ctx")
            .with_last_response("earlier answer");
        let text = req.render_prompt();
        let ctx = text.find("## ctx").unwrap();
        let prev = text.find("earlier answer").unwrap();
        let prompt = text.find("do it").unwrap();
        assert!(ctx < prev && prev < prompt);
        assert_eq!(ExecutionRequest::new("bare").render_prompt(), "bare");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_becomes_failed_result() {
        let slow = ScriptedExecutor::new().with_delay(Duration::from_secs(120));
        slow.push_ok("too late");
        let result =
            execute_with_timeout(&slow, ExecutionRequest::new("x"), Duration::from_secs(5)).await;
        assert!(!result.success);
        assert!(result.output.contains("Timed out after 5 seconds"));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let exec = ScriptedExecutor::new();
        exec.push_ok("hello");
        let result =
            execute_with_timeout(&exec, ExecutionRequest::new("x"), Duration::from_secs(5)).await;
        assert_eq!(result, ExecutionResult::ok("hello"));
    }
}
