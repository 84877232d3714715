//! In-process executor with canned answers, for tests and dry runs.

use super::{AiExecutor, ExecutionRequest, ExecutionResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Replays queued results in order and records every request it receives.
///
/// When the queue is empty it answers with a successful echo of the prompt.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    queue: Mutex<VecDeque<ExecutionResult>>,
    requests: Mutex<Vec<ExecutionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long (tokio time) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, result: ExecutionResult) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    pub fn push_ok(&self, output: &str) {
        self.push(ExecutionResult::ok(output));
    }

    pub fn push_failed(&self, output: &str) {
        self.push(ExecutionResult::failed(output));
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AiExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let echo = format!("echo: {}", request.prompt);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| ExecutionResult::ok(echo))
    }
}
