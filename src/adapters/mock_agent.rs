//! In-memory `AgentPlugin` used by tests and the demo binary.
//!
//! Grounded on `adapters::substrates::mock::MockSubstrate`: per-task response
//! overrides, a streamed event channel filled by a spawned task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::domain::error::EngineError;
use crate::domain::ports::agent::{AgentDetection, AgentEvent, AgentExecution, AgentPlugin, ExecuteOptions};

/// Canned behavior for one `execute` call.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub output: String,
    pub fail: bool,
    pub error_message: Option<String>,
    pub signaled_done: bool,
    pub tool_calls: u32,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            output: "task completed".to_string(),
            fail: false,
            error_message: None,
            signaled_done: true,
            tool_calls: 1,
        }
    }
}

impl MockResponse {
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            signaled_done: false,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn incomplete(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            signaled_done: false,
            ..Default::default()
        }
    }
}

/// A scripted `AgentPlugin`: every `execute` call plays back a canned
/// response, keyed by a caller-supplied key (typically the task id, passed
/// through `ExecuteOptions::working_dir` by convention in tests, or set
/// ahead of time via `set_response`).
pub struct MockAgentPlugin {
    default_response: MockResponse,
    response_overrides: Arc<RwLock<HashMap<String, MockResponse>>>,
    executions: Arc<RwLock<u64>>,
}

impl Default for MockAgentPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAgentPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_response: MockResponse::default(),
            response_overrides: Arc::new(RwLock::new(HashMap::new())),
            executions: Arc::new(RwLock::new(0)),
        }
    }

    #[must_use]
    pub fn with_default_response(response: MockResponse) -> Self {
        Self {
            default_response: response,
            response_overrides: Arc::new(RwLock::new(HashMap::new())),
            executions: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn set_response(&self, key: impl Into<String>, response: MockResponse) {
        self.response_overrides.write().await.insert(key.into(), response);
    }

    async fn response_for(&self, key: &str) -> MockResponse {
        self.response_overrides
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone())
    }

    pub async fn execution_count(&self) -> u64 {
        *self.executions.read().await
    }
}

#[async_trait]
impl AgentPlugin for MockAgentPlugin {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn detect(&self) -> AgentDetection {
        AgentDetection {
            available: true,
            version: Some("mock-1.0".to_string()),
            error: None,
        }
    }

    async fn execute(
        &self,
        prompt: &str,
        _files: &[String],
        opts: &ExecuteOptions,
    ) -> Result<AgentExecution, EngineError> {
        let key = if opts.working_dir.is_empty() {
            prompt.to_string()
        } else {
            opts.working_dir.clone()
        };
        let response = self.response_for(&key).await;

        *self.executions.write().await += 1;

        let (tx, rx) = mpsc::channel(32);
        let (interrupt_tx, mut interrupt_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            for i in 0..response.tool_calls {
                if interrupt_rx.try_recv().is_ok() {
                    return;
                }
                let _ = tx
                    .send(AgentEvent::ToolCall {
                        name: format!("tool-{i}"),
                        input: String::new(),
                    })
                    .await;
                let _ = tx
                    .send(AgentEvent::ToolResult {
                        name: format!("tool-{i}"),
                        ok: !response.fail,
                        detail: None,
                    })
                    .await;
            }

            if response.fail {
                let _ = tx
                    .send(AgentEvent::Stderr(
                        response.error_message.unwrap_or_else(|| "mock failure".to_string()),
                    ))
                    .await;
            } else {
                let _ = tx.send(AgentEvent::Stdout(response.output)).await;
            }

            let _ = tx
                .send(AgentEvent::Completion {
                    signaled_done: response.signaled_done,
                })
                .await;
        });

        Ok(AgentExecution::new(
            format!("mock-exec-{key}"),
            rx,
            interrupt_tx,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detect_reports_available() {
        let plugin = MockAgentPlugin::new();
        let detection = plugin.detect().await;
        assert!(detection.available);
    }

    #[tokio::test]
    async fn execute_streams_completion_event() {
        let plugin = MockAgentPlugin::new();
        let mut execution = plugin
            .execute("do the thing", &[], &ExecuteOptions::default())
            .await
            .unwrap();

        let mut saw_completion = false;
        while let Some(event) = execution.events.recv().await {
            if let AgentEvent::Completion { signaled_done } = event {
                saw_completion = true;
                assert!(signaled_done);
            }
        }
        assert!(saw_completion);
    }

    #[tokio::test]
    async fn per_key_override_changes_response() {
        let plugin = MockAgentPlugin::new();
        plugin
            .set_response("task-1", MockResponse::failure("boom"))
            .await;

        let opts = ExecuteOptions {
            working_dir: "task-1".to_string(),
            timeout_ms: None,
        };
        let mut execution = plugin.execute("prompt", &[], &opts).await.unwrap();

        let mut saw_error = false;
        while let Some(event) = execution.events.recv().await {
            if matches!(event, AgentEvent::Stderr(_)) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
