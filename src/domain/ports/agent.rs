//! Agent port - interface for the pluggable coding-agent backend.
//!
//! Grounded on `domain::ports::substrate::Substrate`'s shape (streaming
//! execution over a channel, a detect/availability probe) but retargeted at
//! the single-task iteration contract in §6: `Execute(prompt, files, opts)`
//! rather than a long-lived multi-turn session store.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::error::EngineError;

/// Result of probing whether an agent backend is installed and usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDetection {
    pub available: bool,
    pub version: Option<String>,
    pub error: Option<String>,
}

/// Options for one `execute` call.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub working_dir: String,
    pub timeout_ms: Option<u64>,
}

/// One event from an agent's output stream. The iteration engine normalizes
/// provider-specific JSONL into this shape; tool-result bodies are carried
/// only on error (§6).
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Stdout(String),
    Stderr(String),
    ToolCall { name: String, input: String },
    ToolResult { name: String, ok: bool, detail: Option<String> },
    Completion { signaled_done: bool },
    Cost { input_tokens: u64, output_tokens: u64 },
}

/// A running agent execution: its event stream and an interrupt handle.
pub struct AgentExecution {
    pub execution_id: String,
    pub events: mpsc::Receiver<AgentEvent>,
    interrupt_tx: mpsc::Sender<()>,
}

impl AgentExecution {
    #[must_use]
    pub fn new(
        execution_id: impl Into<String>,
        events: mpsc::Receiver<AgentEvent>,
        interrupt_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            events,
            interrupt_tx,
        }
    }

    /// Request cooperative cancellation. A no-op if the execution already
    /// finished and dropped its receiver.
    pub async fn interrupt(&self) {
        let _ = self.interrupt_tx.send(()).await;
    }
}

/// The pluggable coding-agent backend a `Worker` drives.
#[async_trait]
pub trait AgentPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect(&self) -> AgentDetection;

    async fn execute(
        &self,
        prompt: &str,
        files: &[String],
        opts: &ExecuteOptions,
    ) -> Result<AgentExecution, EngineError>;
}
