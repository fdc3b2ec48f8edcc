//! Agent run plumbing.
//!
//! The agent (the Claude Code CLI in streaming-JSON mode) writes one JSON
//! object per line on stdout. The reader task frames and decodes those lines
//! into [`AgentMessage`] values and pushes them into a bounded channel; the
//! generation session drains that channel from a single consumer loop.
//!
//! Submodules:
//! - `codec`: newline framing with a per-line size cap.
//! - `reader`: stdout → [`AgentMessage`] channel task.
//! - `spawner`: [`ClaudeCliRunner`](spawner::ClaudeCliRunner), the process-backed [`AgentRunner`].
//! - `prompt`: system instructions and task prompt text.

pub mod codec;
pub mod prompt;
pub mod reader;
pub mod spawner;

use std::path::PathBuf;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::request::GenerationRequest;
use crate::Result;

use self::spawner::AgentProcess;

// ── Wire types ───────────────────────────────────────────────────────────────

/// One message from the agent's stream, tagged by its `type` field.
///
/// Only `assistant` and `result` carry anything this pipeline consumes; every
/// other tag (`system`, `user`, …) decodes to [`AgentMessage::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// A model turn with an ordered list of content blocks.
    Assistant {
        /// The model message body.
        message: AssistantPayload,
    },
    /// The terminal summary of the run.
    Result {
        /// Final answer text, absent for some error subtypes.
        #[serde(default)]
        result: Option<String>,
        /// Whether the run ended in error.
        #[serde(default)]
        is_error: bool,
        /// Result subtype (`success`, `error_max_turns`, …).
        #[serde(default)]
        subtype: Option<String>,
    },
    /// Any unrecognized tag.
    #[serde(other)]
    Other,
}

/// Body of an `assistant` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AssistantPayload {
    /// Content blocks in model order.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// One fragment of an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text produced by the model.
    Text {
        /// The text payload.
        text: String,
    },
    /// Tool use, thinking, and any other block kind.
    #[serde(other)]
    Other,
}

impl AgentMessage {
    /// Build an `assistant` message holding a single text block.
    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant {
            message: AssistantPayload {
                content: vec![ContentBlock::Text { text: text.into() }],
            },
        }
    }

    /// Build a successful `result` message.
    #[must_use]
    pub fn result_text(text: impl Into<String>) -> Self {
        Self::Result {
            result: Some(text.into()),
            is_error: false,
            subtype: Some("success".into()),
        }
    }
}

/// Item carried by the run channel: a decoded message or a stream failure.
pub type RunItem = Result<AgentMessage>;

// ── Run specification ────────────────────────────────────────────────────────

/// Filesystem scope granted to an edit-mode run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunScope {
    /// Working directory and the only additional directory the agent sees.
    pub working_dir: PathBuf,
    /// Tools the agent may use inside the scope.
    pub allowed_tools: Vec<String>,
}

/// Everything needed to start one agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// Identifier used in logs for this run.
    pub session_id: Uuid,
    /// System instructions.
    pub system_prompt: String,
    /// Task prompt.
    pub task_prompt: String,
    /// Model identifier.
    pub model: String,
    /// Turn budget.
    pub max_turns: u32,
    /// Read-only scope, present only in edit mode.
    pub scope: Option<RunScope>,
}

impl RunSpec {
    /// Derive the run specification for a validated request.
    #[must_use]
    pub fn for_request(request: &GenerationRequest, session_id: Uuid) -> Self {
        let scope = request.edit_scope().map(|scope| RunScope {
            working_dir: scope.apps_dir.clone(),
            allowed_tools: spawner::READ_ONLY_TOOLS
                .iter()
                .map(|tool| (*tool).to_owned())
                .collect(),
        });

        Self {
            session_id,
            system_prompt: prompt::system_prompt(request.edit_scope().is_some()),
            task_prompt: prompt::task_prompt(request),
            model: request.model.clone(),
            max_turns: request.max_turns,
            scope,
        }
    }
}

// ── Runner seam ──────────────────────────────────────────────────────────────

/// Starts agent runs.
///
/// [`spawner::ClaudeCliRunner`] spawns the real CLI; tests substitute a
/// runner that feeds scripted messages through [`AgentRun::from_channel`].
pub trait AgentRunner: Send + Sync {
    /// Start a run. `abort` is the run's cancellation signal: once it fires,
    /// the run stops producing messages.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Upstream` if the run cannot be started.
    fn start(&self, spec: &RunSpec, abort: CancellationToken) -> Result<AgentRun>;
}

/// How a run ended after its message stream closed naturally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// The agent exited successfully (or there was no process to wait for).
    Success,
    /// The agent exited unsuccessfully.
    Failed {
        /// Exit code, when the process was not killed by a signal.
        code: Option<i32>,
        /// Last line the agent wrote to stderr, if any.
        detail: Option<String>,
    },
}

/// Handle to a live agent run: its message channel and, when process-backed,
/// the process itself.
#[derive(Debug)]
pub struct AgentRun {
    messages: mpsc::Receiver<RunItem>,
    process: Option<AgentProcess>,
}

impl AgentRun {
    /// A run backed only by a message channel.
    #[must_use]
    pub fn from_channel(messages: mpsc::Receiver<RunItem>) -> Self {
        Self {
            messages,
            process: None,
        }
    }

    pub(crate) fn with_process(messages: mpsc::Receiver<RunItem>, process: AgentProcess) -> Self {
        Self {
            messages,
            process: Some(process),
        }
    }

    /// Await the next message. `None` means the stream ended naturally.
    pub async fn next_message(&mut self) -> Option<RunItem> {
        self.messages.recv().await
    }

    /// Tear the run down early: stop the reader, terminate the process, and
    /// close the channel. Idempotent.
    pub async fn close(&mut self) {
        self.messages.close();
        if let Some(process) = self.process.take() {
            process.terminate().await;
        }
    }

    /// Wait for the process to exit after its stream ended. Idempotent;
    /// channel-only runs always report success.
    pub async fn finish(&mut self) -> RunExit {
        match self.process.take() {
            Some(process) => process.wait_exit().await,
            None => RunExit::Success,
        }
    }
}
