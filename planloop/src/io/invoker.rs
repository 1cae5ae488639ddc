//! Invoker abstraction for agent subprocess execution.
//!
//! The [`Invoker`] trait decouples loop coordination from the actual agent
//! backend (a CLI such as `claude` speaking newline-delimited JSON on
//! stdout). Tests use scripted invokers that return predetermined outcomes
//! without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::protocol::{
    AgentEvent, ResultEvent, TokenUsage, decode_line, strip_control_sequences,
};
use crate::io::process::{AbortFlag, StreamParams, WaitOutcome, run_streaming};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Prompt text piped to the agent's stdin.
    pub prompt: String,
    /// Opaque session identifier from a prior invocation to resume.
    pub resume_session_id: Option<String>,
    /// Addendum appended to the agent's system prompt.
    pub system_prompt: Option<String>,
    /// Tool and permission configuration forwarded to the agent.
    pub tool_config: Option<ToolConfig>,
    /// Maximum agent turns per invocation.
    pub max_turns: Option<u32>,
    /// Model identifier forwarded to the agent.
    pub model: Option<String>,
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Wall-clock budget; `None` waits until the process exits.
    pub timeout: Option<Duration>,
}

/// Tool/permission switches for the agent CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub allowed_tools: Vec<String>,
    pub skip_permissions: bool,
}

/// Result of one completed invocation. Consumed immediately by the
/// coordinator; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOutcome {
    /// Final response text; empty if the agent never emitted a result.
    pub text: String,
    /// Session identifier usable to resume context; empty if never seen.
    pub session_id: String,
    pub usage: Option<TokenUsage>,
    pub duration: Duration,
}

/// Typed failures for one invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("agent executable `{program}` not found on PATH")]
    NotInstalled { program: String },
    #[error("agent process failed (exit code {code:?}): {diagnostic}")]
    Process {
        code: Option<i32>,
        diagnostic: String,
    },
    #[error("agent reported an error: {message}")]
    Agent { message: String },
    #[error("agent invocation timed out after {0:?}")]
    Timeout(Duration),
    #[error("agent invocation aborted")]
    Aborted,
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl InvokeError {
    /// Transient failures leave the task eligible for a retry; an
    /// agent-reported failure or an abort does not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotInstalled { .. } | Self::Process { .. } | Self::Timeout(_) | Self::Io(_)
        )
    }
}

/// Abstraction over agent execution backends.
pub trait Invoker {
    /// Run exactly one invocation. Decoded events (text deltas, incidental
    /// output) are published to `on_event` in arrival order; delivery is
    /// fire-and-forget and must not block.
    fn invoke(
        &self,
        request: &InvokeRequest,
        abort: &AbortFlag,
        on_event: &(dyn Fn(&AgentEvent) + Sync),
    ) -> Result<InvokeOutcome, InvokeError>;
}

impl<T: Invoker + ?Sized> Invoker for &T {
    fn invoke(
        &self,
        request: &InvokeRequest,
        abort: &AbortFlag,
        on_event: &(dyn Fn(&AgentEvent) + Sync),
    ) -> Result<InvokeOutcome, InvokeError> {
        (**self).invoke(request, abort, on_event)
    }
}

const DEFAULT_STDERR_LIMIT_BYTES: usize = 100_000;

/// Invoker that spawns the agent CLI.
pub struct AgentCli {
    program: String,
    stderr_limit_bytes: usize,
}

impl AgentCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            stderr_limit_bytes: DEFAULT_STDERR_LIMIT_BYTES,
        }
    }

    /// Bound the diagnostic capture from the agent's stderr.
    pub fn with_stderr_limit(mut self, limit_bytes: usize) -> Self {
        self.stderr_limit_bytes = limit_bytes;
        self
    }

    fn command(&self, request: &InvokeRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");
        if let Some(model) = &request.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(max_turns) = request.max_turns {
            cmd.arg("--max-turns").arg(max_turns.to_string());
        }
        if let Some(session) = &request.resume_session_id {
            cmd.arg("--resume").arg(session);
        }
        if let Some(addendum) = &request.system_prompt {
            cmd.arg("--append-system-prompt").arg(addendum);
        }
        if let Some(tools) = &request.tool_config {
            if !tools.allowed_tools.is_empty() {
                cmd.arg("--allowed-tools")
                    .arg(tools.allowed_tools.join(","));
            }
            if tools.skip_permissions {
                cmd.arg("--dangerously-skip-permissions");
            }
        }
        cmd.current_dir(&request.workdir);
        cmd
    }
}

/// Stream state accumulated while the agent runs. The most recent result
/// event wins; the init session id is the fallback when the result carries
/// none.
#[derive(Default)]
struct StreamState {
    last_result: Option<ResultEvent>,
    init_session_id: String,
}

impl Invoker for AgentCli {
    #[instrument(skip_all, fields(program = %self.program, timeout = ?request.timeout))]
    fn invoke(
        &self,
        request: &InvokeRequest,
        abort: &AbortFlag,
        on_event: &(dyn Fn(&AgentEvent) + Sync),
    ) -> Result<InvokeOutcome, InvokeError> {
        info!(workdir = %request.workdir.display(), "starting agent invocation");

        let state = Mutex::new(StreamState::default());
        let sink = |line: &str| {
            let event = decode_line(line);
            {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                match &event {
                    AgentEvent::Init { session_id } if !session_id.is_empty() => {
                        state.init_session_id = session_id.clone();
                    }
                    AgentEvent::Result(result) => state.last_result = Some(result.clone()),
                    _ => {}
                }
            }
            on_event(&event);
        };

        let params = StreamParams {
            stdin: Some(request.prompt.as_bytes()),
            timeout: request.timeout,
            stderr_limit_bytes: self.stderr_limit_bytes,
            abort,
        };
        let output = match run_streaming(self.command(request), &params, &sink) {
            Ok(output) => output,
            Err(err) if spawn_not_found(&err) => {
                return Err(InvokeError::NotInstalled {
                    program: self.program.clone(),
                });
            }
            Err(err) => return Err(InvokeError::Io(err)),
        };

        let state = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let status = match output.wait {
            WaitOutcome::Aborted => return Err(InvokeError::Aborted),
            WaitOutcome::TimedOut => {
                let timeout = request.timeout.unwrap_or_default();
                return Err(InvokeError::Timeout(timeout));
            }
            WaitOutcome::Exited(status) => status,
        };

        if let Some(result) = &state.last_result {
            if result.is_error {
                warn!(subtype = %result.subtype, "agent reported a failure");
                return Err(InvokeError::Agent {
                    message: result.error_message(),
                });
            }
        }
        if !status.success() {
            let diagnostic = diagnostic_from_stderr(&output.stderr);
            warn!(code = ?status.code(), "agent process failed");
            return Err(InvokeError::Process {
                code: status.code(),
                diagnostic,
            });
        }

        // Partial success is still success: default to empty text/session
        // when the agent never emitted a result event.
        let result = state.last_result.unwrap_or_default();
        let session_id = if result.session_id.is_empty() {
            state.init_session_id
        } else {
            result.session_id
        };
        debug!(duration_ms = output.duration.as_millis() as u64, "agent invocation completed");
        Ok(InvokeOutcome {
            text: result.text,
            session_id,
            usage: result.usage,
            duration: output.duration,
        })
    }
}

fn spawn_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
    })
}

fn diagnostic_from_stderr(stderr: &[u8]) -> String {
    let text = strip_control_sequences(&String::from_utf8_lossy(stderr));
    let text = text.trim();
    if text.is_empty() {
        "no diagnostic output".to_string()
    } else {
        text.to_string()
    }
}
