//! Loop coordination: repeated parse → select → invoke → mutate cycles.
//!
//! The engine is strictly sequential: one invocation in flight at a time,
//! one plan write at a time, re-parsing the plan from disk at every
//! iteration boundary so the file stays the source of truth. `done` and
//! `blocked` are never reverted, which bounds the loop at
//! `task_count × (max_task_retries + 1)` iterations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::plan::{Task, TaskStatus};
use crate::core::protocol::AgentEvent;
use crate::core::selector::{Selection, select_next};
use crate::io::config::EngineConfig;
use crate::io::invoker::{InvokeError, InvokeRequest, Invoker, ToolConfig};
use crate::io::plan_store::{load_plan, update_task_status};
use crate::io::process::AbortFlag;
use crate::io::prompt::{PromptInputs, render_task_prompt};

/// Reason why [`Engine::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStop {
    /// Every task is done or blocked.
    Complete,
    /// The plan has no tasks, or nothing is selectable under the
    /// configured policy.
    NothingToDo,
    /// An abort was observed at an iteration boundary.
    Aborted,
}

/// Final accounting for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub iterations: u32,
    pub done: usize,
    pub blocked: usize,
    pub open: usize,
    pub in_progress: usize,
    pub stop: RunStop,
}

/// Read-only notification describing one iteration's outcome or an
/// incremental text update. Delivery is fire-and-forget; observers must
/// not block the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub iteration: u32,
    pub task_index: usize,
    pub previous_status: TaskStatus,
    pub new_status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drives one plan file to completion against an [`Invoker`].
///
/// A single engine value supports one `run` at a time; after an abort,
/// construct a fresh engine to run again.
pub struct Engine<I> {
    config: EngineConfig,
    invoker: I,
    abort: AbortFlag,
}

impl<I: Invoker> Engine<I> {
    pub fn new(config: EngineConfig, invoker: I) -> Self {
        Self {
            config,
            invoker,
            abort: AbortFlag::new(),
        }
    }

    /// Request the loop to stop. Idempotent and callable from any thread:
    /// an in-flight invocation is cancelled through its own abort path and
    /// no new iteration starts.
    pub fn abort(&self) {
        self.abort.set();
    }

    /// Run the loop until every task is done or blocked, nothing is
    /// selectable, or an abort is requested.
    ///
    /// Per-invocation failures are folded into task-status transitions and
    /// surfaced through `on_event`; only unrecoverable plan I/O errors
    /// propagate as `Err`.
    pub fn run(
        &self,
        plan_path: &Path,
        on_event: &(dyn Fn(&ProgressEvent) + Sync),
    ) -> Result<RunSummary> {
        info!(plan = %plan_path.display(), "starting engine run");
        let mut iterations = 0u32;
        let mut attempts: HashMap<usize, u32> = HashMap::new();
        let mut session_id: Option<String> = None;

        loop {
            let tasks = load_plan(plan_path)
                .with_context(|| format!("load plan {}", plan_path.display()))?;

            if self.abort.is_set() {
                info!(iterations, "abort requested, stopping");
                return Ok(summarize(&tasks, iterations, RunStop::Aborted));
            }

            let selected = match select_next(&tasks, self.config.resume_in_progress) {
                Selection::Empty => {
                    info!("plan has no tasks, nothing to do");
                    return Ok(summarize(&tasks, iterations, RunStop::NothingToDo));
                }
                Selection::AllSettled => {
                    info!(iterations, "every task is done or blocked");
                    return Ok(summarize(&tasks, iterations, RunStop::Complete));
                }
                Selection::NoneActionable => {
                    info!("no actionable task under the current policy");
                    return Ok(summarize(&tasks, iterations, RunStop::NothingToDo));
                }
                Selection::Task(task) => task,
            };

            iterations += 1;
            let iteration = iterations;
            let task_index = selected.index;
            let previous_status = selected.status;
            debug!(iteration, task_index, "selected task");

            // Mark in progress before invoking so a crash mid-iteration
            // leaves auditable state instead of silently reverting to open.
            update_task_status(plan_path, task_index, TaskStatus::InProgress)
                .with_context(|| format!("mark task {task_index} in progress"))?;

            let prompt = render_task_prompt(&PromptInputs {
                task_text: &selected.text,
                position: task_index + 1,
                total: tasks.len(),
            })?;
            let request = self.build_request(prompt, plan_path, session_id.as_deref());

            let stream_sink = move |event: &AgentEvent| match event {
                AgentEvent::Text { text } if !text.is_empty() => on_event(&ProgressEvent {
                    iteration,
                    task_index,
                    previous_status,
                    new_status: TaskStatus::InProgress,
                    incremental_text: Some(text.clone()),
                    error: None,
                }),
                AgentEvent::Raw { line } => debug!(%line, "incidental agent output"),
                _ => {}
            };
            let invoked = self.invoker.invoke(&request, &self.abort, &stream_sink);

            let (new_status, error) = match invoked {
                Ok(outcome) => {
                    info!(
                        iteration,
                        task_index,
                        duration_ms = outcome.duration.as_millis() as u64,
                        "task completed"
                    );
                    if self.config.reuse_session && !outcome.session_id.is_empty() {
                        session_id = Some(outcome.session_id);
                    }
                    (TaskStatus::Done, None)
                }
                Err(InvokeError::Aborted) => {
                    warn!(iteration, task_index, "invocation aborted");
                    (TaskStatus::InProgress, Some("invocation aborted".to_string()))
                }
                Err(err @ InvokeError::Agent { .. }) => {
                    warn!(iteration, task_index, error = %err, "agent reported an unresolvable failure");
                    (TaskStatus::Blocked, Some(err.to_string()))
                }
                Err(err) => {
                    let tally = attempts.entry(task_index).or_insert(0);
                    *tally += 1;
                    if *tally > self.config.max_task_retries {
                        warn!(iteration, task_index, attempts = *tally, error = %err, "retry budget exhausted, blocking task");
                        (TaskStatus::Blocked, Some(err.to_string()))
                    } else {
                        warn!(iteration, task_index, attempts = *tally, error = %err, "transient failure, leaving task in progress");
                        (TaskStatus::InProgress, Some(err.to_string()))
                    }
                }
            };

            if new_status != TaskStatus::InProgress {
                update_task_status(plan_path, task_index, new_status)
                    .with_context(|| format!("record task {task_index} outcome"))?;
            }

            on_event(&ProgressEvent {
                iteration,
                task_index,
                previous_status,
                new_status,
                incremental_text: None,
                error,
            });
        }
    }

    fn build_request(
        &self,
        prompt: String,
        plan_path: &Path,
        session_id: Option<&str>,
    ) -> InvokeRequest {
        let workdir = plan_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let tool_config = ToolConfig {
            allowed_tools: self.config.allowed_tools.clone(),
            skip_permissions: self.config.skip_permissions,
        };
        let tool_config =
            (!tool_config.allowed_tools.is_empty() || tool_config.skip_permissions)
                .then_some(tool_config);
        InvokeRequest {
            prompt,
            resume_session_id: session_id.map(str::to_string),
            system_prompt: self.config.system_prompt.clone(),
            tool_config,
            max_turns: self.config.max_turns,
            model: self.config.model.clone(),
            workdir,
            timeout: Some(Duration::from_secs(self.config.invoke_timeout_secs)),
        }
    }
}

fn summarize(tasks: &[Task], iterations: u32, stop: RunStop) -> RunSummary {
    let mut summary = RunSummary {
        iterations,
        done: 0,
        blocked: 0,
        open: 0,
        in_progress: 0,
        stop,
    };
    for task in tasks {
        match task.status {
            TaskStatus::Done => summary.done += 1,
            TaskStatus::Blocked => summary.blocked += 1,
            TaskStatus::Open => summary.open += 1,
            TaskStatus::InProgress => summary.in_progress += 1,
        }
    }
    summary
}
