//! Plan file access: load, parse, and atomic single-task status rewrites.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::core::plan::{Task, TaskStatus, parse_plan, rewrite_status};

/// Typed failures for plan file operations.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("task index {index} not found ({task_count} tasks in plan)")]
    TaskNotFound { index: usize, task_count: usize },
}

impl PlanError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Read the raw plan text.
pub fn read_plan_text(path: &Path) -> Result<String, PlanError> {
    fs::read_to_string(path).map_err(|err| PlanError::io(path, err))
}

/// Read and parse the plan. The file is the source of truth; callers must
/// re-load after every mutation rather than trust a stale parse.
pub fn load_plan(path: &Path) -> Result<Vec<Task>, PlanError> {
    let text = read_plan_text(path)?;
    let tasks = parse_plan(&text);
    debug!(path = %path.display(), task_count = tasks.len(), "plan loaded");
    Ok(tasks)
}

/// Rewrite one task's status in place, locating it by parse-order `index`
/// against the file's current content.
///
/// The rewrite is all-or-nothing: the full updated buffer is written to a
/// temp file in the same directory and renamed over the original, so a
/// failed write never leaves the plan partially modified.
pub fn update_task_status(path: &Path, index: usize, status: TaskStatus) -> Result<(), PlanError> {
    let text = read_plan_text(path)?;
    let updated = rewrite_status(&text, index, status).ok_or_else(|| PlanError::TaskNotFound {
        index,
        task_count: parse_plan(&text).len(),
    })?;
    debug!(path = %path.display(), index, %status, "updating task status");
    write_atomic(path, &updated)
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), PlanError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "plan".to_string());
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    fs::write(&tmp_path, contents).map_err(|err| PlanError::io(&tmp_path, err))?;
    fs::rename(&tmp_path, path).map_err(|err| PlanError::io(path, err))?;
    Ok(())
}
