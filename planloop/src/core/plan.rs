//! Plan checklist parsing and in-place status rewriting.
//!
//! A plan is UTF-8 text where a task line matches `- [m] text` at any
//! leading indentation. Every other line is inert context and must survive
//! rewrites byte-for-byte.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static TASK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*- \[(.)\] ?(.*)$").expect("task line pattern is valid"));

static TASK_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*- \[).(\].*)$").expect("task marker pattern is valid"));

/// Status of one checklist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    /// Map a checklist marker character to a status. Unrecognized markers
    /// mean the line is not a task.
    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            ' ' => Some(Self::Open),
            '~' => Some(Self::InProgress),
            'x' | 'X' => Some(Self::Done),
            '!' => Some(Self::Blocked),
            _ => None,
        }
    }

    /// The canonical marker character written back into the plan.
    pub fn marker(self) -> char {
        match self {
            Self::Open => ' ',
            Self::InProgress => '~',
            Self::Done => 'x',
            Self::Blocked => '!',
        }
    }

    /// True when the engine can make no further progress on this task.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Done | Self::Blocked)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" | "in-progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "blocked" => Ok(Self::Blocked),
            other => Err(format!(
                "unknown status '{other}' (expected open, in_progress, done, or blocked)"
            )),
        }
    }
}

/// One parsed checklist entry.
///
/// `index` is the position within the parsed sequence and `line_number` the
/// 0-based offset of the source line. Neither survives a reparse of changed
/// text, so callers must re-parse after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub index: usize,
    pub text: String,
    pub status: TaskStatus,
    pub line_number: usize,
}

/// Parse plan text into tasks in document order.
///
/// Non-matching lines (headings, prose, blanks) are skipped but still
/// counted for `line_number`. Empty input yields an empty vec. Pure and
/// deterministic.
pub fn parse_plan(text: &str) -> Vec<Task> {
    let mut tasks = Vec::new();
    for (line_number, line) in text.lines().enumerate() {
        let Some(caps) = TASK_LINE.captures(line) else {
            continue;
        };
        let Some(status) = caps[1].chars().next().and_then(TaskStatus::from_marker) else {
            continue;
        };
        tasks.push(Task {
            index: tasks.len(),
            text: caps[2].trim().to_string(),
            status,
            line_number,
        });
    }
    tasks
}

/// Rewrite exactly one task's status marker, preserving all other bytes.
///
/// The task is located by parse-order `index` against a fresh parse of
/// `text`. Returns `None` when `index` is out of range.
pub fn rewrite_status(text: &str, index: usize, status: TaskStatus) -> Option<String> {
    let tasks = parse_plan(text);
    let target_line = tasks.get(index)?.line_number;

    let mut out = String::with_capacity(text.len());
    for (line_number, segment) in text.split_inclusive('\n').enumerate() {
        if line_number != target_line {
            out.push_str(segment);
            continue;
        }
        let (line, eol) = split_eol(segment);
        match TASK_MARKER.captures(line) {
            Some(caps) => {
                out.push_str(&caps[1]);
                out.push(status.marker());
                out.push_str(&caps[2]);
            }
            // The line parsed as a task above, so this cannot happen; keep
            // the original bytes rather than corrupt the plan.
            None => out.push_str(line),
        }
        out.push_str(eol);
    }
    Some(out)
}

fn split_eol(segment: &str) -> (&str, &str) {
    if let Some(line) = segment.strip_suffix("\r\n") {
        return (line, "\r\n");
    }
    if let Some(line) = segment.strip_suffix('\n') {
        return (line, "\n");
    }
    (segment, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Plan\n\nintro prose\n- [ ] first\n  - [x] second\n- [~] third\n- [!] fourth\n- [?] not a task\nnot a task either\n";

    #[test]
    fn parse_recognizes_markers_and_skips_other_lines() {
        let tasks = parse_plan(SAMPLE);
        assert_eq!(tasks.len(), 4);
        assert_eq!(
            tasks.iter().map(|t| t.status).collect::<Vec<_>>(),
            vec![
                TaskStatus::Open,
                TaskStatus::Done,
                TaskStatus::InProgress,
                TaskStatus::Blocked,
            ]
        );
        assert_eq!(
            tasks.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(),
            vec!["first", "second", "third", "fourth"]
        );
    }

    #[test]
    fn parse_index_matches_sequence_position_not_line_number() {
        let tasks = parse_plan(SAMPLE);
        for (position, task) in tasks.iter().enumerate() {
            assert_eq!(task.index, position);
        }
        assert_eq!(tasks[0].line_number, 3);
        assert_eq!(tasks[1].line_number, 4);
        assert_eq!(tasks[3].line_number, 6);
    }

    #[test]
    fn parse_accepts_uppercase_done_marker() {
        let tasks = parse_plan("- [X] shouted\n");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Done);
    }

    #[test]
    fn parse_empty_input_yields_no_tasks() {
        assert!(parse_plan("").is_empty());
    }

    #[test]
    fn rewrite_changes_exactly_one_marker() {
        let updated = rewrite_status(SAMPLE, 0, TaskStatus::Done).expect("rewrite");
        assert_eq!(updated, SAMPLE.replace("- [ ] first", "- [x] first"));

        let tasks = parse_plan(&updated);
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[0].status, TaskStatus::Done);
        assert_eq!(tasks[2].status, TaskStatus::InProgress);
    }

    #[test]
    fn rewrite_preserves_indentation_and_text() {
        let updated = rewrite_status(SAMPLE, 1, TaskStatus::Blocked).expect("rewrite");
        assert!(updated.contains("  - [!] second"));
    }

    #[test]
    fn rewrite_with_current_status_is_identity() {
        let updated = rewrite_status(SAMPLE, 2, TaskStatus::InProgress).expect("rewrite");
        assert_eq!(updated, SAMPLE);
    }

    #[test]
    fn rewrite_keeps_missing_trailing_newline() {
        let text = "- [ ] only";
        let updated = rewrite_status(text, 0, TaskStatus::Done).expect("rewrite");
        assert_eq!(updated, "- [x] only");
    }

    #[test]
    fn rewrite_keeps_crlf_line_endings() {
        let text = "- [ ] a\r\n- [ ] b\r\n";
        let updated = rewrite_status(text, 1, TaskStatus::Done).expect("rewrite");
        assert_eq!(updated, "- [ ] a\r\n- [x] b\r\n");
    }

    #[test]
    fn rewrite_out_of_range_returns_none() {
        assert!(rewrite_status(SAMPLE, 4, TaskStatus::Done).is_none());
        assert!(rewrite_status("", 0, TaskStatus::Done).is_none());
    }

    #[test]
    fn status_round_trips_through_marker() {
        for status in [
            TaskStatus::Open,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::Blocked,
        ] {
            assert_eq!(TaskStatus::from_marker(status.marker()), Some(status));
        }
    }

    #[test]
    fn status_parses_from_cli_spelling() {
        assert_eq!("open".parse::<TaskStatus>(), Ok(TaskStatus::Open));
        assert_eq!(
            "in-progress".parse::<TaskStatus>(),
            Ok(TaskStatus::InProgress)
        );
        assert!("bogus".parse::<TaskStatus>().is_err());
    }
}
