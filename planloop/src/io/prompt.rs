//! Prompt rendering for agent invocations.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// Inputs for the per-iteration task prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub task_text: &'a str,
    /// 1-indexed position of the task within the plan.
    pub position: usize,
    pub total: usize,
}

/// Render the prompt that embeds the selected task.
pub fn render_task_prompt(inputs: &PromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("task", TASK_TEMPLATE)
        .context("register task template")?;
    let template = env.get_template("task").context("load task template")?;
    let rendered = template
        .render(context! {
            task => inputs.task_text,
            position => inputs.position,
            total => inputs.total,
        })
        .context("render task prompt")?;
    Ok(rendered)
}
