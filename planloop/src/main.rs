//! Plan-driven autonomous agent loop CLI.
//!
//! Drives an external agent through a markdown checklist (`PLAN.md`): one
//! task per iteration until every task is done or blocked.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use planloop::core::plan::TaskStatus;
use planloop::engine::{Engine, ProgressEvent, RunStop};
use planloop::exit_codes;
use planloop::io::config::load_config;
use planloop::io::invoker::AgentCli;
use planloop::io::plan_store::{load_plan, update_task_status};
use planloop::logging;

#[derive(Parser)]
#[command(
    name = "planloop",
    version,
    about = "Plan-driven autonomous agent loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the agent loop until the plan completes or halts.
    Run {
        /// Plan checklist file.
        #[arg(long, default_value = "PLAN.md")]
        plan: PathBuf,
        /// Engine configuration file (missing file uses defaults).
        #[arg(long, default_value = "planloop.toml")]
        config: PathBuf,
    },
    /// Print per-status task counts for the plan.
    Status {
        #[arg(long, default_value = "PLAN.md")]
        plan: PathBuf,
    },
    /// Manually set one task's status (e.g. reset in_progress back to open).
    Set {
        /// Parse-order index of the task.
        index: usize,
        /// New status: open, in_progress, done, or blocked.
        status: TaskStatus,
        #[arg(long, default_value = "PLAN.md")]
        plan: PathBuf,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run { plan, config } => cmd_run(&plan, &config),
        Command::Status { plan } => cmd_status(&plan),
        Command::Set {
            index,
            status,
            plan,
        } => cmd_set(&plan, index, status),
    };
    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn cmd_run(plan: &Path, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let invoker =
        AgentCli::new(config.agent_program.as_str()).with_stderr_limit(config.stderr_limit_bytes);
    let engine = Engine::new(config, invoker);

    let on_event = |event: &ProgressEvent| {
        if event.incremental_text.is_some() {
            return;
        }
        match &event.error {
            Some(error) => println!(
                "iter {:>3} task {}: {} -> {} ({error})",
                event.iteration, event.task_index, event.previous_status, event.new_status
            ),
            None => println!(
                "iter {:>3} task {}: {} -> {}",
                event.iteration, event.task_index, event.previous_status, event.new_status
            ),
        }
    };

    let summary = engine.run(plan, &on_event)?;
    println!(
        "{} iterations; {} done, {} blocked, {} open, {} in progress",
        summary.iterations, summary.done, summary.blocked, summary.open, summary.in_progress
    );
    let code = match summary.stop {
        RunStop::Complete => exit_codes::OK,
        RunStop::NothingToDo => exit_codes::NOTHING_TO_DO,
        RunStop::Aborted => exit_codes::ABORTED,
    };
    Ok(code)
}

fn cmd_status(plan: &Path) -> Result<i32> {
    let tasks = load_plan(plan)?;
    for task in &tasks {
        println!("{:>3} [{}] {}", task.index, task.status, task.text);
    }
    let settled = tasks.iter().filter(|t| t.status.is_settled()).count();
    println!("{} tasks, {} settled", tasks.len(), settled);
    Ok(exit_codes::OK)
}

fn cmd_set(plan: &Path, index: usize, status: TaskStatus) -> Result<i32> {
    update_task_status(plan, index, status)?;
    println!("task {index} set to {status}");
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["planloop", "run"]);
        let Command::Run { plan, config } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(plan, PathBuf::from("PLAN.md"));
        assert_eq!(config, PathBuf::from("planloop.toml"));
    }

    #[test]
    fn parse_set_with_status() {
        let cli = Cli::parse_from(["planloop", "set", "2", "blocked", "--plan", "other.md"]);
        let Command::Set {
            index,
            status,
            plan,
        } = cli.command
        else {
            panic!("expected set command");
        };
        assert_eq!(index, 2);
        assert_eq!(status, TaskStatus::Blocked);
        assert_eq!(plan, PathBuf::from("other.md"));
    }

    #[test]
    fn parse_rejects_unknown_status() {
        assert!(Cli::try_parse_from(["planloop", "set", "0", "bogus"]).is_err());
    }
}
