//! Engine configuration stored as TOML (`planloop.toml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Agent executable invoked once per iteration.
    pub agent_program: String,

    /// Model identifier forwarded to the agent; `None` uses its default.
    pub model: Option<String>,

    /// Wall-clock budget for a single invocation, in seconds.
    pub invoke_timeout_secs: u64,

    /// Maximum agent turns per invocation; `None` uses the agent default.
    pub max_turns: Option<u32>,

    /// Additional attempts after a task's first transient failure before it
    /// is forced to blocked.
    pub max_task_retries: u32,

    /// Select the earliest in-progress task when no open task remains
    /// (picks up work left behind by a crashed prior run).
    pub resume_in_progress: bool,

    /// Carry the agent's session id into the next invocation.
    pub reuse_session: bool,

    /// Truncate captured agent stderr beyond this many bytes.
    pub stderr_limit_bytes: usize,

    /// Pass the agent's permission-bypass flag.
    pub skip_permissions: bool,

    /// Restrict the agent to these tools; empty means no restriction.
    pub allowed_tools: Vec<String>,

    /// Addendum appended to the agent's system prompt.
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_program: "claude".to_string(),
            model: None,
            invoke_timeout_secs: 30 * 60,
            max_turns: None,
            max_task_retries: 2,
            resume_in_progress: true,
            reuse_session: false,
            stderr_limit_bytes: 100_000,
            skip_permissions: false,
            allowed_tools: Vec::new(),
            system_prompt: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agent_program.trim().is_empty() {
            return Err(anyhow!("agent_program must be non-empty"));
        }
        if self.invoke_timeout_secs == 0 {
            return Err(anyhow!("invoke_timeout_secs must be > 0"));
        }
        if self.stderr_limit_bytes == 0 {
            return Err(anyhow!("stderr_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
