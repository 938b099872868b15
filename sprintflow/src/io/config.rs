//! Configuration stored under `.sprintflow/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Agent roles a step can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// Sprint planning.
    Planner,
    /// Task plans, test coverage and the claude review.
    Writer,
    /// Implementation and fixes.
    Coder,
    /// Read-only codex review.
    Auditor,
    Gemini,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Planner,
        AgentRole::Writer,
        AgentRole::Coder,
        AgentRole::Auditor,
        AgentRole::Gemini,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Writer => "writer",
            AgentRole::Coder => "coder",
            AgentRole::Auditor => "auditor",
            AgentRole::Gemini => "gemini",
        }
    }
}

/// Workflow configuration (TOML).
///
/// Edited by humans; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SprintflowConfig {
    /// Upper bound on sprint-loop passes.
    pub max_sprints: u32,

    /// Upper bound on review passes per task and sprint.
    pub review_max_iterations: u32,

    /// Wall-clock budget for one agent invocation.
    pub step_timeout_secs: u64,

    /// Truncate agent stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Directory agents run in, relative to the project root.
    pub workdir: PathBuf,

    pub agents: AgentsConfig,
}

/// One command per role; roles left out of the file keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentsConfig {
    pub planner: AgentConfig,
    pub writer: AgentConfig,
    pub coder: AgentConfig,
    pub auditor: AgentConfig,
    pub gemini: AgentConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            planner: AgentConfig::new(&["claude", "-p"]),
            writer: AgentConfig::new(&["claude", "-p"]),
            coder: AgentConfig::new(&[
                "codex",
                "exec",
                "--full-auto",
                "--output-last-message",
                "{last_message_path}",
                "-",
            ]),
            auditor: AgentConfig::new(&[
                "codex",
                "exec",
                "--sandbox",
                "read-only",
                "--output-last-message",
                "{last_message_path}",
                "-",
            ]),
            gemini: AgentConfig::new(&["gemini", "-p"]),
        }
    }
}

impl AgentsConfig {
    pub fn get(&self, role: AgentRole) -> &AgentConfig {
        match role {
            AgentRole::Planner => &self.planner,
            AgentRole::Writer => &self.writer,
            AgentRole::Coder => &self.coder,
            AgentRole::Auditor => &self.auditor,
            AgentRole::Gemini => &self.gemini,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    /// Argv of the agent CLI; the prompt is written to its stdin.
    /// `{schema_path}` is replaced with the step's output schema path. With
    /// `{last_message_path}`, the answer is read from that file instead of
    /// stdout.
    pub command: Vec<String>,
}

impl AgentConfig {
    fn new(argv: &[&str]) -> Self {
        Self {
            command: argv.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl Default for SprintflowConfig {
    fn default() -> Self {
        Self {
            max_sprints: 25,
            review_max_iterations: 3,
            step_timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            workdir: PathBuf::from("."),
            agents: AgentsConfig::default(),
        }
    }
}

impl SprintflowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_sprints == 0 {
            return Err(anyhow!("max_sprints must be > 0"));
        }
        if self.review_max_iterations == 0 {
            return Err(anyhow!("review_max_iterations must be > 0"));
        }
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        for role in AgentRole::ALL {
            if self.agent(role).command.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(anyhow!(
                    "agents.{}.command must be a non-empty array",
                    role.as_str()
                ));
            }
        }
        Ok(())
    }

    pub fn agent(&self, role: AgentRole) -> &AgentConfig {
        self.agents.get(role)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SprintflowConfig::default()`.
pub fn load_config(path: &Path) -> Result<SprintflowConfig> {
    if !path.exists() {
        let cfg = SprintflowConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SprintflowConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SprintflowConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
