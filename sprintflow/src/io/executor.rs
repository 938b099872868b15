//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples step actions from the agent CLIs. Tests
//! use scripted executors that return canned JSON without spawning anything.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{AgentRole, AgentsConfig};
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Which configured agent command to run.
    pub role: AgentRole,
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text, written to the agent's stdin.
    pub prompt: String,
    /// JSON Schema the answer must satisfy; substituted for `{schema_path}`.
    pub output_schema_path: PathBuf,
    /// Where stdout/stderr of the invocation are kept.
    pub log_path: PathBuf,
    /// Substituted for `{last_message_path}`. When the command uses it, the
    /// answer is read from this file after the agent exits instead of stdout.
    pub last_message_path: PathBuf,
    pub timeout: Duration,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over agent backends. Returns the agent's final JSON answer.
pub trait Executor: Send + Sync {
    fn exec(&self, request: &ExecRequest) -> Result<Value>;
}

/// Spawns the configured CLI for the request's role.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    agents: AgentsConfig,
}

impl CommandExecutor {
    pub fn new(agents: AgentsConfig) -> Self {
        Self { agents }
    }

    /// The command for `request`, and whether it writes its last message to
    /// `request.last_message_path`.
    fn command(&self, request: &ExecRequest) -> Result<(Command, bool)> {
        let schema_path = request.output_schema_path.display().to_string();
        let last_message_path = request.last_message_path.display().to_string();
        let template = &self.agents.get(request.role).command;
        let uses_last_message = template.iter().any(|arg| arg.contains(LAST_MESSAGE));
        let argv: Vec<String> = template
            .iter()
            .map(|arg| {
                arg.replace("{schema_path}", &schema_path)
                    .replace(LAST_MESSAGE, &last_message_path)
            })
            .collect();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("agents.{}.command is empty", request.role.as_str()))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);
        Ok((cmd, uses_last_message))
    }
}

const LAST_MESSAGE: &str = "{last_message_path}";

impl Executor for CommandExecutor {
    #[instrument(
        skip_all,
        fields(role = request.role.as_str(), timeout_secs = request.timeout.as_secs())
    )]
    fn exec(&self, request: &ExecRequest) -> Result<Value> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let (cmd, uses_last_message) = self.command(request)?;
        if uses_last_message {
            clear_last_message(&request.last_message_path)?;
        }
        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .with_context(|| format!("run {} agent", request.role.as_str()))?;

        write_agent_log(&request.log_path, &output, request.output_limit_bytes)?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return Err(anyhow!(
                "{} agent timed out after {:?} (log: {})",
                request.role.as_str(),
                request.timeout,
                request.log_path.display()
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(anyhow!(
                "{} agent failed with status {:?} (log: {})",
                request.role.as_str(),
                output.status.code(),
                request.log_path.display()
            ));
        }

        let answer = if uses_last_message {
            fs::read_to_string(&request.last_message_path).with_context(|| {
                format!("read last message {}", request.last_message_path.display())
            })?
        } else if output.stdout_truncated > 0 {
            warn!(
                truncated = output.stdout_truncated,
                "stdout overflowed, reading the answer from its tail"
            );
            String::from_utf8_lossy(&output.stdout_tail).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        let value = extract_json(&answer)
            .with_context(|| format!("agent answer (log: {})", request.log_path.display()))?;
        debug!("agent completed");
        Ok(value)
    }
}

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)```").expect("fenced json pattern is valid")
});

/// Pull the agent's JSON answer out of free-form output.
///
/// The last ```json fenced block wins; without one, the whole output must be
/// a JSON document.
pub fn extract_json(stdout: &str) -> Result<Value> {
    if let Some(block) = FENCED_JSON
        .captures_iter(stdout)
        .last()
        .and_then(|caps| caps.get(1))
    {
        return serde_json::from_str(block.as_str()).context("parse fenced json block");
    }
    serde_json::from_str(stdout.trim()).context("output has no ```json block and is not JSON")
}

/// Make sure a file left by an earlier attempt is not mistaken for this answer.
fn clear_last_message(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create last message dir {}", parent.display()))?;
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove stale {}", path.display())),
    }
}

fn write_agent_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create agent log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("agent"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("agent"));
    if output.timed_out {
        buf.push_str("\n[agent timed out]\n");
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }

    fs::write(path, buf).with_context(|| format!("write agent log {}", path.display()))
}
