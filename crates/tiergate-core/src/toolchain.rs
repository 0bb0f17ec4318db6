//! External installer and compiler invocations.
//!
//! Tools are opaque subprocesses: only the exit code and the captured output
//! are consumed.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ExternalCommand;
use crate::error::{Result, TiergateError};

/// Values substituted into `{name}` placeholders in tool arguments.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    pairs: Vec<(&'static str, String)>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.pairs.retain(|(n, _)| *n != name);
        self.pairs.push((name, value.into()));
        self
    }

    /// Replace every known `{name}`; unknown braces are left alone.
    pub fn expand(&self, arg: &str) -> String {
        let mut out = arg.to_string();
        for (name, value) in &self.pairs {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }
}

/// Result of one tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub tool: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Run `command` in `cwd` with extra environment variables.
///
/// A non-zero exit or a timeout is a `Build` error carrying the command line
/// and verbatim stderr; a program that cannot be started is a configuration
/// error.
pub async fn run_tool(
    tool: &str,
    command: &ExternalCommand,
    placeholders: &Placeholders,
    cwd: &Path,
    env: &[(String, String)],
) -> Result<ToolOutput> {
    let args: Vec<String> = command.args.iter().map(|a| placeholders.expand(a)).collect();
    let command_line = std::iter::once(command.program.as_str())
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");

    info!(tool = %tool, program = %command.program, "running external tool");
    debug!(tool = %tool, command = %command_line, cwd = %cwd.display(), "tool command line");

    let start = Instant::now();
    let child = Command::new(&command.program)
        .args(&args)
        .current_dir(cwd)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            TiergateError::config(format!(
                "cannot start {tool} program '{}': {e}",
                command.program
            ))
        })?;

    let output = if command.timeout_secs > 0 {
        tokio::time::timeout(
            Duration::from_secs(command.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| TiergateError::Build {
            tool: tool.to_string(),
            command: command_line.clone(),
            exit_code: -1,
            stderr: format!("timed out after {} seconds", command.timeout_secs),
        })??
    } else {
        child.wait_with_output().await?
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        return Err(TiergateError::Build {
            tool: tool.to_string(),
            command: command_line,
            exit_code,
            stderr,
        });
    }

    debug!(tool = %tool, duration_ms, "external tool finished");
    Ok(ToolOutput {
        tool: tool.to_string(),
        command: command_line,
        exit_code,
        stdout,
        stderr,
        duration_ms,
    })
}
