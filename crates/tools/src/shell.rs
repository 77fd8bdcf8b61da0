//! Shell tool: execute system commands.
//!
//! Supports command allowlisting (with no substitution or subshells while
//! an allowlist is set), working-directory scoping, a timeout, and killing
//! the child when the turn is cancelled.

use async_trait::async_trait;
use codecrab_core::error::ToolError;
use codecrab_core::tool::{Tool, ToolContext};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Output beyond this many bytes is cut off before it reaches the model.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Syntax that runs a command the allowlist cannot see.
const NESTED_COMMAND_TOKENS: [&str; 3] = ["$(", "`", "("];

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self {
            allowed_commands,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Every command in a pipeline or sequence must be allowlisted, not
    /// just the first one. Command substitution and subshells hide
    /// commands from that check, so with an allowlist they are refused
    /// outright and the offending token is returned.
    fn disallowed_command<'a>(&self, command: &'a str) -> Option<&'a str> {
        if self.allowed_commands.is_empty() {
            return None;
        }
        if let Some(token) = NESTED_COMMAND_TOKENS.iter().find(|t| command.contains(*t)) {
            return Some(*token);
        }

        command
            .split(['|', ';', '&', '\n'])
            .filter_map(|segment| segment.split_whitespace().next())
            .find(|base| !self.allowed_commands.iter().any(|a| a == base))
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory and return stdout/stderr. Use this for running programs, builds, tests, git operations, etc."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn call(&self, ctx: &ToolContext, arguments: &str) -> Result<String, ToolError> {
        let args: ShellArgs = serde_json::from_str(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("shell: {e}")))?;
        let command = args.command.trim();
        if command.is_empty() {
            return Err(ToolError::InvalidArguments("'command' must not be empty".into()));
        }

        if let Some(base) = self.disallowed_command(command) {
            let reason = if NESTED_COMMAND_TOKENS.iter().any(|t| *t == base) {
                format!("'{base}' (command substitution or subshell) is not allowed with an allowlist")
            } else {
                format!("Command '{base}' not in allowlist")
            };
            return Err(ToolError::PermissionDenied {
                tool_name: "shell".into(),
                reason,
            });
        }

        debug!(call_id = %ctx.call_id, command = %command, cwd = %ctx.working_dir.display(), "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| ToolError::ExecutionFailed {
            tool_name: "shell".into(),
            reason: e.to_string(),
        })?;

        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                debug!(command = %command, "Shell command cancelled");
                return Err(ToolError::Cancelled);
            }
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(ToolError::ExecutionFailed {
                        tool_name: "shell".into(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(command = %command, timeout_secs = self.timeout.as_secs(), "Shell command timed out");
                    return Err(ToolError::Timeout {
                        tool_name: "shell".into(),
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            let text = if stderr.trim().is_empty() {
                stdout.into_owned()
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            };
            Ok(truncate(text.trim()))
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            Err(ToolError::ExecutionFailed {
                tool_name: "shell".into(),
                reason: truncate(format!("[exit code: {code}]\n{stdout}\n{stderr}").trim()),
            })
        }
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n[output truncated: {} of {} bytes shown]",
        &text[..end],
        end,
        text.len()
    )
}
