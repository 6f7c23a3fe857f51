use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use rewind_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Parameters of [`ShellTool`].
#[derive(Deserialize, JsonSchema)]
pub struct ShellToolParameters {
    #[schemars(description = "The command line to run.")]
    command: String,
}

/// A tool for running shell commands in the workspace folder.
pub struct ShellTool {
    workspace: PathBuf,
    timeout: Duration,
    parameter_schema: Value,
}

impl ShellTool {
    /// Creates a new shell tool running commands in `workspace`.
    #[inline]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        ShellTool {
            workspace: workspace.into(),
            timeout: DEFAULT_TIMEOUT,
            parameter_schema: schema_for!(ShellToolParameters).to_value(),
        }
    }

    /// Sets how long a command may run before it is killed.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Tool for ShellTool {
    type Input = ShellToolParameters;

    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        r#"
Runs arbitrary commands like using a terminal, in the workspace folder.
The command line should be single line if possible. Strings collected
from stdout and stderr will be returned as the tool's output."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: ShellToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let workspace = self.workspace.clone();
        let limit = self.timeout;
        async move {
            debug!("running `{}`", input.command);
            let run = run_command_line(&workspace, &input.command);
            match timeout(limit, run).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(err)) => Err(ToolError::execution_error()
                    .with_reason(format!("{err}"))),
                Err(_) => Err(ToolError::execution_error()
                    .with_reason(format!("command timed out after {limit:?}"))),
            }
        }
    }
}

fn create_command_with_inferred_shell() -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C");
        return command;
    }
    let shell = env::var_os("SHELL").unwrap_or_else(|| "/bin/sh".into());
    let mut command = Command::new(shell);
    command.arg("-c");
    command
}

async fn run_command_line(
    workspace: &Path,
    cmdline: &str,
) -> Result<String, io::Error> {
    let output = create_command_with_inferred_shell()
        .arg(cmdline)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    let mut result = String::new();
    if !output.stdout.is_empty() {
        result.push_str("==> STDOUT <==\n");
        result.push_str(&String::from_utf8_lossy(&output.stdout));
    }
    if !output.stderr.is_empty() {
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str("==> STDERR <==\n");
        result.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    if !output.status.success() {
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str(&format!("==> {} <==\n", output.status));
    }
    Ok(result)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_command_line(dir.path(), "echo 'Hello, World!'").await;
        assert_eq!(result.unwrap(), "==> STDOUT <==\nHello, World!\n");
    }

    #[tokio::test]
    async fn test_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let output = run_command_line(dir.path(), "ls").await.unwrap();
        assert!(output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_failed_command() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_command_line(dir.path(), "echo oops >&2; exit 3")
            .await
            .unwrap();
        assert!(output.starts_with("==> STDERR <==\noops\n"));
        assert!(output.contains("exit status: 3"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(dir.path())
            .with_timeout(Duration::from_millis(50));
        let err = tool
            .execute(ShellToolParameters {
                command: "sleep 5".to_owned(),
            })
            .await
            .unwrap_err();
        assert!(err.reason().contains("timed out"));
    }
}
