use std::path::PathBuf;

use rewind_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;

use super::resolve_path;

/// Parameters of [`WriteFileTool`].
#[derive(Deserialize, JsonSchema)]
pub struct WriteFileParameters {
    #[schemars(description = "File path, absolute or workspace-relative.")]
    path: String,
    #[schemars(description = "The full content to write to the file.")]
    content: String,
}

/// A tool for creating or overwriting files.
pub struct WriteFileTool {
    workspace: PathBuf,
    parameter_schema: Value,
}

impl WriteFileTool {
    /// Creates a new write file tool resolving paths against `workspace`.
    #[inline]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        WriteFileTool {
            workspace: workspace.into(),
            parameter_schema: schema_for!(WriteFileParameters).to_value(),
        }
    }
}

impl Tool for WriteFileTool {
    type Input = WriteFileParameters;

    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        r#"
Writes content to a file, replacing it if it already exists.
Missing parent directories are created."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: WriteFileParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let path = resolve_path(&self.workspace, &input.path);
        async move {
            let io_error = |err: std::io::Error| {
                ToolError::execution_error()
                    .with_reason(format!("{}: {err}", input.path))
            };
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await.map_err(io_error)?;
            }
            fs::write(&path, input.content.as_bytes())
                .await
                .map_err(io_error)?;
            debug!("wrote {} bytes to {}", input.content.len(), path.display());
            Ok(format!("wrote {} bytes to {}", input.content.len(), input.path))
        }
    }
}
