use std::path::PathBuf;

use rewind_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;

use super::resolve_path;

/// Parameters of [`EditFileTool`].
#[derive(Deserialize, JsonSchema)]
pub struct EditFileParameters {
    #[schemars(description = "File path, absolute or workspace-relative.")]
    path: String,
    #[schemars(description = "The exact text to replace, must appear once.")]
    before: String,
    #[schemars(description = "The text to replace it with.")]
    after: String,
}

/// A tool for replacing a unique snippet of a file.
pub struct EditFileTool {
    workspace: PathBuf,
    parameter_schema: Value,
}

impl EditFileTool {
    /// Creates a new edit file tool resolving paths against `workspace`.
    #[inline]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        EditFileTool {
            workspace: workspace.into(),
            parameter_schema: schema_for!(EditFileParameters).to_value(),
        }
    }
}

impl Tool for EditFileTool {
    type Input = EditFileParameters;

    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        r#"
Edits a file by replacing the `before` text with the `after` text.
`before` must match the file content exactly, including whitespace,
and must appear exactly once. Read the file first when unsure."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: EditFileParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let path = resolve_path(&self.workspace, &input.path);
        async move {
            if input.before.is_empty() {
                return Err(
                    ToolError::invalid_input().with_reason("`before` is empty")
                );
            }
            let content = fs::read_to_string(&path).await.map_err(|err| {
                ToolError::execution_error()
                    .with_reason(format!("{}: {err}", input.path))
            })?;

            let edited = replace_once(&content, &input.before, &input.after)
                .map_err(|reason| {
                    ToolError::execution_error()
                        .with_reason(format!("{}: {reason}", input.path))
                })?;

            fs::write(&path, edited).await.map_err(|err| {
                ToolError::execution_error()
                    .with_reason(format!("{}: {err}", input.path))
            })?;
            Ok(format!("edited {}", input.path))
        }
    }
}

fn replace_once(
    content: &str,
    before: &str,
    after: &str,
) -> Result<String, String> {
    let mut matches = content.match_indices(before);
    let Some((start, _)) = matches.next() else {
        return Err("`before` text not found".to_owned());
    };
    if matches.next().is_some() {
        let count = content.matches(before).count();
        return Err(format!(
            "`before` text appears {count} times, \
             add more context to make it unique"
        ));
    }

    let mut edited =
        String::with_capacity(content.len() - before.len() + after.len());
    edited.push_str(&content[..start]);
    edited.push_str(after);
    edited.push_str(&content[start + before.len()..]);
    Ok(edited)
}
