use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use rewind_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::spawn_blocking;

use super::resolve_path;

const DEFAULT_MAX_LINES: usize = 200;

/// A file section to read.
#[derive(Deserialize, JsonSchema)]
pub struct ReadFileItem {
    #[schemars(description = "File path, absolute or workspace-relative.")]
    path: String,
    #[schemars(description = "1-based start line to read from, default to 1.")]
    start_line: Option<usize>,
    #[schemars(description = "Max number of lines to read, default to 200.")]
    max_lines: Option<usize>,
}

/// Parameters of [`ReadFileTool`].
#[derive(Deserialize, JsonSchema)]
pub struct ReadFileParameters {
    #[schemars(description = "Files to read.")]
    files: Vec<ReadFileItem>,
}

/// A tool for reading file content with line numbers.
pub struct ReadFileTool {
    workspace: PathBuf,
    parameter_schema: Value,
}

impl ReadFileTool {
    /// Creates a new read file tool resolving paths against `workspace`.
    #[inline]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        ReadFileTool {
            workspace: workspace.into(),
            parameter_schema: schema_for!(ReadFileParameters).to_value(),
        }
    }
}

impl Tool for ReadFileTool {
    type Input = ReadFileParameters;

    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        r#"
Reads files and returns their contents prefixed with line numbers.
Each file includes a path, a 1-based start line and a line limit
(200 lines by default)."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: ReadFileParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let workspace = self.workspace.clone();
        async move {
            if input.files.is_empty() {
                return Err(
                    ToolError::invalid_input().with_reason("`files` is empty")
                );
            }
            let mut result = String::new();
            for file in input.files {
                let start_line = file.start_line.unwrap_or(1);
                if start_line == 0 {
                    return Err(ToolError::invalid_input()
                        .with_reason("`start_line` must be 1-based"));
                }
                let max_lines =
                    file.max_lines.unwrap_or(DEFAULT_MAX_LINES).max(1);
                let path = resolve_path(&workspace, &file.path);

                let section = spawn_blocking(move || {
                    read_file_section(&path, &file.path, start_line, max_lines)
                })
                .await
                .map_err(|_| {
                    ToolError::execution_error()
                        .with_reason("Failed to read file")
                })??;

                if !result.is_empty() {
                    result.push('\n');
                }
                result.push_str(&section);
            }
            Ok(result)
        }
    }
}

fn read_file_section(
    path: &Path,
    display_path: &str,
    start_line: usize,
    max_lines: usize,
) -> Result<String, ToolError> {
    if path.is_dir() {
        return Err(ToolError::execution_error()
            .with_reason(format!("{display_path} is a directory")));
    }
    let file = File::open(path).map_err(|err| {
        ToolError::execution_error()
            .with_reason(format!("{display_path}: {err}"))
    })?;
    format_reader_section(display_path, file, start_line, max_lines)
}

fn format_reader_section<R: Read>(
    path: &str,
    reader: R,
    start_line: usize,
    max_lines: usize,
) -> Result<String, ToolError> {
    let mut lines = BufReader::new(reader).lines().skip(start_line - 1);
    let mut section = Vec::with_capacity(max_lines.min(DEFAULT_MAX_LINES));
    for line in lines.by_ref().take(max_lines) {
        let line = line.map_err(|err| {
            ToolError::execution_error().with_reason(err.to_string())
        })?;
        section.push(line);
    }
    let truncated = lines.next().is_some();

    let mut result = format!("==> {path} <==\n");
    let last_line_no = start_line + section.len().saturating_sub(1);
    let width = last_line_no.to_string().len();
    for (offset, line) in section.iter().enumerate() {
        let line_no = start_line + offset;
        result.push_str(&format!("{line_no:>width$}: {line}\n"));
    }
    if truncated {
        result.push_str(&format!(
            "(more lines after line {last_line_no}, \
             continue with `start_line`)\n"
        ));
    }
    Ok(result)
}
