//! A set of built-in tools that models can use.
//!
//! File tools resolve relative paths against the workspace folder they are
//! created with, absolute paths are used as is.

mod edit_file;
mod read_file;
mod shell;
mod write_file;

use std::path::{Path, PathBuf};

pub use edit_file::EditFileTool;
pub use read_file::ReadFileTool;
pub use shell::ShellTool;
pub use write_file::WriteFileTool;

#[inline]
fn resolve_path(workspace: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_owned()
    } else {
        workspace.join(path)
    }
}
