use std::pin::Pin;
use std::sync::Arc;

use rewind_model::ModelTool;
use serde_json::Value;
use tracing::Instrument;

use super::{Error, Tool, ToolResult};

/// A boxed future returned by [`ToolObject::execute`].
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// A type-erased tool, the common shape of native and remote tools.
pub trait ToolObject: Send + Sync + 'static {
    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Returns the definition advertised to the model.
    #[inline]
    fn definition(&self) -> ModelTool {
        ModelTool {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameter_schema().clone(),
        }
    }

    /// Executes the tool with the raw JSON arguments sent by the model.
    fn execute(self: Arc<Self>, arguments: String) -> ToolFuture;
}

/// A named group of tools whose catalog may change over time.
///
/// The registry asks for the current catalog every time it describes or
/// resolves tools, so implementations should make `tools` cheap.
pub trait ToolSource: Send + Sync + 'static {
    /// Returns the name of the source, unique within a registry.
    fn name(&self) -> &str;

    /// Returns the tools currently provided by this source.
    fn tools(&self) -> Vec<Arc<dyn ToolObject>>;

    /// Returns the prefix shared by every tool name of this source.
    ///
    /// A registry keeps names under the prefix for this source alone, and
    /// hides tools of the source that fall outside it.
    #[inline]
    fn reserved_prefix(&self) -> Option<&str> {
        None
    }
}

pub(crate) struct ToolObjectImpl<T: Tool>(pub T);

impl<T: Tool> ToolObject for ToolObjectImpl<T> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    fn execute(self: Arc<Self>, arguments: String) -> ToolFuture {
        // Some models send nothing at all for parameterless tools.
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments.as_str()
        };
        let input: T::Input = match serde_json::from_str(arguments) {
            Ok(input) => input,
            Err(err) => {
                let reason = format!("{err}");
                return Box::pin(std::future::ready(ToolResult::Err(
                    Error::invalid_input().with_reason(reason),
                )));
            }
        };

        let fut = self.0.execute(input);
        Box::pin(fut.instrument(debug_span!("tool execute")))
    }
}
