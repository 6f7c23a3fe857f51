//! Tool call supports.
//!
//! Native tools implement [`Tool`] and are registered by value. Tools that
//! live elsewhere (e.g. on a remote tool server) implement [`ToolObject`]
//! directly and are grouped by a [`ToolSource`]. Both kinds are resolved
//! through one [`Registry`].

mod error;
mod object;
mod registry;

use serde::de::DeserializeOwned;
use serde_json::Value;

pub use error::{Error, ErrorKind};
pub use object::{ToolFuture, ToolObject, ToolSource};
pub use registry::{Registry, RegistryError};

/// The result of a tool call.
pub type ToolResult = Result<String, Error>;

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as the working directory or the
/// current user. To do this, make the context an immutable state of the tool,
/// which can be set during initialization, and copy it when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    ///
    /// Arguments that fail to deserialize never reach the tool, the model
    /// gets an [`ErrorKind::InvalidInput`] error instead.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`.
    /// Once started, the future is always polled to completion.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}
