use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{Error, ServerConfig};

/// A tool as advertised by a server.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteToolInfo {
    /// Name the server knows the tool by.
    pub name: String,
    /// Human readable description.
    pub description: Option<String>,
    /// JSON schema of the arguments.
    pub input_schema: Value,
}

/// A block of a tool result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentBlock {
    /// Plain text.
    Text(String),
    /// Anything else (images, resources...), not forwarded to the model.
    Other,
}

/// The result of a remote tool call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallOutcome {
    /// Content blocks, in order.
    pub blocks: Vec<ContentBlock>,
    /// Whether the server flagged the result as an error.
    pub is_error: bool,
}

impl CallOutcome {
    /// Concatenates all text blocks.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text(text) => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect()
    }
}

/// An established connection to a tool server.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Checks that the server is still responsive.
    async fn ping(&self) -> Result<(), Error>;

    /// Lists every tool the server offers.
    async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>, Error>;

    /// Calls a tool by its remote name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallOutcome, Error>;

    /// Shuts the connection down. Further calls fail.
    async fn close(&self);
}

/// Opens connections to tool servers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to the server named `name` and completes the handshake.
    async fn connect(
        &self,
        name: &str,
        config: &ServerConfig,
    ) -> Result<Arc<dyn RemoteClient>, Error>;
}
