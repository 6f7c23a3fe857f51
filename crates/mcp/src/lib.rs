//! Tool sessions backed by Model Context Protocol servers.
//!
//! Every configured server becomes an [`McpSession`], a lazily connected
//! client that exposes the server's tools as a [`ToolSource`] under
//! `mcp__<server>__<tool>` names.
//!
//! [`ToolSource`]: rewind_core::tool::ToolSource

#[macro_use]
extern crate tracing;

mod client;
mod config;
mod error;
mod rmcp_client;
mod session;

pub use client::{
    CallOutcome, Connector, ContentBlock, RemoteClient, RemoteToolInfo,
};
pub use config::{
    ServerConfig, Transport, WORKSPACE_FOLDER_PLACEHOLDER, check_server_name,
    load_servers, parse_servers,
};
pub use error::{Error, ErrorKind};
pub use rmcp_client::RmcpConnector;
pub use session::{McpSession, SessionState, TOOL_NAME_PREFIX};
