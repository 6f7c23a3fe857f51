use std::collections::{BTreeMap, HashMap};
use std::env;
use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rewind_core::tool::RegistryError;
use rewind_core::{Agent, AgentBuilder, AgentError, Turn};
use rewind_mcp::{
    Connector, McpSession, RmcpConnector, ServerConfig,
    WORKSPACE_FOLDER_PLACEHOLDER, check_server_name,
};
use rewind_model::ModelProvider;

use crate::tools::*;

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("system_prompt.md");

/// Fills the `{{HOST_OS}}` and `{{WORKSPACE}}` slots of a prompt template.
pub fn render_system_prompt(template: &str, workspace: &str) -> String {
    template
        .replace("{{HOST_OS}}", &host_os())
        .replace("{{WORKSPACE}}", workspace)
}

fn host_os() -> String {
    let os = match env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        other => other,
    };
    format!("{os} ({})", env::consts::ARCH)
}

/// Error returned by [`SessionBuilder::build`].
#[derive(Debug)]
pub enum SessionError {
    /// Two tools ended up with clashing names.
    Registry(RegistryError),
    /// A tool server is misconfigured.
    Mcp(rewind_mcp::Error),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Registry(err) => err.fmt(f),
            SessionError::Mcp(err) => err.fmt(f),
        }
    }
}

impl StdError for SessionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            SessionError::Registry(err) => Some(err),
            SessionError::Mcp(err) => Some(err),
        }
    }
}

impl From<RegistryError> for SessionError {
    #[inline]
    fn from(err: RegistryError) -> Self {
        SessionError::Registry(err)
    }
}

impl From<rewind_mcp::Error> for SessionError {
    #[inline]
    fn from(err: rewind_mcp::Error) -> Self {
        SessionError::Mcp(err)
    }
}

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    system_prompt: Option<String>,
    workspace: Option<PathBuf>,
    mcp_servers: BTreeMap<String, ServerConfig>,
    connector: Option<Arc<dyn Connector>>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        Self {
            agent_builder: AgentBuilder::with_model_provider(provider),
            system_prompt: None,
            workspace: None,
            mcp_servers: BTreeMap::new(),
            connector: None,
        }
    }

    /// Sets the system prompt, replacing the built-in coding prompt.
    ///
    /// The `{{HOST_OS}}` and `{{WORKSPACE}}` slots are filled in as well.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the workspace folder, the current directory by default.
    #[inline]
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Adds a tool server.
    #[inline]
    pub fn with_mcp_server(
        mut self,
        name: impl Into<String>,
        config: ServerConfig,
    ) -> Self {
        self.mcp_servers.insert(name.into(), config);
        self
    }

    /// Adds every server of a loaded config file.
    #[inline]
    pub fn with_mcp_servers(
        mut self,
        servers: impl IntoIterator<Item = (String, ServerConfig)>,
    ) -> Self {
        self.mcp_servers.extend(servers);
        self
    }

    /// Overrides how tool servers are connected to.
    #[inline]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the maximum number of model rounds in a single turn.
    #[inline]
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.agent_builder = self.agent_builder.with_max_rounds(max_rounds);
        self
    }

    /// Builds a new session.
    ///
    /// Fails if a server name is invalid or two tools end up with the same
    /// name.
    pub fn build(self) -> Result<Session, SessionError> {
        let workspace = match self.workspace {
            Some(workspace) => workspace,
            None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let workspace_str = workspace.to_string_lossy().into_owned();
        let template = self
            .system_prompt
            .as_deref()
            .unwrap_or(SYSTEM_PROMPT_TEMPLATE);
        let system_prompt = render_system_prompt(template, &workspace_str);

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(RmcpConnector::new()));
        let placeholders = HashMap::from([(
            WORKSPACE_FOLDER_PLACEHOLDER.to_owned(),
            workspace_str,
        )]);

        let mut agent_builder = self
            .agent_builder
            .with_system_prompt(system_prompt)
            .with_tool(ShellTool::new(&workspace))?
            .with_tool(ReadFileTool::new(&workspace))?
            .with_tool(WriteFileTool::new(&workspace))?
            .with_tool(EditFileTool::new(&workspace))?;

        let mut mcp_sessions = Vec::with_capacity(self.mcp_servers.len());
        for (name, config) in self.mcp_servers {
            check_server_name(&name)?;
            let config = config.with_placeholders(&placeholders);
            let session = McpSession::new(name, config, connector.clone());
            agent_builder =
                agent_builder.with_tool_source(Arc::new(session.clone()))?;
            mcp_sessions.push(session);
        }

        Ok(Session {
            agent: agent_builder.build(),
            mcp_sessions,
            workspace,
        })
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent that you can use directly, and
/// the tool servers feeding it.
pub struct Session {
    agent: Agent,
    mcp_sessions: Vec<McpSession>,
    workspace: PathBuf,
}

impl Session {
    /// Returns the underlying agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Returns the workspace folder.
    #[inline]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Sends a message to the session, starting a new turn.
    #[inline]
    pub async fn send_message(
        &self,
        message: &str,
    ) -> Result<Turn, AgentError> {
        self.agent.start(message).await
    }

    /// Cancels the running turn, its messages are rolled back.
    #[inline]
    pub fn cancel(&self) -> Result<(), AgentError> {
        self.agent.cancel()
    }

    /// Clears the conversation, keeping only the system prompt.
    #[inline]
    pub async fn clear(&self) -> Result<(), AgentError> {
        self.agent.reset_session().await
    }

    /// Connects to every tool server and reloads its tools.
    ///
    /// Servers that fail are logged and skipped. Returns the number of tools
    /// loaded in total.
    pub async fn refresh_mcp_tools(&self) -> usize {
        let mut total = 0;
        for session in &self.mcp_sessions {
            match session.refresh_tools().await {
                Ok(count) => {
                    info!("loaded {count} tools from `{}`", session.name());
                    total += count;
                }
                Err(err) => {
                    let name = session.name();
                    warn!("failed to load tools from `{name}`: {err}");
                }
            }
        }
        total
    }

    /// Stops the agent and disconnects from every tool server.
    pub async fn shutdown(&self) {
        self.agent.shutdown().await;
        for session in &self.mcp_sessions {
            session.close().await;
        }
    }
}
