use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use rewind_core::tool::{
    Error as ToolError, ToolFuture, ToolObject, ToolSource,
};
use serde_json::{Map, Value};
use tracing::Instrument;

use crate::client::{Connector, RemoteClient, RemoteToolInfo};
use crate::error::ErrorKind;
use crate::{Error, ServerConfig};

/// Prefix of every tool name exposed by a session.
pub const TOOL_NAME_PREFIX: &str = "mcp__";

/// Connection state of a [`McpSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection, the next call will connect.
    Disconnected,
    /// A connection is being established.
    Connecting,
    /// Connected and answering pings as of the last check.
    Connected,
}

struct Inner {
    name: String,
    // `mcp__<name>__`, shared by every exposed tool name.
    prefix: String,
    config: ServerConfig,
    connector: Arc<dyn Connector>,
    // Held across connecting, so at most one connect is in flight.
    client: tokio::sync::Mutex<Option<Arc<dyn RemoteClient>>>,
    state: Mutex<SessionState>,
    tools: RwLock<Vec<Arc<dyn ToolObject>>>,
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// A lazily connected session with one tool server.
///
/// The session reconnects by itself: every operation first pings the
/// server, and a failed ping tears the connection down and connects again,
/// once. Cloning gives another handle to the same session.
#[derive(Clone)]
pub struct McpSession {
    inner: Arc<Inner>,
}

impl McpSession {
    /// Creates a session, no connection is made until it is needed.
    pub fn new(
        name: impl Into<String>,
        config: ServerConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(Inner {
                prefix: format!("{TOOL_NAME_PREFIX}{name}__"),
                name,
                config,
                connector,
                client: tokio::sync::Mutex::new(None),
                state: Mutex::new(SessionState::Disconnected),
                tools: RwLock::new(vec![]),
            }),
        }
    }

    /// Returns the server name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the current connection state.
    #[inline]
    pub fn state(&self) -> SessionState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes sure there is a live connection.
    pub async fn ensure_connected(&self) -> Result<(), Error> {
        self.client()
            .instrument(debug_span!("mcp session", server = %self.inner.name))
            .await
            .map(|_| ())
    }

    async fn client(&self) -> Result<Arc<dyn RemoteClient>, Error> {
        let mut slot = self.inner.client.lock().await;
        if let Some(client) = slot.clone() {
            match client.ping().await {
                Ok(()) => return Ok(client),
                Err(err) => {
                    warn!("ping failed, reconnecting: {err}");
                    client.close().await;
                    *slot = None;
                }
            }
        }

        self.inner.set_state(SessionState::Connecting);
        match self
            .inner
            .connector
            .connect(&self.inner.name, &self.inner.config)
            .await
        {
            Ok(client) => {
                debug!("connected");
                *slot = Some(Arc::clone(&client));
                self.inner.set_state(SessionState::Connected);
                Ok(client)
            }
            Err(err) => {
                error!("failed to connect: {err}");
                self.inner.set_state(SessionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Fetches the tool catalog, replacing the previous one entirely.
    ///
    /// Returns the number of tools.
    pub async fn refresh_tools(&self) -> Result<usize, Error> {
        async {
            let client = self.client().await?;
            let infos = client.list_tools().await?;
            let mut seen = HashSet::with_capacity(infos.len());
            let tools: Vec<Arc<dyn ToolObject>> = infos
                .into_iter()
                .filter(|info| {
                    let fresh = seen.insert(info.name.clone());
                    if !fresh {
                        warn!("server listed `{}` twice, skipping", info.name);
                    }
                    fresh
                })
                .map(|info| {
                    let tool = RemoteTool::new(&self.inner, info);
                    Arc::new(tool) as Arc<dyn ToolObject>
                })
                .collect();
            let count = tools.len();
            *self
                .inner
                .tools
                .write()
                .unwrap_or_else(PoisonError::into_inner) = tools;
            info!("got {count} tools");
            Ok(count)
        }
        .instrument(debug_span!("mcp session", server = %self.inner.name))
        .await
    }

    /// Calls a tool by the name the server knows it by.
    ///
    /// `arguments` is the raw JSON text from the model. Only text content
    /// of the result is kept.
    pub async fn invoke(
        &self,
        remote_name: &str,
        arguments: &str,
    ) -> Result<String, Error> {
        async {
            let arguments = coerce_arguments(arguments)?;
            let client = self.client().await?;
            let outcome = client.call_tool(remote_name, arguments).await?;
            let text = outcome.text();
            if outcome.is_error {
                return Err(Error::new(ErrorKind::ToolFailed, text));
            }
            Ok(text)
        }
        .instrument(debug_span!("mcp session", server = %self.inner.name))
        .await
    }

    /// Shuts the connection down. The session may connect again later.
    pub async fn close(&self) {
        let mut slot = self.inner.client.lock().await;
        if let Some(client) = slot.take() {
            client.close().await;
        }
        self.inner.set_state(SessionState::Disconnected);
    }
}

impl ToolSource for McpSession {
    #[inline]
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn tools(&self) -> Vec<Arc<dyn ToolObject>> {
        self.inner
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[inline]
    fn reserved_prefix(&self) -> Option<&str> {
        Some(&self.inner.prefix)
    }
}

impl Debug for McpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpSession")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn coerce_arguments(raw: &str) -> Result<Option<Map<String, Value>>, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(raw).map_err(|err| {
        Error::new(
            ErrorKind::InvalidArguments,
            format!("arguments are not valid JSON: {err}"),
        )
    })?;
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(Error::new(
            ErrorKind::InvalidArguments,
            format!("arguments must be a JSON object, got {other}"),
        )),
    }
}

struct RemoteTool {
    name: String,
    remote_name: String,
    description: String,
    schema: Value,
    // The session owns its tools, a strong reference would be a cycle.
    session: Weak<Inner>,
}

impl RemoteTool {
    fn new(session: &Arc<Inner>, info: RemoteToolInfo) -> Self {
        Self {
            name: format!("{}{}", session.prefix, info.name),
            remote_name: info.name,
            description: info.description.unwrap_or_default(),
            schema: info.input_schema,
            session: Arc::downgrade(session),
        }
    }
}

impl ToolObject for RemoteTool {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn description(&self) -> &str {
        &self.description
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(self: Arc<Self>, arguments: String) -> ToolFuture {
        Box::pin(async move {
            let Some(inner) = self.session.upgrade() else {
                return Err(ToolError::execution_error()
                    .with_reason("tool server session is gone"));
            };
            let session = McpSession { inner };
            session
                .invoke(&self.remote_name, &arguments)
                .await
                .map_err(|err| match err.kind() {
                    ErrorKind::InvalidArguments => {
                        ToolError::invalid_input().with_reason(err.message())
                    }
                    _ => {
                        ToolError::execution_error().with_reason(err.message())
                    }
                })
        })
    }
}
