use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use rmcp::ServiceExt;
use rmcp::model::{
    CallToolRequestParams, ClientInfo, ClientRequest, JsonObject, PingRequest,
};
use rmcp::service::{
    ClientInitializeError, DynService, RoleClient, RunningService, ServiceError,
};
use rmcp::transport::streamable_http_client::{
    StreamableHttpClientTransportConfig,
};
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use tokio::process::Command;

use crate::client::{
    CallOutcome, ContentBlock, Connector, RemoteClient, RemoteToolInfo,
};
use crate::error::ErrorKind;
use crate::{Error, ServerConfig, Transport};

type RunningClient =
    RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// [`Connector`] built on the `rmcp` SDK.
#[derive(Clone, Debug, Default)]
pub struct RmcpConnector {
    _priv: (),
}

impl RmcpConnector {
    /// Creates a new connector.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

fn client_info() -> ClientInfo {
    let mut info = ClientInfo::default();
    info.client_info.name = env!("CARGO_PKG_NAME").to_owned();
    info.client_info.version = env!("CARGO_PKG_VERSION").to_owned();
    info
}

fn map_initialize_error(name: &str, err: ClientInitializeError) -> Error {
    match err {
        ClientInitializeError::JsonRpcError(err) => Error::protocol(format!(
            "`{name}` rejected the handshake: {}",
            err.message
        )),
        err => Error::connection(format!(
            "failed to initialize `{name}`: {err}"
        )),
    }
}

fn map_service_error(context: &str, err: ServiceError) -> Error {
    match err {
        ServiceError::TransportClosed | ServiceError::TransportSend(_) => {
            Error::connection(format!("{context}: {err}"))
        }
        ServiceError::McpError(err) => {
            Error::protocol(format!("{context}: {}", err.message))
        }
        err => Error::protocol(format!("{context}: {err}")),
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        name: &str,
        config: &ServerConfig,
    ) -> Result<Arc<dyn RemoteClient>, Error> {
        let service = match &config.transport {
            Transport::Stdio { command, args, env } => {
                debug!("spawning `{command}` for `{name}`");
                let mut cmd = Command::new(command);
                cmd.args(args).envs(env);
                let transport = TokioChildProcess::new(cmd).map_err(|err| {
                    let reason = format!("failed to spawn `{command}`: {err}");
                    Error::connection(reason)
                })?;
                client_info()
                    .into_dyn()
                    .serve(transport)
                    .await
                    .map_err(|err| map_initialize_error(name, err))?
            }
            Transport::Http { url, headers } => {
                debug!("connecting to {url} for `{name}`");
                let mut custom_headers = HashMap::new();
                for (key, value) in headers {
                    let header_name = HeaderName::from_bytes(key.as_bytes())
                        .map_err(|err| {
                            let reason = format!("bad header `{key}`: {err}");
                            Error::new(ErrorKind::Config, reason)
                        })?;
                    let header_value =
                        HeaderValue::from_str(value).map_err(|err| {
                            let reason =
                                format!("bad value for `{key}`: {err}");
                            Error::new(ErrorKind::Config, reason)
                        })?;
                    custom_headers.insert(header_name, header_value);
                }
                let config = StreamableHttpClientTransportConfig::with_uri(
                    url.as_str(),
                )
                .custom_headers(custom_headers);
                let transport =
                    StreamableHttpClientTransport::from_config(config);
                client_info()
                    .into_dyn()
                    .serve(transport)
                    .await
                    .map_err(|err| map_initialize_error(name, err))?
            }
        };
        if let Some(info) = service.peer_info() {
            info!(
                "connected to `{name}` ({} {})",
                info.server_info.name, info.server_info.version
            );
        }
        Ok(Arc::new(RmcpClient { service }))
    }
}

struct RmcpClient {
    service: RunningClient,
}

#[async_trait]
impl RemoteClient for RmcpClient {
    async fn ping(&self) -> Result<(), Error> {
        if self.service.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        self.service
            .send_request(ClientRequest::PingRequest(PingRequest::default()))
            .await
            .map_err(|err| map_service_error("ping", err))?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>, Error> {
        let tools = self
            .service
            .list_all_tools()
            .await
            .map_err(|err| map_service_error("list_tools", err))?;
        Ok(tools
            .into_iter()
            .map(|tool| RemoteToolInfo {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()),
                input_schema: serde_json::Value::Object(
                    (*tool.input_schema).clone(),
                ),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallOutcome, Error> {
        let result = self
            .service
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|err| map_service_error("call_tool", err))?;
        let blocks = result
            .content
            .iter()
            .map(|content| match content.as_text() {
                Some(text) => ContentBlock::Text(text.text.clone()),
                None => ContentBlock::Other,
            })
            .collect();
        Ok(CallOutcome {
            blocks,
            is_error: result.is_error.unwrap_or(false),
        })
    }

    async fn close(&self) {
        self.service.cancellation_token().cancel();
    }
}
