use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::Error;
use crate::error::ErrorKind;

/// Placeholder in server arguments that expands to the workspace folder.
pub const WORKSPACE_FOLDER_PLACEHOLDER: &str = "${workspaceFolder}";

/// How to reach a tool server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    /// A subprocess speaking over its stdin and stdout.
    Stdio {
        /// Program to run.
        command: String,
        /// Arguments passed to the program.
        args: Vec<String>,
        /// Extra environment variables.
        env: BTreeMap<String, String>,
    },
    /// A remote server speaking streamable HTTP.
    Http {
        /// Endpoint of the server.
        url: String,
        /// Extra request headers, e.g. for authorization.
        headers: BTreeMap<String, String>,
    },
}

/// Configuration of a single tool server.
///
/// Deserializes from the usual MCP client format: a `command` (with
/// optional `args` and `env`) for stdio servers, or a `url` (with optional
/// `headers`) for HTTP servers.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawServerConfig")]
pub struct ServerConfig {
    /// The transport to connect with.
    pub transport: Transport,
}

impl ServerConfig {
    /// Creates a config for a stdio server.
    pub fn stdio<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transport: Transport::Stdio {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: BTreeMap::new(),
            },
        }
    }

    /// Creates a config for an HTTP server.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: Transport::Http {
                url: url.into(),
                headers: BTreeMap::new(),
            },
        }
    }

    /// Returns a copy with placeholders in the arguments expanded.
    ///
    /// Only stdio arguments are touched.
    pub fn with_placeholders(&self, vars: &HashMap<String, String>) -> Self {
        let transport = match &self.transport {
            Transport::Stdio { command, args, env } => Transport::Stdio {
                command: command.clone(),
                args: args
                    .iter()
                    .map(|arg| {
                        vars.iter().fold(arg.clone(), |arg, (k, v)| {
                            arg.replace(k.as_str(), v)
                        })
                    })
                    .collect(),
                env: env.clone(),
            },
            transport => transport.clone(),
        };
        Self { transport }
    }
}

#[derive(Deserialize)]
struct RawServerConfig {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = Error;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        let command = raw.command.filter(|c| !c.is_empty());
        let url = raw.url.filter(|u| !u.is_empty());
        let transport = match (command, url) {
            (Some(command), None) => Transport::Stdio {
                command,
                args: raw.args,
                env: raw.env,
            },
            (None, Some(url)) => Transport::Http {
                url,
                headers: raw.headers,
            },
            (Some(_), Some(_)) => {
                return Err(Error::new(
                    ErrorKind::Config,
                    "server has both `command` and `url`",
                ));
            }
            (None, None) => {
                return Err(Error::new(
                    ErrorKind::Config,
                    "server needs either `command` or `url`",
                ));
            }
        };
        Ok(Self { transport })
    }
}

/// Checks that a server name can be embedded in tool names.
///
/// Names are made of ASCII letters, digits, `-` and `_`, and must not
/// contain `__`, which separates the parts of a tool name.
pub fn check_server_name(name: &str) -> Result<(), Error> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if name.is_empty() || !valid_chars {
        return Err(Error::new(
            ErrorKind::Config,
            format!("invalid server name `{name}`"),
        ));
    }
    if name.contains("__") {
        return Err(Error::new(
            ErrorKind::Config,
            format!("server name `{name}` must not contain `__`"),
        ));
    }
    Ok(())
}

/// Parses a JSON object that maps server names to their configs.
pub fn parse_servers(
    json: &str,
) -> Result<BTreeMap<String, ServerConfig>, Error> {
    let servers: BTreeMap<String, ServerConfig> = serde_json::from_str(json)
        .map_err(|err| {
            Error::new(
                ErrorKind::Config,
                format!("invalid server config: {err}"),
            )
        })?;
    for name in servers.keys() {
        check_server_name(name)?;
    }
    Ok(servers)
}

/// Loads server configs from a JSON file, see [`parse_servers`].
pub fn load_servers(
    path: impl AsRef<Path>,
) -> Result<BTreeMap<String, ServerConfig>, Error> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|err| {
        Error::new(
            ErrorKind::Config,
            format!("failed to read {}: {err}", path.display()),
        )
    })?;
    parse_servers(&json)
}
