use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use rewind_model::ModelTool;
use tracing::Instrument;

use super::object::ToolObjectImpl;
use super::{Error, Tool, ToolObject, ToolResult, ToolSource};

/// Error returned when a tool or a source can't be registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool with the same name is already registered.
    DuplicateTool(String),
    /// A source with the same name is already registered.
    DuplicateSource(String),
    /// A name falls under the prefix reserved by another source.
    ReservedName {
        /// The clashing tool name or prefix.
        name: String,
        /// The source that reserved it.
        source: String,
    },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateTool(name) => {
                write!(f, "tool `{name}` is already registered")
            }
            RegistryError::DuplicateSource(name) => {
                write!(f, "tool source `{name}` is already registered")
            }
            RegistryError::ReservedName { name, source } => write!(
                f,
                "`{name}` clashes with the names reserved by tool source \
                 `{source}`"
            ),
        }
    }
}

impl StdError for RegistryError {}

/// A catalog of callable tools.
///
/// Native tools always win over tools provided by sources. Among sources,
/// the one registered first wins, later tools with a taken name are left
/// out of the catalog. Sources with a reserved prefix can't collide with
/// anything: registration fails if a native name or another source's
/// prefix overlaps it.
#[derive(Default)]
pub struct Registry {
    native: Vec<Arc<dyn ToolObject>>,
    index: HashMap<String, usize>,
    sources: Vec<Arc<dyn ToolSource>>,
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a native tool.
    #[inline]
    pub fn register<T: Tool>(
        &mut self,
        tool: T,
    ) -> Result<(), RegistryError> {
        self.register_object(Arc::new(ToolObjectImpl(tool)))
    }

    /// Registers an already type-erased tool.
    pub fn register_object(
        &mut self,
        tool: Arc<dyn ToolObject>,
    ) -> Result<(), RegistryError> {
        let name = tool.name().to_owned();
        if let Some(source) = self
            .sources
            .iter()
            .find(|s| s.reserved_prefix().is_some_and(|p| name.starts_with(p)))
        {
            return Err(RegistryError::ReservedName {
                name,
                source: source.name().to_owned(),
            });
        }
        let taken_by_source = self
            .sources
            .iter()
            .any(|s| s.tools().iter().any(|t| t.name() == name));
        if self.index.contains_key(&name) || taken_by_source {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.index.insert(name, self.native.len());
        self.native.push(tool);
        Ok(())
    }

    /// Registers a source of tools.
    pub fn add_source(
        &mut self,
        source: Arc<dyn ToolSource>,
    ) -> Result<(), RegistryError> {
        if self.sources.iter().any(|s| s.name() == source.name()) {
            return Err(RegistryError::DuplicateSource(
                source.name().to_owned(),
            ));
        }
        if let Some(prefix) = source.reserved_prefix() {
            if let Some(native) =
                self.native.iter().find(|t| t.name().starts_with(prefix))
            {
                return Err(RegistryError::ReservedName {
                    name: native.name().to_owned(),
                    source: source.name().to_owned(),
                });
            }
            // Nested prefixes would let two sources produce the same name.
            for other in &self.sources {
                let Some(other_prefix) = other.reserved_prefix() else {
                    continue;
                };
                if prefix.starts_with(other_prefix)
                    || other_prefix.starts_with(prefix)
                {
                    return Err(RegistryError::ReservedName {
                        name: prefix.to_owned(),
                        source: other.name().to_owned(),
                    });
                }
            }
        }
        self.sources.push(source);
        Ok(())
    }

    /// Returns the definitions of all reachable tools, native tools first.
    pub fn describe_all(&self) -> Vec<ModelTool> {
        let mut seen: HashSet<String> = self.index.keys().cloned().collect();
        let mut defs: Vec<_> =
            self.native.iter().map(|t| t.definition()).collect();
        for source in &self.sources {
            for tool in source.tools() {
                if !owns(source.as_ref(), tool.name()) {
                    warn!(
                        "tool `{}` from `{}` is outside its prefix, skipping",
                        tool.name(),
                        source.name()
                    );
                    continue;
                }
                if !seen.insert(tool.name().to_owned()) {
                    warn!(
                        "tool `{}` from `{}` is shadowed, skipping",
                        tool.name(),
                        source.name()
                    );
                    continue;
                }
                defs.push(tool.definition());
            }
        }
        defs
    }

    /// Looks up a tool by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ToolObject>> {
        if let Some(&idx) = self.index.get(name) {
            return Some(self.native[idx].clone());
        }
        self.sources
            .iter()
            .filter(|s| owns(s.as_ref(), name))
            .find_map(|s| s.tools().into_iter().find(|t| t.name() == name))
    }

    /// Runs the named tool with raw JSON arguments.
    ///
    /// Unknown names yield an [`ErrorKind::NotFound`](super::ErrorKind)
    /// error rather than a panic.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: String,
    ) -> ToolResult {
        let Some(tool) = self.resolve(name) else {
            warn!("model requested unknown tool `{name}`");
            return Err(Error::not_found().with_reason(name));
        };
        async move {
            trace!("arguments: {arguments}");
            // A panicking tool must not take the whole turn down with it.
            let result = match tokio::spawn(tool.execute(arguments)).await {
                Ok(result) => result,
                Err(err) => Err(Error::execution_error()
                    .with_reason(format!("tool crashed: {err}"))),
            };
            if let Err(err) = &result {
                debug!("tool failed: {err}");
            }
            result
        }
        .instrument(debug_span!("tool", name))
        .await
    }
}

#[inline]
fn owns(source: &dyn ToolSource, name: &str) -> bool {
    source.reserved_prefix().is_none_or(|p| name.starts_with(p))
}

impl Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field(
                "native",
                &self.native.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field(
                "sources",
                &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
