use std::sync::Arc;

use rewind_actor::Actor;
use rewind_model::ModelProvider;

use super::Agent;
use super::state::AgentState;
use crate::model_client::{ModelClient, RetryPolicy};
use crate::tool::{Registry, RegistryError, Tool, ToolSource};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const DEFAULT_MAX_ROUNDS: usize = 32;

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    registry: Registry,
    system_prompt: String,
    max_rounds: usize,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            registry: Registry::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Sets the system prompt, the first message of every conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(
        mut self,
        tool: T,
    ) -> Result<Self, RegistryError> {
        self.registry.register(tool)?;
        Ok(self)
    }

    /// Registers a source of tools, e.g. a remote tool server.
    #[inline]
    pub fn with_tool_source(
        mut self,
        source: Arc<dyn ToolSource>,
    ) -> Result<Self, RegistryError> {
        self.registry.add_source(source)?;
        Ok(self)
    }

    /// Limits how many model calls a single turn may make.
    ///
    /// Defaults to 32. Values below 1 are raised to 1.
    #[inline]
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Sets how rate limited model requests are retried.
    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.model_client.set_retry_policy(retry);
        self
    }

    /// Builds the agent.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> Agent {
        let Self {
            model_client,
            registry,
            system_prompt,
            max_rounds,
        } = self;
        debug!("building agent with {registry:?}");
        let state = AgentState::new(
            model_client,
            Arc::new(registry),
            system_prompt,
            max_rounds,
        );
        Agent {
            actor: Actor::spawn(state, Some("agent")),
        }
    }
}
