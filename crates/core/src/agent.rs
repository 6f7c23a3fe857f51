mod builder;
mod state;
#[cfg(test)]
mod tests;
mod turn;

use std::error::Error as StdError;
use std::fmt::{self, Display};

use rewind_actor::Actor;
use rewind_model::{ModelMessage, Usage};
use tokio::sync::{mpsc, oneshot};

use crate::conversation::{Conversation, Snapshot};
use crate::model_client::BoxError;
pub use builder::AgentBuilder;
use state::{AgentState, CancelTurn};

/// Capacity of the per-turn event channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something that happened while a turn was running.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AgentEvent {
    /// A fragment of the model's reasoning.
    ReasoningDelta(String),
    /// A fragment of the visible answer.
    ContentDelta(String),
    /// The model asked for a tool and it is about to run.
    ToolCallStarted {
        /// Identifier of the call.
        id: String,
        /// Name of the tool.
        name: String,
        /// Raw JSON arguments.
        arguments: String,
    },
    /// A tool or the model failed. The turn may continue.
    Error(String),
}

/// The final result of a turn.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The model produced a final answer.
    Completed(TurnSummary),
    /// The turn stopped early, history produced so far is kept.
    Failed(TurnError),
    /// The turn was cancelled and its history rolled back.
    Aborted,
}

/// What a completed turn produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnSummary {
    /// Text of the final assistant message.
    pub answer: String,
    /// Reasoning text across all rounds, if the model sent any.
    pub reasoning: Option<String>,
    /// Usage summed across all rounds.
    pub usage: Usage,
    /// Number of model calls made.
    pub rounds: usize,
}

/// Why a turn failed.
#[derive(Debug)]
pub enum TurnError {
    /// The model could not be reached or its response broke off.
    Model(BoxError),
    /// The model kept calling tools beyond the configured limit.
    RoundLimitExceeded(usize),
    /// The turn task went away without reporting back.
    Interrupted(String),
}

impl Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::Model(err) => write!(f, "model error: {err}"),
            TurnError::RoundLimitExceeded(limit) => {
                write!(f, "exceeded the limit of {limit} rounds")
            }
            TurnError::Interrupted(reason) => {
                write!(f, "turn interrupted: {reason}")
            }
        }
    }
}

impl StdError for TurnError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TurnError::Model(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Errors for operations the agent refuses to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgentError {
    /// A turn is running.
    Busy,
    /// The agent has stopped.
    Stopped,
}

impl Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Busy => write!(f, "agent is busy"),
            AgentError::Stopped => write!(f, "agent has stopped"),
        }
    }
}

impl StdError for AgentError {}

/// A running turn.
///
/// Events should be drained with [`Turn::next_event`] until it returns
/// `None`, or the turn stalls once the channel is full. Calling
/// [`Turn::outcome`] gives up on the remaining events.
#[derive(Debug)]
pub struct Turn {
    events: mpsc::Receiver<AgentEvent>,
    outcome: oneshot::Receiver<TurnOutcome>,
}

impl Turn {
    /// Receives the next event, `None` once the turn has stopped.
    #[inline]
    pub async fn next_event(&mut self) -> Option<AgentEvent> {
        self.events.recv().await
    }

    /// Waits for the turn to finish.
    pub async fn outcome(self) -> TurnOutcome {
        let Self { events, outcome } = self;
        drop(events);
        outcome.await.unwrap_or_else(|_| {
            TurnOutcome::Failed(TurnError::Interrupted(
                "agent stopped before the turn finished".to_owned(),
            ))
        })
    }
}

/// An agent instance, which owns a conversation, a model client and a
/// tool registry.
///
/// At most one turn runs at a time. Every method is answered right away,
/// no matter whether a turn is running.
#[derive(Clone)]
pub struct Agent {
    actor: Actor<AgentState>,
}

impl Agent {
    /// Starts a turn with the given user query.
    pub async fn start<S: Into<String>>(
        &self,
        query: S,
    ) -> Result<Turn, AgentError> {
        let query = query.into();
        self.actor
            .call(move |state, handle| state.start_turn(query, handle))
            .await
            .map_err(|_| AgentError::Stopped)?
    }

    /// Cancels the running turn, if any.
    ///
    /// The history is rolled back to where it was when the turn started,
    /// and the turn's outcome becomes [`TurnOutcome::Aborted`].
    #[inline]
    pub fn cancel(&self) -> Result<(), AgentError> {
        self.actor.send(CancelTurn).map_err(|_| AgentError::Stopped)
    }

    /// Stops the agent, cancelling the running turn if any.
    ///
    /// The outcome of a turn stopped this way is [`TurnError::Interrupted`],
    /// and every later call fails with [`AgentError::Stopped`].
    pub async fn shutdown(&self) {
        let stopped = self
            .actor
            .call(|state, handle| {
                state.cancel_turn();
                handle.try_kill();
            })
            .await;
        if stopped.is_err() {
            debug!("agent has already stopped");
        }
    }

    /// Returns `false` once the agent has stopped.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.actor.is_alive()
    }

    /// Takes a snapshot of the history.
    pub async fn snapshot(&self) -> Result<Snapshot, AgentError> {
        self.with_idle(|state| Ok(state.snapshot())).await
    }

    /// Rolls the history back to `snapshot`.
    pub async fn restore(&self, snapshot: Snapshot) -> Result<(), AgentError> {
        self.with_idle(move |state| {
            state.restore(snapshot);
            Ok(())
        })
        .await
    }

    /// Drops everything but the system message.
    pub async fn reset_session(&self) -> Result<(), AgentError> {
        self.with_idle(|state| {
            state.reset();
            Ok(())
        })
        .await
    }

    /// Returns a copy of the history.
    pub async fn messages(&self) -> Result<Vec<ModelMessage>, AgentError> {
        self.with_idle(|state| Ok(state.messages().to_vec())).await
    }

    async fn with_idle<F, R>(&self, f: F) -> Result<R, AgentError>
    where
        F: FnOnce(&mut Conversation) -> Result<R, AgentError>
            + Send
            + 'static,
        R: Send + 'static,
    {
        self.actor
            .call(move |state, _| match state.idle_conversation() {
                Some(conversation) => f(conversation),
                None => Err(AgentError::Busy),
            })
            .await
            .map_err(|_| AgentError::Stopped)?
    }
}
