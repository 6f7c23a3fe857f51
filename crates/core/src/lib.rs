//! Core logic of the agent: conversation state, tool dispatch, the
//! streaming agent loop, and the turn controller around it.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod accumulator;
mod agent;
pub mod conversation;
mod model_client;
pub mod tool;

pub use accumulator::{AccumulatedResponse, Delta, ResponseAccumulator};
pub use agent::{
    Agent, AgentBuilder, AgentError, AgentEvent, Turn, TurnError, TurnOutcome,
    TurnSummary,
};
pub use conversation::Snapshot;
pub use model_client::RetryPolicy;
