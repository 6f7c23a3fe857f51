use std::sync::Arc;

use rewind_actor::{Actor, Message};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::turn::{EventSink, TurnContext, run_turn};
use super::{AgentError, EVENT_CHANNEL_CAPACITY, Turn, TurnError, TurnOutcome};
use crate::conversation::{Conversation, Snapshot};
use crate::model_client::ModelClient;
use crate::tool::Registry;

struct RunningTurn {
    id: u64,
    token: CancellationToken,
    snapshot: Snapshot,
    outcome_tx: oneshot::Sender<TurnOutcome>,
}

enum AgentStage {
    Idle,
    Running(RunningTurn),
    Aborting(RunningTurn),
}

pub(crate) struct AgentState {
    model_client: ModelClient,
    registry: Arc<Registry>,
    system_prompt: String,
    max_rounds: usize,
    // Moved into the turn task while a turn runs.
    conversation: Option<Conversation>,
    stage: AgentStage,
    next_turn_id: u64,
}

impl AgentState {
    pub fn new(
        model_client: ModelClient,
        registry: Arc<Registry>,
        system_prompt: String,
        max_rounds: usize,
    ) -> Self {
        Self {
            conversation: Some(Conversation::new(system_prompt.as_str())),
            model_client,
            registry,
            system_prompt,
            max_rounds,
            stage: AgentStage::Idle,
            next_turn_id: 1,
        }
    }

    /// Returns the conversation if no turn is running.
    #[inline]
    pub fn idle_conversation(&mut self) -> Option<&mut Conversation> {
        match self.stage {
            AgentStage::Idle => self.conversation.as_mut(),
            _ => None,
        }
    }

    pub fn start_turn(
        &mut self,
        query: String,
        handle: &Actor<Self>,
    ) -> Result<Turn, AgentError> {
        if !matches!(self.stage, AgentStage::Idle) {
            return Err(AgentError::Busy);
        }
        let Some(mut conversation) = self.conversation.take() else {
            error!("conversation is missing while idle");
            return Err(AgentError::Busy);
        };

        let id = self.next_turn_id;
        self.next_turn_id += 1;
        let snapshot = conversation.snapshot();
        let token = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let ctx = TurnContext {
            model_client: self.model_client.clone(),
            registry: Arc::clone(&self.registry),
            max_rounds: self.max_rounds,
            events: EventSink::new(events_tx, token.clone()),
            token: token.clone(),
        };
        let task = tokio::spawn(
            async move {
                let outcome = run_turn(&ctx, &mut conversation, query).await;
                debug!("finished: {outcome:?}");
                (conversation, outcome)
            }
            .instrument(debug_span!("turn", id)),
        );
        // The conversation has to come back even if the turn task panics.
        let handle = handle.clone();
        tokio::spawn(async move {
            let (conversation, outcome) = match task.await {
                Ok((conversation, outcome)) => (Some(conversation), outcome),
                Err(err) => {
                    error!("turn {id} crashed: {err}");
                    let reason = format!("{err}");
                    (None, TurnOutcome::Failed(TurnError::Interrupted(reason)))
                }
            };
            handle
                .send(TurnFinished {
                    turn_id: id,
                    conversation,
                    outcome,
                })
                .ok();
        });

        self.stage = AgentStage::Running(RunningTurn {
            id,
            token,
            snapshot,
            outcome_tx,
        });
        Ok(Turn {
            events: events_rx,
            outcome: outcome_rx,
        })
    }

    pub fn cancel_turn(&mut self) {
        let stage = std::mem::replace(&mut self.stage, AgentStage::Idle);
        self.stage = match stage {
            AgentStage::Running(turn) => {
                debug!("cancelling turn {}", turn.id);
                turn.token.cancel();
                AgentStage::Aborting(turn)
            }
            stage => stage,
        };
    }

    fn finish_turn(
        &mut self,
        turn_id: u64,
        conversation: Option<Conversation>,
        outcome: TurnOutcome,
    ) {
        let stage = std::mem::replace(&mut self.stage, AgentStage::Idle);
        let (turn, aborting) = match stage {
            AgentStage::Running(turn) if turn.id == turn_id => (turn, false),
            AgentStage::Aborting(turn) if turn.id == turn_id => (turn, true),
            stage => {
                error!("got the result of an unknown turn {turn_id}");
                self.stage = stage;
                return;
            }
        };

        let mut conversation = conversation.unwrap_or_else(|| {
            warn!("history of turn {turn_id} is lost, starting over");
            Conversation::new(self.system_prompt.as_str())
        });
        // A cancel that raced with a normal finish still wins.
        let outcome = if aborting || matches!(outcome, TurnOutcome::Aborted) {
            conversation.restore(turn.snapshot);
            TurnOutcome::Aborted
        } else {
            outcome
        };
        self.conversation = Some(conversation);
        turn.outcome_tx.send(outcome).ok();
    }
}

#[derive(Debug)]
pub struct CancelTurn;

impl Message<AgentState> for CancelTurn {
    #[inline]
    fn handle(self, state: &mut AgentState, _handle: &Actor<AgentState>) {
        state.cancel_turn();
    }
}

#[derive(Debug)]
struct TurnFinished {
    turn_id: u64,
    conversation: Option<Conversation>,
    outcome: TurnOutcome,
}

impl Message<AgentState> for TurnFinished {
    #[inline]
    fn handle(self, state: &mut AgentState, _handle: &Actor<AgentState>) {
        state.finish_turn(self.turn_id, self.conversation, self.outcome);
    }
}
