use std::sync::Arc;

use rewind_model::{ModelMessage, ModelRequest, Usage};
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{AgentEvent, TurnError, TurnOutcome, TurnSummary};
use crate::accumulator::{AccumulatedResponse, Delta, ResponseAccumulator};
use crate::conversation::Conversation;
use crate::model_client::{BoxError, ModelClient};
use crate::tool::Registry;

/// Delivers events to the consumer of a turn.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
    token: CancellationToken,
}

impl EventSink {
    #[inline]
    pub fn new(tx: mpsc::Sender<AgentEvent>, token: CancellationToken) -> Self {
        Self { tx, token }
    }

    /// Sends an event, waiting for room in the channel.
    ///
    /// Returns `false` if the turn got cancelled meanwhile. A consumer that
    /// went away is not an error, the turn keeps running without it.
    async fn emit(&self, event: AgentEvent) -> bool {
        select! {
            biased;

            _ = self.token.cancelled() => false,
            res = self.tx.send(event) => {
                if res.is_err() {
                    trace!("event receiver is gone");
                }
                true
            }
        }
    }
}

/// Everything a running turn needs besides the conversation.
pub(crate) struct TurnContext {
    pub model_client: ModelClient,
    pub registry: Arc<Registry>,
    pub max_rounds: usize,
    pub events: EventSink,
    pub token: CancellationToken,
}

/// Drives one turn until the model stops calling tools.
///
/// Every message produced on the way is appended to `conversation`. On
/// cancellation the function returns [`TurnOutcome::Aborted`] as soon as it
/// reaches a suspension point, leaving rollback to the caller.
pub(crate) async fn run_turn(
    ctx: &TurnContext,
    conversation: &mut Conversation,
    query: String,
) -> TurnOutcome {
    conversation.push(ModelMessage::user(query));

    let mut usage = Usage::default();
    let mut reasoning = String::new();
    for round in 1..=ctx.max_rounds {
        if ctx.token.is_cancelled() {
            return TurnOutcome::Aborted;
        }

        let request = ModelRequest {
            messages: conversation.messages().to_vec(),
            tools: ctx.registry.describe_all(),
        };
        debug!("round {round}: sending {} messages", request.messages.len());
        let resp = match stream_response(ctx, request).await {
            Ok(Some(resp)) => resp,
            Ok(None) => return TurnOutcome::Aborted,
            Err(err) => {
                error!("model request failed: {err}");
                ctx.events
                    .emit(AgentEvent::Error(format!("model error: {err}")))
                    .await;
                return TurnOutcome::Failed(TurnError::Model(err));
            }
        };

        usage += resp.usage;
        let message = resp.message;
        if let Some(text) = &message.reasoning {
            reasoning.push_str(text);
        }
        let tool_calls = message.tool_calls.clone();
        let answer = message.content.clone().unwrap_or_default();
        conversation.push(ModelMessage::Assistant(message));

        if tool_calls.is_empty() {
            return TurnOutcome::Completed(TurnSummary {
                answer,
                reasoning: if reasoning.is_empty() {
                    None
                } else {
                    Some(reasoning)
                },
                usage,
                rounds: round,
            });
        }

        for call in tool_calls {
            if ctx.token.is_cancelled() {
                return TurnOutcome::Aborted;
            }
            let started = AgentEvent::ToolCallStarted {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            };
            if !ctx.events.emit(started).await {
                return TurnOutcome::Aborted;
            }

            // Tools are not raced against cancellation, a started call
            // always runs to completion.
            let result =
                ctx.registry.dispatch(&call.name, call.arguments).await;
            let content = match result {
                Ok(output) => output,
                Err(err) => {
                    let text = err.to_string();
                    let event =
                        AgentEvent::Error(format!("{}: {text}", call.name));
                    if !ctx.events.emit(event).await {
                        return TurnOutcome::Aborted;
                    }
                    text
                }
            };
            conversation.push(ModelMessage::tool(call.id, content));
        }
    }

    warn!("giving up after {} rounds", ctx.max_rounds);
    ctx.events
        .emit(AgentEvent::Error(format!(
            "gave up after {} rounds of tool calls",
            ctx.max_rounds
        )))
        .await;
    TurnOutcome::Failed(TurnError::RoundLimitExceeded(ctx.max_rounds))
}

/// Streams one model response, forwarding text deltas as they arrive.
///
/// Returns `Ok(None)` when cancelled.
async fn stream_response(
    ctx: &TurnContext,
    request: ModelRequest,
) -> Result<Option<AccumulatedResponse>, BoxError> {
    let mut stream = select! {
        biased;

        _ = ctx.token.cancelled() => return Ok(None),
        res = ctx.model_client.send_request(request) => res?,
    };

    let mut acc = ResponseAccumulator::default();
    loop {
        let event = select! {
            biased;

            _ = ctx.token.cancelled() => return Ok(None),
            event = stream.next_event() => event?,
        };
        let Some(event) = event else {
            break;
        };
        let Some(delta) = acc.push(event) else {
            continue;
        };
        let event = match delta {
            Delta::Content(text) => AgentEvent::ContentDelta(text),
            Delta::Reasoning(text) => AgentEvent::ReasoningDelta(text),
        };
        if !ctx.events.emit(event).await {
            return Ok(None);
        }
    }

    let resp = acc.finish();
    if resp.finish_reason.is_none() {
        warn!("response ended without a finish reason");
    }
    Ok(Some(resp))
}
