use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use rewind_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest, Usage,
};

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, ToolCall};

#[derive(Default)]
struct PartialToolCall {
    index: Option<u32>,
    id: String,
    name: String,
    arguments: String,
}

struct PartialState {
    sse: Sse,
    tool_calls: Vec<PartialToolCall>,
    usage: Option<Usage>,
    finish_reason: Option<ModelFinishReason>,
    // Events decoded from the stream but not yet handed out. A single chunk
    // may carry reasoning and content at the same time.
    pending: VecDeque<ModelResponseEvent>,
    finished: bool,
}

impl PartialState {
    fn apply_chunk(&mut self, chunk: ChatCompletionChunk) {
        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let Some(mut choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(reasoning) = choice.delta.take_reasoning() {
            if !reasoning.is_empty() {
                self.pending
                    .push_back(ModelResponseEvent::ReasoningDelta(reasoning));
            }
        }
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                self.pending
                    .push_back(ModelResponseEvent::MessageDelta(content));
            }
        }
        for tool_call in choice.delta.tool_calls.unwrap_or_default() {
            self.merge_tool_call(tool_call);
        }

        if let Some(finish_reason) = choice.finish_reason {
            self.finish_reason = Some(match finish_reason.as_str() {
                "tool_calls" | "function_call" => ModelFinishReason::ToolCalls,
                "length" => ModelFinishReason::Length,
                _ => ModelFinishReason::Stop,
            });
        }
    }

    fn merge_tool_call(&mut self, tool_call: ToolCall) {
        let idx = match self
            .tool_calls
            .iter()
            .position(|t| t.index == tool_call.index)
        {
            Some(idx) => idx,
            None => {
                self.tool_calls.push(PartialToolCall {
                    index: tool_call.index,
                    ..Default::default()
                });
                self.tool_calls.len() - 1
            }
        };
        let partial = &mut self.tool_calls[idx];
        if let Some(id) = tool_call.id {
            partial.id.push_str(&id);
        }
        if let Some(function) = tool_call.function {
            if let Some(name) = function.name {
                partial.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                partial.arguments.push_str(&arguments);
            }
        }
    }

    /// Flushes the accumulated tool calls and the trailing events.
    ///
    /// `done` tells whether the server sent the `[DONE]` marker. Without
    /// it and without a finish reason, the stream was cut off.
    fn finish(&mut self, done: bool) -> Result<(), Error> {
        self.finished = true;
        let finish_reason = match self.finish_reason {
            Some(reason) => reason,
            None if done && !self.tool_calls.is_empty() => {
                ModelFinishReason::ToolCalls
            }
            None if done => ModelFinishReason::Stop,
            None => {
                return Err(Error::new(
                    "stream ended without a finish reason",
                    ErrorKind::Transport,
                ));
            }
        };

        let mut tool_calls = std::mem::take(&mut self.tool_calls);
        tool_calls.sort_by_key(|t| t.index);
        for tool_call in tool_calls {
            self.pending.push_back(ModelResponseEvent::ToolCall(
                ToolCallRequest {
                    id: tool_call.id,
                    name: tool_call.name,
                    arguments: tool_call.arguments,
                },
            ));
        }
        if let Some(usage) = self.usage.take() {
            self.pending.push_back(ModelResponseEvent::Usage(usage));
        }
        self.pending
            .push_back(ModelResponseEvent::Completed(finish_reason));
        Ok(())
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A streaming chat completion.
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub(crate) fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            tool_calls: Default::default(),
            usage: None,
            finish_reason: None,
            pending: Default::default(),
            finished: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    loop {
        if let Some(event) = partial_state.pending.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                partial_state.finish(false)?;
                continue;
            }
            Err(err) => {
                return Err(Error::new(
                    format!("{err:?}"),
                    ErrorKind::Transport,
                ));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            partial_state.finish(true)?;
            continue;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Transport))?;
        partial_state.apply_chunk(chunk);
    }
}
