use rewind_model::{
    AssistantMessage, ModelFinishReason, ModelResponseEvent, ToolCallRequest,
    Usage,
};

/// A text fragment worth showing to the user while the response streams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delta {
    /// Part of the visible answer.
    Content(String),
    /// Part of the reasoning channel.
    Reasoning(String),
}

/// Rebuilds a complete assistant message from streamed response events.
///
/// Provider quirks end at the [`ModelResponseEvent`] boundary, so the loop
/// only ever deals with this type.
#[derive(Clone, Debug, Default)]
pub struct ResponseAccumulator {
    content: String,
    reasoning: String,
    tool_calls: Vec<ToolCallRequest>,
    usage: Usage,
    finish_reason: Option<ModelFinishReason>,
}

/// The outcome of a fully consumed response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccumulatedResponse {
    /// The reconstituted assistant message.
    pub message: AssistantMessage,
    /// Usage counters of this response, zero if the provider sent none.
    pub usage: Usage,
    /// The reported finish reason, if any.
    pub finish_reason: Option<ModelFinishReason>,
}

impl ResponseAccumulator {
    /// Records an event, returning the fragment to forward if there is one.
    ///
    /// Empty fragments are swallowed.
    pub fn push(&mut self, event: ModelResponseEvent) -> Option<Delta> {
        match event {
            ModelResponseEvent::MessageDelta(text) if !text.is_empty() => {
                self.content.push_str(&text);
                Some(Delta::Content(text))
            }
            ModelResponseEvent::ReasoningDelta(text) if !text.is_empty() => {
                self.reasoning.push_str(&text);
                Some(Delta::Reasoning(text))
            }
            ModelResponseEvent::MessageDelta(_)
            | ModelResponseEvent::ReasoningDelta(_) => None,
            ModelResponseEvent::ToolCall(req) => {
                self.tool_calls.push(req);
                None
            }
            ModelResponseEvent::Usage(usage) => {
                self.usage += usage;
                None
            }
            ModelResponseEvent::Completed(reason) => {
                self.finish_reason = Some(reason);
                None
            }
        }
    }

    /// Finishes accumulation.
    pub fn finish(self) -> AccumulatedResponse {
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        AccumulatedResponse {
            message: AssistantMessage {
                content: non_empty(self.content),
                reasoning: non_empty(self.reasoning),
                tool_calls: self.tool_calls,
            },
            usage: self.usage,
            finish_reason: self.finish_reason,
        }
    }
}
