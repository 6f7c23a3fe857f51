use rewind_model::{ToolCallRequest, Usage};
use serde::{Deserialize, Serialize};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "reasoning_delta")]
    ReasoningDelta(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
    #[serde(rename = "usage")]
    Usage(Usage),
    /// Breaks the stream with a transport error.
    #[serde(rename = "fail")]
    Fail,
    /// Never produces anything after this point.
    #[serde(rename = "stall")]
    Stall,
}

impl PresetEvent {
    /// Shorthand for a tool call event.
    #[inline]
    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self::ToolCall(ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments: arguments.to_owned(),
        })
    }
}

/// The preset response for an assistant step.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failure` attempts.
    /// `Some(0)` means the request will fail infinitely.
    #[serde(default)]
    pub failures: Option<u64>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
        }
    }

    /// Creates a `PresetResponse` with a single message delta.
    #[inline]
    pub fn with_message<S: Into<String>>(message: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(message.into())])
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    pub(crate) fn has_tool_call(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let response = PresetResponse::with_events([
            PresetEvent::ReasoningDelta("Leave a note.".to_string()),
            PresetEvent::MessageDelta(
                "I have left a message for you.".to_string(),
            ),
            PresetEvent::tool_call(
                "1",
                "write_file",
                r#"{"path":"message.txt","content":"Hello, world!"}"#,
            ),
            PresetEvent::Stall,
        ])
        .with_failures(2);

        let serialized = serde_json::to_string(&response).unwrap();
        let deserialized: PresetResponse =
            serde_json::from_str(&serialized).unwrap();

        assert_eq!(response, deserialized);
        assert!(deserialized.has_tool_call());
    }
}
