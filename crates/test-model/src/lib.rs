//! A local fake model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use rewind_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: Vec<PresetEvent>,
    finish_reason: ModelFinishReason,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();

        if this.event_idx > this.events.len() {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let Some(preset) = this.events.get(this.event_idx) else {
            this.event_idx += 1;
            return Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                this.finish_reason,
            ))));
        };
        let event = match preset {
            PresetEvent::MessageDelta(msg) => {
                ModelResponseEvent::MessageDelta(msg.clone())
            }
            PresetEvent::ReasoningDelta(msg) => {
                ModelResponseEvent::ReasoningDelta(msg.clone())
            }
            PresetEvent::ToolCall(req) => {
                ModelResponseEvent::ToolCall(req.clone())
            }
            PresetEvent::Usage(usage) => ModelResponseEvent::Usage(*usage),
            PresetEvent::Fail => {
                this.event_idx = this.events.len() + 1;
                return Poll::Ready(Err(Error {
                    message: "stream broke",
                    kind: ErrorKind::Transport,
                }));
            }
            // Nobody will wake us up, the caller has to give up.
            PresetEvent::Stall => return Poll::Pending,
        };
        this.event_idx += 1;
        Poll::Ready(Ok(Some(event)))
    }
}

#[derive(Clone)]
enum ConversationStep {
    Input,
    AssistantResponse(PresetResponse),
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to a request. The step is selected by the
/// number of history messages in the request: a request carrying `n`
/// messages is answered by the `n`-th step (0-based). Non-assistant messages
/// (system, user input, tool results) are represented by input steps.
///
/// If there are no enough steps in the script, an error will be returned.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<ConversationStep>,
    delay: Option<Duration>,
    attempts: Arc<Mutex<HashMap<usize, u64>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl TestModelProvider {
    /// Adds a step for the system message.
    #[inline]
    pub fn add_system_step(&mut self) {
        self.conversation_script.push(ConversationStep::Input);
    }

    #[inline]
    pub fn add_user_input_step(&mut self) {
        self.conversation_script.push(ConversationStep::Input);
    }

    /// Adds a step for a tool call result.
    #[inline]
    pub fn add_tool_result_step(&mut self) {
        self.conversation_script.push(ConversationStep::Input);
    }

    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.conversation_script
            .push(ConversationStep::AssistantResponse(preset));
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all the requests received so far, including failed ones.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn prepare_response(
        &self,
        req: &ModelRequest,
    ) -> Result<TestModelResponse, Error> {
        let step_idx = req.messages.len();
        let Some(step) = self.conversation_script.get(step_idx) else {
            return Err(Error {
                message: "no enough steps",
                kind: ErrorKind::Other,
            });
        };
        let ConversationStep::AssistantResponse(preset) = step else {
            return Err(Error {
                message: "not an assistant response step",
                kind: ErrorKind::Other,
            });
        };

        if let Some(failures) = preset.failures {
            let mut attempts = self.attempts.lock().map_err(|_| Error {
                message: "poisoned",
                kind: ErrorKind::Other,
            })?;
            let attempt = attempts.entry(step_idx).or_default();
            *attempt += 1;
            if failures == 0 || *attempt <= failures {
                return Err(Error {
                    message: "preset failure",
                    kind: ErrorKind::RateLimitExceeded,
                });
            }
        }

        Ok(TestModelResponse {
            events: preset.events.clone(),
            finish_reason: if preset.has_tool_call() {
                ModelFinishReason::ToolCalls
            } else {
                ModelFinishReason::Stop
            },
            event_idx: 0,
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            sleep: None,
        })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>>
    + Send
    + 'static
    {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(req.clone());
        }
        ready(self.prepare_response(req))
    }
}
