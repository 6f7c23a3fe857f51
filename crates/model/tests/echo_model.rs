use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::{poll_fn, ready};
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use rewind_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent, Usage,
};
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct EchoError(ErrorKind);

impl Display for EchoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "echo failed: {}", self.0)
    }
}

impl Error for EchoError {}

impl ModelProviderError for EchoError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Thinks out loud once, then repeats the last user message word by word.
struct EchoResponse {
    pending: VecDeque<ModelResponseEvent>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl EchoResponse {
    fn new(input: &str) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(ModelResponseEvent::ReasoningDelta(
            "echoing".to_owned(),
        ));
        let words: Vec<_> = input.split(' ').collect();
        for (idx, word) in words.iter().enumerate() {
            let mut word = word.to_string();
            if idx + 1 < words.len() {
                word.push(' ');
            }
            pending.push_back(ModelResponseEvent::MessageDelta(word));
        }
        pending.push_back(ModelResponseEvent::Usage(Usage {
            prompt_tokens: 1,
            completion_tokens: words.len() as u64,
            total_tokens: words.len() as u64 + 1,
        }));
        pending.push_back(ModelResponseEvent::Completed(
            ModelFinishReason::Stop,
        ));
        Self {
            pending,
            sleep: None,
        }
    }
}

impl ModelResponse for EchoResponse {
    type Error = EchoError;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        let sleep = this
            .sleep
            .get_or_insert_with(|| Box::pin(sleep(Duration::from_millis(1))));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;
        Poll::Ready(Ok(this.pending.pop_front()))
    }
}

struct EchoProvider;

impl ModelProvider for EchoProvider {
    type Error = EchoError;
    type Response = EchoResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>>
    + Send
    + 'static
    {
        let last_user = req.messages.iter().rev().find_map(|msg| match msg {
            ModelMessage::User { content } => Some(content.as_str()),
            _ => None,
        });
        ready(match last_user {
            Some(input) => Ok(EchoResponse::new(input)),
            None => Err(EchoError(ErrorKind::Other)),
        })
    }
}

#[tokio::test]
async fn test_streaming_channels() {
    let req = ModelRequest {
        messages: vec![
            ModelMessage::system("You repeat things."),
            ModelMessage::user("Good morning"),
        ],
        tools: vec![],
    };
    let mut resp = EchoProvider.send_request(&req).await.unwrap();

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut usage = Usage::default();
    let mut finish_reason = None;
    while let Some(event) =
        poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
            .await
            .unwrap()
    {
        match event {
            ModelResponseEvent::MessageDelta(delta) => content.push_str(&delta),
            ModelResponseEvent::ReasoningDelta(delta) => {
                reasoning.push_str(&delta)
            }
            ModelResponseEvent::Usage(u) => usage += u,
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason)
            }
            ModelResponseEvent::ToolCall(req) => {
                unreachable!("unexpected tool call: {req:?}")
            }
        }
    }

    assert_eq!(content, "Good morning");
    assert_eq!(reasoning, "echoing");
    assert_eq!(usage.total_tokens, 3);
    assert_eq!(finish_reason, Some(ModelFinishReason::Stop));

    // Polling after completion keeps returning `None`.
    let event = poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx)).await;
    assert!(matches!(event, Ok(None)));
}

#[tokio::test]
async fn test_error() {
    let req = ModelRequest {
        messages: vec![ModelMessage::system("You repeat things.")],
        tools: vec![],
    };
    let Err(err) = EchoProvider.send_request(&req).await else {
        panic!("expected an error");
    };
    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(!err.kind().is_retryable());
}
