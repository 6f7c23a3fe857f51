use std::fmt::{self, Debug};
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use rewind_model::{
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent,
};
use tracing::Instrument;

pub(crate) type BoxError = Box<dyn ModelProviderError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = Result<ResponseStream, BoxError>> + Send>>;
type HandlerFn =
    Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// How often and how long a rejected model request is retried.
///
/// Only errors whose kind is retryable (rate limiting) are retried, and
/// only before the response starts streaming. A stream that breaks half
/// way is never replayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound of a single delay.
    pub max_interval: Duration,
    /// Give up once this much time has passed since the first attempt.
    pub max_elapsed_time: Duration,
}

impl RetryPolicy {
    fn backoff(&self) -> Option<ExponentialBackoff> {
        if self.max_elapsed_time.is_zero() {
            return None;
        }
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed_time),
            ..Default::default()
        };
        backoff.reset();
        Some(backoff)
    }
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Duration::from_secs(60),
        }
    }
}

/// A wrapper around a model provider that erases its type, so the rest of
/// the crate doesn't need a generic parameter for it.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    retry: RetryPolicy,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(async move {
                let resp = fut.await.map_err(|err| Box::new(err) as BoxError)?;
                Ok(ResponseStream {
                    inner: Box::pin(resp),
                })
            })
        });
        Self {
            handler_fn,
            retry: RetryPolicy::default(),
        }
    }

    #[inline]
    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// Sends a request and returns the response stream once the provider
    /// accepted it.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe, dropping the future abandons the pending
    /// attempt or retry delay.
    pub async fn send_request(
        &self,
        req: ModelRequest,
    ) -> Result<ResponseStream, BoxError> {
        let mut backoff = self.retry.backoff();
        let mut attempt = 1;
        async move {
            trace!("got a request: {req:?}");
            loop {
                let err = match (self.handler_fn)(req.clone()).await {
                    Ok(resp) => return Ok(resp),
                    Err(err) => err,
                };
                if !err.kind().is_retryable() {
                    error!("got an error: {err}");
                    return Err(err);
                }
                let Some(delay) =
                    backoff.as_mut().and_then(|b| b.next_backoff())
                else {
                    error!("giving up after {attempt} attempts: {err}");
                    return Err(err);
                };
                warn!(
                    "attempt {attempt} failed ({err}), retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
        .instrument(trace_span!("model client req"))
        .await
    }
}

impl Debug for ModelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

trait ErasedResponse: Send {
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, BoxError>>;
}

impl<R: ModelResponse> ErasedResponse for R {
    #[inline]
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, BoxError>> {
        ModelResponse::poll_next_event(self, cx)
            .map_err(|err| Box::new(err) as BoxError)
    }
}

/// A type-erased streaming response.
pub struct ResponseStream {
    inner: Pin<Box<dyn ErasedResponse>>,
}

impl ResponseStream {
    /// Waits for the next event, `None` once the response is complete.
    ///
    /// # Cancel safety
    ///
    /// Cancel safe as long as the provider's response is.
    #[inline]
    pub async fn next_event(
        &mut self,
    ) -> Result<Option<ModelResponseEvent>, BoxError> {
        let event = poll_fn(|cx| self.inner.as_mut().poll_next_event(cx)).await;
        trace!("got an event: {event:?}");
        event
    }
}

#[cfg(test)]
mod tests {
    use rewind_model::{ErrorKind, ModelMessage};
    use rewind_test_model::{PresetEvent, PresetResponse, TestModelProvider};

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::user("Hi")],
            tools: vec![],
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed_time: Duration::from_millis(200),
        }
    }

    async fn collect(mut stream: ResponseStream) -> String {
        let mut transcript = String::new();
        while let Some(event) = stream.next_event().await.unwrap() {
            if let ModelResponseEvent::MessageDelta(delta) = event {
                transcript.push_str(&delta);
            }
        }
        transcript
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_user_input_step();
        model_provider.add_assistant_response_step(
            PresetResponse::with_events([
                PresetEvent::MessageDelta("How ".to_owned()),
                PresetEvent::MessageDelta("are ".to_owned()),
                PresetEvent::MessageDelta("you?".to_owned()),
            ]),
        );

        let model_client = ModelClient::new(model_provider);
        for _ in 0..3 {
            let stream = model_client.send_request(request()).await.unwrap();
            assert_eq!(collect(stream).await, "How are you?");
        }
    }

    #[tokio::test]
    async fn test_retry_rate_limit() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_user_input_step();
        model_provider.add_assistant_response_step(
            PresetResponse::with_message("finally").with_failures(2),
        );

        let mut model_client = ModelClient::new(model_provider.clone());
        model_client.set_retry_policy(fast_retry());
        let stream = model_client.send_request(request()).await.unwrap();
        assert_eq!(collect(stream).await, "finally");
        assert_eq!(model_provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_user_input_step();
        model_provider.add_assistant_response_step(
            PresetResponse::with_message("never").with_failures(0),
        );

        let mut model_client = ModelClient::new(model_provider);
        model_client.set_retry_policy(fast_retry());
        let err = model_client.send_request(request()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider.clone());
        let err = model_client.send_request(request()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);
        // Non-retryable errors are reported right away.
        assert_eq!(model_provider.requests().len(), 1);
    }
}
