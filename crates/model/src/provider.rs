use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A language model endpoint that accepts a conversation plus a tool
/// catalog and answers with a stream of events.
///
/// Providers are treated as stateless by their callers. They may keep
/// connection pools or caches internally, but every request must be
/// self-contained, and the provider may be dropped at any time.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Sends a streaming request to the model.
    ///
    /// The returned future must not borrow from `self` or `req`, so that
    /// callers are free to move it to another task.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>>
    + Send
    + 'static;
}
