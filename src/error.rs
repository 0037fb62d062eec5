use std::fmt;

use url::Url;

/// Unified error type for the appshell crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The canonical URL has neither a matching loader nor fetchable content.
    ResolutionFailure(Url),
    /// A loader was invoked but the application endpoint closed before it
    /// signalled readiness.
    LoadFailure(Url),
    /// No handler is registered for the fetched content type, or the handler
    /// connection itself errored.
    ContentHandlerFailure(String),
    /// A previously ready instance's channel closed.
    ConnectionError(Url),
    /// Invalid input provided by the caller.
    InvalidInput(String),
    /// Internal error.
    Internal(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ResolutionFailure(url) => write!(f, "no loader or content for {url}"),
            BrokerError::LoadFailure(url) => write!(f, "application failed to load: {url}"),
            BrokerError::ContentHandlerFailure(msg) => write!(f, "content handler failure: {msg}"),
            BrokerError::ConnectionError(url) => write!(f, "application connection lost: {url}"),
            BrokerError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            BrokerError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Result type alias using [`BrokerError`].
pub type BrokerResult<T> = Result<T, BrokerError>;
