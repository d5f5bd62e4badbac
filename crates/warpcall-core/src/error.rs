//! Error types for the calling convention.

use std::fmt;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error raised by the application.
///
/// Carries a human-readable message and, optionally, the error that caused
/// it. This is also the value passed as `exc_info` to
/// [`StartResponse::call`](crate::StartResponse::call): if headers already
/// went out, the very same error comes back inside
/// [`ProtocolError::HeadersAlreadySent`].
#[derive(Debug)]
pub struct ApplicationError {
    message: String,
    source: Option<BoxError>,
}

impl ApplicationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, using its display form as the message.
    pub fn from_source(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<String> for ApplicationError {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ApplicationError {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<std::io::Error> for ApplicationError {
    fn from(err: std::io::Error) -> Self {
        Self::from_source(err)
    }
}

impl From<ProtocolError> for ApplicationError {
    fn from(err: ProtocolError) -> Self {
        Self::from_source(err)
    }
}

/// Misuse of the `start_response` / `write` protocol, or a failure to put
/// bytes on the wire.
///
/// Returned synchronously to the application; the server never turns one
/// of these into an HTTP error response.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("write() before start_response()")]
    WriteBeforeStartResponse,

    #[error("Headers already set")]
    HeadersAlreadySet,

    #[error("write() after last chunk written")]
    WriteAfterLastChunk,

    /// `exc_info` arrived after the status line was already on the wire.
    /// Holds the application's original error.
    #[error("headers already sent: {0}")]
    HeadersAlreadySent(#[source] ApplicationError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Recover the application's error from a rejected exception hand-off.
    pub fn into_application_error(self) -> Option<ApplicationError> {
        match self {
            ProtocolError::HeadersAlreadySent(err) => Some(err),
            _ => None,
        }
    }
}
