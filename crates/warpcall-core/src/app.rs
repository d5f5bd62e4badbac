//! The calling convention between the server and an application.
//!
//! An [`Application`] receives the [`Environ`] and a [`StartResponse`].
//! It must call `start_response` exactly once (more only to hand off an
//! exception) and then either returns a [`Body`] for the server to drain,
//! writes through the [`Write`] handle it got back, or both.

use std::fmt;

use bytes::Bytes;

use crate::environ::Environ;
use crate::error::{ApplicationError, ProtocolError};
use crate::header::Header;

// ── Application ─────────────────────────────────────────────────────

/// A synchronous application callable.
///
/// Called once per request on a blocking worker thread. Shared across all
/// concurrent handlers, hence `Send + Sync`.
pub trait Application: Send + Sync {
    fn call(
        &self,
        environ: Environ,
        start_response: &mut StartResponse<'_>,
    ) -> Result<Body, ApplicationError>;
}

impl<F> Application for F
where
    F: Fn(Environ, &mut StartResponse<'_>) -> Result<Body, ApplicationError> + Send + Sync,
{
    fn call(
        &self,
        environ: Environ,
        start_response: &mut StartResponse<'_>,
    ) -> Result<Body, ApplicationError> {
        self(environ, start_response)
    }
}

// ── start_response / write ──────────────────────────────────────────

/// The server side of `start_response` and `write`.
///
/// Implemented by [`ResponseWriter`](crate::ResponseWriter); applications
/// only see it through [`StartResponse`] and [`Write`].
pub trait ResponseSink {
    fn begin(
        &mut self,
        status: &str,
        headers: Vec<Header>,
        exc_info: Option<ApplicationError>,
    ) -> Result<(), ProtocolError>;

    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError>;
}

/// The `start_response` callable handed to the application.
pub struct StartResponse<'a> {
    sink: &'a mut dyn ResponseSink,
}

impl<'a> StartResponse<'a> {
    pub fn new(sink: &'a mut dyn ResponseSink) -> Self {
        Self { sink }
    }

    /// Set the response status and headers.
    ///
    /// `status` is the full status text, e.g. `"200 OK"`. Nothing reaches
    /// the socket until the first write. Pass `exc_info` only when
    /// replacing a response because of an error; if headers already went
    /// out, the error comes back as
    /// [`ProtocolError::HeadersAlreadySent`].
    pub fn call(
        &mut self,
        status: &str,
        headers: &[(&str, &str)],
        exc_info: Option<ApplicationError>,
    ) -> Result<Write<'_>, ProtocolError> {
        let headers = headers.iter().copied().map(Header::from).collect();
        self.sink.begin(status, headers, exc_info)?;
        Ok(Write { sink: &mut *self.sink })
    }

    /// Write body bytes without holding on to the [`Write`] handle.
    pub fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.sink.write(data)
    }
}

/// The `write` callable returned by `start_response`.
pub struct Write<'w> {
    sink: &'w mut dyn ResponseSink,
}

impl Write<'_> {
    /// Send `data` as the next piece of the body.
    ///
    /// Under chunked framing an empty slice terminates the body.
    pub fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.sink.write(data)
    }
}

// ── Body ────────────────────────────────────────────────────────────

/// Optional cleanup capability of a body producer.
///
/// The server calls `release` exactly once after the body was drained or
/// draining was aborted.
pub trait Releasable {
    fn release(&mut self);
}

impl<F: FnMut()> Releasable for F {
    fn release(&mut self) {
        self()
    }
}

type Chunks = Box<dyn Iterator<Item = Result<Bytes, ApplicationError>> + Send>;

/// The iterable the application returns.
///
/// Each item is one chunk to write, or an error that aborts the response.
pub struct Body {
    chunks: Chunks,
    release: Option<Box<dyn Releasable + Send>>,
}

impl Body {
    /// No chunks. Everything was written through [`Write`], if anything.
    pub fn empty() -> Self {
        Self::from_results(std::iter::empty())
    }

    pub fn once(chunk: impl Into<Bytes>) -> Self {
        Self::from_results(std::iter::once(Ok(chunk.into())))
    }

    pub fn from_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        I::IntoIter: Send + 'static,
        C: Into<Bytes>,
    {
        Self::from_results(chunks.into_iter().map(|c| Ok(c.into())))
    }

    /// A producer that may fail part way through.
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<Bytes, ApplicationError>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            chunks: Box::new(results.into_iter()),
            release: None,
        }
    }

    /// Attach the cleanup hook. A second call replaces the first.
    pub fn with_release(mut self, release: impl Releasable + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn has_release(&self) -> bool {
        self.release.is_some()
    }

    /// Split into the chunk iterator and the cleanup hook.
    pub fn into_parts(self) -> (Chunks, Option<Box<dyn Releasable + Send>>) {
        (self.chunks, self.release)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("has_release", &self.release.is_some())
            .finish_non_exhaustive()
    }
}
