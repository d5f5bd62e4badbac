//! The `start_response` / `write` state machine.
//!
//! ```text
//!  NotStarted ──begin──▶ HeadersPending ──first write──▶ HeadersSent
//!                         │    ▲                           │
//!                         └────┘ begin(exc_info)           │ empty write
//!                                                          ▼ (chunked only)
//!                                                   LastChunkWritten
//! ```

use std::io;

use tracing::debug;

use crate::app::ResponseSink;
use crate::error::{ApplicationError, ProtocolError};
use crate::header::Header;
use crate::response::{Framing, ResponseHeaders};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    NotStarted,
    HeadersPending,
    HeadersSent,
    LastChunkWritten,
}

/// Frames one response onto `W`.
///
/// Owned by the connection handler for the length of one exchange. The
/// underlying writer is flushed after every `write`.
pub struct ResponseWriter<W: io::Write> {
    out: W,
    server_headers: Vec<Header>,
    state: WriterState,
    status: String,
    headers: Option<ResponseHeaders>,
    body_bytes: u64,
}

impl<W: io::Write> ResponseWriter<W> {
    pub fn new(out: W) -> Self {
        Self::with_server_headers(out, Vec::new())
    }

    /// A writer that puts `server_headers` ahead of the application's.
    pub fn with_server_headers(out: W, server_headers: Vec<Header>) -> Self {
        Self {
            out,
            server_headers,
            state: WriterState::NotStarted,
            status: String::new(),
            headers: None,
            body_bytes: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Status accepted by `start_response`, if any.
    pub fn status(&self) -> Option<&str> {
        self.headers.as_ref().map(|_| self.status.as_str())
    }

    pub fn headers(&self) -> Option<&ResponseHeaders> {
        self.headers.as_ref()
    }

    pub fn framing(&self) -> Option<Framing> {
        self.headers.as_ref().map(ResponseHeaders::framing)
    }

    /// Body bytes accepted so far, excluding chunk framing.
    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Complete the response after the body was drained.
    ///
    /// Sends the head if nothing was written yet and, under chunked
    /// framing, the terminal chunk if the application did not. A 1xx, 204
    /// or 304 response with nothing written gets the head only. Does
    /// nothing when `start_response` was never called.
    pub fn finish(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            WriterState::NotStarted | WriterState::LastChunkWritten => Ok(()),
            WriterState::HeadersPending if status_forbids_body(&self.status) => {
                self.send_head()?;
                self.out.flush()?;
                self.state = WriterState::LastChunkWritten;
                Ok(())
            }
            WriterState::HeadersPending => self.write(&[]),
            WriterState::HeadersSent if self.framing() == Some(Framing::Chunked) => {
                self.write(&[])
            }
            WriterState::HeadersSent => {
                self.out.flush()?;
                Ok(())
            }
        }
    }

    fn send_head(&mut self) -> Result<(), ProtocolError> {
        let Some(headers) = self.headers.as_ref() else {
            return Err(ProtocolError::WriteBeforeStartResponse);
        };
        // A partially written head is still a sent head.
        self.state = WriterState::HeadersSent;
        write!(self.out, "HTTP/1.1 {}\r\n", self.status)?;
        self.out.write_all(headers.to_wire().as_bytes())?;
        Ok(())
    }

    fn send_body(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if self.framing() == Some(Framing::Chunked) {
            write!(self.out, "{:02X}\r\n", data.len())?;
            if data.is_empty() {
                self.state = WriterState::LastChunkWritten;
            } else {
                self.out.write_all(data)?;
                self.out.write_all(b"\r\n")?;
            }
        } else {
            self.out.write_all(data)?;
        }
        self.out.flush()?;
        self.body_bytes += data.len() as u64;
        Ok(())
    }
}

/// Statuses whose responses never carry a body.
fn status_forbids_body(status: &str) -> bool {
    match status.get(..3).and_then(|code| code.parse::<u16>().ok()) {
        Some(code) => (100..200).contains(&code) || code == 204 || code == 304,
        None => false,
    }
}

impl<W: io::Write> ResponseSink for ResponseWriter<W> {
    fn begin(
        &mut self,
        status: &str,
        headers: Vec<Header>,
        exc_info: Option<ApplicationError>,
    ) -> Result<(), ProtocolError> {
        match (self.state, exc_info) {
            (WriterState::HeadersSent | WriterState::LastChunkWritten, Some(err)) => {
                return Err(ProtocolError::HeadersAlreadySent(err));
            }
            (WriterState::HeadersPending, Some(err)) => {
                debug!(
                    old_status = %self.status,
                    new_status = status,
                    error = %err,
                    "replacing pending response headers"
                );
            }
            (WriterState::NotStarted, _) => {}
            (_, None) => return Err(ProtocolError::HeadersAlreadySet),
        }

        self.status = status.to_string();
        self.headers = Some(ResponseHeaders::assemble(
            self.server_headers.iter().cloned(),
            headers,
        ));
        self.state = WriterState::HeadersPending;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        match self.state {
            WriterState::NotStarted => Err(ProtocolError::WriteBeforeStartResponse),
            WriterState::LastChunkWritten => Err(ProtocolError::WriteAfterLastChunk),
            WriterState::HeadersPending => {
                self.send_head()?;
                self.send_body(data)
            }
            WriterState::HeadersSent => self.send_body(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(list: &[(&str, &str)]) -> Vec<Header> {
        list.iter().copied().map(Header::from).collect()
    }

    fn wire(writer: ResponseWriter<Vec<u8>>) -> String {
        String::from_utf8(writer.into_inner()).unwrap()
    }

    /// Counts flushes so tests can check the per-write flush.
    #[derive(Default)]
    struct FlushCounter {
        bytes: Vec<u8>,
        flushes: usize,
    }

    impl io::Write for FlushCounter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    struct BrokenPipe;

    impl io::Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn chunks_are_byte_exact() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", Vec::new(), None).unwrap();
        w.write(b"0123456789").unwrap();
        w.write(b"").unwrap();

        assert_eq!(
            wire(w),
            "HTTP/1.1 200 OK\r\n\
             Transfer-Encoding: chunked\r\n\
             \r\n\
             0A\r\n0123456789\r\n\
             00\r\n"
        );
    }

    #[test]
    fn chunk_size_is_uppercase_hex() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", Vec::new(), None).unwrap();
        w.write(&[b'x'; 300]).unwrap();
        let out = wire(w);
        assert!(out.contains("\r\n\r\n12C\r\n"));
    }

    #[test]
    fn write_after_terminal_chunk_fails() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", Vec::new(), None).unwrap();
        w.write(b"").unwrap();
        assert_eq!(w.state(), WriterState::LastChunkWritten);

        let err = w.write(b"late").unwrap_err();
        assert_eq!(err.to_string(), "write() after last chunk written");
    }

    #[test]
    fn content_length_body_is_verbatim() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", headers(&[("Content-Length", "10")]), None)
            .unwrap();
        w.write(b"01234").unwrap();
        w.write(b"56789").unwrap();
        w.write(b"").unwrap();

        assert_eq!(w.state(), WriterState::HeadersSent);
        assert_eq!(w.body_bytes(), 10);
        assert_eq!(
            wire(w),
            "HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789"
        );
    }

    #[test]
    fn connection_close_body_is_verbatim() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("404 Not Found", headers(&[("Connection", "close")]), None)
            .unwrap();
        w.write(b"gone").unwrap();
        assert_eq!(
            wire(w),
            "HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\ngone"
        );
    }

    #[test]
    fn server_headers_come_first() {
        let mut w = ResponseWriter::with_server_headers(
            Vec::new(),
            headers(&[("Server", "warpcall/0.1.0")]),
        );
        w.begin("200 OK", headers(&[("Content-Length", "0")]), None)
            .unwrap();
        w.finish().unwrap();
        assert_eq!(
            wire(w),
            "HTTP/1.1 200 OK\r\nServer: warpcall/0.1.0\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn write_before_start_response_fails() {
        let mut w = ResponseWriter::new(Vec::new());
        let err = w.write(b"x").unwrap_err();
        assert_eq!(err.to_string(), "write() before start_response()");
        assert!(w.get_ref().is_empty());
    }

    #[test]
    fn second_start_response_without_exc_info_fails() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", Vec::new(), None).unwrap();
        let err = w.begin("500 Internal Server Error", Vec::new(), None).unwrap_err();
        assert_eq!(err.to_string(), "Headers already set");
        assert_eq!(w.status(), Some("200 OK"));
    }

    #[test]
    fn second_start_response_after_send_without_exc_info_fails() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", Vec::new(), None).unwrap();
        w.write(b"x").unwrap();
        let err = w.begin("500 Internal Server Error", Vec::new(), None).unwrap_err();
        assert!(matches!(err, ProtocolError::HeadersAlreadySet));
    }

    #[test]
    fn exc_info_before_write_replaces_headers() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", headers(&[("Content-Length", "2")]), None)
            .unwrap();
        w.begin(
            "500 Internal Server Error",
            headers(&[("Content-Length", "4")]),
            Some(ApplicationError::new("template failed")),
        )
        .unwrap();
        assert_eq!(w.state(), WriterState::HeadersPending);
        w.write(b"oops").unwrap();

        let out = wire(w);
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(out.contains("Content-Length: 4\r\n"));
        assert!(!out.contains("Content-Length: 2"));
    }

    #[test]
    fn exc_info_after_write_returns_original_error() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", Vec::new(), None).unwrap();
        w.write(b"partial").unwrap();

        let err = w
            .begin(
                "500 Internal Server Error",
                Vec::new(),
                Some(ApplicationError::new("db down")),
            )
            .unwrap_err();
        let original = err.into_application_error().unwrap();
        assert_eq!(original.message(), "db down");
        assert_eq!(w.status(), Some("200 OK"));
    }

    #[test]
    fn exc_info_after_terminal_chunk_returns_original_error() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", Vec::new(), None).unwrap();
        w.write(b"").unwrap();
        let err = w
            .begin("500 Internal Server Error", Vec::new(), Some("late".into()))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::HeadersAlreadySent(_)));
    }

    #[test]
    fn start_response_alone_writes_nothing() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", Vec::new(), None).unwrap();
        assert!(w.get_ref().is_empty());
    }

    #[test]
    fn every_write_flushes() {
        let mut w = ResponseWriter::new(FlushCounter::default());
        w.begin("200 OK", Vec::new(), None).unwrap();
        w.write(b"a").unwrap();
        w.write(b"b").unwrap();
        w.write(b"").unwrap();
        assert_eq!(w.get_ref().flushes, 3);
    }

    #[test]
    fn io_failure_surfaces_as_protocol_error() {
        let mut w = ResponseWriter::new(BrokenPipe);
        w.begin("200 OK", Vec::new(), None).unwrap();
        let err = w.write(b"data").unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn finish_sends_head_and_terminal_chunk() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", Vec::new(), None).unwrap();
        w.finish().unwrap();
        assert_eq!(w.state(), WriterState::LastChunkWritten);
        assert_eq!(
            wire(w),
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n00\r\n"
        );
    }

    #[test]
    fn finish_sends_no_body_for_bodiless_status() {
        for status in ["204 No Content", "304 Not Modified", "101 Switching Protocols"] {
            let mut w = ResponseWriter::new(Vec::new());
            w.begin(status, Vec::new(), None).unwrap();
            w.finish().unwrap();
            assert_eq!(w.state(), WriterState::LastChunkWritten);
            assert_eq!(
                wire(w),
                format!("HTTP/1.1 {status}\r\nTransfer-Encoding: chunked\r\n\r\n")
            );
        }
    }

    #[test]
    fn status_code_classification() {
        assert!(status_forbids_body("204 No Content"));
        assert!(status_forbids_body("100 Continue"));
        assert!(!status_forbids_body("200 OK"));
        assert!(!status_forbids_body("oops"));
    }

    /// Accepts `budget` write calls, fails the next one, then accepts again.
    struct FailOnce {
        bytes: Vec<u8>,
        budget: usize,
        failed: bool,
    }

    impl io::Write for FailOnce {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 && !self.failed {
                self.failed = true;
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            }
            self.budget = self.budget.saturating_sub(1);
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_head_counts_as_sent() {
        let out = FailOnce {
            bytes: Vec::new(),
            budget: 1,
            failed: false,
        };
        let mut w = ResponseWriter::new(out);
        w.begin("200 OK", headers(&[("Content-Length", "2")]), None)
            .unwrap();

        let err = w.write(b"ok").unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
        assert_eq!(w.state(), WriterState::HeadersSent);

        let err = w
            .begin(
                "500 Internal Server Error",
                headers(&[("Content-Length", "4")]),
                Some(ApplicationError::new("db down")),
            )
            .unwrap_err();
        assert_eq!(err.into_application_error().unwrap().message(), "db down");

        let sent = String::from_utf8(w.into_inner().bytes).unwrap();
        assert_eq!(sent.matches("HTTP/1.1").count(), 1);
        assert!(!sent.contains("500"));
    }

    #[test]
    fn finish_adds_missing_terminal_chunk_once() {
        let mut w = ResponseWriter::new(Vec::new());
        w.begin("200 OK", Vec::new(), None).unwrap();
        w.write(b"abc").unwrap();
        w.finish().unwrap();
        w.finish().unwrap();
        assert!(wire(w).ends_with("03\r\nabc\r\n00\r\n"));
    }

    #[test]
    fn finish_without_start_response_is_noop() {
        let mut w = ResponseWriter::new(Vec::new());
        w.finish().unwrap();
        assert_eq!(w.state(), WriterState::NotStarted);
        assert!(w.get_ref().is_empty());
    }
}
