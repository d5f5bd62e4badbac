//! Request parsing.
//!
//! The server core consumes requests through [`RequestParser`]; the
//! default [`HttpParser`] reads one HTTP/1.x request with `httparse` and
//! buffers the whole body before the application runs.

use std::io::{self, BufRead, Read};

use bytes::Bytes;
use thiserror::Error;
use warpcall_core::{HeaderMap, Request};

use crate::config::LimitsConfig;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("connection closed before a request was received")]
    ConnectionClosed,

    #[error("connection closed in the middle of a request")]
    Incomplete,

    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("request has more than {limit} headers")]
    TooManyHeaders { limit: usize },

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("request body of {length} bytes exceeds limit of {limit}")]
    BodyTooLarge { length: usize, limit: usize },

    #[error("unsupported Transfer-Encoding: {0}")]
    UnsupportedTransferEncoding(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Reads exactly one request from a connection.
pub trait RequestParser: Send + Sync {
    fn parse(&self, stream: &mut dyn BufRead) -> Result<Request, ParseError>;
}

/// HTTP/1.0 and HTTP/1.1 request parser backed by `httparse`.
#[derive(Debug, Clone, Default)]
pub struct HttpParser {
    limits: LimitsConfig,
}

impl HttpParser {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Read up to and including the blank line that ends the head.
    /// Body bytes are left in `stream`.
    fn read_head(&self, stream: &mut dyn BufRead) -> Result<Vec<u8>, ParseError> {
        let max = self.limits.max_header_bytes;
        let mut head = Vec::with_capacity(max.min(4096));

        loop {
            let start = head.len();
            let budget = (max - start) as u64;
            let n = Read::take(&mut *stream, budget).read_until(b'\n', &mut head)?;

            let line = &head[start..];
            if n == 0 || !line.ends_with(b"\n") {
                return Err(if head.len() >= max {
                    ParseError::HeadTooLarge { limit: max }
                } else if head.is_empty() {
                    ParseError::ConnectionClosed
                } else {
                    ParseError::Incomplete
                });
            }

            if line == b"\r\n" || line == b"\n" {
                if start == 0 {
                    // Stray blank line ahead of the request line.
                    head.clear();
                    continue;
                }
                return Ok(head);
            }
        }
    }

    fn content_length(&self, headers: &HeaderMap) -> Result<usize, ParseError> {
        let mut length = None;
        for value in headers.get_all("Content-Length") {
            let parsed: usize = value
                .trim()
                .parse()
                .map_err(|_| ParseError::InvalidContentLength(value.to_string()))?;
            match length {
                Some(prev) if prev != parsed => {
                    return Err(ParseError::InvalidContentLength(value.to_string()));
                }
                _ => length = Some(parsed),
            }
        }

        let length = length.unwrap_or(0);
        if length > self.limits.max_body_bytes {
            return Err(ParseError::BodyTooLarge {
                length,
                limit: self.limits.max_body_bytes,
            });
        }
        Ok(length)
    }
}

impl RequestParser for HttpParser {
    fn parse(&self, stream: &mut dyn BufRead) -> Result<Request, ParseError> {
        let head = self.read_head(stream)?;

        let mut slots = vec![httparse::EMPTY_HEADER; self.limits.max_headers];
        let mut req = httparse::Request::new(&mut slots);
        match req.parse(&head) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => return Err(ParseError::Incomplete),
            Err(httparse::Error::TooManyHeaders) => {
                return Err(ParseError::TooManyHeaders {
                    limit: self.limits.max_headers,
                });
            }
            Err(e) => return Err(ParseError::Malformed(e.to_string())),
        }

        let method = req
            .method
            .ok_or_else(|| ParseError::Malformed("missing method".to_string()))?;
        let target = req
            .path
            .ok_or_else(|| ParseError::Malformed("missing request target".to_string()))?;
        let http_version = match req.version {
            Some(0) => "HTTP/1.0",
            Some(1) => "HTTP/1.1",
            other => {
                return Err(ParseError::Malformed(format!(
                    "unsupported version {other:?}"
                )));
            }
        };

        let headers: HeaderMap = req
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect();

        if let Some(te) = headers.get("Transfer-Encoding") {
            return Err(ParseError::UnsupportedTransferEncoding(te.to_string()));
        }

        let length = self.content_length(&headers)?;
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ParseError::Incomplete,
            _ => ParseError::Io(e),
        })?;

        Ok(Request::new(
            method,
            target,
            http_version,
            headers,
            Bytes::from(body),
        ))
    }
}
