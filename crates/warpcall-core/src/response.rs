//! Response header assembly and framing selection.

use crate::header::{Header, HeaderMap};

/// How the response body is delimited on the wire.
///
/// Exactly one discipline is active per response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The application supplied `Content-Length`; body bytes go out verbatim.
    ContentLength,
    /// The application supplied `Connection: close`; the end of the body is
    /// the end of the connection.
    ConnectionClose,
    /// Neither marker present; the server adds `Transfer-Encoding: chunked`
    /// and frames every write.
    Chunked,
}

/// The final, ordered response header list plus the framing flags derived
/// from it.
///
/// Computed once when `start_response` is accepted and never changed
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeaders {
    headers: HeaderMap,
    has_content_length: bool,
    has_connection_close: bool,
    has_transfer_encoding_chunked: bool,
}

impl ResponseHeaders {
    /// Merge server headers (first) with application headers (second) and
    /// choose the framing.
    ///
    /// When neither `Content-Length` nor `Connection: close` is present,
    /// `Transfer-Encoding: chunked` is appended last.
    pub fn assemble(
        server_headers: impl IntoIterator<Item = Header>,
        app_headers: impl IntoIterator<Item = Header>,
    ) -> Self {
        let mut headers: HeaderMap = server_headers.into_iter().collect();
        headers.extend(app_headers);

        let has_content_length = headers.contains("Content-Length");
        let has_connection_close = headers.contains_token("Connection", "close");
        let has_transfer_encoding_chunked = !has_content_length && !has_connection_close;

        if has_transfer_encoding_chunked {
            headers.insert("Transfer-Encoding", "chunked");
        }

        Self {
            headers,
            has_content_length,
            has_connection_close,
            has_transfer_encoding_chunked,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn has_content_length(&self) -> bool {
        self.has_content_length
    }

    pub fn has_connection_close(&self) -> bool {
        self.has_connection_close
    }

    pub fn has_transfer_encoding_chunked(&self) -> bool {
        self.has_transfer_encoding_chunked
    }

    /// The single active framing. `Content-Length` wins over
    /// `Connection: close` when both are present.
    pub fn framing(&self) -> Framing {
        if self.has_content_length {
            Framing::ContentLength
        } else if self.has_connection_close {
            Framing::ConnectionClose
        } else {
            Framing::Chunked
        }
    }

    /// Header block as written after the status line, including the
    /// terminating blank line.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for header in &self.headers {
            out.push_str(&header.name);
            out.push_str(": ");
            out.push_str(&header.value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}
