use bytes::Bytes;

use crate::header::HeaderMap;

/// One parsed HTTP request.
///
/// Produced by a request parser once per connection and never mutated
/// afterwards. The body is always fully buffered: by the time a `Request`
/// exists, every body byte has already been read off the socket.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    path: String,
    query: Option<String>,
    http_version: String,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    /// Create a request with a buffered body.
    ///
    /// `target` is the request target as it appears on the request line;
    /// it is split into path and query at the first `?`.
    pub fn new(
        method: impl Into<String>,
        target: &str,
        http_version: impl Into<String>,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method: method.into(),
            path,
            query,
            http_version: http_version.into(),
            headers,
            body: body.into(),
        }
    }

    /// Create an `HTTP/1.1` request with an empty body.
    pub fn empty(method: impl Into<String>, target: &str, headers: HeaderMap) -> Self {
        Self::new(method, target, "HTTP/1.1", headers, Bytes::new())
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The query string without the leading `?`, if the target had one.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The protocol version, e.g. `HTTP/1.1`.
    pub fn http_version(&self) -> &str {
        &self.http_version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}
