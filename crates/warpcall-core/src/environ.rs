//! Environ: the request description handed to the application.
//!
//! Built by [`build_environ`] from a parsed [`Request`]. Keys follow the
//! CGI naming the calling convention is based on:
//!
//! ```text
//! REQUEST_METHOD   SCRIPT_NAME   PATH_INFO   QUERY_STRING
//! SERVER_NAME      SERVER_PORT   SERVER_PROTOCOL
//! CONTENT_TYPE     CONTENT_LENGTH              (unprefixed headers)
//! HTTP_<NAME>                                  (every other header)
//! wsgi.url_scheme  wsgi.multithread  wsgi.multiprocess  wsgi.run_once
//! wsgi.input                                   (see Environ::input)
//! ```

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::io::{self, BufRead, Read};
use std::net::SocketAddr;

use bytes::Bytes;
use serde::Serialize;

use crate::request::Request;

pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
pub const PATH_INFO: &str = "PATH_INFO";
pub const QUERY_STRING: &str = "QUERY_STRING";
pub const SERVER_NAME: &str = "SERVER_NAME";
pub const SERVER_PORT: &str = "SERVER_PORT";
pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
pub const SERVER_SOFTWARE: &str = "SERVER_SOFTWARE";
pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
pub const REMOTE_PORT: &str = "REMOTE_PORT";
pub const URL_SCHEME: &str = "wsgi.url_scheme";
pub const MULTITHREAD: &str = "wsgi.multithread";
pub const MULTIPROCESS: &str = "wsgi.multiprocess";
pub const RUN_ONCE: &str = "wsgi.run_once";

/// A single Environ value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EnvValue {
    Text(String),
    Flag(bool),
}

impl EnvValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EnvValue::Text(s) => Some(s),
            EnvValue::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            EnvValue::Flag(b) => Some(*b),
            EnvValue::Text(_) => None,
        }
    }
}

/// The request description passed to [`Application::call`](crate::Application::call).
///
/// Text and flag values live in one ordered map; `wsgi.input` is kept
/// apart as a typed reader because it is consumed, not looked up.
#[derive(Debug, Clone, Serialize)]
pub struct Environ {
    #[serde(flatten)]
    vars: BTreeMap<String, EnvValue>,
    #[serde(skip)]
    input: Input,
}

impl Environ {
    /// Text value for `key`, e.g. `environ.get("PATH_INFO")`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).and_then(EnvValue::as_text)
    }

    /// Boolean value for `key`, e.g. `environ.flag("wsgi.multithread")`.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.vars.get(key).and_then(EnvValue::as_flag)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Set or replace a text value. Intended for middleware.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), EnvValue::Text(value.into()));
    }

    /// `wsgi.input`: the request body as a forward-only byte stream.
    pub fn input(&mut self) -> &mut Input {
        &mut self.input
    }

    /// All values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnvValue)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Add `REMOTE_ADDR` and `REMOTE_PORT` for the connected peer.
    pub fn with_remote_addr(mut self, peer: SocketAddr) -> Self {
        self.set(REMOTE_ADDR, peer.ip().to_string());
        self.set(REMOTE_PORT, peer.port().to_string());
        self
    }

    /// Add `SERVER_SOFTWARE`.
    pub fn with_server_software(mut self, software: &str) -> Self {
        self.set(SERVER_SOFTWARE, software);
        self
    }
}

/// Build the Environ for `request` as served by `server_name:server_port`.
///
/// Total and pure. Header names are not validated: whatever the parser
/// accepted is mapped to a key. Repeated headers are joined with `,` in
/// arrival order, except `Content-Type`/`Content-Length` where the last
/// one wins.
pub fn build_environ(request: &Request, server_name: &str, server_port: u16) -> Environ {
    let mut vars = BTreeMap::new();
    let mut text = |key: &str, value: &str| {
        vars.insert(key.to_string(), EnvValue::Text(value.to_string()));
    };

    text(REQUEST_METHOD, request.method());
    text(SCRIPT_NAME, "");
    text(PATH_INFO, request.path());
    text(QUERY_STRING, request.query().unwrap_or(""));
    text(SERVER_NAME, server_name);
    text(SERVER_PORT, &server_port.to_string());
    text(SERVER_PROTOCOL, request.http_version());
    text(URL_SCHEME, "http");

    vars.insert(MULTITHREAD.to_string(), EnvValue::Flag(true));
    vars.insert(MULTIPROCESS.to_string(), EnvValue::Flag(true));
    vars.insert(RUN_ONCE.to_string(), EnvValue::Flag(false));

    for header in request.headers() {
        let key = environ_key(&header.name);
        let unprefixed = key == CONTENT_TYPE || key == CONTENT_LENGTH;
        match vars.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(EnvValue::Text(header.value.clone()));
            }
            Entry::Occupied(mut slot) => {
                let joined = match slot.get() {
                    EnvValue::Text(prev) if !unprefixed => format!("{prev},{}", header.value),
                    _ => header.value.clone(),
                };
                slot.insert(EnvValue::Text(joined));
            }
        }
    }

    Environ {
        vars,
        input: Input::new(request.body().clone()),
    }
}

/// Map a header name to its Environ key.
///
/// `Content-Type` → `CONTENT_TYPE`, `Content-Length` → `CONTENT_LENGTH`,
/// anything else → `HTTP_` + upper-cased name with `-` replaced by `_`.
pub fn environ_key(header_name: &str) -> String {
    if header_name.eq_ignore_ascii_case("content-type") {
        CONTENT_TYPE.to_string()
    } else if header_name.eq_ignore_ascii_case("content-length") {
        CONTENT_LENGTH.to_string()
    } else {
        format!("HTTP_{}", header_name.to_uppercase().replace('-', "_"))
    }
}

// ── wsgi.input ──────────────────────────────────────────────────────

/// Forward-only reader over the already buffered request body.
///
/// There is no seeking back: bytes handed out once are gone.
#[derive(Debug, Clone, Default)]
pub struct Input {
    body: Bytes,
    pos: usize,
}

impl Input {
    pub fn new(body: Bytes) -> Self {
        Self { body, pos: 0 }
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }

    /// Take everything not yet read without copying.
    pub fn read_all(&mut self) -> Bytes {
        let rest = self.body.slice(self.pos..);
        self.pos = self.body.len();
        rest
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = &self.body[self.pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl BufRead for Input {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(&self.body[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.body.len());
    }
}
