//! Connection handler: one request, one response, then close.

use std::io::{self, BufRead, BufReader, BufWriter, Write as _};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use warpcall_core::{
    Application, Header, Releasable, ResponseSink, ResponseWriter, StartResponse, build_environ,
};

use crate::config::ServerConfig;
use crate::parser::{HttpParser, RequestParser};

/// State shared by every handler of one server.
pub struct ServerContext {
    config: ServerConfig,
    server_port: u16,
    application: Arc<dyn Application>,
    parser: Arc<dyn RequestParser>,
}

impl ServerContext {
    /// Context using the default [`HttpParser`] with the configured limits.
    pub fn new(config: ServerConfig, server_port: u16, application: Arc<dyn Application>) -> Self {
        let parser = Arc::new(HttpParser::new(config.limits));
        Self {
            config,
            server_port,
            application,
            parser,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn RequestParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// Headers the server puts ahead of the application's: `Server` and
    /// `Date`, each unless disabled.
    pub fn server_headers(&self) -> Vec<Header> {
        let server = &self.config.server;
        let mut headers = Vec::with_capacity(2);
        if !server.server_software.is_empty() {
            headers.push(Header::new("Server", server.server_software.as_str()));
        }
        if server.send_date_header {
            headers.push(Header::new("Date", http_date(Utc::now())));
        }
        headers
    }
}

/// IMF-fixdate as used by the `Date` header, e.g.
/// `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// How an exchange ended. Used for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The request could not be parsed; nothing was written.
    ParseFailed,
    /// `Application::call` returned an error.
    ApplicationFailed,
    /// The body producer yielded an error part way through.
    BodyAborted,
    /// Writing to the client failed, or the application broke protocol.
    WriteFailed,
}

#[derive(Clone)]
pub struct ConnectionHandler {
    ctx: Arc<ServerContext>,
}

impl ConnectionHandler {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServerContext {
        &self.ctx
    }

    /// Serve exactly one exchange on a blocking socket, then close it.
    ///
    /// Never fails: every error is logged and the connection is closed.
    pub fn handle(&self, socket: TcpStream, peer: SocketAddr) -> Outcome {
        let halves = socket
            .try_clone()
            .and_then(|r| Ok((r, socket.try_clone()?)));
        let (read_half, write_half) = match halves {
            Ok(halves) => halves,
            Err(e) => {
                warn!(%peer, error = %e, "failed to split connection");
                close_quietly([&mut SocketHandle(socket) as &mut dyn CloseHandle]);
                return Outcome::WriteFailed;
            }
        };

        let mut reader = ReadHandle(BufReader::new(read_half));
        let mut writer = WriteHandle(BufWriter::new(write_half));

        let outcome = self.serve_exchange(&mut reader.0, &mut writer.0, Some(peer));

        close_quietly([
            &mut reader as &mut dyn CloseHandle,
            &mut writer,
            &mut SocketHandle(socket),
        ]);
        outcome
    }

    /// Parse, call the application and frame its response onto `out`.
    pub fn serve_exchange<W: io::Write>(
        &self,
        reader: &mut dyn BufRead,
        out: W,
        peer: Option<SocketAddr>,
    ) -> Outcome {
        let request = match self.ctx.parser.parse(reader) {
            Ok(request) => request,
            Err(e) => {
                warn!(?peer, error = %e, "failed to parse request");
                return Outcome::ParseFailed;
            }
        };

        let server = &self.ctx.config.server;
        let mut environ = build_environ(&request, &server.server_name, self.ctx.server_port);
        if let Some(peer) = peer {
            environ = environ.with_remote_addr(peer);
        }
        if !server.server_software.is_empty() {
            environ = environ.with_server_software(&server.server_software);
        }

        let method = request.method();
        let path = request.path();
        debug!(?peer, method, path, "dispatching request");

        let mut writer = ResponseWriter::with_server_headers(out, self.ctx.server_headers());
        let result = {
            let mut start_response = StartResponse::new(&mut writer);
            self.ctx.application.call(environ, &mut start_response)
        };
        let body = match result {
            Ok(body) => body,
            Err(e) => {
                error!(?peer, method, path, error = %e, "application failed");
                return Outcome::ApplicationFailed;
            }
        };

        let (chunks, release) = body.into_parts();
        let _release = ReleaseGuard(release);

        for chunk in chunks {
            let data = match chunk {
                Ok(data) => data,
                Err(e) => {
                    error!(?peer, method, path, error = %e, "response body failed");
                    return Outcome::BodyAborted;
                }
            };
            if let Err(e) = writer.write(&data) {
                error!(?peer, method, path, error = %e, "failed to write response");
                return Outcome::WriteFailed;
            }
        }

        if let Err(e) = writer.finish() {
            error!(?peer, method, path, error = %e, "failed to complete response");
            return Outcome::WriteFailed;
        }

        info!(
            ?peer,
            method,
            path,
            status = writer.status().unwrap_or("-"),
            bytes = writer.body_bytes(),
            "request served"
        );
        Outcome::Completed
    }
}

/// Releases the body producer when dropped, whichever way draining ended.
struct ReleaseGuard(Option<Box<dyn Releasable + Send>>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(mut releasable) = self.0.take() {
            releasable.release();
        }
    }
}

// ── Closing ─────────────────────────────────────────────────────────

/// One of the three things closed at the end of an exchange.
pub trait CloseHandle {
    fn name(&self) -> &'static str;
    fn close(&mut self) -> io::Result<()>;
}

struct ReadHandle(BufReader<TcpStream>);
struct WriteHandle(BufWriter<TcpStream>);
struct SocketHandle(TcpStream);

impl CloseHandle for ReadHandle {
    fn name(&self) -> &'static str {
        "read"
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.get_ref().shutdown(Shutdown::Read)
    }
}

impl CloseHandle for WriteHandle {
    fn name(&self) -> &'static str {
        "write"
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.0.get_ref().shutdown(Shutdown::Write)
    }
}

impl CloseHandle for SocketHandle {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.shutdown(Shutdown::Both)
    }
}

/// Close each handle in order. A failure is logged and does not stop the
/// remaining closes.
pub fn close_quietly<'a>(handles: impl IntoIterator<Item = &'a mut dyn CloseHandle>) {
    for handle in handles {
        if let Err(e) = handle.close() {
            debug!(handle = handle.name(), error = %e, "close failed");
        }
    }
}
