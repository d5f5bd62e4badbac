//! Built-in demo applications.

use std::sync::Arc;

use bytes::Bytes;
use clap::ValueEnum;
use tracing::debug;
use warpcall_core::{Application, ApplicationError, Body, Environ, Releasable, StartResponse};

const ECHO_SLICE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoApp {
    /// Fixed greeting framed with Content-Length.
    Hello,
    /// Request body echoed back in chunked slices.
    Echo,
    /// The Environ as JSON, framed by closing the connection.
    Environ,
}

impl DemoApp {
    pub fn build(self) -> Arc<dyn Application> {
        match self {
            DemoApp::Hello => Arc::new(hello),
            DemoApp::Echo => Arc::new(echo),
            DemoApp::Environ => Arc::new(environ),
        }
    }
}

pub fn hello(
    environ: Environ,
    start_response: &mut StartResponse<'_>,
) -> Result<Body, ApplicationError> {
    let name = environ.get("SERVER_NAME").unwrap_or("warpcall");
    let body = format!("Hello from {name}!\n");
    let length = body.len().to_string();
    start_response.call(
        "200 OK",
        &[
            ("Content-Type", "text/plain; charset=utf-8"),
            ("Content-Length", length.as_str()),
        ],
        None,
    )?;
    Ok(Body::once(body))
}

/// Logs when the server is done with an echo body.
struct EchoRelease {
    path: String,
    bytes: usize,
}

impl Releasable for EchoRelease {
    fn release(&mut self) {
        debug!(path = %self.path, bytes = self.bytes, "echo body released");
    }
}

pub fn echo(
    mut environ: Environ,
    start_response: &mut StartResponse<'_>,
) -> Result<Body, ApplicationError> {
    let content_type = environ
        .get("CONTENT_TYPE")
        .unwrap_or("application/octet-stream")
        .to_string();
    let path = environ.get("PATH_INFO").unwrap_or("/").to_string();
    let input = environ.input().read_all();

    start_response.call("200 OK", &[("Content-Type", content_type.as_str())], None)?;

    let release = EchoRelease {
        path,
        bytes: input.len(),
    };
    Ok(Body::from_chunks(slices(input, ECHO_SLICE)).with_release(release))
}

fn slices(data: Bytes, size: usize) -> Vec<Bytes> {
    (0..data.len())
        .step_by(size)
        .map(|start| data.slice(start..(start + size).min(data.len())))
        .collect()
}

pub fn environ(
    environ: Environ,
    start_response: &mut StartResponse<'_>,
) -> Result<Body, ApplicationError> {
    let json = match serde_json::to_vec_pretty(&environ) {
        Ok(json) => json,
        Err(e) => {
            let err = ApplicationError::from_source(e);
            start_response.call(
                "500 Internal Server Error",
                &[("Connection", "close")],
                Some(err),
            )?;
            return Ok(Body::once("failed to render environ\n"));
        }
    };
    start_response.call(
        "200 OK",
        &[("Content-Type", "application/json"), ("Connection", "close")],
        None,
    )?;
    Ok(Body::once(json))
}
