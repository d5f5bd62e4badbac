//! warpcall-core — the synchronous calling convention.
//!
//! Everything the server core needs between "a request was parsed" and
//! "bytes went onto the socket", with no networking of its own:
//!
//! - **Environ**: the standardized request description handed to the
//!   application ([`build_environ`])
//! - **Calling convention**: [`Application`], [`StartResponse`], [`Body`]
//!   and the optional [`Releasable`] capability of a body producer
//! - **Response framing**: [`ResponseHeaders`] decides between
//!   Content-Length, connection-close and chunked framing
//! - **Response writer**: [`ResponseWriter`] implements the
//!   `start_response` / `write` state machine over any `std::io::Write`
//!
//! # Exchange flow
//!
//! ```text
//! Request ──build_environ──▶ Environ
//!                              │
//!                              ▼
//!             Application::call(environ, start_response)
//!                │                         │
//!                │ start_response(...)     │ returns Body
//!                ▼                         ▼
//!          ResponseWriter ◀──── write(chunk) for each chunk
//!                │
//!                ▼
//!       HTTP/1.1 status, headers, framed body
//! ```

pub mod app;
pub mod environ;
pub mod error;
pub mod header;
pub mod request;
pub mod response;
pub mod writer;

pub use app::{Application, Body, Releasable, ResponseSink, StartResponse, Write};
pub use environ::{EnvValue, Environ, Input, build_environ};
pub use error::{ApplicationError, ProtocolError};
pub use header::{Header, HeaderMap};
pub use request::Request;
pub use response::{Framing, ResponseHeaders};
pub use writer::{ResponseWriter, WriterState};
