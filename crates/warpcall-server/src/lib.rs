//! warpcall-server — sockets to the calling convention.
//!
//! ```text
//!            ┌────────────────────────── Server::serve ─────────────────────────┐
//!            │                                                                  │
//! TCP ──▶ guard.admit() ──▶ accept() ──▶ spawn_blocking ──▶ ConnectionHandler    │
//!            │   (waits at capacity)                         │ parse            │
//!            │                                               │ build_environ    │
//!            │                                               │ application.call │
//!            │                                               │ drain body       │
//!            │                                               │ close r / w / s  │
//!            │                         permit released ◀─────┘                  │
//!            └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handlers run on tokio's blocking pool with plain blocking socket I/O,
//! since applications are synchronous callables.

pub mod config;
pub mod guard;
pub mod handler;
pub mod listener;
pub mod parser;

pub use config::{ConfigError, LimitsConfig, ServerConfig, ServerSection};
pub use guard::{Admission, ConcurrencyGuard};
pub use handler::{CloseHandle, ConnectionHandler, Outcome, ServerContext, close_quietly, http_date};
pub use listener::Server;
pub use parser::{HttpParser, ParseError, RequestParser};
