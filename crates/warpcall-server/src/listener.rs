//! Listener/acceptor.
//!
//! `Server` owns the listening socket and the concurrency guard. Every
//! connection is admitted before it is accepted and then served on the
//! blocking pool while holding its admission.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{error, info, warn};
use warpcall_core::Application;

use crate::config::ServerConfig;
use crate::guard::{Admission, ConcurrencyGuard};
use crate::handler::{ConnectionHandler, ServerContext};
use crate::parser::{HttpParser, RequestParser};

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    guard: ConcurrencyGuard,
    handler: ConnectionHandler,
}

impl Server {
    /// Bind `config.server.listen` and serve `application` with the
    /// default request parser.
    pub async fn bind(config: ServerConfig, application: Arc<dyn Application>) -> anyhow::Result<Self> {
        let parser = Arc::new(HttpParser::new(config.limits));
        Self::bind_with_parser(config, application, parser).await
    }

    pub async fn bind_with_parser(
        config: ServerConfig,
        application: Arc<dyn Application>,
        parser: Arc<dyn RequestParser>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let listen = config.server.listen;
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("failed to bind {listen}"))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound address")?;

        let guard = ConcurrencyGuard::new(config.server.max_concurrency);
        let ctx = ServerContext::new(config, local_addr.port(), application).with_parser(parser);

        Ok(Self {
            listener,
            local_addr,
            guard,
            handler: ConnectionHandler::new(Arc::new(ctx)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    /// Accept and serve connections until `shutdown` turns `true` or its
    /// sender is dropped.
    ///
    /// Stops accepting immediately; handlers already running finish on
    /// their own.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            addr = %self.local_addr,
            max_concurrency = self.guard.capacity(),
            "warpcall listening"
        );

        loop {
            tokio::select! {
                accepted = self.admit_and_accept() => {
                    match accepted {
                        Ok((admission, stream, peer)) => self.dispatch(admission, stream, peer),
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(active = self.guard.active(), "warpcall shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn admit_and_accept(&self) -> io::Result<(Admission, TcpStream, SocketAddr)> {
        let admission = self.guard.admit().await;
        let (stream, peer) = self.listener.accept().await?;
        Ok((admission, stream, peer))
    }

    fn dispatch(&self, admission: Admission, stream: TcpStream, peer: SocketAddr) {
        let stream = match stream.into_std().and_then(|s| {
            s.set_nonblocking(false)?;
            Ok(s)
        }) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%peer, error = %e, "failed to prepare connection");
                return;
            }
        };

        let handler = self.handler.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _admission = admission;
            handler.handle(stream, peer)
        });

        tokio::spawn(async move {
            if let Err(e) = task.await {
                error!(%peer, error = %e, "connection handler panicked");
            }
        });
    }
}
