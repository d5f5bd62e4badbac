//! warpcalld — serve a demo application with the warpcall server core.
//!
//! # Usage
//!
//! ```text
//! warpcalld serve --config warpcall.toml --app echo
//! warpcalld serve --listen 0.0.0.0:8080 --max-concurrency 16
//! warpcalld check-config --config warpcall.toml
//! ```

mod apps;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use warpcall_server::{Server, ServerConfig};

use crate::apps::DemoApp;

#[derive(Parser)]
#[command(name = "warpcalld", version, about = "warpcall application server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a built-in application until Ctrl-C.
    Serve {
        /// Path to warpcall.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to listen on (overrides server.listen).
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Maximum concurrently running handlers (overrides server.max_concurrency).
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Value reported as SERVER_NAME (overrides server.server_name).
        #[arg(long)]
        server_name: Option<String>,

        /// Which demo application to serve.
        #[arg(long, value_enum, default_value = "hello")]
        app: DemoApp,
    },

    /// Parse and validate a configuration file, then print it.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,warpcall=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            listen,
            max_concurrency,
            server_name,
            app,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if let Some(max) = max_concurrency {
                config.server.max_concurrency = max;
            }
            if let Some(name) = server_name {
                config.server.server_name = name;
            }
            config.validate()?;
            run_serve(config, app)
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(ServerConfig::default()),
    }
}

fn run_serve(config: ServerConfig, app: DemoApp) -> anyhow::Result<()> {
    // Handlers run on the blocking pool; size it to the admission bound.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.server.max_concurrency)
        .thread_name("warpcall")
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        info!(app = ?app, "warpcalld starting");

        let server = Server::bind(config, app.build()).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
                // Keep the sender alive so the server runs until killed.
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        });

        server.serve(shutdown_rx).await?;
        info!("warpcalld stopped");
        Ok::<(), anyhow::Error>(())
    })
}
