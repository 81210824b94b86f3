//! mcprt - Model Context Protocol runtime demo binary
//!
//! A thin CLI over the library: `serve http` starts the Streamable
//! HTTP transport, `serve ws` starts the WebSocket transport. Both
//! subcommands load the same configuration and run until `Ctrl-C`
//! triggers the graceful shutdown sequence.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcprt::config::RuntimeConfig;
use mcprt::handler::HandlerRegistry;
use mcprt::transport::{streamable_http, ws_server};

/// Command-line entry point for the MCP runtime demo server.
#[derive(Debug, Parser)]
#[command(name = "mcprt", about = "Model Context Protocol runtime demo server")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, default_value = "config/runtime.yaml", global = true)]
    config: String,

    /// Increase log verbosity
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a transport standalone.
    Serve {
        #[command(subcommand)]
        transport: Transport,
    },
}

#[derive(Debug, Subcommand)]
enum Transport {
    /// Run the Streamable HTTP transport (single `/mcp` endpoint).
    Http {
        /// Override the configured HTTP bind address.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run the WebSocket server transport.
    Ws {
        /// Override the configured WebSocket bind address.
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = RuntimeConfig::load(&cli.config)?;
    let handlers = HandlerRegistry::new();
    let shutdown = CancellationToken::new();

    let Commands::Serve { transport } = cli.command;
    let server: std::pin::Pin<Box<dyn std::future::Future<Output = mcprt::Result<()>>>> =
        match transport {
            Transport::Http { bind } => {
                if let Some(bind) = bind {
                    config.http.bind_addr = bind;
                }
                config.validate()?;
                Box::pin(streamable_http::serve(config.clone(), handlers, shutdown.clone()))
            }
            Transport::Ws { bind } => {
                if let Some(bind) = bind {
                    config.websocket.bind_addr = bind;
                }
                config.validate()?;
                Box::pin(ws_server::serve(config.clone(), handlers, shutdown.clone()))
            }
        };

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            shutdown.cancel();
        }
    }

    Ok(())
}

/// Initialize the tracing subscriber from the `RUST_LOG` environment
/// variable, falling back to `mcprt=info` (or `mcprt=debug` with `-v`).
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "mcprt=debug" } else { "mcprt=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
