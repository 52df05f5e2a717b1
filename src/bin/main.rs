use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoUtc;

use mcp_dispatcher::config::{
    DEFAULT_HTTP_ADDR, DEFAULT_PROVIDER_DIR, DEFAULT_SERVER_NAME, DEFAULT_SERVER_VERSION,
};
use mcp_dispatcher::transport::{self, http, stdio};
use mcp_dispatcher::{ServerConfig, Transport, create_dispatcher, prepare_provider_dir};

#[derive(Parser)]
#[command(name = "mcp-server")]
#[command(about = "Serve the tools of a directory of MCP provider executables")]
struct Cli {
    /// Directory holding the provider executables
    #[arg(long, global = true, env = "MCP_DIR", default_value = DEFAULT_PROVIDER_DIR)]
    mcp_dir: PathBuf,
    /// Name announced to providers during the handshake
    #[arg(long, global = true, default_value = DEFAULT_SERVER_NAME)]
    name: String,
    /// Version announced to providers during the handshake
    #[arg(long = "version", global = true, default_value = DEFAULT_SERVER_VERSION)]
    server_version: String,
    /// Seconds allowed for each provider's discovery handshake
    #[arg(long, global = true, env = "MCP_DISCOVERY_TIMEOUT", default_value_t = 30)]
    discovery_timeout: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-RPC requests over HTTP POST
    Http {
        #[arg(long, env = "MCP_HTTP_ADDR", default_value = DEFAULT_HTTP_ADDR)]
        bind: SocketAddr,
    },
    /// Serve newline-delimited JSON-RPC requests on stdin/stdout
    Stdio,
    /// Load all providers, print the aggregated catalog and exit
    Discover,
}

impl Cli {
    fn server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            provider_dir: prepare_provider_dir(&self.mcp_dir)?,
            name: self.name.clone(),
            version: self.server_version.clone(),
            discovery_timeout: Duration::from_secs(self.discovery_timeout),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the stdio transport, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mcp_dispatcher=info".parse()?))
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.server_config()?;
    info!("Loading providers from {}", config.provider_dir.display());

    let (dispatcher, summary) = create_dispatcher(&config).await?;
    info!(
        "Loaded {} providers with {} tools ({} failed discovery)",
        summary.providers,
        summary.tools,
        summary.failures.len()
    );

    let transport = match cli.command {
        Commands::Http { bind } => Transport::Http { bind },
        Commands::Stdio => Transport::Stdio,
        Commands::Discover => {
            for (name, tool) in dispatcher.registry().list_all_tools().await {
                match tool.description {
                    Some(description) => println!("{name}\t{description}"),
                    None => println!("{name}"),
                }
            }
            for failure in &summary.failures {
                eprintln!("warning: {failure}");
            }
            return Ok(());
        }
    };

    let shutdown = CancellationToken::new();
    transport::cancel_on_shutdown_signal(shutdown.clone());
    transport::reload_on_hangup(
        dispatcher.registry().clone(),
        config.provider_dir.clone(),
        shutdown.clone(),
    );

    match transport {
        Transport::Http { bind } => {
            info!("Starting {} {} in HTTP mode on {}", config.name, config.version, bind);
            http::serve(dispatcher, bind, shutdown.clone()).await?;
        }
        Transport::Stdio => {
            info!("Starting {} {} in stdio mode", config.name, config.version);
            stdio::serve_stdio(dispatcher, shutdown.clone()).await?;
        }
    }

    // Stops the SIGHUP listener after end of input.
    shutdown.cancel();
    Ok(())
}
