use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoUtc;

use mcp_dispatcher::proxy::{self, DEFAULT_CONTENT_TYPE, DEFAULT_ENDPOINT, HttpForwarder};
use mcp_dispatcher::transport;

/// Forward newline-delimited MCP requests from stdin to an HTTP endpoint.
#[derive(Parser, Debug)]
#[command(name = "mcp-proxy")]
struct Cli {
    /// HTTP endpoint to proxy requests to
    #[arg(long, env = "MCP_PROXY_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
    /// Content-Type header for HTTP requests
    #[arg(long, default_value = DEFAULT_CONTENT_TYPE)]
    content_type: String,
    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mcp_dispatcher=info".parse()?))
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let forwarder = HttpForwarder::new(
        &cli.endpoint,
        &cli.content_type,
        Duration::from_secs(cli.timeout),
    )?;

    let shutdown = CancellationToken::new();
    transport::cancel_on_shutdown_signal(shutdown.clone());

    proxy::run(&forwarder, tokio::io::stdin(), tokio::io::stdout(), shutdown).await
}
