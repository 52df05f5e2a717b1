//! Stdio to HTTP forwarder behind the `mcp-proxy` binary.
//!
//! Lets a client that only speaks stdio reach an `mcp-server` running in HTTP
//! mode: every stdin line is POSTed as-is and the response body is written
//! back as one stdout line.

use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::session::MAX_FRAME_BYTES;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    #[error("failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to send HTTP request: {0}")]
    Send(#[source] reqwest::Error),

    #[error("received non-OK response: {0}")]
    Status(StatusCode),

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Posts request bodies to one endpoint, one at a time.
pub struct HttpForwarder {
    endpoint: Url,
    content_type: String,
    client: reqwest::Client,
    /// Requests are forwarded strictly one after another.
    in_flight: Mutex<()>,
}

impl HttpForwarder {
    pub fn new(endpoint: &str, content_type: &str, timeout: Duration) -> Result<Self, ForwardError> {
        let endpoint = Url::parse(endpoint).map_err(|source| ForwardError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ForwardError::UnsupportedScheme(endpoint.scheme().to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ForwardError::Client)?;

        Ok(Self {
            endpoint,
            content_type: content_type.to_string(),
            client,
            in_flight: Mutex::new(()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST `body` and return the response body of a 200 answer.
    pub async fn forward(&self, body: String) -> Result<String, ForwardError> {
        let _turn = self.in_flight.lock().await;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, &self.content_type)
            .body(body)
            .send()
            .await
            .map_err(ForwardError::Send)?;

        if response.status() != StatusCode::OK {
            return Err(ForwardError::Status(response.status()));
        }

        response.text().await.map_err(ForwardError::Body)
    }
}

/// Forward every line of `input` until end of input or `shutdown`.
///
/// A request that fails to forward is logged and skipped; only local I/O
/// errors end the loop with an error.
pub async fn run<R, W>(
    forwarder: &HttpForwarder,
    input: R,
    mut output: W,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    info!("MCP Proxy started. Forwarding requests to {}", forwarder.endpoint());

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("MCP Proxy shutting down");
                return Ok(());
            }
            next = lines.next() => next,
        };

        let line = match next {
            None => {
                debug!("stdin closed");
                return Ok(());
            }
            Some(line) => line?,
        };
        if line.trim().is_empty() {
            continue;
        }

        let forwarded = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("MCP Proxy shutting down");
                return Ok(());
            }
            forwarded = forwarder.forward(line) => forwarded,
        };

        match forwarded {
            Ok(body) => {
                output.write_all(body.trim_end().as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
            Err(e) => warn!("Error processing request: {}", e),
        }
    }
}
