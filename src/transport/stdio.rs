//! Stdio adapter: newline-delimited requests in, newline-delimited responses out.
//!
//! Every line is handled on its own task so a slow tool does not hold up the
//! ones behind it; responses go through a single writer and may therefore
//! arrive out of request order.

use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::protocol::{JsonRpcError, JsonRpcResponse, encode_frame, error_codes, is_notification};
use crate::session::MAX_FRAME_BYTES;

const OUTBOUND_QUEUE: usize = 64;

/// Serve the process's own stdin and stdout.
pub async fn serve_stdio(dispatcher: Dispatcher, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!("MCP stdio server reading requests from stdin");
    serve(dispatcher, tokio::io::stdin(), tokio::io::stdout(), shutdown).await
}

/// Serve requests read from `input` until end of input or `shutdown`.
///
/// On end of input the in-flight requests are allowed to finish and their
/// responses are written. On shutdown, or once `output` can no longer be
/// written, they are cancelled first.
pub async fn serve<R, W>(
    dispatcher: Dispatcher,
    input: R,
    output: W,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    // Fires on shutdown and when the output side breaks.
    let halt = shutdown.child_token();
    let (tx, rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let writer = tokio::spawn(write_frames(rx, output, halt.clone()));
    let mut in_flight = InFlight::default();

    let read_result = loop {
        let next = tokio::select! {
            _ = halt.cancelled() => {
                if shutdown.is_cancelled() {
                    info!("Shutting down stdio server");
                } else {
                    warn!("Output closed, no longer reading requests");
                }
                break Ok(());
            }
            next = lines.next() => next,
        };

        let line = match next {
            None => {
                debug!("stdin closed");
                break Ok(());
            }
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!("Discarding request longer than {} bytes", MAX_FRAME_BYTES);
                let frame = JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::new(error_codes::INVALID_REQUEST, "request too large"),
                );
                if let Ok(line) = encode_frame(&frame) {
                    if tx.send(line).await.is_err() {
                        halt.cancel();
                    }
                }
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => break Err(e),
        };

        if line.trim().is_empty() {
            continue;
        }

        let dispatcher = dispatcher.clone();
        let tx = tx.clone();
        let halt = halt.clone();
        in_flight.spawn(async move {
            let cancel = halt.child_token();
            if let Some(frame) = respond(&dispatcher, line.as_bytes(), &cancel).await {
                if tx.send(frame).await.is_err() {
                    warn!("Dropping response, the output writer has stopped");
                    halt.cancel();
                }
            }
        });
    };

    in_flight.drain().await;
    drop(tx);

    let written = writer.await?;
    read_result?;
    written?;
    Ok(())
}

/// Requests still being handled.
///
/// Finished tasks are reaped before every spawn, so a long session only
/// holds the requests that are actually running.
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<()>,
}

impl InFlight {
    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();
        self.tasks.spawn(task);
    }

    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            report(joined);
        }
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            report(joined);
        }
    }
}

fn report(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Request handler panicked: {}", e);
        }
    }
}

async fn write_frames<W>(
    mut rx: mpsc::Receiver<String>,
    mut output: W,
    halt: CancellationToken,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let written = match output.write_all(frame.as_bytes()).await {
            Ok(()) => output.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!("Failed to write response: {}", e);
            halt.cancel();
            return Err(e);
        }
    }
    Ok(())
}

/// Produce the response line for one request, or nothing for a notification.
async fn respond(dispatcher: &Dispatcher, raw: &[u8], cancel: &CancellationToken) -> Option<String> {
    let response = match dispatcher.handle(raw, cancel).await {
        Ok(response) => response,
        Err(e) => {
            let message: Option<Value> = serde_json::from_slice(raw).ok();
            if message.as_ref().is_some_and(is_notification) {
                debug!("Ignoring notification: {}", e);
                return None;
            }
            warn!("Failed to process request: {}", e);
            let id = message
                .and_then(|m| m.get("id").cloned())
                .unwrap_or(Value::Null);
            JsonRpcResponse::failure(id, e.to_rpc_error())
        }
    };

    match encode_frame(&response) {
        Ok(line) => Some(line),
        Err(e) => {
            error!("Failed to encode response: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::session::ProcessSession;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    fn empty_dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(Registry::new(Arc::new(ProcessSession::default()))))
    }

    /// Feed `input` to the adapter and collect every response line.
    async fn run(dispatcher: Dispatcher, input: &'static str) -> Vec<Value> {
        let (output, mut reader) = tokio::io::duplex(64 * 1024);
        serve(dispatcher, input.as_bytes(), output, CancellationToken::new())
            .await
            .unwrap();

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        text.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_one_response_per_request_line() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let mut responses = run(empty_dispatcher(), input).await;
        responses.sort_by_key(|r| r["id"].as_i64());

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0], json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}));
        assert_eq!(responses[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_dispatch_errors_become_frames() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":5,"method":"prompts/list"}"#,
            "\n",
            "not json\n",
        );
        let responses = run(empty_dispatcher(), input).await;
        assert_eq!(responses.len(), 2);

        let unsupported = responses.iter().find(|r| r["id"] == 5).unwrap();
        assert_eq!(unsupported["error"]["code"], error_codes::METHOD_NOT_FOUND);

        let garbage = responses.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(garbage["error"]["code"], error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
        );
        assert!(run(empty_dispatcher(), input).await.is_empty());
    }

    #[tokio::test]
    async fn test_last_line_without_newline_is_served() {
        let responses = run(
            empty_dispatcher(),
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/list"}"#,
        )
        .await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 9);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown_without_eof() {
        let (_client, server_input) = tokio::io::duplex(1024);
        let (output, _reader) = tokio::io::duplex(1024);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(serve(empty_dispatcher(), server_input, output, shutdown.clone()));
        shutdown.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_finished_requests_do_not_accumulate() {
        let mut in_flight = InFlight::default();
        for _ in 0..1000 {
            in_flight.spawn(async {});
            tokio::task::yield_now().await;
        }
        assert!(in_flight.len() <= 2, "{} tasks retained", in_flight.len());

        in_flight.drain().await;
        assert_eq!(in_flight.len(), 0);
    }

    #[tokio::test]
    async fn test_many_sequential_requests_are_all_answered() {
        let (mut client, server_input) = tokio::io::duplex(64 * 1024);
        let (output, reader) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(serve(
            empty_dispatcher(),
            server_input,
            output,
            CancellationToken::new(),
        ));

        let mut responses = FramedRead::new(reader, LinesCodec::new());
        for id in 0..200 {
            let request = format!("{{\"jsonrpc\":\"2.0\",\"id\":{id},\"method\":\"tools/list\"}}\n");
            client.write_all(request.as_bytes()).await.unwrap();
            let line = responses.next().await.unwrap().unwrap();
            let response: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(response["id"], id);
        }

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_output_is_closed() {
        let (mut client, server_input) = tokio::io::duplex(1024);
        let (output, reader) = tokio::io::duplex(1024);
        drop(reader);

        let task = tokio::spawn(serve(
            empty_dispatcher(),
            server_input,
            output,
            CancellationToken::new(),
        ));
        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n")
            .await
            .unwrap();

        // Input stays open, so only the broken output can end the loop.
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
        drop(client);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_tool_calls() {
        use crate::testing::{HELLO_PROVIDER, write_provider};

        let dir = tempfile::tempdir().unwrap();
        write_provider(dir.path(), "hello-mcp", HELLO_PROVIDER);
        let registry = Arc::new(Registry::new(Arc::new(ProcessSession::default())));
        registry.reload(dir.path()).await.unwrap();

        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"hello-mcp.hello"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"hello-mcp.hello"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"hello-mcp.hello"}}"#,
            "\n",
        );
        let responses = run(Dispatcher::new(registry), input).await;

        let mut ids: Vec<i64> = responses.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        ids.sort();
        assert_eq!(ids, [1, 2, 3]);
        for response in &responses {
            assert_eq!(response["result"]["content"][0]["text"], "Hello, World!");
        }
    }
}
