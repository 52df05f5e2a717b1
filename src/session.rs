//! Short-lived provider processes.
//!
//! Every discovery and every invocation spawns a fresh process, performs the
//! `initialize` handshake, sends exactly one follow-up request, reads exactly
//! one response and then kills the process, whatever the outcome.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SessionError;
use crate::protocol::{
    ClientInfo, FOLLOW_UP_REQUEST_ID, INITIALIZE_REQUEST_ID, JsonObject, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ToolDescriptor, encode_frame, is_notification, methods,
};
use crate::types::LocalToolName;

/// Upper bound for a whole discovery exchange.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest single frame accepted from a provider.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// The two operations the registry needs from a provider.
///
/// `ProcessSession` is the real implementation; the seam exists so the
/// registry can be exercised without spawning processes.
pub trait ProviderClient: Send + Sync {
    /// Handshake and `tools/list`. Bounded by the client's discovery timeout.
    fn discover<'a>(
        &'a self,
        executable: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<ToolDescriptor>, SessionError>>;

    /// Handshake and `tools/call`. Bounded only by `cancel`.
    fn invoke<'a>(
        &'a self,
        executable: &'a Path,
        tool: &'a LocalToolName,
        arguments: JsonObject,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Value, SessionError>>;
}

/// Drives one provider process per call.
#[derive(Debug, Clone)]
pub struct ProcessSession {
    client_info: ClientInfo,
    discovery_timeout: Duration,
}

impl ProcessSession {
    pub fn new(client_info: ClientInfo) -> Self {
        Self {
            client_info,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    /// Spawn, converse, kill. The conversation races against `cancel` and the
    /// optional `limit`; the process is terminated on every path.
    async fn exchange(
        &self,
        executable: &Path,
        request: &JsonRpcRequest,
        stage: &'static str,
        cancel: &CancellationToken,
        limit: Option<Duration>,
    ) -> Result<JsonRpcResponse, SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let mut process = ProviderProcess::spawn(executable)?;
        debug!(
            path = %executable.display(),
            pid = ?process.child.id(),
            method = stage,
            "Spawned provider process"
        );

        let outcome = {
            let conversation = process.converse(&self.client_info, request, stage);
            let bounded = async move {
                match limit {
                    Some(limit) => tokio::time::timeout(limit, conversation)
                        .await
                        .unwrap_or(Err(SessionError::Timeout(limit))),
                    None => conversation.await,
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SessionError::Cancelled),
                result = bounded => result,
            }
        };

        process.terminate().await;
        outcome
    }
}

impl Default for ProcessSession {
    fn default() -> Self {
        Self::new(ClientInfo::default())
    }
}

impl ProviderClient for ProcessSession {
    fn discover<'a>(
        &'a self,
        executable: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<ToolDescriptor>, SessionError>> {
        Box::pin(async move {
            // Discovery is never cancelled from outside, only timed out.
            let never = CancellationToken::new();
            let response = self
                .exchange(
                    executable,
                    &JsonRpcRequest::tools_list(),
                    methods::TOOLS_LIST,
                    &never,
                    Some(self.discovery_timeout),
                )
                .await?;

            if let Some(err) = response.error {
                return Err(err.into());
            }

            let listing = match response.result {
                Some(result) => serde_json::from_value::<ListToolsResult>(result)
                    .map_err(|e| SessionError::protocol(methods::TOOLS_LIST, e))?,
                None => ListToolsResult::default(),
            };
            Ok(listing.tools)
        })
    }

    fn invoke<'a>(
        &'a self,
        executable: &'a Path,
        tool: &'a LocalToolName,
        arguments: JsonObject,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Value, SessionError>> {
        Box::pin(async move {
            let request = JsonRpcRequest::tools_call(tool.as_str(), arguments);
            let response = self
                .exchange(executable, &request, methods::TOOLS_CALL, cancel, None)
                .await?;

            if let Some(err) = response.error {
                return Err(err.into());
            }
            Ok(response.result.unwrap_or(Value::Null))
        })
    }
}

/// A spawned provider with its private pipes.
struct ProviderProcess {
    child: Child,
    stdin: ChildStdin,
    frames: FramedRead<ChildStdout, LinesCodec>,
}

impl ProviderProcess {
    fn spawn(executable: &Path) -> Result<Self, SessionError> {
        let mut child = Command::new(executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(SessionError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::transport("spawn", "provider stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::transport("spawn", "provider stdout was not captured"))?;

        Ok(Self {
            child,
            stdin,
            frames: FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
        })
    }

    async fn converse(
        &mut self,
        client_info: &ClientInfo,
        request: &JsonRpcRequest,
        stage: &'static str,
    ) -> Result<JsonRpcResponse, SessionError> {
        self.send(&JsonRpcRequest::initialize(client_info), methods::INITIALIZE)
            .await?;
        // Only the arrival of the handshake response matters.
        self.receive(INITIALIZE_REQUEST_ID, methods::INITIALIZE)
            .await?;

        self.send(request, stage).await?;
        self.receive(FOLLOW_UP_REQUEST_ID, stage).await
    }

    async fn send(
        &mut self,
        request: &JsonRpcRequest,
        stage: &'static str,
    ) -> Result<(), SessionError> {
        let frame = encode_frame(request).map_err(|e| SessionError::protocol(stage, e))?;
        self.stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| SessionError::transport(stage, format!("failed to write request: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| SessionError::transport(stage, format!("failed to flush request: {e}")))
    }

    /// Read frames until the response to `expected_id` arrives. Blank lines
    /// and provider notifications are skipped; anything else that does not
    /// decode as that response is a protocol error.
    async fn receive(
        &mut self,
        expected_id: i64,
        stage: &'static str,
    ) -> Result<JsonRpcResponse, SessionError> {
        loop {
            let line = match self.frames.next().await {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    return Err(SessionError::protocol(
                        stage,
                        format!("response exceeds {MAX_FRAME_BYTES} bytes"),
                    ));
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    return Err(SessionError::transport(
                        stage,
                        format!("failed to read response: {e}"),
                    ));
                }
                None => {
                    return Err(SessionError::transport(
                        stage,
                        "provider closed stdout before responding",
                    ));
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Value =
                serde_json::from_str(trimmed).map_err(|e| SessionError::protocol(stage, e))?;
            if is_notification(&message) {
                debug!(method = stage, "Skipping provider notification");
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_value(message).map_err(|e| SessionError::protocol(stage, e))?;
            if response.id != Value::from(expected_id) {
                return Err(SessionError::protocol(
                    stage,
                    format!("expected response id {expected_id}, got {}", response.id),
                ));
            }
            return Ok(response);
        }
    }

    async fn terminate(mut self) {
        let pid = self.child.id();
        // Fails only when the process has already exited.
        if let Err(e) = self.child.start_kill() {
            debug!(?pid, error = %e, "Provider already exited");
        }
        match self.child.wait().await {
            Ok(status) => debug!(?pid, %status, "Provider process terminated"),
            Err(e) => debug!(?pid, error = %e, "Failed to reap provider process"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::{HELLO_PROVIDER, pid_is_alive, write_provider};
    use serde_json::json;

    fn session() -> ProcessSession {
        ProcessSession::default().with_discovery_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_discover_lists_tools() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_provider(dir.path(), "hello-mcp", HELLO_PROVIDER);

        let tools = session().discover(&path).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "hello");
        assert_eq!(tools[0].description.as_deref(), Some("Say hello"));
    }

    #[tokio::test]
    async fn test_invoke_returns_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_provider(dir.path(), "hello-mcp", HELLO_PROVIDER);

        let result = session()
            .invoke(
                &path,
                &LocalToolName::new("hello"),
                JsonObject::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "Hello, World!");
    }

    #[tokio::test]
    async fn test_response_split_across_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_provider(
            dir.path(),
            "slow-writer",
            r#"read -r line
printf '{"jsonrpc":"2.0",'
sleep 0.1
printf '"id":1,"result":{}}\n'
read -r line
printf '{"jsonrpc":"2.0","id":2,"result":{"tools":['
sleep 0.1
printf '{"name":"a"},{"name":"b"}'
sleep 0.1
printf ']}}\n'
"#,
        );

        let tools = session().discover(&path).await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_response_larger_than_one_pipe_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_provider(
            dir.path(),
            "big",
            r#"read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
read -r line
desc=$(head -c 200000 /dev/zero | tr '\0' 'a')
printf '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"big","description":"%s"}]}}\n' "$desc"
"#,
        );

        let tools = session().discover(&path).await.unwrap();
        assert_eq!(tools[0].description.as_ref().map(String::len), Some(200_000));
    }

    #[tokio::test]
    async fn test_skips_blank_lines_and_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_provider(
            dir.path(),
            "chatty",
            r#"read -r line
printf '\n'
printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}'
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"only"}]}}'
"#,
        );

        let tools = session().discover(&path).await.unwrap();
        assert_eq!(tools.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_error_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_provider(
            dir.path(),
            "divider",
            r#"read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":2,"error":{"code":-1,"message":"cannot divide by zero"}}'
"#,
        );

        let mut args = JsonObject::new();
        args.insert("x".into(), json!(5));
        args.insert("y".into(), json!(0));
        let err = session()
            .invoke(
                &path,
                &LocalToolName::new("divide"),
                args,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            SessionError::Remote { code, message, .. } => {
                assert_eq!(code, -1);
                assert_eq!(message, "cannot divide by zero");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_provider(dir.path(), "garbage", "read -r line\necho 'not json'\n");

        let err = session().discover(&path).await.unwrap_err();
        assert!(matches!(err, SessionError::Protocol { stage: "initialize", .. }));
    }

    #[tokio::test]
    async fn test_mismatched_id_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_provider(
            dir.path(),
            "wrong-id",
            r#"read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":99,"result":{"tools":[]}}'
"#,
        );

        let err = session().discover(&path).await.unwrap_err();
        assert!(matches!(err, SessionError::Protocol { stage: "tools/list", .. }));
    }

    #[tokio::test]
    async fn test_early_exit_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_provider(dir.path(), "quitter", "exit 0\n");

        let err = session().discover(&path).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = session()
            .discover(&dir.path().join("does-not-exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_discovery_times_out_and_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let path = write_provider(
            dir.path(),
            "silent",
            &format!("echo $$ > '{}'\nexec sleep 30\n", pid_file.display()),
        );

        let err = ProcessSession::default()
            .with_discovery_timeout(Duration::from_millis(300))
            .discover(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(!pid_is_alive(pid.trim()));
    }

    #[tokio::test]
    async fn test_cancelled_invoke_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let path = write_provider(
            dir.path(),
            "stuck",
            &format!(
                "echo $$ > '{}'\nread -r line\nprintf '%s\\n' '{{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{{}}}}'\nexec sleep 30\n",
                pid_file.display()
            ),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = session()
            .invoke(&path, &LocalToolName::new("wait"), JsonObject::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(!pid_is_alive(pid.trim()));
    }

    #[tokio::test]
    async fn test_already_cancelled_invoke_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let path = write_provider(
            dir.path(),
            "marker",
            &format!("touch '{}'\n", marker.display()),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = session()
            .invoke(&path, &LocalToolName::new("x"), JsonObject::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert!(!marker.exists());
    }
}
