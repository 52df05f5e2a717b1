//! Building blocks for writing a stdio tool provider.
//!
//! A provider registers [`ToolHandler`]s in a [`ToolSet`] and hands it to
//! [`serve`], which answers `initialize`, `tools/list` and `tools/call` one
//! line at a time until stdin closes.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

use crate::protocol::{
    CallToolParams, JsonObject, JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
    ToolDescriptor, encode_frame, error_codes, methods,
};
use crate::session::MAX_FRAME_BYTES;

/// A single tool implementation.
pub trait ToolHandler: Send + Sync {
    /// Provider-local tool name (e.g. "add").
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments.
    fn input_schema(&self) -> Value;

    /// Execute the tool. Errors are sent back verbatim as the JSON-RPC error.
    fn call(&self, arguments: &JsonObject) -> Result<Value, JsonRpcError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(self.name())
            .with_description(self.description())
            .with_parameters(self.input_schema())
    }
}

/// Ordered set of tool handlers served by one provider.
#[derive(Clone)]
pub struct ToolSet {
    name: String,
    version: String,
    handlers: Vec<Arc<dyn ToolHandler>>,
}

impl ToolSet {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            handlers: Vec::new(),
        }
    }

    /// Register a handler; a later handler with the same name replaces it.
    pub fn register_handler<T: ToolHandler + 'static>(mut self, handler: T) -> Self {
        self.handlers.retain(|h| h.name() != handler.name());
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.handlers.iter().map(|h| h.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Answer one request; `None` for notifications.
    pub fn respond(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.id.is_null() && request.method.starts_with("notifications/") {
            return None;
        }

        let outcome = match request.method.as_str() {
            methods::INITIALIZE => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": self.name, "version": self.version },
            })),
            methods::TOOLS_LIST => Ok(json!({ "tools": self.list_tools() })),
            methods::TOOLS_CALL => self.call_tool(&request),
            other => Err(JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::failure(request.id, error),
        })
    }

    fn call_tool(&self, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = request
            .params_as()
            .map_err(|e| JsonRpcError::new(error_codes::INVALID_PARAMS, e.to_string()))?;
        let handler = self.get(&params.name).ok_or_else(|| {
            JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("tool not found: {}", params.name),
            )
        })?;
        handler.call(&params.arguments.unwrap_or_default())
    }
}

/// MCP text content result.
pub fn text_content(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }] })
}

/// Fetch a numeric argument.
pub fn number_argument(arguments: &JsonObject, name: &str) -> Result<f64, JsonRpcError> {
    arguments
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| JsonRpcError::new(error_codes::INVALID_PARAMS, format!("{name} must be a number")))
}

/// Serve `tools` over newline-delimited JSON until `input` ends.
pub async fn serve<R, W>(tools: &ToolSet, input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));

    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => {
                debug!(method = %request.method, "Handling request");
                match tools.respond(request) {
                    Some(response) => response,
                    None => continue,
                }
            }
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::new(error_codes::PARSE_ERROR, e.to_string()),
                )
            }
        };

        output.write_all(encode_frame(&response)?.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}

/// Serve `tools` on the process's stdin and stdout.
pub async fn serve_stdio(tools: &ToolSet) -> anyhow::Result<()> {
    serve(tools, tokio::io::stdin(), tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    struct Echo;

    impl ToolHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the arguments"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn call(&self, arguments: &JsonObject) -> Result<Value, JsonRpcError> {
            if arguments.contains_key("fail") {
                return Err(JsonRpcError::new(-1, "asked to fail"));
            }
            Ok(Value::Object(arguments.clone()))
        }
    }

    fn tool_set() -> ToolSet {
        ToolSet::new("Echo MCP", "1.0.0").register_handler(Echo)
    }

    fn request(id: i64, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(id, method, params)
    }

    #[test]
    fn test_initialize_reports_server_info() {
        let response = tool_set().respond(request(1, "initialize", None)).unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "Echo MCP");
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
    }

    #[test]
    fn test_list_tools_includes_schema() {
        let response = tool_set().respond(request(2, "tools/list", None)).unwrap();
        let tools = &response.result.unwrap()["tools"];
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["parameters"], json!({"type": "object"}));
    }

    #[test]
    fn test_call_tool_and_errors() {
        let set = tool_set();

        let ok = set
            .respond(request(2, "tools/call", Some(json!({"name": "echo", "arguments": {"a": 1}}))))
            .unwrap();
        assert_eq!(ok.result.unwrap(), json!({"a": 1}));

        let failed = set
            .respond(request(2, "tools/call", Some(json!({"name": "echo", "arguments": {"fail": true}}))))
            .unwrap();
        assert_eq!(failed.error.unwrap(), JsonRpcError::new(-1, "asked to fail"));

        let missing = set
            .respond(request(2, "tools/call", Some(json!({"name": "nope"}))))
            .unwrap();
        assert_eq!(missing.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let set = tool_set().register_handler(Echo);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_number_argument() {
        let mut args = JsonObject::new();
        args.insert("x".into(), json!(10));
        args.insert("s".into(), json!("ten"));
        assert_eq!(number_argument(&args, "x").unwrap(), 10.0);
        assert!(number_argument(&args, "s").is_err());
        assert!(number_argument(&args, "y").is_err());
    }

    #[tokio::test]
    async fn test_serve_answers_each_line_in_order() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocol_version":"2024-11-05"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let (output, mut reader) = tokio::io::duplex(64 * 1024);
        serve(&tool_set(), input.as_bytes(), output).await.unwrap();

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        let ids: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap()["id"].clone())
            .collect();
        assert_eq!(ids, [json!(1), json!(2)]);
    }
}
