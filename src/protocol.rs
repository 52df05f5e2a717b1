//! JSON-RPC 2.0 envelopes and the subset of MCP messages the dispatcher speaks.
//!
//! Providers receive newline-terminated JSON objects on stdin and answer with
//! newline-terminated JSON objects on stdout. Only `initialize`, `tools/list`
//! and `tools/call` are ever exchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version announced in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Request id used for the `initialize` handshake.
pub const INITIALIZE_REQUEST_ID: i64 = 1;

/// Request id used for the single follow-up request after the handshake.
pub const FOLLOW_UP_REQUEST_ID: i64 = 2;

/// Any JSON object, used for tool arguments.
pub type JsonObject = serde_json::Map<String, Value>;

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Standard JSON-RPC 2.0 error codes plus the generic server error used for
/// failed tool executions.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const SERVER_ERROR: i64 = -32000;
}

/// A JSON-RPC 2.0 request message.
///
/// `id` is kept as a raw JSON value so whatever the caller sent (number,
/// string or null) is echoed back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Identity announced to providers during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(rename = "clientInfo", default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientInfo>,
}

/// A tool as described by its provider.
///
/// Providers built on newer MCP libraries report the schema as
/// `inputSchema`; both spellings are accepted, `parameters` is emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        alias = "inputSchema",
        skip_serializing_if = "Option::is_none"
    )]
    pub parameters: Option<Value>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Copy of this descriptor under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// `result` payload of a `tools/list` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// `params` payload of a `tools/call` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolParams {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Option<JsonObject>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    pub fn initialize(client: &ClientInfo) -> Self {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: Some(client.clone()),
        };
        Self::new(
            INITIALIZE_REQUEST_ID,
            methods::INITIALIZE,
            serde_json::to_value(params).ok(),
        )
    }

    pub fn tools_list() -> Self {
        Self::new(FOLLOW_UP_REQUEST_ID, methods::TOOLS_LIST, None)
    }

    pub fn tools_call(name: &str, arguments: JsonObject) -> Self {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        Self::new(FOLLOW_UP_REQUEST_ID, methods::TOOLS_CALL, Some(params))
    }

    /// Decode `params` into a typed payload; absent params decode from `{}`.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.params {
            Some(params) => T::deserialize(params),
            None => T::deserialize(Value::Object(JsonObject::new())),
        }
    }
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Serialize a message as one newline-terminated frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// True when a decoded line is a notification (has a method but no id).
pub fn is_notification(message: &Value) -> bool {
    message
        .as_object()
        .is_some_and(|obj| obj.contains_key("method") && !obj.contains_key("id"))
}
