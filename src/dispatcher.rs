//! Request dispatcher shared by the HTTP and stdio transports.
//!
//! One inbound JSON-RPC message in, one response frame out. Tool failures
//! become error frames; only undecodable input and unsupported methods are
//! returned as [`DispatchError`] for the transport to render.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::protocol::{CallToolParams, JsonRpcRequest, JsonRpcResponse, ToolDescriptor, methods};
use crate::registry::Registry;

/// Routes `tools/list` and `tools/call` against a [`Registry`].
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Decode one raw message and handle it.
    pub async fn handle(
        &self,
        raw: &[u8],
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, DispatchError> {
        let request: JsonRpcRequest = serde_json::from_slice(raw)?;
        self.handle_request(request, cancel).await
    }

    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, DispatchError> {
        debug!(method = %request.method, id = %request.id, "Dispatching request");
        match request.method.as_str() {
            methods::TOOLS_LIST => Ok(self.list_tools(request.id).await),
            methods::TOOLS_CALL => self.call_tool(request, cancel).await,
            _ => Err(DispatchError::MethodNotImplemented(request.method)),
        }
    }

    async fn list_tools(&self, id: Value) -> JsonRpcResponse {
        let tools: Vec<ToolDescriptor> = self
            .registry
            .list_all_tools()
            .await
            .into_iter()
            .map(|(name, descriptor)| descriptor.renamed(name.to_string()))
            .collect();
        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn call_tool(
        &self,
        request: JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, DispatchError> {
        let params: CallToolParams =
            request
                .params_as()
                .map_err(|e| DispatchError::InvalidParams {
                    method: request.method.clone(),
                    reason: e.to_string(),
                })?;
        let arguments = params.arguments.unwrap_or_default();

        match self.registry.invoke(&params.name, arguments, cancel).await {
            Ok(result) => Ok(JsonRpcResponse::success(request.id, result)),
            Err(e) => {
                warn!(tool = %params.name, error = %e, "Tool call failed");
                Ok(JsonRpcResponse::failure(request.id, e.to_rpc_error()))
            }
        }
    }
}
