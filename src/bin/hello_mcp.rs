//! Demo provider with a single greeting tool.

use anyhow::Result;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use mcp_dispatcher::JsonRpcError;
use mcp_dispatcher::protocol::JsonObject;
use mcp_dispatcher::provider::{self, ToolHandler, ToolSet, text_content};

struct Hello;

impl ToolHandler for Hello {
    fn name(&self) -> &str {
        "hello"
    }

    fn description(&self) -> &str {
        "Say hello to someone"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Who to greet" },
            },
        })
    }

    fn call(&self, arguments: &JsonObject) -> Result<Value, JsonRpcError> {
        let name = arguments
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("World");
        Ok(text_content(format!("Hello, {name}!")))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let tools = ToolSet::new("Hello MCP", "1.0.0").register_handler(Hello);
    provider::serve_stdio(&tools).await
}
