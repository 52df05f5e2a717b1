//! Demo provider with three arithmetic tools.

use anyhow::Result;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use mcp_dispatcher::JsonRpcError;
use mcp_dispatcher::protocol::JsonObject;
use mcp_dispatcher::provider::{self, ToolHandler, ToolSet, number_argument, text_content};

#[derive(Clone, Copy)]
enum Operation {
    Add,
    Multiply,
    Divide,
}

struct Arithmetic(Operation);

impl ToolHandler for Arithmetic {
    fn name(&self) -> &str {
        match self.0 {
            Operation::Add => "add",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
        }
    }

    fn description(&self) -> &str {
        match self.0 {
            Operation::Add => "Add two numbers",
            Operation::Multiply => "Multiply two numbers",
            Operation::Divide => "Divide two numbers",
        }
    }

    fn input_schema(&self) -> Value {
        let (x, y) = match self.0 {
            Operation::Divide => ("Numerator", "Denominator"),
            _ => ("First number", "Second number"),
        };
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "number", "description": x },
                "y": { "type": "number", "description": y },
            },
            "required": ["x", "y"],
        })
    }

    fn call(&self, arguments: &JsonObject) -> Result<Value, JsonRpcError> {
        let x = number_argument(arguments, "x")?;
        let y = number_argument(arguments, "y")?;
        let result = match self.0 {
            Operation::Add => x + y,
            Operation::Multiply => x * y,
            Operation::Divide if y == 0.0 => {
                return Err(JsonRpcError::new(-1, "cannot divide by zero"));
            }
            Operation::Divide => x / y,
        };
        Ok(text_content(format!("{result:.2}")))
    }
}

fn tools() -> ToolSet {
    ToolSet::new("Calculator MCP", "1.0.0")
        .register_handler(Arithmetic(Operation::Add))
        .register_handler(Arithmetic(Operation::Multiply))
        .register_handler(Arithmetic(Operation::Divide))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    provider::serve_stdio(&tools()).await
}
