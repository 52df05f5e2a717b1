//! Registry and dispatcher for MCP tool providers.
//!
//! Providers are executables in one directory that speak newline-delimited
//! JSON-RPC on stdin/stdout. The registry learns their tools once per reload;
//! every tool call then runs in a fresh provider process.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod proxy;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(all(test, unix))]
mod testing;

pub use config::{ServerConfig, Transport, prepare_provider_dir};
pub use dispatcher::Dispatcher;
pub use error::{DiscoveryError, DispatchError, InvocationError, SessionError, ToolNotFoundError};
pub use protocol::{ClientInfo, JsonObject, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolDescriptor};
pub use registry::{ProviderEndpoint, Registry, ReloadSummary, Snapshot};
pub use session::{ProcessSession, ProviderClient};
pub use types::{LocalToolName, NamespacedName, ProviderId};

use std::sync::Arc;

/// Build a registry for `config`, load it once and wrap it in a dispatcher.
///
/// Individual provider failures are logged and tolerated; only an unusable
/// provider directory is an error.
pub async fn create_dispatcher(config: &ServerConfig) -> anyhow::Result<(Dispatcher, ReloadSummary)> {
    let registry = Arc::new(Registry::new(Arc::new(config.session())));
    let summary = registry.reload(&config.provider_dir).await?;
    Ok((Dispatcher::new(registry), summary))
}
