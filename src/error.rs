//! Error types for discovery, resolution, invocation and dispatch.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;

use crate::protocol::{JsonRpcError, error_codes};
use crate::types::ProviderId;

/// Failure while driving one provider process.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The executable could not be started.
    #[error("failed to start provider: {0}")]
    Spawn(#[source] std::io::Error),

    /// Pipe I/O failed or the provider closed its end early.
    #[error("transport error during {stage}: {reason}")]
    Transport { stage: &'static str, reason: String },

    /// The provider answered with something that is not the expected frame.
    #[error("protocol error during {stage}: {reason}")]
    Protocol { stage: &'static str, reason: String },

    /// The provider returned a JSON-RPC error object.
    #[error("tool error: {message} (code {code})")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,
}

impl SessionError {
    pub(crate) fn transport(stage: &'static str, reason: impl ToString) -> Self {
        Self::Transport {
            stage,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn protocol(stage: &'static str, reason: impl ToString) -> Self {
        Self::Protocol {
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

impl From<JsonRpcError> for SessionError {
    fn from(err: JsonRpcError) -> Self {
        Self::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Failure while (re)building the registry.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The provider directory itself could not be read. Aborts the reload.
    #[error("failed to read provider directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One provider failed its handshake or listing. Never aborts a reload.
    #[error("failed to get tool info for {path}: {source}")]
    Provider {
        path: PathBuf,
        #[source]
        source: SessionError,
    },
}

/// A namespaced tool name that does not resolve against the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolNotFoundError {
    #[error("invalid tool name format, expected 'provider.tool': {0}")]
    MissingSeparator(String),

    #[error("provider not found: {0}")]
    UnknownProvider(ProviderId),
}

/// Failure of `Registry::invoke`: either resolution or execution.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    NotFound(#[from] ToolNotFoundError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl InvocationError {
    /// Error frame sent back to the caller of `tools/call`.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let err = JsonRpcError::new(
            error_codes::SERVER_ERROR,
            format!("Failed to execute tool: {self}"),
        );
        match self {
            Self::Session(SessionError::Remote { code, message, .. }) => {
                err.with_data(json!({ "code": code, "message": message }))
            }
            _ => err,
        }
    }
}

/// Failure of the dispatcher to produce a response frame at all.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to parse request: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("method not implemented: {0}")]
    MethodNotImplemented(String),
}

impl DispatchError {
    /// Render as a JSON-RPC error object for transports without status codes.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let code = match self {
            Self::Protocol(_) => error_codes::PARSE_ERROR,
            Self::InvalidParams { .. } => error_codes::INVALID_PARAMS,
            Self::MethodNotImplemented(_) => error_codes::METHOD_NOT_FOUND,
        };
        JsonRpcError::new(code, self.to_string())
    }
}
