use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::protocol::ClientInfo;
use crate::session::{DEFAULT_DISCOVERY_TIMEOUT, ProcessSession};

pub const DEFAULT_PROVIDER_DIR: &str = "./mcps";
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SERVER_NAME: &str = "MCP Server";
pub const DEFAULT_SERVER_VERSION: &str = "1.0.0";

/// How inbound requests reach the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Http { bind: SocketAddr },
    Stdio,
}

/// Runtime configuration of `mcp-server`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub provider_dir: PathBuf,
    /// Display name announced to providers in the handshake.
    pub name: String,
    pub version: String,
    pub discovery_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            provider_dir: PathBuf::from(DEFAULT_PROVIDER_DIR),
            name: DEFAULT_SERVER_NAME.to_string(),
            version: DEFAULT_SERVER_VERSION.to_string(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Process session announcing this server's identity.
    pub fn session(&self) -> ProcessSession {
        ProcessSession::new(self.client_info()).with_discovery_timeout(self.discovery_timeout)
    }
}

/// Make sure the provider directory exists and return its absolute path.
///
/// A missing directory is created so a fresh install starts with an empty
/// catalog instead of failing.
pub fn prepare_provider_dir(path: &Path) -> anyhow::Result<PathBuf> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create provider directory {}", path.display()))?;
        tracing::info!("Created provider directory {}", path.display());
    } else if !path.is_dir() {
        anyhow::bail!("provider path {} is not a directory", path.display());
    }

    path.canonicalize()
        .with_context(|| format!("failed to resolve provider directory {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("nested").join("mcps");

        let prepared = prepare_provider_dir(&target).unwrap();
        assert!(prepared.is_dir());
        assert!(prepared.is_absolute());
        assert!(prepared.ends_with("nested/mcps"));
    }

    #[test]
    fn test_prepare_accepts_existing_directory() {
        let root = tempfile::tempdir().unwrap();
        let prepared = prepare_provider_dir(root.path()).unwrap();
        assert_eq!(prepared, root.path().canonicalize().unwrap());
    }

    #[test]
    fn test_prepare_rejects_regular_file() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("mcps");
        std::fs::write(&file, "").unwrap();

        let err = prepare_provider_dir(&file).unwrap_err();
        assert!(err.to_string().contains("is not a directory"));
    }

    #[test]
    fn test_session_uses_display_identity() {
        let config = ServerConfig {
            name: "Test Server".into(),
            version: "9.9.9".into(),
            discovery_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        assert_eq!(config.client_info().name, "Test Server");
        assert_eq!(config.session().discovery_timeout(), Duration::from_secs(3));
    }
}
