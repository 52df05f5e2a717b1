//! Registry of provider executables and their cached tool catalogs.
//!
//! The registry owns one immutable [`Snapshot`] behind an `Arc`. Readers clone
//! the `Arc` under a shared lock and work against that snapshot; `reload`
//! builds a complete replacement without holding the lock and swaps it in
//! under the exclusive lock, so nobody ever observes a half-built catalog.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DiscoveryError, InvocationError, ToolNotFoundError};
use crate::protocol::{JsonObject, ToolDescriptor};
use crate::session::ProviderClient;
use crate::types::{LocalToolName, NAMESPACE_SEPARATOR, NamespacedName, ProviderId};

/// How many providers are handshaken in parallel during a reload.
const DISCOVERY_CONCURRENCY: usize = 8;

/// A discovered provider executable and the tools it reported.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEndpoint {
    pub id: ProviderId,
    pub executable: PathBuf,
    pub tools: Vec<ToolDescriptor>,
}

/// One complete generation of the registry.
#[derive(Debug, Clone)]
pub struct Snapshot {
    endpoints: BTreeMap<ProviderId, Arc<ProviderEndpoint>>,
    loaded_at: DateTime<Utc>,
}

impl Snapshot {
    fn new(endpoints: BTreeMap<ProviderId, Arc<ProviderEndpoint>>) -> Self {
        Self {
            endpoints,
            loaded_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(BTreeMap::new())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Arc<ProviderEndpoint>> {
        self.endpoints.values()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ProviderEndpoint>> {
        self.endpoints.get(id)
    }

    pub fn tool_count(&self) -> usize {
        self.endpoints.values().map(|e| e.tools.len()).sum()
    }

    /// Every tool of every endpoint, keyed by its namespaced name.
    ///
    /// Ordered by provider identifier, then by the provider's own order.
    pub fn list_tools(&self) -> Vec<(NamespacedName, ToolDescriptor)> {
        self.endpoints
            .values()
            .flat_map(|endpoint| {
                endpoint.tools.iter().map(|tool| {
                    (
                        NamespacedName::new(endpoint.id.clone(), tool.name.as_str()),
                        tool.clone(),
                    )
                })
            })
            .collect()
    }

    pub fn resolve(
        &self,
        name: &str,
    ) -> Result<(Arc<ProviderEndpoint>, LocalToolName), ToolNotFoundError> {
        let parsed = NamespacedName::parse(name)
            .ok_or_else(|| ToolNotFoundError::MissingSeparator(name.to_string()))?;
        let endpoint = self
            .endpoints
            .get(&parsed.provider)
            .ok_or(ToolNotFoundError::UnknownProvider(parsed.provider))?;
        Ok((endpoint.clone(), parsed.tool))
    }
}

/// Outcome of a successful reload.
#[derive(Debug, Default)]
pub struct ReloadSummary {
    pub providers: usize,
    pub tools: usize,
    /// Providers that failed discovery; they are loaded with no tools.
    pub failures: Vec<DiscoveryError>,
    /// Providers whose identifier contains the namespace separator. They are
    /// loaded, but no namespaced name can resolve to them.
    pub unreachable: Vec<ProviderId>,
}

/// Concurrent-safe registry of provider endpoints.
pub struct Registry {
    client: Arc<dyn ProviderClient>,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Serialises reloads; never held by readers.
    reload_lock: Mutex<()>,
}

impl Registry {
    /// Create an empty registry that talks to providers through `client`.
    pub fn new(client: Arc<dyn ProviderClient>) -> Self {
        Self {
            client,
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn client(&self) -> &Arc<dyn ProviderClient> {
        &self.client
    }

    /// The current snapshot. Stays valid and unchanged across later reloads.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().await.clone()
    }

    /// Rescan `directory` and replace the whole snapshot.
    ///
    /// A provider that fails its handshake is kept with an empty catalog and
    /// reported in the summary; only an unreadable directory fails the reload,
    /// in which case the previous snapshot stays in place.
    pub async fn reload(&self, directory: &Path) -> Result<ReloadSummary, DiscoveryError> {
        let _guard = self.reload_lock.lock().await;

        let candidates = scan_candidates(directory).await?;
        debug!(
            directory = %directory.display(),
            candidates = candidates.len(),
            "Discovering providers"
        );

        let client = self.client.as_ref();
        let outcomes: Vec<_> = futures::stream::iter(candidates)
            .map(|(id, path)| async move {
                let outcome = client.discover(&path).await;
                (id, path, outcome)
            })
            .buffered(DISCOVERY_CONCURRENCY)
            .collect()
            .await;

        let mut endpoints = BTreeMap::new();
        let mut failures = Vec::new();
        let mut unreachable = Vec::new();
        for (id, path, outcome) in outcomes {
            let tools = match outcome {
                Ok(tools) => tools,
                Err(source) => {
                    warn!(
                        provider = %id,
                        path = %path.display(),
                        error = %source,
                        "Failed to get tool info; loading provider with no tools"
                    );
                    failures.push(DiscoveryError::Provider {
                        path: path.clone(),
                        source,
                    });
                    Vec::new()
                }
            };

            if id.as_str().contains(NAMESPACE_SEPARATOR) {
                warn!(
                    provider = %id,
                    "Provider identifier contains '{NAMESPACE_SEPARATOR}'; its tools cannot be addressed"
                );
                if !unreachable.contains(&id) {
                    unreachable.push(id.clone());
                }
            }

            info!(
                provider = %id,
                path = %path.display(),
                tools = tools.len(),
                "Loaded provider"
            );

            let endpoint = Arc::new(ProviderEndpoint {
                id: id.clone(),
                executable: path,
                tools,
            });
            if let Some(previous) = endpoints.insert(id.clone(), endpoint) {
                warn!(
                    provider = %id,
                    replaced = %previous.executable.display(),
                    "Provider identifier collision; the later executable wins"
                );
            }
        }

        let snapshot = Arc::new(Snapshot::new(endpoints));
        let summary = ReloadSummary {
            providers: snapshot.len(),
            tools: snapshot.tool_count(),
            failures,
            unreachable,
        };
        let loaded_at = snapshot.loaded_at();

        *self.snapshot.write().await = snapshot;

        info!(
            loaded_at = %loaded_at.to_rfc3339(),
            providers = summary.providers,
            tools = summary.tools,
            failed = summary.failures.len(),
            "Provider registry reloaded"
        );
        Ok(summary)
    }

    /// All tools of the current snapshot with namespaced names.
    pub async fn list_all_tools(&self) -> Vec<(NamespacedName, ToolDescriptor)> {
        self.snapshot().await.list_tools()
    }

    /// Find the endpoint owning `name` and the provider-local tool name.
    pub async fn resolve(
        &self,
        name: &str,
    ) -> Result<(Arc<ProviderEndpoint>, LocalToolName), ToolNotFoundError> {
        self.snapshot().await.resolve(name)
    }

    pub async fn endpoint(&self, id: &str) -> Option<Arc<ProviderEndpoint>> {
        self.snapshot().await.get(id).cloned()
    }

    /// Resolve `name` and run it in a fresh provider process.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: JsonObject,
        cancel: &CancellationToken,
    ) -> Result<Value, InvocationError> {
        let (endpoint, tool) = self.resolve(name).await?;
        debug!(
            provider = %endpoint.id,
            tool = %tool,
            path = %endpoint.executable.display(),
            "Invoking tool"
        );
        let result = self
            .client
            .invoke(&endpoint.executable, &tool, arguments, cancel)
            .await?;
        Ok(result)
    }
}

/// Executables directly inside `directory`, in file-name order.
async fn scan_candidates(directory: &Path) -> Result<Vec<(ProviderId, PathBuf)>, DiscoveryError> {
    let dir_error = |source| DiscoveryError::Directory {
        path: directory.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(directory).await.map_err(dir_error)?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(dir_error)? {
        let path = entry.path();
        // Follows symlinks, so a linked provider counts as a regular file.
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !metadata.is_file() || !is_executable(&path, &metadata) {
            continue;
        }
        match provider_id(&path) {
            Some(id) => candidates.push((id, path)),
            None => debug!(path = %path.display(), "Skipping executable without a usable name"),
        }
    }

    candidates.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(candidates)
}

#[cfg(unix)]
fn is_executable(_path: &Path, metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(path: &Path, _metadata: &Metadata) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ["exe", "bat", "cmd", "com"].contains(&ext.to_ascii_lowercase().as_str()))
}

/// File name with its last extension stripped.
pub fn provider_id(path: &Path) -> Option<ProviderId> {
    let stem = path.file_stem()?.to_string_lossy();
    if stem.is_empty() {
        return None;
    }
    Some(ProviderId::new(stem.into_owned()))
}
