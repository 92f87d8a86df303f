//! Cluster registry.
//!
//! Maps cluster names to API handles built from a directory of credential
//! files. The directory is rescanned periodically; each file becomes a
//! cluster named after the file. Lookups take a read lock only; the write
//! lock is held for a single insert and never across credential loading.
//!
//! Entries are added or replaced on refresh but never removed, so a cluster
//! whose credential file is deleted stays reachable until restart.

pub mod loader;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::exec::ClusterApi;

pub use loader::{ClientLoader, KubeconfigLoader};

/// Errors raised while loading a cluster credential.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The credential could not be parsed.
    #[error("invalid credential {name}: {reason}")]
    InvalidCredential { name: String, reason: String },

    /// The credential parsed but no client could be built from it.
    #[error("failed to build client for {name}: {reason}")]
    ClientBuild { name: String, reason: String },

    /// The credential file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A named handle to one cluster.
pub struct ClusterClient {
    name: String,
    api: Arc<dyn ClusterApi>,
}

impl ClusterClient {
    /// Creates a new client entry.
    pub fn new(name: impl Into<String>, api: Arc<dyn ClusterApi>) -> Self {
        Self {
            name: name.into(),
            api,
        }
    }

    /// Returns the cluster name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the API handle.
    pub fn api(&self) -> &dyn ClusterApi {
        self.api.as_ref()
    }
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Result of one refresh pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    /// Clusters loaded or replaced, in scan order.
    pub loaded: Vec<String>,
    /// Entries skipped, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Thread-safe map of cluster name to client.
pub struct ClusterRegistry {
    dir: PathBuf,
    loader: Arc<dyn ClientLoader>,
    clusters: RwLock<HashMap<String, Arc<ClusterClient>>>,
}

impl ClusterRegistry {
    /// Creates an empty registry reading credentials from `dir`.
    pub fn new(dir: impl Into<PathBuf>, loader: Arc<dyn ClientLoader>) -> Self {
        Self {
            dir: dir.into(),
            loader,
            clusters: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the credential directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Looks up a cluster by name.
    pub async fn get(&self, name: &str) -> Option<Arc<ClusterClient>> {
        self.clusters.read().await.get(name).cloned()
    }

    /// Returns the known cluster names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of known clusters.
    pub async fn len(&self) -> usize {
        self.clusters.read().await.len()
    }

    /// Returns whether no cluster is known.
    pub async fn is_empty(&self) -> bool {
        self.clusters.read().await.is_empty()
    }

    /// Adds or replaces a cluster entry.
    pub async fn register(&self, client: ClusterClient) {
        let name = client.name.clone();
        let replaced = self
            .clusters
            .write()
            .await
            .insert(name.clone(), Arc::new(client))
            .is_some();
        debug!(cluster = %name, replaced, "Cluster registered");
    }

    /// Rescans the credential directory once.
    ///
    /// Every regular file below the directory is loaded as a credential
    /// named after the file. Failing entries are skipped and reported; a
    /// missing directory yields an empty report.
    pub async fn refresh(&self) -> RefreshReport {
        let mut report = RefreshReport::default();

        let is_dir = tokio::fs::metadata(&self.dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            warn!(dir = %self.dir.display(), "Credential directory not found, no clusters loaded");
            return report;
        }

        let dir = self.dir.clone();
        let files = match tokio::task::spawn_blocking(move || credential_files(&dir)).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Credential scan aborted");
                return report;
            }
        };

        for path in files {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };

            match self.load_one(&name, &path).await {
                Ok(api) => {
                    self.register(ClusterClient::new(name.clone(), api)).await;
                    report.loaded.push(name);
                }
                Err(e) => {
                    warn!(cluster = %name, error = %e, "Skipping cluster credential");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Cluster registry refreshed"
        );
        report
    }

    async fn load_one(
        &self,
        name: &str,
        path: &Path,
    ) -> Result<Arc<dyn ClusterApi>, RegistryError> {
        let credential = tokio::fs::read(path).await.map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.loader.load(name, &credential).await
    }

    /// Spawns the periodic refresh loop.
    ///
    /// The first pass runs immediately, then one every `interval`, until
    /// `shutdown` is cancelled.
    pub fn start_refresh_task(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Cluster refresh task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        registry.refresh().await;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for ClusterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRegistry")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

/// Hidden entries below the root, such as the `..data` links of mounted
/// secrets, would otherwise load every credential twice.
fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn credential_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable credential entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path)
        .collect();
    files.sort();
    files
}
