//! Registry store implementations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::fs;
use toolset_primitives::{DescriptorKey, Environment, ToolProcessDescriptor};
use tracing::{debug, warn};

use crate::discovery::{DiscoveryError, DiscoveryResult, RegistryStore};

const TOOLSETS_DIR: &str = "toolsets";

/// Process-local store, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistryStore {
    entries: Arc<RwLock<BTreeMap<DescriptorKey, ToolProcessDescriptor>>>,
}

impl InMemoryRegistryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the descriptor under its key.
    pub fn publish(&self, descriptor: ToolProcessDescriptor) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(descriptor.key(), descriptor);
    }

    /// Removes a descriptor, returning it if present.
    pub fn remove(&self, key: &DescriptorKey) -> Option<ToolProcessDescriptor> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key)
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn get(
        &self,
        environment: &Environment,
        name: &str,
    ) -> DiscoveryResult<Option<ToolProcessDescriptor>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(&DescriptorKey::new(environment.clone(), name))
            .cloned())
    }

    async fn list(&self, environment: &Environment) -> DiscoveryResult<Vec<ToolProcessDescriptor>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .values()
            .filter(|descriptor| descriptor.environment() == environment)
            .cloned()
            .collect())
    }
}

/// Store reading one JSON descriptor per file from
/// `<root>/<environment>/toolsets/*.json`.
#[derive(Debug, Clone)]
pub struct FileRegistryStore {
    root: PathBuf,
}

impl FileRegistryStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn directory(&self, environment: &Environment) -> PathBuf {
        self.root.join(environment.as_str()).join(TOOLSETS_DIR)
    }

    /// Writes a descriptor to `<name>.json` under its environment.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Io`] if the directory or file cannot be
    /// written.
    pub async fn publish(&self, descriptor: &ToolProcessDescriptor) -> DiscoveryResult<PathBuf> {
        let directory = self.directory(descriptor.environment());
        fs::create_dir_all(&directory)
            .await
            .map_err(|source| DiscoveryError::Io {
                path: directory.clone(),
                source,
            })?;

        let path = directory.join(format!("{}.json", descriptor.name()));
        let document = serde_json::to_vec_pretty(descriptor)
            .map_err(|err| DiscoveryError::backend(format!("failed to encode descriptor: {err}")))?;
        fs::write(&path, document)
            .await
            .map_err(|source| DiscoveryError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), key = %descriptor.key(), "descriptor published");
        Ok(path)
    }
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn get(
        &self,
        environment: &Environment,
        name: &str,
    ) -> DiscoveryResult<Option<ToolProcessDescriptor>> {
        Ok(self
            .list(environment)
            .await?
            .into_iter()
            .find(|descriptor| descriptor.name() == name))
    }

    async fn list(&self, environment: &Environment) -> DiscoveryResult<Vec<ToolProcessDescriptor>> {
        let directory = self.directory(environment);
        let mut entries = match fs::read_dir(&directory).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(DiscoveryError::Io {
                    path: directory,
                    source,
                });
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| DiscoveryError::Io {
                path: directory.clone(),
                source,
            })?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut descriptors = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable descriptor");
                    continue;
                }
            };
            match serde_json::from_slice::<ToolProcessDescriptor>(&raw) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(err) => warn!(path = %path.display(), %err, "skipping malformed descriptor"),
            }
        }
        Ok(descriptors)
    }
}
