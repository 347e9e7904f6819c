//! Endpoint discovery with a per-environment cache.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use toolset_config::ClientSettings;
use toolset_primitives::{Environment, ToolProcessDescriptor};
use tracing::{debug, info, warn};

/// Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors surfaced by discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Discovery configuration was invalid.
    #[error("invalid discovery configuration: {0}")]
    InvalidConfig(&'static str),

    /// Registry backend failure.
    #[error("registry backend error: {reason}")]
    Backend {
        /// Human-readable context provided by the backend.
        reason: String,
    },

    /// Filesystem failure in a file-backed store.
    #[error("registry I/O error at {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl DiscoveryError {
    /// Convenience helper to construct backend errors.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}

/// Read side of the registry that deployments publish descriptors into.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Fetches one descriptor; absence is not an error.
    async fn get(
        &self,
        environment: &Environment,
        name: &str,
    ) -> DiscoveryResult<Option<ToolProcessDescriptor>>;

    /// Lists every descriptor published in the environment.
    async fn list(&self, environment: &Environment) -> DiscoveryResult<Vec<ToolProcessDescriptor>>;
}

/// Cache and refresh timing for discovery.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryConfig {
    cache_ttl: Duration,
    refresh_interval: Duration,
}

impl DiscoveryConfig {
    /// Creates a new configuration.
    #[must_use]
    pub const fn new(cache_ttl: Duration, refresh_interval: Duration) -> Self {
        Self {
            cache_ttl,
            refresh_interval,
        }
    }

    /// Returns how long a listing stays fresh.
    #[must_use]
    pub const fn cache_ttl(self) -> Duration {
        self.cache_ttl
    }

    /// Returns the background refresh period.
    #[must_use]
    pub const fn refresh_interval(self) -> Duration {
        self.refresh_interval
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidConfig`] when either duration is zero.
    pub fn validate(self) -> DiscoveryResult<()> {
        if self.cache_ttl.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "cache ttl must be greater than zero",
            ));
        }
        if self.refresh_interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "refresh interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(60),
        }
    }
}

impl From<&ClientSettings> for DiscoveryConfig {
    fn from(settings: &ClientSettings) -> Self {
        let cache_ttl = settings.cache_ttl();
        Self::new(cache_ttl, settings.refresh_interval().unwrap_or(cache_ttl))
    }
}

struct CachedListing {
    descriptors: Vec<ToolProcessDescriptor>,
    fetched_at: Instant,
}

type ListingSlot = Arc<Mutex<Option<CachedListing>>>;

/// Cached view over a [`RegistryStore`].
///
/// Each environment has its own slot; the slot lock is held across a store
/// fetch so concurrent callers share one refresh.
pub struct DiscoveryRegistry {
    store: Arc<dyn RegistryStore>,
    config: DiscoveryConfig,
    slots: Mutex<HashMap<Environment, ListingSlot>>,
}

impl fmt::Debug for DiscoveryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryRegistry")
            .field("store", &"dyn RegistryStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DiscoveryRegistry {
    /// Creates a registry over the given store.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidConfig`] if the configuration is invalid.
    pub fn new(store: Arc<dyn RegistryStore>, config: DiscoveryConfig) -> DiscoveryResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> DiscoveryConfig {
        self.config
    }

    /// Lists descriptors for an environment, serving from cache while fresh.
    ///
    /// # Errors
    ///
    /// Propagates store failures when the cache has to be refilled.
    pub async fn list(&self, environment: &Environment) -> DiscoveryResult<Vec<ToolProcessDescriptor>> {
        let slot = self.slot(environment).await;
        let mut cached = slot.lock().await;
        if let Some(listing) = cached.as_ref() {
            if listing.fetched_at.elapsed() < self.config.cache_ttl {
                debug!(%environment, "discovery cache hit");
                return Ok(listing.descriptors.clone());
            }
        }

        let descriptors = self.fetch(environment).await?;
        *cached = Some(CachedListing {
            descriptors: descriptors.clone(),
            fetched_at: Instant::now(),
        });
        Ok(descriptors)
    }

    /// Refills the cache for an environment regardless of age.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the previous listing is kept in that case.
    pub async fn refresh(&self, environment: &Environment) -> DiscoveryResult<Vec<ToolProcessDescriptor>> {
        let slot = self.slot(environment).await;
        let mut cached = slot.lock().await;
        let descriptors = self.fetch(environment).await?;
        *cached = Some(CachedListing {
            descriptors: descriptors.clone(),
            fetched_at: Instant::now(),
        });
        Ok(descriptors)
    }

    /// Fetches one descriptor straight from the store.
    ///
    /// # Errors
    ///
    /// Propagates store failures. A missing entry is `Ok(None)`.
    pub async fn get(
        &self,
        environment: &Environment,
        name: &str,
    ) -> DiscoveryResult<Option<ToolProcessDescriptor>> {
        self.store.get(environment, name).await
    }

    /// Drops every cached listing.
    pub async fn invalidate(&self) {
        self.slots.lock().await.clear();
    }

    /// Starts refreshing the environment every `refresh_interval`.
    ///
    /// The task stops when the returned handle is dropped.
    #[must_use]
    pub fn spawn_refresh(self: &Arc<Self>, environment: Environment) -> RefreshTask {
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.refresh_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(err) = registry.refresh(&environment).await {
                    warn!(%environment, ?err, "background discovery refresh failed");
                }
            }
        });
        RefreshTask { handle }
    }

    async fn slot(&self, environment: &Environment) -> ListingSlot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(environment.clone()).or_default())
    }

    async fn fetch(&self, environment: &Environment) -> DiscoveryResult<Vec<ToolProcessDescriptor>> {
        let mut latest: BTreeMap<String, ToolProcessDescriptor> = BTreeMap::new();
        for descriptor in self.store.list(environment).await? {
            if descriptor.environment() != environment {
                warn!(
                    %environment,
                    key = %descriptor.key(),
                    "ignoring descriptor published under another environment"
                );
                continue;
            }
            match latest.get(descriptor.name()) {
                Some(existing) if existing.version() >= descriptor.version() => {}
                _ => {
                    latest.insert(descriptor.name().to_owned(), descriptor);
                }
            }
        }

        info!(%environment, count = latest.len(), "discovery listing refreshed");
        Ok(latest.into_values().collect())
    }
}

/// Handle to a background refresh loop; aborts the loop on drop.
#[derive(Debug)]
pub struct RefreshTask {
    handle: JoinHandle<()>,
}

impl RefreshTask {
    /// Stops the loop.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::store::InMemoryRegistryStore;

    struct CountingStore {
        inner: InMemoryRegistryStore,
        lists: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl RegistryStore for CountingStore {
        async fn get(
            &self,
            environment: &Environment,
            name: &str,
        ) -> DiscoveryResult<Option<ToolProcessDescriptor>> {
            self.inner.get(environment, name).await
        }

        async fn list(&self, environment: &Environment) -> DiscoveryResult<Vec<ToolProcessDescriptor>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.list(environment).await
        }
    }

    fn dev() -> Environment {
        Environment::new("dev").unwrap()
    }

    fn descriptor(name: &str, version: u64) -> ToolProcessDescriptor {
        ToolProcessDescriptor::builder(dev())
            .name(name)
            .unwrap()
            .endpoint(format!("local://{name}"))
            .unwrap()
            .version(version)
            .manifest_marker(format!("v{version}"))
            .build()
            .unwrap()
    }

    fn counting(delay: Duration) -> Arc<CountingStore> {
        let inner = InMemoryRegistryStore::new();
        inner.publish(descriptor("math", 1));
        inner.publish(descriptor("text", 1));
        Arc::new(CountingStore {
            inner,
            lists: AtomicUsize::new(0),
            delay,
        })
    }

    #[tokio::test]
    async fn list_is_served_from_cache_within_ttl() {
        let store = counting(Duration::ZERO);
        let registry = DiscoveryRegistry::new(
            Arc::clone(&store) as Arc<dyn RegistryStore>,
            DiscoveryConfig::new(Duration::from_secs(60), Duration::from_secs(60)),
        )
        .unwrap();

        let first = registry.list(&dev()).await.unwrap();
        let second = registry.list(&dev()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);

        registry.refresh(&dev()).await.unwrap();
        assert_eq!(store.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_listing_is_refetched() {
        let store = counting(Duration::ZERO);
        let registry = DiscoveryRegistry::new(
            Arc::clone(&store) as Arc<dyn RegistryStore>,
            DiscoveryConfig::new(Duration::from_millis(10), Duration::from_secs(60)),
        )
        .unwrap();

        registry.list(&dev()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.list(&dev()).await.unwrap();
        assert_eq!(store.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_lists_share_one_fetch() {
        let store = counting(Duration::from_millis(20));
        let registry = Arc::new(
            DiscoveryRegistry::new(
                Arc::clone(&store) as Arc<dyn RegistryStore>,
                DiscoveryConfig::default(),
            )
            .unwrap(),
        );

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.list(&dev()).await.unwrap().len() })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), 2);
        }
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn newest_version_wins_and_missing_is_none() {
        let store = InMemoryRegistryStore::new();
        store.publish(descriptor("math", 1));
        let registry =
            DiscoveryRegistry::new(Arc::new(store.clone()), DiscoveryConfig::default()).unwrap();

        assert!(registry.get(&dev(), "absent").await.unwrap().is_none());
        assert_eq!(
            registry.get(&dev(), "math").await.unwrap().unwrap().version(),
            1
        );

        store.publish(descriptor("math", 4));
        let listing = registry.refresh(&dev()).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].version(), 4);
    }

    #[tokio::test]
    async fn background_refresh_runs_until_dropped() {
        let store = counting(Duration::ZERO);
        let registry = Arc::new(
            DiscoveryRegistry::new(
                Arc::clone(&store) as Arc<dyn RegistryStore>,
                DiscoveryConfig::new(Duration::from_secs(60), Duration::from_millis(5)),
            )
            .unwrap(),
        );

        let task = registry.spawn_refresh(dev());
        tokio::time::sleep(Duration::from_millis(40)).await;
        task.stop();
        let observed = store.lists.load(Ordering::SeqCst);
        assert!(observed >= 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.lists.load(Ordering::SeqCst) <= observed + 1);
    }

    #[test]
    fn zero_durations_are_rejected() {
        let config = DiscoveryConfig::new(Duration::ZERO, Duration::from_secs(1));
        assert!(matches!(
            config.validate(),
            Err(DiscoveryError::InvalidConfig(_))
        ));
    }
}
