//! Callable stubs built from a process's published manifest.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use toolset_primitives::{DescriptorKey, Endpoint, ManifestMarker, ToolProcessDescriptor, ToolSpec};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::invocation::InvocationClient;

/// One parameter of a remote tool, for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    name: String,
    type_name: &'static str,
    required: bool,
    description: Option<String>,
}

impl Parameter {
    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema type label, e.g. `number` or `object`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether callers must supply the parameter.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Declared description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Marker currently published for one process; shared between the factory
/// and every stub it built for that process. `None` once the process left
/// the registry.
#[derive(Debug)]
pub(crate) struct CurrentMarker(RwLock<Option<ManifestMarker>>);

impl CurrentMarker {
    fn new(marker: ManifestMarker) -> Arc<Self> {
        Arc::new(Self(RwLock::new(Some(marker))))
    }

    fn get(&self) -> Option<ManifestMarker> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, marker: Option<ManifestMarker>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = marker;
    }
}

/// Callable bound to one remote tool under one manifest marker.
///
/// A stub stops working once its process publishes a new marker or leaves
/// the registry; calls then fail with [`ClientError::StaleManifest`] and the
/// caller should rebuild through the [`ProxyFactory`].
pub struct ProxyStub {
    toolset: String,
    spec: ToolSpec,
    key: DescriptorKey,
    endpoint: Endpoint,
    marker: ManifestMarker,
    current: Arc<CurrentMarker>,
    client: Arc<InvocationClient>,
}

impl fmt::Debug for ProxyStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyStub")
            .field("name", &self.qualified_name())
            .field("endpoint", &self.endpoint)
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

impl ProxyStub {
    #[cfg(test)]
    pub(crate) fn new(
        spec: ToolSpec,
        descriptor: &ToolProcessDescriptor,
        client: Arc<InvocationClient>,
    ) -> Self {
        let current = CurrentMarker::new(descriptor.manifest_marker().clone());
        Self::bound(spec, descriptor, current, client)
    }

    fn bound(
        spec: ToolSpec,
        descriptor: &ToolProcessDescriptor,
        current: Arc<CurrentMarker>,
        client: Arc<InvocationClient>,
    ) -> Self {
        Self {
            toolset: descriptor.name().to_owned(),
            spec,
            key: descriptor.key(),
            endpoint: descriptor.endpoint().clone(),
            marker: descriptor.manifest_marker().clone(),
            current,
            client,
        }
    }

    /// Tool name as registered in the remote process.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// `process.tool` name used as the catalog key. The process part is the
    /// registry name of the descriptor, not the name the process reports.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.toolset, self.spec.name)
    }

    /// Documentation published by the tool.
    #[must_use]
    pub fn doc(&self) -> &str {
        &self.spec.doc
    }

    /// Published tool spec.
    #[must_use]
    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    /// Registry identity of the process serving the tool.
    #[must_use]
    pub fn key(&self) -> &DescriptorKey {
        &self.key
    }

    /// Endpoint calls are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Manifest marker the stub was built under.
    #[must_use]
    pub fn marker(&self) -> &ManifestMarker {
        &self.marker
    }

    /// Returns `true` while the stub's marker is still the published one.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.current.get().as_ref() == Some(&self.marker)
    }

    /// Fails with [`ClientError::StaleManifest`] unless the stub is current.
    pub(crate) fn ensure_current(&self) -> ClientResult<()> {
        let current = self.current.get();
        if current.as_ref() == Some(&self.marker) {
            return Ok(());
        }
        Err(ClientError::StaleManifest {
            key: self.key.clone(),
            captured: self.marker.clone(),
            current,
        })
    }

    /// Parameter signature in declaration order.
    #[must_use]
    pub fn parameters(&self) -> Vec<Parameter> {
        let schema = &self.spec.params_schema;
        schema
            .properties()
            .iter()
            .map(|property| Parameter {
                name: property.name().to_owned(),
                type_name: property.schema().type_name(),
                required: schema.is_required(property.name()),
                description: property.description().map(str::to_owned),
            })
            .collect()
    }

    /// Calls the tool.
    ///
    /// # Errors
    ///
    /// See [`InvocationClient::invoke`].
    pub async fn call(&self, params: Value) -> ClientResult<Value> {
        self.client.invoke(self, params).await
    }

    /// Calls the tool with typed parameters and result.
    ///
    /// # Errors
    ///
    /// See [`InvocationClient::invoke_typed`].
    pub async fn call_typed<P, R>(&self, params: &P) -> ClientResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.client.invoke_typed(self, params).await
    }
}

/// Stubs for every tool of one process, built under one marker.
#[derive(Debug)]
pub struct StubSet {
    key: DescriptorKey,
    marker: ManifestMarker,
    toolset_version: String,
    stubs: Vec<Arc<ProxyStub>>,
}

impl StubSet {
    /// Registry identity of the process.
    #[must_use]
    pub fn key(&self) -> &DescriptorKey {
        &self.key
    }

    /// Marker the set was built under.
    #[must_use]
    pub fn marker(&self) -> &ManifestMarker {
        &self.marker
    }

    /// Toolset version reported by the process.
    #[must_use]
    pub fn toolset_version(&self) -> &str {
        &self.toolset_version
    }

    /// Looks up a stub by tool name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ProxyStub>> {
        self.stubs.iter().find(|stub| stub.name() == name)
    }

    /// Stubs in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProxyStub>> {
        self.stubs.iter()
    }

    /// Number of stubs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    /// Returns `true` when the process publishes no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }
}

/// Stubs across many processes, keyed by `toolset.tool`.
#[derive(Debug, Default)]
pub struct ProxyCatalog {
    stubs: BTreeMap<String, Arc<ProxyStub>>,
    failures: Vec<(DescriptorKey, ClientError)>,
}

impl ProxyCatalog {
    /// Looks up a stub by qualified name.
    #[must_use]
    pub fn get(&self, qualified_name: &str) -> Option<&Arc<ProxyStub>> {
        self.stubs.get(qualified_name)
    }

    /// Qualified names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stubs.keys().map(String::as_str)
    }

    /// Number of stubs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    /// Returns `true` when no stubs were built.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Processes whose manifest could not be fetched.
    #[must_use]
    pub fn failures(&self) -> &[(DescriptorKey, ClientError)] {
        &self.failures
    }
}

struct CacheEntry {
    marker: ManifestMarker,
    current: Arc<CurrentMarker>,
    stubs: OnceCell<Arc<StubSet>>,
}

/// Builds and caches [`StubSet`]s keyed by (descriptor key, marker).
pub struct ProxyFactory {
    client: Arc<InvocationClient>,
    cache: Mutex<HashMap<DescriptorKey, Arc<CacheEntry>>>,
}

impl fmt::Debug for ProxyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyFactory")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl ProxyFactory {
    /// Creates a factory that builds stubs calling through `client`.
    #[must_use]
    pub fn new(client: Arc<InvocationClient>) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns stubs for the descriptor, describing the process on a cache
    /// miss. Concurrent callers for the same key share one build.
    ///
    /// # Errors
    ///
    /// Propagates the `describe_tools` failure; nothing is cached in that case.
    pub async fn build(&self, descriptor: &ToolProcessDescriptor) -> ClientResult<Arc<StubSet>> {
        let entry = self.entry(descriptor).await;
        let stubs = entry
            .stubs
            .get_or_try_init(|| self.describe(descriptor, &entry.current))
            .await?;
        Ok(Arc::clone(stubs))
    }

    /// Builds stubs for every descriptor.
    ///
    /// Processes that cannot be described are reported through
    /// [`ProxyCatalog::failures`] and left out of the catalog.
    pub async fn build_all(&self, descriptors: &[ToolProcessDescriptor]) -> ProxyCatalog {
        let builds = descriptors
            .iter()
            .map(|descriptor| async move { (descriptor.key(), self.build(descriptor).await) });

        let mut catalog = ProxyCatalog::default();
        for (key, outcome) in join_all(builds).await {
            match outcome {
                Ok(set) => {
                    for stub in set.iter() {
                        let name = stub.qualified_name();
                        if let Some(previous) = catalog.stubs.insert(name.clone(), Arc::clone(stub)) {
                            warn!(tool = %name, shadowed = %previous.key(), by = %key, "duplicate tool name");
                        }
                    }
                }
                Err(err) => {
                    warn!(%key, %err, "skipping process with unavailable manifest");
                    catalog.failures.push((key, err));
                }
            }
        }
        catalog
    }

    /// Drops cached stub sets whose key is not in `live`. Stubs already handed
    /// out for those processes become stale.
    pub async fn retain<'a, I>(&self, live: I)
    where
        I: IntoIterator<Item = &'a DescriptorKey>,
    {
        let live: HashSet<&DescriptorKey> = live.into_iter().collect();
        let mut cache = self.cache.lock().await;
        cache.retain(|key, entry| {
            let keep = live.contains(key);
            if !keep {
                debug!(%key, "dropping stubs for vanished process");
                entry.current.set(None);
            }
            keep
        });
    }

    /// Drops every cached stub set. Stubs already handed out stay usable until
    /// their process publishes a new marker.
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    /// Number of cached processes.
    pub async fn cached(&self) -> usize {
        self.cache.lock().await.len()
    }

    async fn entry(&self, descriptor: &ToolProcessDescriptor) -> Arc<CacheEntry> {
        let key = descriptor.key();
        let marker = descriptor.manifest_marker();
        let mut cache = self.cache.lock().await;

        let current = match cache.get(&key) {
            Some(entry) if &entry.marker == marker => return Arc::clone(entry),
            Some(entry) => {
                info!(%key, cached = %entry.marker, %marker, "discarding stale stubs");
                entry.current.set(Some(marker.clone()));
                Arc::clone(&entry.current)
            }
            None => CurrentMarker::new(marker.clone()),
        };

        let entry = Arc::new(CacheEntry {
            marker: marker.clone(),
            current,
            stubs: OnceCell::new(),
        });
        cache.insert(key, Arc::clone(&entry));
        entry
    }

    async fn describe(
        &self,
        descriptor: &ToolProcessDescriptor,
        current: &Arc<CurrentMarker>,
    ) -> ClientResult<Arc<StubSet>> {
        let manifest = self.client.describe(descriptor.endpoint()).await?;
        if manifest.toolset != descriptor.name() {
            warn!(
                key = %descriptor.key(),
                reported = %manifest.toolset,
                "process reports a different toolset name; stubs use the registry name"
            );
        }

        let stubs: Vec<_> = manifest
            .tools
            .into_iter()
            .map(|spec| {
                Arc::new(ProxyStub::bound(
                    spec,
                    descriptor,
                    Arc::clone(current),
                    Arc::clone(&self.client),
                ))
            })
            .collect();
        info!(
            key = %descriptor.key(),
            marker = %descriptor.manifest_marker(),
            tools = stubs.len(),
            "built proxy stubs"
        );

        Ok(Arc::new(StubSet {
            key: descriptor.key(),
            marker: descriptor.manifest_marker().clone(),
            toolset_version: manifest.toolset_version,
            stubs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::num::NonZeroU32;
    use std::time::Duration;

    use serde_json::json;

    use crate::error::TransportError;
    use crate::invocation::RetryPolicy;
    use crate::testing::{ScriptedTransport, descriptor, dev, math_descriptor};
    use crate::transport::Transport;

    fn factory(transport: ScriptedTransport) -> (Arc<ScriptedTransport>, ProxyFactory) {
        let transport = Arc::new(transport);
        let client = InvocationClient::new(Arc::clone(&transport) as Arc<dyn Transport>)
            .with_retry_policy(RetryPolicy::new(
                NonZeroU32::new(2).unwrap(),
                Duration::from_millis(1),
                Duration::from_millis(2),
                2.0,
            ));
        (transport, ProxyFactory::new(Arc::new(client)))
    }

    #[tokio::test]
    async fn builds_callable_stubs() {
        let (_, factory) = factory(ScriptedTransport::new());

        let set = factory.build(&math_descriptor("m1")).await.unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.toolset_version(), "0.1.0");

        let add = set.get("add").unwrap();
        assert_eq!(add.qualified_name(), "math.add");
        assert_eq!(add.doc(), "Add two numbers");
        let result = add.call(json!({"x": 2, "y": 40})).await.unwrap();
        assert_eq!(result, json!({"value": 42.0}));
    }

    #[tokio::test]
    async fn parameters_follow_declaration_order() {
        let (_, factory) = factory(ScriptedTransport::new());
        let set = factory.build(&math_descriptor("m1")).await.unwrap();

        let parameters = set.get("divide").unwrap().parameters();
        let names: Vec<_> = parameters.iter().map(Parameter::name).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert!(parameters.iter().all(Parameter::is_required));
        assert_eq!(parameters[0].type_name(), "number");
        assert_eq!(parameters[0].description(), None);
    }

    #[tokio::test]
    async fn concurrent_builds_share_one_describe() {
        let (transport, factory) =
            factory(ScriptedTransport::new().with_delay(Duration::from_millis(20)));
        let descriptor = math_descriptor("m1");

        let sets = join_all((0..8).map(|_| factory.build(&descriptor))).await;
        let first = sets[0].as_ref().unwrap();
        for set in &sets {
            assert!(Arc::ptr_eq(first, set.as_ref().unwrap()));
        }
        assert_eq!(transport.describes(), 1);
    }

    #[tokio::test]
    async fn marker_change_rebuilds_stubs() {
        let (transport, factory) = factory(ScriptedTransport::new());

        let old = factory.build(&math_descriptor("m1")).await.unwrap();
        let cached = factory.build(&math_descriptor("m1")).await.unwrap();
        assert!(Arc::ptr_eq(&old, &cached));
        assert_eq!(transport.describes(), 1);

        let fresh = factory.build(&math_descriptor("m2")).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(fresh.marker().as_str(), "m2");
        assert_eq!(transport.describes(), 2);
        assert_eq!(factory.cached().await, 1);
    }

    #[tokio::test]
    async fn superseded_stubs_refuse_to_call() {
        let (transport, factory) = factory(ScriptedTransport::new().with_math_at("local://new"));

        let old = factory
            .build(&descriptor("math", "local://math", "m1"))
            .await
            .unwrap();
        let old_add = Arc::clone(old.get("add").unwrap());
        assert!(old_add.is_current());

        let fresh = factory
            .build(&descriptor("math", "local://new", "m2"))
            .await
            .unwrap();
        let sends = transport.sends();

        assert!(!old_add.is_current());
        let err = old_add.call(json!({"x": 1, "y": 2})).await.unwrap_err();
        assert!(matches!(
            &err,
            ClientError::StaleManifest { captured, current: Some(current), .. }
                if captured.as_str() == "m1" && current.as_str() == "m2"
        ));
        assert_eq!(transport.sends(), sends);

        let fresh_add = fresh.get("add").unwrap();
        assert_eq!(fresh_add.endpoint().as_str(), "local://new");
        assert_eq!(
            fresh_add.call(json!({"x": 1, "y": 2})).await.unwrap(),
            json!({"value": 3.0})
        );
    }

    #[tokio::test]
    async fn vanished_process_stubs_are_stale() {
        let (_, factory) = factory(ScriptedTransport::new());
        let set = factory.build(&math_descriptor("m1")).await.unwrap();
        let add = set.get("add").unwrap();

        factory.clear().await;
        assert!(add.is_current());

        let set = factory.build(&math_descriptor("m1")).await.unwrap();
        let add = set.get("add").unwrap();
        factory.retain(&Vec::<DescriptorKey>::new()).await;
        let err = add.call(json!({"x": 1, "y": 2})).await.unwrap_err();
        assert!(matches!(err, ClientError::StaleManifest { current: None, .. }));
    }

    #[tokio::test]
    async fn stubs_are_named_after_the_registry_entry() {
        let (_, factory) = factory(ScriptedTransport::new());
        let catalog = factory
            .build_all(&[
                descriptor("calc", "local://math", "m1"),
                descriptor("math", "local://math", "m1"),
            ])
            .await;

        let names: Vec<_> = catalog.names().collect();
        assert_eq!(
            names,
            vec!["calc.add", "calc.divide", "math.add", "math.divide"]
        );
        let add = catalog.get("calc.add").unwrap();
        assert_eq!(add.key().name(), "calc");
        assert_eq!(add.call(json!({"x": 2, "y": 2})).await.unwrap(), json!({"value": 4.0}));
    }

    #[tokio::test]
    async fn failed_describe_is_not_cached() {
        let (transport, factory) =
            factory(ScriptedTransport::new().failing_with([TransportError::protocol("garbage")]));
        let descriptor = math_descriptor("m1");

        assert!(factory.build(&descriptor).await.is_err());
        assert!(factory.build(&descriptor).await.is_ok());
        assert_eq!(transport.describes(), 2);
    }

    #[tokio::test]
    async fn build_all_reports_unreachable_processes() {
        let (_, factory) = factory(ScriptedTransport::new());
        let missing = ToolProcessDescriptor::builder(dev())
            .name("text")
            .unwrap()
            .endpoint("local://text")
            .unwrap()
            .build()
            .unwrap();

        let catalog = factory.build_all(&[math_descriptor("m1"), missing]).await;
        let names: Vec<_> = catalog.names().collect();
        assert_eq!(names, vec!["math.add", "math.divide"]);
        assert_eq!(catalog.failures().len(), 1);
        assert_eq!(catalog.failures()[0].0.name(), "text");
        assert!(catalog.get("math.add").is_some());
    }

    #[tokio::test]
    async fn retain_drops_vanished_processes() {
        let (_, factory) = factory(ScriptedTransport::new());
        let descriptor = math_descriptor("m1");
        factory.build(&descriptor).await.unwrap();

        factory.retain([&descriptor.key()]).await;
        assert_eq!(factory.cached().await, 1);

        factory.retain(&Vec::<DescriptorKey>::new()).await;
        assert_eq!(factory.cached().await, 0);

        factory.build(&descriptor).await.unwrap();
        factory.clear().await;
        assert_eq!(factory.cached().await, 0);
    }
}
