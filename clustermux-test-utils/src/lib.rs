//! clustermux Test Utilities
//!
//! Shared test infrastructure for the clustermux workspace:
//! - Mock partition caches, informers, and a recording cache factory
//! - Proptest generators for partition identifiers and objects
//! - Fixtures for common configurations

pub use clustermux_cache::{
    EventHandler, IndexerFn, Indexers, Informer, MultiPartitionCache, PartitionCache,
    PartitionCacheFactory,
};
pub use clustermux_core::{
    CacheContext, CacheError, CacheOptions, CacheResult, ConnectionConfig, GroupVersionKind,
    ListOptions, MultiCacheConfig, Object, ObjectKey, ObjectList, PartitionConfig, PartitionId,
    ResourceScope, Scheme, TypeMeta,
};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// How long a mock waits for its sync flag before giving up.
pub const DEFAULT_SYNC_WAIT: Duration = Duration::from_millis(250);

// ============================================================================
// MOCK INFORMER
// ============================================================================

/// Informer that records registrations and mirrors its cache's sync flag.
#[derive(Debug)]
pub struct MockInformer {
    kind: String,
    handlers: AtomicUsize,
    resync_periods: Mutex<Vec<Duration>>,
    indexers: Mutex<Vec<String>>,
    synced: watch::Receiver<bool>,
}

impl MockInformer {
    fn new(kind: impl Into<String>, synced: watch::Receiver<bool>) -> Self {
        Self {
            kind: kind.into(),
            handlers: AtomicUsize::new(0),
            resync_periods: Mutex::new(Vec::new()),
            indexers: Mutex::new(Vec::new()),
            synced,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.load(Ordering::SeqCst)
    }

    pub fn resync_periods(&self) -> Vec<Duration> {
        self.resync_periods.lock().unwrap().clone()
    }

    /// Index names added so far, sorted.
    pub fn indexer_names(&self) -> Vec<String> {
        let mut names = self.indexers.lock().unwrap().clone();
        names.sort();
        names
    }
}

impl Informer for MockInformer {
    fn add_event_handler(&self, _handler: Arc<dyn EventHandler>) {
        self.handlers.fetch_add(1, Ordering::SeqCst);
    }

    fn add_event_handler_with_resync_period(
        &self,
        _handler: Arc<dyn EventHandler>,
        resync_period: Duration,
    ) {
        self.handlers.fetch_add(1, Ordering::SeqCst);
        self.resync_periods.lock().unwrap().push(resync_period);
    }

    fn add_indexers(&self, indexers: Indexers) -> CacheResult<()> {
        let mut names = self.indexers.lock().unwrap();
        for name in indexers.into_keys() {
            if names.contains(&name) {
                return Err(CacheError::Backend {
                    reason: format!("indexer {name} already exists"),
                });
            }
            names.push(name);
        }
        Ok(())
    }

    fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }
}

/// Handler that counts the notifications it receives.
#[derive(Debug, Default)]
pub struct CountingHandler {
    pub adds: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl EventHandler for CountingHandler {
    fn on_add(&self, _obj: &Object) {
        self.adds.fetch_add(1, Ordering::SeqCst);
    }

    fn on_update(&self, _old: &Object, _new: &Object) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn on_delete(&self, _obj: &Object) {
        self.deletes.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// MOCK PARTITION CACHE
// ============================================================================

type StoreKey = (String, ObjectKey);

/// In-memory replica of one partition.
///
/// Serves seeded objects, records index and informer registrations, and
/// reports synced only after [`MockPartitionCache::mark_synced`] (or on
/// start, when built with `synced_on_start`).
#[derive(Debug)]
pub struct MockPartitionCache {
    partition: PartitionId,
    host: String,
    store: RwLock<HashMap<StoreKey, Object>>,
    informers: Mutex<HashMap<String, Arc<MockInformer>>>,
    index_fields: Mutex<Vec<String>>,
    synced: watch::Sender<bool>,
    sync_wait: Duration,
    synced_on_start: bool,
    fail_start: bool,
    starts: AtomicUsize,
    running: AtomicBool,
}

impl MockPartitionCache {
    pub fn new(partition: impl Into<PartitionId>) -> Self {
        Self {
            partition: partition.into(),
            host: String::new(),
            store: RwLock::new(HashMap::new()),
            informers: Mutex::new(HashMap::new()),
            index_fields: Mutex::new(Vec::new()),
            synced: watch::channel(false).0,
            sync_wait: DEFAULT_SYNC_WAIT,
            synced_on_start: false,
            fail_start: false,
            starts: AtomicUsize::new(0),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_objects(self, objects: impl IntoIterator<Item = Object>) -> Self {
        for obj in objects {
            self.insert(obj);
        }
        self
    }

    pub fn with_sync_wait(mut self, wait: Duration) -> Self {
        self.sync_wait = wait;
        self
    }

    /// Report synced as soon as `start` runs.
    pub fn synced_on_start(mut self) -> Self {
        self.synced_on_start = true;
        self
    }

    /// Make `start` fail immediately.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    /// Endpoint this replica was configured with.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Store `obj`, stamped with this cache's partition.
    pub fn insert(&self, mut obj: Object) {
        if !self.partition.is_wildcard() && obj.metadata.partition().is_none() {
            obj.set_partition(&self.partition);
        }
        let key = (obj.type_meta.kind.clone(), obj.key());
        self.store.write().unwrap().insert(key, obj);
    }

    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Whether `start` is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn index_fields(&self) -> Vec<String> {
        self.index_fields.lock().unwrap().clone()
    }

    pub fn informer_for(&self, kind: &str) -> Option<Arc<MockInformer>> {
        self.informers.lock().unwrap().get(kind).cloned()
    }

    fn informer(&self, kind: &str) -> Arc<MockInformer> {
        let mut informers = self.informers.lock().unwrap();
        Arc::clone(
            informers
                .entry(kind.to_string())
                .or_insert_with(|| Arc::new(MockInformer::new(kind, self.synced.subscribe()))),
        )
    }
}

#[async_trait]
impl PartitionCache for MockPartitionCache {
    async fn get(&self, ctx: &CacheContext, key: &ObjectKey, obj: &mut Object) -> CacheResult<()> {
        ctx.check()?;
        let store_key = (obj.type_meta.kind.clone(), key.clone());
        match self.store.read().unwrap().get(&store_key) {
            Some(found) => {
                *obj = found.clone();
                Ok(())
            }
            None => Err(CacheError::NotFound {
                kind: store_key.0,
                key: store_key.1,
            }),
        }
    }

    async fn list(
        &self,
        ctx: &CacheContext,
        list: &mut ObjectList,
        opts: &ListOptions,
    ) -> CacheResult<()> {
        ctx.check()?;
        let store = self.store.read().unwrap();
        let mut items: Vec<Object> = store
            .iter()
            .filter(|((kind, _), obj)| *kind == list.type_meta.kind && opts.matches(obj))
            .map(|(_, obj)| obj.clone())
            .collect();
        items.sort_by(|a, b| {
            (&a.metadata.cluster_name, a.key()).cmp(&(&b.metadata.cluster_name, b.key()))
        });
        if let Some(limit) = opts.limit {
            items.truncate(limit);
        }
        list.items = items;
        Ok(())
    }

    async fn get_informer(
        &self,
        ctx: &CacheContext,
        obj: &Object,
    ) -> CacheResult<Arc<dyn Informer>> {
        ctx.check()?;
        Ok(self.informer(&obj.type_meta.kind))
    }

    async fn get_informer_for_kind(
        &self,
        ctx: &CacheContext,
        gvk: &GroupVersionKind,
    ) -> CacheResult<Arc<dyn Informer>> {
        ctx.check()?;
        Ok(self.informer(&gvk.kind))
    }

    async fn index_field(
        &self,
        ctx: &CacheContext,
        obj: &Object,
        field: &str,
        extract: IndexerFn,
    ) -> CacheResult<()> {
        ctx.check()?;
        let informer = self.informer(&obj.type_meta.kind);
        informer.add_indexers(HashMap::from([(format!("field:{field}"), extract)]))?;
        self.index_fields.lock().unwrap().push(field.to_string());
        Ok(())
    }

    async fn start(&self, ctx: &CacheContext) -> CacheResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(CacheError::Backend {
                reason: format!("watch for partition {} failed", self.partition),
            });
        }
        self.running.store(true, Ordering::SeqCst);
        if self.synced_on_start {
            self.mark_synced();
        }
        ctx.cancelled().await;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_cache_sync(&self, ctx: &CacheContext) -> bool {
        let mut synced = self.synced.subscribe();
        tokio::select! {
            res = synced.wait_for(|synced| *synced) => res.is_ok(),
            () = ctx.cancelled() => false,
            () = tokio::time::sleep(self.sync_wait) => false,
        }
    }
}

// ============================================================================
// MOCK FACTORY
// ============================================================================

/// Factory that builds a [`MockPartitionCache`] per partition and keeps a
/// handle to each one.
#[derive(Debug, Default)]
pub struct MockCacheFactory {
    builds: AtomicUsize,
    created: Mutex<HashMap<PartitionId, Arc<MockPartitionCache>>>,
    failing: HashSet<PartitionId>,
    failing_start: HashSet<PartitionId>,
    seeds: HashMap<PartitionId, Vec<Object>>,
    synced_on_start: bool,
    sync_wait: Option<Duration>,
}

impl MockCacheFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to build the cache for `partition`.
    pub fn failing_for(mut self, partition: impl Into<PartitionId>) -> Self {
        self.failing.insert(partition.into());
        self
    }

    /// Build the cache for `partition`, but make its `start` fail.
    pub fn failing_start_for(mut self, partition: impl Into<PartitionId>) -> Self {
        self.failing_start.insert(partition.into());
        self
    }

    /// Objects the cache for `partition` starts out with.
    pub fn with_seed(
        mut self,
        partition: impl Into<PartitionId>,
        objects: impl IntoIterator<Item = Object>,
    ) -> Self {
        self.seeds
            .entry(partition.into())
            .or_default()
            .extend(objects);
        self
    }

    pub fn synced_on_start(mut self) -> Self {
        self.synced_on_start = true;
        self
    }

    pub fn with_sync_wait(mut self, wait: Duration) -> Self {
        self.sync_wait = Some(wait);
        self
    }

    /// Number of build attempts, failed ones included.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn created(&self, partition: impl Into<PartitionId>) -> Option<Arc<MockPartitionCache>> {
        self.created.lock().unwrap().get(&partition.into()).cloned()
    }

    pub fn wildcard(&self) -> Option<Arc<MockPartitionCache>> {
        self.created(PartitionId::wildcard())
    }

    /// Partitions a cache was built for, sorted. Includes the wildcard.
    pub fn created_partitions(&self) -> Vec<PartitionId> {
        let mut partitions: Vec<_> = self.created.lock().unwrap().keys().cloned().collect();
        partitions.sort();
        partitions
    }
}

impl PartitionCacheFactory for MockCacheFactory {
    fn build(&self, config: &PartitionConfig) -> CacheResult<Arc<dyn PartitionCache>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&config.partition) {
            return Err(CacheError::Backend {
                reason: format!("cannot reach {}", config.connection.host),
            });
        }

        let mut cache = MockPartitionCache::new(config.partition.clone())
            .with_host(config.connection.host.clone());
        if let Some(wait) = self.sync_wait {
            cache = cache.with_sync_wait(wait);
        }
        if self.synced_on_start {
            cache = cache.synced_on_start();
        }
        if self.failing_start.contains(&config.partition) {
            cache = cache.failing_start();
        }
        if let Some(seed) = self.seeds.get(&config.partition) {
            cache = cache.with_objects(seed.iter().cloned());
        }

        let cache = Arc::new(cache);
        self.created
            .lock()
            .unwrap()
            .insert(config.partition.clone(), Arc::clone(&cache));
        Ok(cache)
    }
}

/// Install a plain subscriber honoring `CLUSTERMUX_LOG`, once per process.
pub fn init_test_tracing() {
    let _ = clustermux_cache::init_tracing(&clustermux_cache::TelemetryConfig::from_env());
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for clustermux types.

    use super::*;
    use proptest::prelude::*;

    /// A valid, non-wildcard partition identifier.
    pub fn arb_partition_id() -> impl Strategy<Value = PartitionId> {
        "[a-z][a-z0-9-]{0,15}".prop_map(PartitionId::new)
    }

    /// Between `min` and `max` distinct partition identifiers, sorted.
    pub fn arb_partition_ids(min: usize, max: usize) -> impl Strategy<Value = Vec<PartitionId>> {
        proptest::collection::btree_set("[a-z][a-z0-9-]{0,15}", min..=max)
            .prop_map(|ids| ids.into_iter().map(PartitionId::new).collect())
    }

    /// An identifier as a caller might supply it, wildcard included.
    pub fn arb_partition_id_or_wildcard() -> impl Strategy<Value = PartitionId> {
        prop_oneof![
            4 => arb_partition_id(),
            1 => Just(PartitionId::wildcard()),
        ]
    }

    pub fn arb_labels() -> impl Strategy<Value = Vec<(String, String)>> {
        proptest::collection::vec(("[a-z]{1,8}", "[a-z0-9]{0,8}"), 0..4)
    }

    /// A ConfigMap in `partition`.
    pub fn arb_config_map(partition: PartitionId) -> impl Strategy<Value = Object> {
        ("[a-z]{1,8}", "[a-z][a-z0-9-]{0,12}", arb_labels()).prop_map(
            move |(namespace, name, labels)| {
                labels.into_iter().fold(
                    fixtures::config_map(&namespace, &name).with_partition(&partition),
                    |obj, (k, v)| obj.with_label(k, v),
                )
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and objects.

    use super::*;

    pub const TEST_HOST: &str = "https://api.test.local:6443";

    pub fn config_map_type() -> TypeMeta {
        TypeMeta::new("v1", "ConfigMap")
    }

    /// An unpartitioned ConfigMap.
    pub fn config_map(namespace: &str, name: &str) -> Object {
        Object::of_type(config_map_type())
            .with_namespace(namespace)
            .with_name(name)
    }

    /// A ConfigMap stamped with `partition`.
    pub fn config_map_in(partition: &str, namespace: &str, name: &str) -> Object {
        config_map(namespace, name).with_partition(&PartitionId::new(partition))
    }

    pub fn test_scheme() -> Scheme {
        Scheme::new()
            .register(
                GroupVersionKind::new("", "v1", "ConfigMap"),
                ResourceScope::Namespaced,
            )
            .register(
                GroupVersionKind::new("", "v1", "Namespace"),
                ResourceScope::Cluster,
            )
    }

    pub fn test_options() -> CacheOptions {
        CacheOptions::new(test_scheme())
    }

    pub fn test_config() -> MultiCacheConfig {
        MultiCacheConfig::new(ConnectionConfig::new(TEST_HOST))
    }

    /// Facade over `factory` with the test configuration.
    pub fn test_cache(
        factory: &Arc<MockCacheFactory>,
        ctx: &CacheContext,
    ) -> CacheResult<MultiPartitionCache> {
        test_cache_with(test_config(), factory, ctx)
    }

    pub fn test_cache_with(
        config: MultiCacheConfig,
        factory: &Arc<MockCacheFactory>,
        ctx: &CacheContext,
    ) -> CacheResult<MultiPartitionCache> {
        let factory: Arc<dyn PartitionCacheFactory> = factory.clone();
        MultiPartitionCache::new(config, test_options(), factory, ctx)
    }
}
