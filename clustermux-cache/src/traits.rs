//! Cache, informer, and factory traits.
//!
//! [`PartitionCache`] is the contract of a single-partition watch cache. The
//! multi-partition facade both consumes it (once per partition) and
//! implements it, so callers can swap one for the other without changes.

use async_trait::async_trait;
use clustermux_core::{
    CacheContext, CacheResult, GroupVersionKind, ListOptions, Object, ObjectKey, ObjectList,
    PartitionConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Extracts index values from an object.
pub type IndexerFn = Arc<dyn Fn(&Object) -> Vec<String> + Send + Sync>;

/// Named index functions, keyed by index name.
pub type Indexers = HashMap<String, IndexerFn>;

/// Receives change notifications from an informer.
pub trait EventHandler: Send + Sync {
    fn on_add(&self, obj: &Object);
    fn on_update(&self, old: &Object, new: &Object);
    fn on_delete(&self, obj: &Object);
}

/// Shared informer for one kind in one cache.
pub trait Informer: Send + Sync {
    fn add_event_handler(&self, handler: Arc<dyn EventHandler>);

    fn add_event_handler_with_resync_period(
        &self,
        handler: Arc<dyn EventHandler>,
        resync_period: Duration,
    );

    fn add_indexers(&self, indexers: Indexers) -> CacheResult<()>;

    /// Whether the informer's store has observed its initial full listing.
    fn has_synced(&self) -> bool;
}

/// A watch-backed local replica of one partition's objects.
///
/// Reads never block on synchronization: they return whatever the replica
/// currently holds. Callers that need a caught-up view call
/// [`PartitionCache::wait_for_cache_sync`] first.
#[async_trait]
pub trait PartitionCache: Send + Sync {
    /// Fill `obj` with the object stored under `key`.
    async fn get(&self, ctx: &CacheContext, key: &ObjectKey, obj: &mut Object) -> CacheResult<()>;

    /// Fill `list` with every object of its type matching `opts`.
    async fn list(
        &self,
        ctx: &CacheContext,
        list: &mut ObjectList,
        opts: &ListOptions,
    ) -> CacheResult<()>;

    /// Informer for the kind of `obj`, created on first use.
    async fn get_informer(&self, ctx: &CacheContext, obj: &Object)
        -> CacheResult<Arc<dyn Informer>>;

    /// Informer for a kind without an object instance.
    async fn get_informer_for_kind(
        &self,
        ctx: &CacheContext,
        gvk: &GroupVersionKind,
    ) -> CacheResult<Arc<dyn Informer>>;

    /// Install a field index for the kind of `obj`.
    async fn index_field(
        &self,
        ctx: &CacheContext,
        obj: &Object,
        field: &str,
        extract: IndexerFn,
    ) -> CacheResult<()>;

    /// Run synchronization until `ctx` is cancelled.
    async fn start(&self, ctx: &CacheContext) -> CacheResult<()>;

    /// Block until the replica has observed its initial listing.
    ///
    /// Returns `false` if that never happened before the cache's own wait
    /// bound or cancellation of `ctx`.
    async fn wait_for_cache_sync(&self, ctx: &CacheContext) -> bool;
}

/// Builds the cache for one partition.
pub trait PartitionCacheFactory: Send + Sync {
    fn build(&self, config: &PartitionConfig) -> CacheResult<Arc<dyn PartitionCache>>;
}

impl<F> PartitionCacheFactory for F
where
    F: Fn(&PartitionConfig) -> CacheResult<Arc<dyn PartitionCache>> + Send + Sync,
{
    fn build(&self, config: &PartitionConfig) -> CacheResult<Arc<dyn PartitionCache>> {
        self(config)
    }
}
