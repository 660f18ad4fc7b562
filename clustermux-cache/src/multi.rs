//! Multi-partition cache facade.
//!
//! Routes every call to the replica that owns it:
//!
//! - wildcard calls go to the aggregate replica,
//! - point reads create the target partition's replica on first use,
//! - list calls only ever read existing replicas,
//! - informer and index registration fan out where the call spans
//!   partitions.
//!
//! The facade implements [`PartitionCache`] itself, so callers use it exactly
//! like a single-partition cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clustermux_core::{
    CacheContext, CacheError, CacheOptions, CacheResult, GroupVersionKind, ListOptions,
    MultiCacheConfig, Object, ObjectKey, ObjectList, PartitionId,
};
use futures_util::future::join_all;

use crate::fanout::FanoutInformer;
use crate::lifecycle::{EntryBuilder, PartitionEntry, PartitionStatus, SyncSupervisor};
use crate::registry::PartitionRegistry;
use crate::resolver::{PartitionResolver, Route};
use crate::traits::{IndexerFn, Informer, PartitionCache, PartitionCacheFactory};

/// Partition-aware cache that multiplexes one replica per partition plus a
/// wildcard replica behind a single [`PartitionCache`].
pub struct MultiPartitionCache {
    registry: PartitionRegistry,
    resolver: PartitionResolver,
    /// Shared lifecycle context gating every synchronization task.
    lifecycle: CacheContext,
    sync_timeout: Duration,
}

impl MultiPartitionCache {
    /// Build the facade.
    ///
    /// Creates the wildcard replica and launches its synchronization task,
    /// then builds (without launching) a replica for every configured
    /// initial partition. Must be called from within a tokio runtime.
    /// Synchronization tasks stop when `ctx` is cancelled or when `start`
    /// returns.
    pub fn new(
        config: MultiCacheConfig,
        options: CacheOptions,
        factory: Arc<dyn PartitionCacheFactory>,
        ctx: &CacheContext,
    ) -> CacheResult<Self> {
        config.connection.validate()?;
        let lifecycle = CacheContext::from_token(ctx.token().child_token());
        let builder = EntryBuilder::new(config.connection, options.with_defaults(), factory);
        let supervisor = SyncSupervisor::new(lifecycle.clone())?;
        let registry = PartitionRegistry::new(builder, supervisor)?;

        for partition in config
            .initial_partitions
            .iter()
            .filter(|partition| !partition.is_wildcard())
        {
            registry.register(partition)?;
        }

        tracing::info!(
            partitions = registry.len(),
            sync_timeout_secs = config.sync_timeout.as_secs(),
            "Multi-partition cache created"
        );

        Ok(Self {
            registry,
            resolver: PartitionResolver::new(),
            lifecycle,
            sync_timeout: config.sync_timeout,
        })
    }

    pub fn registry(&self) -> &PartitionRegistry {
        &self.registry
    }

    /// Per-partition identifiers known right now, excluding the wildcard.
    pub fn registered_partitions(&self) -> Vec<PartitionId> {
        self.registry.partitions()
    }

    /// Lifecycle state of the wildcard and every per-partition entry.
    pub fn partition_status(&self) -> Vec<PartitionStatus> {
        self.registry.status()
    }

    /// Number of per-partition replicas, not counting the wildcard.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// [`PartitionCache::wait_for_cache_sync`] bounded by the configured
    /// sync timeout. A timeout reads as "not synced".
    pub async fn wait_for_cache_sync_bounded(&self, ctx: &CacheContext) -> bool {
        match tokio::time::timeout(self.sync_timeout, self.wait_for_cache_sync(ctx)).await {
            Ok(synced) => synced,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.sync_timeout.as_secs(),
                    "Timed out waiting for partition caches to sync"
                );
                false
            }
        }
    }

    fn ensure_active(&self, ctx: &CacheContext) -> CacheResult<()> {
        self.lifecycle.check()?;
        ctx.check()
    }

    fn entry_for(&self, route: &Route) -> CacheResult<Arc<PartitionEntry>> {
        match route {
            Route::Wildcard => Ok(Arc::clone(self.registry.wildcard())),
            Route::Partition(id) => self.registry.get_or_create(id),
        }
    }
}

fn scoped(obj: &Object, route: &Route) -> Object {
    let mut scoped = obj.clone();
    if let Route::Partition(id) = route {
        scoped.set_partition(id);
    }
    scoped
}

#[async_trait]
impl PartitionCache for MultiPartitionCache {
    async fn get(&self, ctx: &CacheContext, key: &ObjectKey, obj: &mut Object) -> CacheResult<()> {
        self.ensure_active(ctx)?;
        let route = self.resolver.resolve(ctx, Some(&*obj), "Get")?;
        let entry = self.entry_for(&route)?;
        if let Route::Partition(id) = &route {
            obj.set_partition(id);
        }
        entry.cache().get(ctx, key, obj).await
    }

    async fn list(
        &self,
        ctx: &CacheContext,
        list: &mut ObjectList,
        opts: &ListOptions,
    ) -> CacheResult<()> {
        self.ensure_active(ctx)?;
        let entry = match self.resolver.resolve_list(ctx, opts)? {
            Route::Wildcard => Arc::clone(self.registry.wildcard()),
            Route::Partition(id) => self
                .registry
                .get(&id)
                .ok_or(CacheError::UnknownPartition { partition: id })?,
        };
        entry.cache().list(ctx, list, opts).await
    }

    async fn get_informer(
        &self,
        ctx: &CacheContext,
        obj: &Object,
    ) -> CacheResult<Arc<dyn Informer>> {
        self.ensure_active(ctx)?;
        let route = self.resolver.resolve(ctx, Some(obj), "GetInformer")?;
        if let Route::Partition(_) = route {
            let entry = self.entry_for(&route)?;
            return entry.cache().get_informer(ctx, &scoped(obj, &route)).await;
        }

        let wildcard = self.registry.wildcard();
        let mut fanout = FanoutInformer::default();
        fanout.push(
            wildcard.partition().clone(),
            wildcard.cache().get_informer(ctx, obj).await?,
        );
        for entry in self.registry.snapshot() {
            let informer = entry.cache().get_informer(ctx, obj).await?;
            fanout.push(entry.partition().clone(), informer);
        }
        tracing::debug!(informers = fanout.len(), kind = %obj.gvk(), "Fanned out wildcard informer");
        Ok(Arc::new(fanout))
    }

    async fn get_informer_for_kind(
        &self,
        _ctx: &CacheContext,
        _gvk: &GroupVersionKind,
    ) -> CacheResult<Arc<dyn Informer>> {
        Err(CacheError::Unsupported {
            operation: "GetInformerForKind",
        })
    }

    async fn index_field(
        &self,
        ctx: &CacheContext,
        obj: &Object,
        field: &str,
        extract: IndexerFn,
    ) -> CacheResult<()> {
        self.ensure_active(ctx)?;
        let route = self.resolver.resolve(ctx, Some(obj), "IndexField")?;
        if route.is_wildcard() {
            return self
                .registry
                .wildcard()
                .cache()
                .index_field(ctx, obj, field, extract)
                .await;
        }

        // Partitions created after this call do not get the index.
        let scoped = scoped(obj, &route);
        for entry in self.registry.snapshot() {
            entry
                .cache()
                .index_field(ctx, &scoped, field, Arc::clone(&extract))
                .await?;
        }
        Ok(())
    }

    async fn start(&self, ctx: &CacheContext) -> CacheResult<()> {
        let launched = self.registry.start_all();
        tracing::info!(launched, partitions = self.registry.len(), "Multi-partition cache started");

        tokio::select! {
            () = ctx.cancelled() => {}
            () = self.lifecycle.cancelled() => {}
        }

        self.lifecycle.cancel();
        self.registry.supervisor().join().await;
        tracing::info!("Multi-partition cache stopped");
        Ok(())
    }

    async fn wait_for_cache_sync(&self, ctx: &CacheContext) -> bool {
        if self.ensure_active(ctx).is_err() {
            return false;
        }
        let entries = self.registry.all();
        let results = join_all(
            entries
                .iter()
                .map(|entry| entry.cache().wait_for_cache_sync(ctx)),
        )
        .await;

        let mut synced = true;
        for (entry, ok) in entries.iter().zip(results) {
            if ok {
                entry.mark_synced();
            } else {
                tracing::debug!(partition = %entry.partition(), "Partition cache not synced");
                synced = false;
            }
        }
        synced
    }
}

impl std::fmt::Debug for MultiPartitionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiPartitionCache")
            .field("registry", &self.registry)
            .field("sync_timeout", &self.sync_timeout)
            .finish()
    }
}
