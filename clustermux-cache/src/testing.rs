//! In-crate stubs for unit tests.
//!
//! Integration tests use the richer doubles in `clustermux-test-utils`;
//! those implement the published traits and cannot stand in for `crate::`
//! types inside this crate's own unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clustermux_core::{
    CacheContext, CacheError, CacheResult, GroupVersionKind, ListOptions, Object, ObjectKey,
    ObjectList, PartitionConfig, PartitionId,
};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::traits::{
    EventHandler, IndexerFn, Indexers, Informer, PartitionCache, PartitionCacheFactory,
};

#[derive(Default)]
pub(crate) struct StubInformer {
    pub handlers: AtomicUsize,
    pub indexers: Mutex<Vec<String>>,
    pub synced: AtomicBool,
    pub fail_indexers: bool,
}

impl StubInformer {
    pub fn synced() -> Self {
        Self {
            synced: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn rejecting_indexers() -> Self {
        Self {
            fail_indexers: true,
            ..Default::default()
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.load(Ordering::SeqCst)
    }

    pub fn indexer_names(&self) -> Vec<String> {
        self.indexers.lock().unwrap().clone()
    }
}

impl Informer for StubInformer {
    fn add_event_handler(&self, _handler: Arc<dyn EventHandler>) {
        self.handlers.fetch_add(1, Ordering::SeqCst);
    }

    fn add_event_handler_with_resync_period(
        &self,
        _handler: Arc<dyn EventHandler>,
        _resync_period: Duration,
    ) {
        self.handlers.fetch_add(1, Ordering::SeqCst);
    }

    fn add_indexers(&self, indexers: Indexers) -> CacheResult<()> {
        if self.fail_indexers {
            return Err(CacheError::Backend {
                reason: "indexer conflict".to_string(),
            });
        }
        self.indexers.lock().unwrap().extend(indexers.into_keys());
        Ok(())
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

pub(crate) struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_add(&self, _obj: &Object) {}
    fn on_update(&self, _old: &Object, _new: &Object) {}
    fn on_delete(&self, _obj: &Object) {}
}

pub(crate) struct StubCache {
    starts: AtomicUsize,
    fail_start: bool,
    return_early: bool,
    sync_wait: Duration,
    synced: watch::Sender<bool>,
    indexes: Mutex<Vec<String>>,
    pub informer: Arc<StubInformer>,
}

impl Default for StubCache {
    fn default() -> Self {
        Self {
            starts: AtomicUsize::new(0),
            fail_start: false,
            return_early: false,
            sync_wait: Duration::from_millis(200),
            synced: watch::channel(false).0,
            indexes: Mutex::new(Vec::new()),
            informer: Arc::new(StubInformer::default()),
        }
    }
}

impl StubCache {
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Default::default()
        }
    }

    /// `start` returns `Ok` without waiting for cancellation.
    pub fn returning_early() -> Self {
        Self {
            return_early: true,
            ..Default::default()
        }
    }

    pub fn with_sync_wait(mut self, wait: Duration) -> Self {
        self.sync_wait = wait;
        self
    }

    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.lock().unwrap().clone()
    }
}

#[async_trait]
impl PartitionCache for StubCache {
    async fn get(&self, _ctx: &CacheContext, key: &ObjectKey, obj: &mut Object) -> CacheResult<()> {
        Err(CacheError::NotFound {
            kind: obj.type_meta.kind.clone(),
            key: key.clone(),
        })
    }

    async fn list(
        &self,
        _ctx: &CacheContext,
        _list: &mut ObjectList,
        _opts: &ListOptions,
    ) -> CacheResult<()> {
        Ok(())
    }

    async fn get_informer(
        &self,
        _ctx: &CacheContext,
        _obj: &Object,
    ) -> CacheResult<Arc<dyn Informer>> {
        Ok(self.informer.clone())
    }

    async fn get_informer_for_kind(
        &self,
        _ctx: &CacheContext,
        _gvk: &GroupVersionKind,
    ) -> CacheResult<Arc<dyn Informer>> {
        Ok(self.informer.clone())
    }

    async fn index_field(
        &self,
        _ctx: &CacheContext,
        _obj: &Object,
        field: &str,
        _extract: IndexerFn,
    ) -> CacheResult<()> {
        self.indexes.lock().unwrap().push(field.to_string());
        Ok(())
    }

    async fn start(&self, ctx: &CacheContext) -> CacheResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(CacheError::Backend {
                reason: "watch failed".to_string(),
            });
        }
        if !self.return_early {
            ctx.cancelled().await;
        }
        Ok(())
    }

    async fn wait_for_cache_sync(&self, ctx: &CacheContext) -> bool {
        let mut rx = self.synced.subscribe();
        tokio::select! {
            res = rx.wait_for(|synced| *synced) => res.is_ok(),
            () = ctx.cancelled() => false,
            () = tokio::time::sleep(self.sync_wait) => false,
        }
    }
}

/// Caches created by [`stub_factory`], by partition.
pub(crate) type CreatedStubs = Arc<DashMap<PartitionId, Arc<StubCache>>>;

/// Factory that hands out a fresh [`StubCache`] per partition and records it.
pub(crate) fn stub_factory() -> (Arc<dyn PartitionCacheFactory>, CreatedStubs) {
    let created: CreatedStubs = Arc::new(DashMap::new());
    let sink = Arc::clone(&created);
    let factory = move |config: &PartitionConfig| -> CacheResult<Arc<dyn PartitionCache>> {
        let stub = Arc::new(StubCache::default());
        sink.insert(config.partition.clone(), Arc::clone(&stub));
        Ok(stub)
    };
    (Arc::new(factory), created)
}
