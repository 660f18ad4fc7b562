//! Partition entry lifecycle and background synchronization tasks.
//!
//! Every entry moves `Created -> Starting -> Synced`, with `Failed` and
//! `Cancelled` reachable once its synchronization task ends. The task runs
//! the cache's blocking `start` next to a watcher that flips the entry to
//! `Synced` when the initial listing lands. Failures are logged and recorded
//! on the entry; they never abort sibling tasks.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clustermux_core::{
    CacheContext, CacheError, CacheOptions, CacheResult, ConnectionConfig, PartitionConfig,
    PartitionId,
};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

use crate::traits::{PartitionCache, PartitionCacheFactory};

// ============================================================================
// ENTRY STATE
// ============================================================================

/// Lifecycle state of one partition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryState {
    /// Constructed and registered, synchronization not launched yet.
    Created,
    /// Synchronization task running, initial listing not observed yet.
    Starting,
    /// Initial listing observed. The cache keeps watching.
    Synced,
    /// The synchronization task ended with an error.
    Failed,
    /// The synchronization task ended after cancellation.
    Cancelled,
}

impl EntryState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Starting => 1,
            Self::Synced => 2,
            Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Starting,
            2 => Self::Synced,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    /// Whether the synchronization task has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

/// Point-in-time view of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStatus {
    pub partition: PartitionId,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
    /// Why the synchronization task failed, if it did.
    pub error: Option<String>,
}

// ============================================================================
// PARTITION ENTRY
// ============================================================================

/// One partition's cache plus the configuration it was built from.
pub struct PartitionEntry {
    config: PartitionConfig,
    cache: Arc<dyn PartitionCache>,
    state: AtomicU8,
    launched: AtomicBool,
    failure: OnceLock<CacheError>,
    created_at: DateTime<Utc>,
}

impl PartitionEntry {
    pub fn new(config: PartitionConfig, cache: Arc<dyn PartitionCache>) -> Self {
        Self {
            config,
            cache,
            state: AtomicU8::new(EntryState::Created.as_u8()),
            launched: AtomicBool::new(false),
            failure: OnceLock::new(),
            created_at: Utc::now(),
        }
    }

    pub fn partition(&self) -> &PartitionId {
        &self.config.partition
    }

    pub fn cache(&self) -> &Arc<dyn PartitionCache> {
        &self.cache
    }

    /// Connection, scheme, and mapper this entry's cache was built with.
    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn state(&self) -> EntryState {
        EntryState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Error the synchronization task ended with, if any.
    pub fn failure(&self) -> Option<&CacheError> {
        self.failure.get()
    }

    pub fn status(&self) -> PartitionStatus {
        PartitionStatus {
            partition: self.partition().clone(),
            state: self.state(),
            created_at: self.created_at,
            error: self.failure().map(ToString::to_string),
        }
    }

    /// Move to `to` only if currently in `from`.
    fn transition(&self, from: EntryState, to: EntryState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record that the initial listing was observed. Only a running entry
    /// moves to `Synced`.
    pub(crate) fn mark_synced(&self) -> bool {
        self.transition(EntryState::Starting, EntryState::Synced)
    }

    fn set_state(&self, state: EntryState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Claim the right to launch synchronization. True exactly once.
    fn claim_launch(&self) -> bool {
        !self.launched.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for PartitionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionEntry")
            .field("partition", self.partition())
            .field("host", &self.config.connection.host)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish()
    }
}

// ============================================================================
// ENTRY BUILDER
// ============================================================================

/// Derives per-partition configuration and builds entries through a factory.
#[derive(Clone)]
pub struct EntryBuilder {
    connection: ConnectionConfig,
    options: CacheOptions,
    factory: Arc<dyn PartitionCacheFactory>,
}

impl EntryBuilder {
    pub fn new(
        connection: ConnectionConfig,
        options: CacheOptions,
        factory: Arc<dyn PartitionCacheFactory>,
    ) -> Self {
        Self {
            connection,
            options,
            factory,
        }
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// Build, but do not register or start, the entry for `partition`.
    ///
    /// Every failure is reported as [`CacheError::Creation`].
    pub fn build(&self, partition: &PartitionId) -> CacheResult<Arc<PartitionEntry>> {
        let config = PartitionConfig::derive(&self.connection, &self.options, partition.clone())
            .map_err(|err| CacheError::creation(partition.clone(), err.into()))?;
        let cache = self
            .factory
            .build(&config)
            .map_err(|err| CacheError::creation(partition.clone(), err))?;
        Ok(Arc::new(PartitionEntry::new(config, cache)))
    }
}

// ============================================================================
// SYNC SUPERVISOR
// ============================================================================

/// Spawns and tracks synchronization tasks under one shared context.
#[derive(Debug, Clone)]
pub struct SyncSupervisor {
    ctx: CacheContext,
    runtime: Handle,
    tracker: TaskTracker,
}

impl SyncSupervisor {
    /// Bind to the current tokio runtime.
    pub fn new(ctx: CacheContext) -> CacheResult<Self> {
        let runtime = Handle::try_current().map_err(|err| CacheError::Runtime {
            reason: format!("synchronization tasks need a tokio runtime: {err}"),
        })?;
        Ok(Self {
            ctx,
            runtime,
            tracker: TaskTracker::new(),
        })
    }

    /// Context every synchronization task observes.
    pub fn context(&self) -> &CacheContext {
        &self.ctx
    }

    /// Launch `entry`'s synchronization task unless it already was.
    ///
    /// Returns immediately; the task runs on its own.
    pub fn launch(&self, entry: &Arc<PartitionEntry>) -> bool {
        if !entry.claim_launch() {
            return false;
        }
        entry.transition(EntryState::Created, EntryState::Starting);
        self.tracker
            .spawn_on(run_sync(Arc::clone(entry), self.ctx.clone()), &self.runtime);
        true
    }

    /// Number of synchronization tasks still running.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every launched task to end. Call after cancelling the
    /// shared context.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Pause between sync checks when a cache gives up waiting on its own.
const SYNC_RETRY_INTERVAL: Duration = Duration::from_millis(50);

async fn run_sync(entry: Arc<PartitionEntry>, ctx: CacheContext) {
    let partition = entry.partition().clone();
    tracing::info!(partition = %partition, host = %entry.config().connection.host, "Partition cache sync task started");

    let cache = Arc::clone(entry.cache());
    let run = cache.start(&ctx);
    tokio::pin!(run);

    // A cache may bound its own wait; keep asking until it syncs or the
    // context ends.
    let watch_sync = async {
        loop {
            if cache.wait_for_cache_sync(&ctx).await {
                if entry.mark_synced() {
                    tracing::info!(partition = %partition, "Partition cache synced");
                }
                return;
            }
            tokio::select! {
                () = ctx.cancelled() => return,
                () = tokio::time::sleep(SYNC_RETRY_INTERVAL) => {}
            }
        }
    };

    let result = tokio::select! {
        result = &mut run => result,
        () = watch_sync => run.await,
    };

    match result {
        Err(CacheError::Cancelled) => {
            entry.set_state(EntryState::Cancelled);
            tracing::info!(partition = %partition, "Partition cache sync task stopped");
        }
        Ok(()) if ctx.is_cancelled() => {
            entry.set_state(EntryState::Cancelled);
            tracing::info!(partition = %partition, "Partition cache sync task stopped");
        }
        Ok(()) => {
            tracing::warn!(partition = %partition, "Partition cache stopped before cancellation");
            let _ = entry.failure.set(CacheError::Backend {
                reason: "cache stopped before cancellation".to_string(),
            });
            entry.set_state(EntryState::Failed);
        }
        Err(err) => {
            tracing::error!(partition = %partition, error = %err, "Partition cache failed to start");
            let _ = entry.failure.set(err);
            entry.set_state(EntryState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stub_factory, StubCache};
    use clustermux_core::{ConnectionConfig, Scheme};

    fn builder(factory: Arc<dyn PartitionCacheFactory>) -> EntryBuilder {
        EntryBuilder::new(
            ConnectionConfig::new("https://api.example.dev"),
            CacheOptions::new(Scheme::new()).with_defaults(),
            factory,
        )
    }

    async fn wait_for_state(entry: &PartitionEntry, state: EntryState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while entry.state() != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("entry did not reach expected state");
    }

    #[tokio::test]
    async fn test_build_derives_scoped_connection() {
        let (factory, _) = stub_factory();
        let entry = builder(factory).build(&PartitionId::new("a")).unwrap();
        assert_eq!(entry.config().connection.host, "https://api.example.dev/clusters/a");
        assert_eq!(entry.state(), EntryState::Created);
    }

    #[tokio::test]
    async fn test_build_failure_is_creation_error() {
        let failing: Arc<dyn PartitionCacheFactory> = Arc::new(|_: &PartitionConfig| -> CacheResult<Arc<dyn PartitionCache>> {
            Err(CacheError::Backend {
                reason: "mapper discovery failed".to_string(),
            })
        });
        let err = builder(failing).build(&PartitionId::new("a")).unwrap_err();
        assert!(matches!(err, CacheError::Creation { ref partition, .. } if partition.as_str() == "a"));
    }

    #[tokio::test]
    async fn test_launch_is_idempotent_and_reaches_synced() {
        let (factory, created) = stub_factory();
        let entry = builder(factory).build(&PartitionId::new("a")).unwrap();
        let supervisor = SyncSupervisor::new(CacheContext::new()).unwrap();

        assert!(supervisor.launch(&entry));
        assert!(!supervisor.launch(&entry));

        let stub = created.get(&PartitionId::new("a")).unwrap().clone();
        stub.mark_synced();
        wait_for_state(&entry, EntryState::Synced).await;
        assert_eq!(stub.start_count(), 1);

        supervisor.context().cancel();
        supervisor.join().await;
        assert_eq!(entry.state(), EntryState::Cancelled);
    }

    #[tokio::test]
    async fn test_start_failure_is_recorded() {
        let (_, factory) = single(StubCache::failing());
        let entry = builder(factory).build(&PartitionId::new("broken")).unwrap();
        let supervisor = SyncSupervisor::new(CacheContext::new()).unwrap();

        supervisor.launch(&entry);
        wait_for_state(&entry, EntryState::Failed).await;

        let status = entry.status();
        assert_eq!(status.state, EntryState::Failed);
        assert!(status.error.unwrap().contains("watch failed"));
    }

    fn single(stub: StubCache) -> (Arc<StubCache>, Arc<dyn PartitionCacheFactory>) {
        let stub = Arc::new(stub);
        let cache: Arc<dyn PartitionCache> = stub.clone();
        let factory: Arc<dyn PartitionCacheFactory> =
            Arc::new(move |_: &PartitionConfig| -> CacheResult<Arc<dyn PartitionCache>> {
                Ok(Arc::clone(&cache))
            });
        (stub, factory)
    }

    #[tokio::test]
    async fn test_late_sync_still_reaches_synced() {
        let (stub, factory) = single(StubCache::default().with_sync_wait(Duration::from_millis(20)));
        let entry = builder(factory).build(&PartitionId::new("a")).unwrap();
        let supervisor = SyncSupervisor::new(CacheContext::new()).unwrap();
        supervisor.launch(&entry);

        // Several of the cache's own waits expire before the flag flips.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(entry.state(), EntryState::Starting);
        stub.mark_synced();
        wait_for_state(&entry, EntryState::Synced).await;

        supervisor.context().cancel();
        supervisor.join().await;
        assert_eq!(entry.state(), EntryState::Cancelled);
    }

    #[tokio::test]
    async fn test_early_return_is_failure() {
        let (stub, factory) = single(StubCache::returning_early());
        let entry = builder(factory).build(&PartitionId::new("a")).unwrap();
        let supervisor = SyncSupervisor::new(CacheContext::new()).unwrap();

        supervisor.launch(&entry);
        wait_for_state(&entry, EntryState::Failed).await;

        assert_eq!(stub.start_count(), 1);
        assert!(!supervisor.context().is_cancelled());
        assert!(entry.status().error.unwrap().contains("stopped before cancellation"));
    }

    #[tokio::test]
    async fn test_status_serializes() {
        let (factory, _) = stub_factory();
        let entry = builder(factory).build(&PartitionId::new("a")).unwrap();
        let json = serde_json::to_value(entry.status()).unwrap();
        assert_eq!(json["partition"], "a");
        assert_eq!(json["state"], "Created");
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_supervisor_requires_runtime() {
        let err = SyncSupervisor::new(CacheContext::new()).unwrap_err();
        assert!(matches!(err, CacheError::Runtime { .. }));
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            EntryState::Created,
            EntryState::Starting,
            EntryState::Synced,
            EntryState::Failed,
            EntryState::Cancelled,
        ] {
            assert_eq!(EntryState::from_u8(state.as_u8()), state);
        }
        assert!(EntryState::Failed.is_terminal());
        assert!(!EntryState::Synced.is_terminal());
    }
}
