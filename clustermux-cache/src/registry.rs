//! Partition registry.
//!
//! Owns the wildcard entry and the map of per-partition entries. Entries are
//! created at most once per identifier and never removed; their
//! synchronization tasks run until the shared context is cancelled.

use std::sync::Arc;

use clustermux_core::{CacheResult, PartitionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::lifecycle::{EntryBuilder, PartitionEntry, PartitionStatus, SyncSupervisor};

/// Map from partition identifier to its cache entry.
pub struct PartitionRegistry {
    wildcard: Arc<PartitionEntry>,
    entries: DashMap<PartitionId, Arc<PartitionEntry>>,
    builder: EntryBuilder,
    supervisor: SyncSupervisor,
}

impl PartitionRegistry {
    /// Build the wildcard entry and launch its synchronization task.
    pub fn new(builder: EntryBuilder, supervisor: SyncSupervisor) -> CacheResult<Self> {
        let wildcard = builder.build(&PartitionId::wildcard())?;
        supervisor.launch(&wildcard);
        tracing::info!(host = %wildcard.config().connection.host, "Wildcard partition cache created");
        Ok(Self {
            wildcard,
            entries: DashMap::new(),
            builder,
            supervisor,
        })
    }

    /// The wildcard entry. Never stored in the per-partition map.
    pub fn wildcard(&self) -> &Arc<PartitionEntry> {
        &self.wildcard
    }

    pub fn supervisor(&self) -> &SyncSupervisor {
        &self.supervisor
    }

    /// Look up an existing entry.
    pub fn get(&self, id: &PartitionId) -> Option<Arc<PartitionEntry>> {
        if id.is_wildcard() {
            return Some(Arc::clone(&self.wildcard));
        }
        self.entries.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the entry for `id`, creating and launching it if absent.
    ///
    /// Concurrent callers for the same unseen `id` observe one instance:
    /// the check-and-insert runs under the map's shard lock, and the
    /// synchronization task is launched after that lock is released. A
    /// construction failure leaves no entry behind.
    pub fn get_or_create(&self, id: &PartitionId) -> CacheResult<Arc<PartitionEntry>> {
        let entry = self.get_or_insert(id)?;
        self.supervisor.launch(&entry);
        Ok(entry)
    }

    /// Create and register the entry for `id` without launching it.
    ///
    /// Used for partitions known at construction; `start_all` launches them.
    pub fn register(&self, id: &PartitionId) -> CacheResult<Arc<PartitionEntry>> {
        self.get_or_insert(id)
    }

    fn get_or_insert(&self, id: &PartitionId) -> CacheResult<Arc<PartitionEntry>> {
        if let Some(existing) = self.get(id) {
            return Ok(existing);
        }
        match self.entries.entry(id.clone()) {
            Entry::Occupied(occupied) => Ok(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                let entry = self.builder.build(id)?;
                vacant.insert(Arc::clone(&entry));
                tracing::debug!(partition = %id, host = %entry.config().connection.host, "Partition cache created");
                Ok(entry)
            }
        }
    }

    /// Apply `f` to every per-partition entry present when iteration starts.
    ///
    /// Runs over a snapshot, so `f` may call back into the registry.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<PartitionEntry>)) {
        for entry in self.snapshot() {
            f(&entry);
        }
    }

    /// Per-partition entries, ordered by identifier. Excludes the wildcard.
    pub fn snapshot(&self) -> Vec<Arc<PartitionEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        entries.sort_by(|a, b| a.partition().cmp(b.partition()));
        entries
    }

    /// Wildcard entry followed by every per-partition entry.
    pub fn all(&self) -> Vec<Arc<PartitionEntry>> {
        let mut all = Vec::with_capacity(self.entries.len() + 1);
        all.push(Arc::clone(&self.wildcard));
        all.extend(self.snapshot());
        all
    }

    pub fn partitions(&self) -> Vec<PartitionId> {
        self.snapshot()
            .iter()
            .map(|entry| entry.partition().clone())
            .collect()
    }

    pub fn status(&self) -> Vec<PartitionStatus> {
        self.all().iter().map(|entry| entry.status()).collect()
    }

    /// Number of per-partition entries, not counting the wildcard.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Launch every entry not launched yet. Returns how many were launched.
    pub fn start_all(&self) -> usize {
        self.all()
            .iter()
            .filter(|entry| self.supervisor.launch(entry))
            .count()
    }
}

impl std::fmt::Debug for PartitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionRegistry")
            .field("wildcard", &self.wildcard)
            .field("partitions", &self.partitions())
            .finish()
    }
}
