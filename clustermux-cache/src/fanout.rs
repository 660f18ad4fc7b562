//! Fan-out informer for calls spanning several partitions.

use std::sync::Arc;
use std::time::Duration;

use clustermux_core::{CacheResult, PartitionId};

use crate::traits::{EventHandler, Indexers, Informer};

/// Aggregates one informer per partition behind the [`Informer`] contract.
///
/// Registration is forwarded to every constituent; sync status is the AND
/// of all constituents.
#[derive(Clone, Default)]
pub struct FanoutInformer {
    informers: Vec<(PartitionId, Arc<dyn Informer>)>,
}

impl FanoutInformer {
    pub fn new(informers: Vec<(PartitionId, Arc<dyn Informer>)>) -> Self {
        Self { informers }
    }

    pub fn push(&mut self, partition: PartitionId, informer: Arc<dyn Informer>) {
        self.informers.push((partition, informer));
    }

    /// Partitions covered, in registration order.
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionId> {
        self.informers.iter().map(|(partition, _)| partition)
    }

    pub fn len(&self) -> usize {
        self.informers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.informers.is_empty()
    }
}

impl Informer for FanoutInformer {
    fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        for (_, informer) in &self.informers {
            informer.add_event_handler(Arc::clone(&handler));
        }
    }

    fn add_event_handler_with_resync_period(
        &self,
        handler: Arc<dyn EventHandler>,
        resync_period: Duration,
    ) {
        for (_, informer) in &self.informers {
            informer.add_event_handler_with_resync_period(Arc::clone(&handler), resync_period);
        }
    }

    /// Stops at the first failure. Informers already updated keep the new
    /// indexers.
    fn add_indexers(&self, indexers: Indexers) -> CacheResult<()> {
        for (partition, informer) in &self.informers {
            if let Err(err) = informer.add_indexers(indexers.clone()) {
                tracing::warn!(partition = %partition, error = %err, "Failed to add indexers");
                return Err(err);
            }
        }
        Ok(())
    }

    fn has_synced(&self) -> bool {
        self.informers.iter().all(|(_, informer)| informer.has_synced())
    }
}

impl std::fmt::Debug for FanoutInformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.partitions()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NoopHandler, StubInformer};
    use crate::traits::IndexerFn;
    use clustermux_core::Object;
    use std::collections::HashMap;

    fn indexers() -> Indexers {
        let by_name: IndexerFn = Arc::new(|obj: &Object| vec![obj.metadata.name.clone()]);
        HashMap::from([("by-name".to_string(), by_name)])
    }

    #[test]
    fn test_handlers_forwarded_to_every_informer() {
        let a = Arc::new(StubInformer::default());
        let b = Arc::new(StubInformer::default());
        let fanout = FanoutInformer::new(vec![
            (PartitionId::wildcard(), a.clone() as Arc<dyn Informer>),
            (PartitionId::new("b"), b.clone() as Arc<dyn Informer>),
        ]);

        fanout.add_event_handler(Arc::new(NoopHandler));
        fanout.add_event_handler_with_resync_period(Arc::new(NoopHandler), Duration::from_secs(30));

        assert_eq!(a.handler_count(), 2);
        assert_eq!(b.handler_count(), 2);
    }

    #[test]
    fn test_add_indexers_stops_at_first_error() {
        let first = Arc::new(StubInformer::default());
        let broken = Arc::new(StubInformer::rejecting_indexers());
        let last = Arc::new(StubInformer::default());
        let fanout = FanoutInformer::new(vec![
            (PartitionId::new("a"), first.clone() as Arc<dyn Informer>),
            (PartitionId::new("b"), broken as Arc<dyn Informer>),
            (PartitionId::new("c"), last.clone() as Arc<dyn Informer>),
        ]);

        assert!(fanout.add_indexers(indexers()).is_err());
        // Not rolled back on the informer that already accepted them.
        assert_eq!(first.indexer_names(), vec!["by-name"]);
        assert!(last.indexer_names().is_empty());
    }

    #[test]
    fn test_has_synced_requires_all() {
        let synced = Arc::new(StubInformer::synced());
        let pending = Arc::new(StubInformer::default());
        let mut fanout = FanoutInformer::default();
        assert!(fanout.has_synced());

        fanout.push(PartitionId::new("a"), synced);
        assert!(fanout.has_synced());

        fanout.push(PartitionId::new("b"), pending.clone());
        assert!(!fanout.has_synced());

        pending.synced.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(fanout.has_synced());
        assert_eq!(fanout.len(), 2);
    }
}
