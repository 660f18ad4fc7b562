//! clustermux Cache - Multi-Partition Read Cache
//!
//! Presents one read-cache interface over many logical partitions of a
//! resource server. Each partition gets its own replica, created on first
//! use and synchronized in the background; an always-present wildcard
//! replica serves calls that span every partition.
//!
//! Building blocks:
//! - [`PartitionResolver`] derives the target partition of a call.
//! - [`PartitionRegistry`] creates one replica per partition, exactly once.
//! - [`SyncSupervisor`] runs and tracks replica synchronization tasks.
//! - [`FanoutInformer`] forwards registrations to several partitions.
//! - [`MultiPartitionCache`] ties them together behind [`PartitionCache`].

pub mod fanout;
pub mod lifecycle;
pub mod multi;
pub mod registry;
pub mod resolver;
pub mod telemetry;
pub mod traits;

#[cfg(test)]
mod testing;

pub use fanout::FanoutInformer;
pub use lifecycle::{EntryBuilder, EntryState, PartitionEntry, PartitionStatus, SyncSupervisor};
pub use multi::MultiPartitionCache;
pub use registry::PartitionRegistry;
pub use resolver::{PartitionResolver, Route};
pub use telemetry::{init_tracing, TelemetryConfig};
pub use traits::{
    EventHandler, IndexerFn, Indexers, Informer, PartitionCache, PartitionCacheFactory,
};
