//! clustermux Core - Data Types
//!
//! Partition identifiers, the unstructured object model, call contexts,
//! configuration, and the error taxonomy shared by every clustermux crate.
//! This crate has no async behavior of its own.

pub mod config;
pub mod context;
pub mod error;
pub mod object;
pub mod partition;
pub mod scheme;

pub use config::{
    parse_partition_list, CacheOptions, ConnectionConfig, MultiCacheConfig, PartitionConfig,
    DEFAULT_PARTITION_SEGMENT,
};
pub use context::CacheContext;
pub use error::{CacheError, CacheResult, ConfigError, ResolutionError};
pub use object::{GroupVersionKind, ListOptions, Object, ObjectKey, ObjectList, ObjectMeta, TypeMeta};
pub use partition::{PartitionId, WILDCARD_PARTITION};
pub use scheme::{ResourceScope, RestMapper, RestMapping, Scheme, StaticRestMapper};
