//! Error types for clustermux operations

use crate::object::ObjectKey;
use crate::partition::PartitionId;
use thiserror::Error;

/// Partition resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("{operation} called without an object")]
    NilObject { operation: &'static str },

    #[error("{operation} requires an explicit partition in its options or context")]
    MissingPartition { operation: &'static str },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all cache operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("unable to get cache because partition {partition} is not known")]
    UnknownPartition { partition: PartitionId },

    #[error("failed to create cache for partition {partition}: {source}")]
    Creation {
        partition: PartitionId,
        #[source]
        source: Box<CacheError>,
    },

    #[error("{operation} is not supported by the multi-partition cache")]
    Unsupported { operation: &'static str },

    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },

    #[error("Backend error: {reason}")]
    Backend { reason: String },

    #[error("context cancelled")]
    Cancelled,

    #[error("Runtime error: {reason}")]
    Runtime { reason: String },
}

impl CacheError {
    /// Whether this error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Wrap an error raised while constructing a partition's cache.
    pub fn creation(partition: PartitionId, cause: CacheError) -> Self {
        Self::Creation {
            partition,
            source: Box::new(cause),
        }
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
