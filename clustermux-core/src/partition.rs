//! Partition identifiers.
//!
//! A partition is one logically isolated backend store behind the shared API
//! endpoint. Identifiers are opaque to the cache layer: they come from
//! configuration or from incoming objects, never from the cache itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;

/// Reserved identifier for the wildcard partition (all partitions, read-only).
pub const WILDCARD_PARTITION: &str = "*";

/// Opaque, comparable name of a backend partition.
///
/// Cloning is cheap; the name is reference counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(Arc<str>);

impl PartitionId {
    /// Create an identifier without validation.
    ///
    /// Prefer [`PartitionId::parse`] for values that come from outside the
    /// process.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The wildcard partition.
    pub fn wildcard() -> Self {
        Self::new(WILDCARD_PARTITION)
    }

    /// Parse an externally supplied identifier.
    ///
    /// Rejects blank values and values containing `/`, which would corrupt
    /// the derived endpoint path.
    pub fn parse(id: &str) -> Result<Self, ConfigError> {
        let parsed = Self::new(id.trim());
        parsed.check(id)?;
        Ok(parsed)
    }

    /// Apply the [`PartitionId::parse`] rules to an existing identifier.
    ///
    /// Identifiers read from object metadata or a call context are built
    /// unchecked; this runs before any of them reach an endpoint path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.0.trim() != &*self.0 {
            return Err(invalid(&self.0, "partition identifier must not be padded"));
        }
        self.check(&self.0)
    }

    fn check(&self, raw: &str) -> Result<(), ConfigError> {
        if self.0.is_empty() {
            return Err(invalid(raw, "partition identifier must not be empty"));
        }
        if self.0.contains('/') {
            return Err(invalid(raw, "partition identifier must not contain '/'"));
        }
        Ok(())
    }

    /// Whether this is the wildcard partition.
    pub fn is_wildcard(&self) -> bool {
        &*self.0 == WILDCARD_PARTITION
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn invalid(value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: "partition".to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PartitionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PartitionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PartitionId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}
