//! Per-call context.
//!
//! Carries cooperative cancellation and the ambient partition a call was
//! issued for. The partition slot is typed, so a context value can never be
//! confused with some other string stored alongside it.

use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, CacheResult};
use crate::partition::PartitionId;

/// Cancellation plus ambient partition for one call (or one long-lived run).
#[derive(Debug, Clone, Default)]
pub struct CacheContext {
    cancel: CancellationToken,
    partition: Option<PartitionId>,
}

impl CacheContext {
    /// A fresh, uncancelled context with no ambient partition.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that observes an existing cancellation token.
    pub fn from_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            partition: None,
        }
    }

    /// Derive a context carrying `partition` as its ambient value.
    ///
    /// Cancellation is shared with `self`.
    pub fn with_partition(&self, partition: impl Into<PartitionId>) -> Self {
        Self {
            cancel: self.cancel.clone(),
            partition: Some(partition.into()),
        }
    }

    /// Derive a context that is cancelled with `self` but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            partition: self.partition.clone(),
        }
    }

    /// Ambient partition, if one was attached.
    pub fn partition(&self) -> Option<&PartitionId> {
        self.partition.as_ref()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// `Err(CacheError::Cancelled)` once the context is done.
    pub fn check(&self) -> CacheResult<()> {
        if self.is_cancelled() {
            Err(CacheError::Cancelled)
        } else {
            Ok(())
        }
    }
}
