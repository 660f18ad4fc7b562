//! Partition resolution.
//!
//! Precedence, highest first:
//!
//! 1. the partition carried on the object's metadata (or, for lists, in the
//!    list options),
//! 2. the ambient partition attached to the call's [`CacheContext`],
//! 3. the wildcard partition (object calls) or a
//!    [`ResolutionError::MissingPartition`] error (list calls).
//!
//! The reserved `*` identifier always routes to the wildcard, whichever
//! source it came from.

use clustermux_core::{CacheContext, ListOptions, Object, ObjectMeta, PartitionId, ResolutionError};

/// Where a call should be served from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// The aggregate replica spanning all partitions.
    Wildcard,
    /// One concrete partition's replica.
    Partition(PartitionId),
}

impl Route {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }

    pub fn partition(&self) -> PartitionId {
        match self {
            Self::Wildcard => PartitionId::wildcard(),
            Self::Partition(id) => id.clone(),
        }
    }
}

impl From<PartitionId> for Route {
    fn from(id: PartitionId) -> Self {
        if id.is_wildcard() {
            Self::Wildcard
        } else {
            Self::Partition(id)
        }
    }
}

/// Derives the target partition of a call. Pure; never mutates its inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionResolver;

impl PartitionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the route for an object-addressed call.
    ///
    /// `None` stands for a missing object and is a usage error, distinct from
    /// an object that names no partition (which routes to the wildcard).
    pub fn resolve(
        &self,
        ctx: &CacheContext,
        obj: Option<&Object>,
        operation: &'static str,
    ) -> Result<Route, ResolutionError> {
        let obj = obj.ok_or(ResolutionError::NilObject { operation })?;
        Ok(self.resolve_meta(ctx, &obj.metadata))
    }

    /// Resolve from metadata, then context, then wildcard.
    pub fn resolve_meta(&self, ctx: &CacheContext, meta: &ObjectMeta) -> Route {
        meta.partition()
            .or_else(|| ambient(ctx))
            .map(Route::from)
            .unwrap_or(Route::Wildcard)
    }

    /// Resolve the route for a list call.
    ///
    /// There is no object to inspect, so the partition must be explicit:
    /// taken from the options, else from the context, else an error.
    pub fn resolve_list(
        &self,
        ctx: &CacheContext,
        opts: &ListOptions,
    ) -> Result<Route, ResolutionError> {
        opts.partition
            .as_ref()
            .and_then(normalized)
            .or_else(|| ambient(ctx))
            .map(Route::from)
            .ok_or(ResolutionError::MissingPartition { operation: "List" })
    }
}

fn ambient(ctx: &CacheContext) -> Option<PartitionId> {
    ctx.partition().and_then(normalized)
}

/// Trimmed form of `id`, or `None` when blank. Matches how object metadata
/// is read, so the same name routes identically from every source.
fn normalized(id: &PartitionId) -> Option<PartitionId> {
    let name = id.as_str().trim();
    if name.is_empty() {
        None
    } else if name.len() == id.as_str().len() {
        Some(id.clone())
    } else {
        Some(PartitionId::new(name))
    }
}
