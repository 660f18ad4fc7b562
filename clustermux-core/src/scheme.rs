//! Type registration and kind-to-resource mapping.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::object::GroupVersionKind;

/// How a kind is scoped on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceScope {
    Namespaced,
    Cluster,
}

/// Registered kinds and their scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scheme {
    kinds: BTreeMap<GroupVersionKind, ResourceScope>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, gvk: GroupVersionKind, scope: ResourceScope) -> Self {
        self.kinds.insert(gvk, scope);
        self
    }

    pub fn is_registered(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.contains_key(gvk)
    }

    pub fn scope_of(&self, gvk: &GroupVersionKind) -> Option<ResourceScope> {
        self.kinds.get(gvk).copied()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &GroupVersionKind> {
        self.kinds.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// A resolved REST resource for a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestMapping {
    pub gvk: GroupVersionKind,
    /// Lowercase plural resource name, e.g. `configmaps`.
    pub resource: String,
    pub scope: ResourceScope,
}

/// Maps kinds to REST resources.
pub trait RestMapper: Send + Sync + fmt::Debug {
    fn mapping(&self, gvk: &GroupVersionKind) -> Option<RestMapping>;
}

/// Mapper derived from a [`Scheme`] by naive pluralization.
#[derive(Debug, Clone)]
pub struct StaticRestMapper {
    mappings: BTreeMap<GroupVersionKind, RestMapping>,
}

impl StaticRestMapper {
    pub fn from_scheme(scheme: &Scheme) -> Self {
        let mappings = scheme
            .kinds
            .iter()
            .map(|(gvk, scope)| {
                let mapping = RestMapping {
                    gvk: gvk.clone(),
                    resource: pluralize(&gvk.kind),
                    scope: *scope,
                };
                (gvk.clone(), mapping)
            })
            .collect();
        Self { mappings }
    }
}

impl RestMapper for StaticRestMapper {
    fn mapping(&self, gvk: &GroupVersionKind) -> Option<RestMapping> {
        self.mappings.get(gvk).cloned()
    }
}

fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{lower}es")
    } else if let Some(stem) = lower.strip_suffix('y') {
        if stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            format!("{lower}s")
        } else {
            format!("{stem}ies")
        }
    } else {
        format!("{lower}s")
    }
}
