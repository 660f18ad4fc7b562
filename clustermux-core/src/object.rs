//! Unstructured object model.
//!
//! Objects are carried as type metadata, object metadata, and an opaque JSON
//! body. The cache layer only ever looks at metadata; the body belongs to
//! whoever registered the type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::partition::PartitionId;

/// API group, version, and kind of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}, Kind={}", self.version, self.kind)
        } else {
            write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
        }
    }
}

/// `apiVersion` and `kind` as they appear on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub api_version: String,
    pub kind: String,
}

impl TypeMeta {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Split `apiVersion` into group and version.
    ///
    /// Core types have no group (`"v1"`).
    pub fn gvk(&self) -> GroupVersionKind {
        match self.api_version.split_once('/') {
            Some((group, version)) => GroupVersionKind::new(group, version, &self.kind),
            None => GroupVersionKind::new("", &self.api_version, &self.kind),
        }
    }
}

/// Standard object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Partition the object lives in. Empty means "not specified".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
}

impl ObjectMeta {
    /// Partition carried explicitly on the metadata, if any.
    pub fn partition(&self) -> Option<PartitionId> {
        let name = self.cluster_name.trim();
        if name.is_empty() {
            None
        } else {
            Some(PartitionId::new(name))
        }
    }
}

/// An unstructured object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Object {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Object {
    /// An empty object of the given type, ready to be filled by a `get`.
    pub fn of_type(type_meta: TypeMeta) -> Self {
        Self {
            type_meta,
            ..Default::default()
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        self.type_meta.gvk()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = namespace.into();
        self
    }

    pub fn with_partition(mut self, partition: &PartitionId) -> Self {
        self.set_partition(partition);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn set_partition(&mut self, partition: &PartitionId) {
        self.metadata.cluster_name = partition.to_string();
    }
}

/// A list of unstructured objects of one type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectList {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    pub items: Vec<Object>,
}

impl ObjectList {
    /// An empty list for items of the given type.
    pub fn of_type(type_meta: TypeMeta) -> Self {
        Self {
            type_meta,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Namespace and name addressing one object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new("", name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Options for list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Partition to list from. `None` falls back to the call context.
    pub partition: Option<PartitionId>,
    pub namespace: Option<String>,
    /// Equality-only selector, `key=value` pairs joined by commas.
    pub label_selector: Option<String>,
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_partition(mut self, partition: impl Into<PartitionId>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `obj` satisfies the namespace and label filters.
    ///
    /// The partition and limit are applied by the caller.
    pub fn matches(&self, obj: &Object) -> bool {
        if let Some(ns) = &self.namespace {
            if &obj.metadata.namespace != ns {
                return false;
            }
        }
        match &self.label_selector {
            Some(selector) => selector
                .split(',')
                .map(str::trim)
                .filter(|term| !term.is_empty())
                .all(|term| match term.split_once('=') {
                    Some((k, v)) => obj.metadata.labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
                    None => obj.metadata.labels.contains_key(term),
                }),
            None => true,
        }
    }
}
