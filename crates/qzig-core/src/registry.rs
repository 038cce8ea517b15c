//! Cluster id to value kind lookup
//!
//! A device parse asks the registry once per `(endpoint, cluster)` which
//! kinds to create. Manufacturer specific entries take precedence over
//! the generic entry for the same cluster.

use std::collections::HashMap;

use crate::values::ValueKind;

#[derive(Debug, Clone, Default)]
pub struct ValueRegistry {
    entries: HashMap<(u16, Option<u16>), Vec<ValueKind>>,
}

impl ValueRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every radio-backed kind
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for kind in ValueKind::ALL {
            let spec = kind.spec();
            if let Ok(cluster) = u16::try_from(spec.cluster) {
                registry.register(cluster, spec.manufacturer, kind);
            }
        }
        registry
    }

    /// Add a kind for a cluster; registering the same kind twice is a no-op
    pub fn register(&mut self, cluster: u16, manufacturer: Option<u16>, kind: ValueKind) {
        let kinds = self.entries.entry((cluster, manufacturer)).or_default();
        if !kinds.contains(&kind) {
            kinds.push(kind);
            kinds.sort_by_key(|k| k.spec().index);
        }
    }

    /// Kinds for a cluster, ordered by index; empty when the cluster is unknown
    pub fn resolve(&self, cluster: u16, manufacturer: Option<u16>) -> Vec<ValueKind> {
        if let Some(code) = manufacturer {
            if let Some(kinds) = self.entries.get(&(cluster, Some(code))) {
                return kinds.clone();
            }
        }
        self.entries
            .get(&(cluster, None))
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
