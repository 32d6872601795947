//! Physical→virtual name cache with lock-free snapshot reads.
//!
//! Writers (whoever observes physical objects) clone-modify-swap the current
//! snapshot; readers hold a [`NameCacheHandle`] and never block.

use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use tracing::debug;
use vsync_core::{NameCache, Resource, OBJECT_NAME_ANNOTATION};

#[derive(Debug, Clone, Default)]
struct Snapshot {
    /// (physical name, field path) → virtual name
    exact: FxHashMap<(String, String), String>,
    /// physical name → virtual name, valid for any field path
    any_path: FxHashMap<String, String>,
}

impl Snapshot {
    fn len(&self) -> usize { self.exact.len() + self.any_path.len() }
}

/// Owner side of the cache.
#[derive(Debug, Default)]
pub struct NameCacheStore {
    snap: Arc<ArcSwap<Snapshot>>,
}

impl NameCacheStore {
    pub fn new() -> Self { Self::default() }

    /// Register a mapping. An empty `path` registers it for every field path.
    pub fn insert(&self, physical_name: &str, path: &str, virtual_name: &str) {
        self.snap.rcu(|cur| {
            let mut next = Snapshot::clone(cur);
            if path.is_empty() {
                next.any_path.insert(physical_name.to_string(), virtual_name.to_string());
            } else {
                next.exact.insert((physical_name.to_string(), path.to_string()), virtual_name.to_string());
            }
            next
        });
        self.report();
    }

    pub fn remove(&self, physical_name: &str, path: &str) {
        self.snap.rcu(|cur| {
            let mut next = Snapshot::clone(cur);
            if path.is_empty() {
                next.any_path.remove(physical_name);
            } else {
                next.exact.remove(&(physical_name.to_string(), path.to_string()));
            }
            next
        });
        self.report();
    }

    /// Derive a path-agnostic entry from the ownership annotation of a physical
    /// object. Returns false when the object carries no such annotation.
    pub fn index_physical(&self, physical: &Resource) -> bool {
        let annotations = physical.annotations();
        let Some(virtual_name) = annotations.get(OBJECT_NAME_ANNOTATION) else { return false };
        if physical.name().is_empty() { return false; }
        debug!(physical = %physical.name(), virtual_name = %virtual_name, "indexing physical name");
        self.insert(physical.name(), "", virtual_name);
        true
    }

    pub fn forget_physical(&self, physical: &Resource) { self.remove(physical.name(), ""); }

    pub fn len(&self) -> usize { self.snap.load().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Read-only handle for reconciliation calls.
    pub fn handle(&self) -> NameCacheHandle { NameCacheHandle { snap: Arc::clone(&self.snap) } }

    fn report(&self) { metrics::gauge!("vsync_name_cache_entries", self.len() as f64); }
}

/// Cheap, cloneable reader over the current snapshot.
#[derive(Debug, Clone)]
pub struct NameCacheHandle {
    snap: Arc<ArcSwap<Snapshot>>,
}

impl NameCache for NameCacheHandle {
    fn resolve(&self, physical_name: &str, path: &str) -> Option<String> {
        let snap = self.snap.load();
        snap.exact
            .get(&(physical_name.to_string(), path.to_string()))
            .or_else(|| snap.any_path.get(physical_name))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_entries_win_over_any_path() {
        let store = NameCacheStore::new();
        let h = store.handle();
        assert_eq!(h.resolve("s-x-ns-x-vc", "spec.secretName"), None);

        store.insert("s-x-ns-x-vc", "", "s");
        store.insert("s-x-ns-x-vc", "spec.secretName", "secret-s");
        assert_eq!(h.resolve("s-x-ns-x-vc", "spec.secretName").as_deref(), Some("secret-s"));
        assert_eq!(h.resolve("s-x-ns-x-vc", "spec.other").as_deref(), Some("s"));
        assert_eq!(store.len(), 2);

        store.remove("s-x-ns-x-vc", "spec.secretName");
        assert_eq!(h.resolve("s-x-ns-x-vc", "spec.secretName").as_deref(), Some("s"));
    }

    #[test]
    fn index_from_ownership_annotation() {
        let store = NameCacheStore::new();
        let physical = Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "s-x-ns-x-vc", "annotations": {OBJECT_NAME_ANNOTATION: "s"}}
        }))
        .unwrap();
        assert!(store.index_physical(&physical));
        assert_eq!(store.handle().resolve("s-x-ns-x-vc", "anything").as_deref(), Some("s"));

        let unowned = Resource::from_value(json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "x"}})).unwrap();
        assert!(!store.index_physical(&unowned));

        store.forget_physical(&physical);
        assert!(store.is_empty());
    }
}
