//! kspec in-memory backend.
//!
//! The store is an immutable snapshot behind an `ArcSwap`: readers load the current
//! snapshot without locking, writers publish a new one with `rcu`. The same store backs a
//! `Collector` and an `Operation` for every registered kind, so a reconciliation run can
//! be exercised end to end without a Kafka cluster.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use kspec_core::{Resource, ResourceType};
use rustc_hash::FxHashMap;
use tracing::debug;

pub mod bootstrap;
pub mod extension;
pub mod snapshot;

pub use bootstrap::{bootstrap, default_kinds};
pub use extension::{MemoryCollector, MemoryOperation};

type Key = (ResourceType, String);

/// One published version of the store.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub epoch: u64,
    items: FxHashMap<Key, Resource>,
}

impl Snapshot {
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn get(&self, rt: &ResourceType, name: &str) -> Option<&Resource> {
        self.items.get(&(rt.clone(), name.to_string()))
    }

    /// Resources of one kind, ordered by name.
    pub fn list(&self, rt: &ResourceType) -> Vec<Resource> {
        let mut out: Vec<Resource> = self.items.iter().filter(|((t, _), _)| t == rt).map(|(_, r)| r.clone()).collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    /// Every resource, ordered by kind then name.
    pub fn all(&self) -> Vec<Resource> {
        let mut keys: Vec<&Key> = self.items.keys().collect();
        keys.sort();
        keys.into_iter().filter_map(|k| self.items.get(k).cloned()).collect()
    }
}

/// Cheap to clone; clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    snap: Arc<ArcSwap<Snapshot>>,
}

impl MemoryBackend {
    pub fn new() -> Self { Self::default() }

    pub fn with_resources<I: IntoIterator<Item = Resource>>(resources: I) -> Self {
        let backend = Self::new();
        for r in resources { backend.upsert(r); }
        backend
    }

    pub fn current(&self) -> Arc<Snapshot> { self.snap.load_full() }

    pub fn list(&self, rt: &ResourceType) -> Vec<Resource> { self.snap.load().list(rt) }

    pub fn get(&self, rt: &ResourceType, name: &str) -> Option<Resource> { self.snap.load().get(rt, name).cloned() }

    pub fn upsert(&self, resource: Resource) {
        let key = (resource.resource_type(), resource.name().to_string());
        self.snap.rcu(|cur| {
            let mut next = Snapshot::clone(cur);
            next.items.insert(key.clone(), resource.clone());
            next.epoch = next.epoch.saturating_add(1);
            next
        });
        debug!(kind = %key.0, name = %key.1, "memory: upsert");
    }

    pub fn remove(&self, rt: &ResourceType, name: &str) -> Option<Resource> {
        let key = (rt.clone(), name.to_string());
        let prev = self.snap.rcu(|cur| {
            let mut next = Snapshot::clone(cur);
            if next.items.remove(&key).is_some() { next.epoch = next.epoch.saturating_add(1); }
            next
        });
        debug!(kind = %rt, name = %name, "memory: remove");
        prev.get(rt, name).cloned()
    }

    /// Replace the whole store.
    pub fn replace<I: IntoIterator<Item = Resource>>(&self, resources: I) {
        let items: FxHashMap<Key, Resource> =
            resources.into_iter().map(|r| ((r.resource_type(), r.name().to_string()), r)).collect();
        let epoch = self.snap.load().epoch.saturating_add(1);
        self.snap.store(Arc::new(Snapshot { epoch, items }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kspec_core::ObjectMeta;
    use serde_json::json;

    fn topic(name: &str) -> Resource {
        Resource::new(&ResourceType::new("KafkaTopic", "kafka.kspec.io/v1"), ObjectMeta::named(name), json!({}))
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let backend = MemoryBackend::with_resources([topic("b"), topic("a")]);
        let before = backend.current();
        backend.upsert(topic("c"));
        let rt = ResourceType::new("KafkaTopic", "kafka.kspec.io/v1");
        assert_eq!(before.len(), 2);
        assert_eq!(backend.list(&rt).iter().map(|r| r.name().to_string()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert!(backend.current().epoch > before.epoch);
        assert_eq!(backend.remove(&rt, "a").map(|r| r.name().to_string()), Some("a".to_string()));
        assert!(backend.remove(&rt, "a").is_none());
        assert!(backend.get(&rt, "a").is_none());
    }

    #[test]
    fn kinds_are_kept_apart() {
        let quota = Resource::new(&ResourceType::new("KafkaClientQuota", "kafka.kspec.io/v1"), ObjectMeta::named("a"), json!({}));
        let backend = MemoryBackend::with_resources([topic("a"), quota]);
        assert_eq!(backend.current().len(), 2);
        assert_eq!(backend.list(&ResourceType::new("KafkaTopic", "kafka.kspec.io/v1")).len(), 1);
        assert_eq!(backend.current().all()[0].kind, "KafkaClientQuota");
    }
}
