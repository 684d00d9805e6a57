//! Collector and operation over a `MemoryBackend`, one pair per kind.

use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use metrics::counter;
use serde_json::{Map, Value as Json};
use tracing::info;

use kspec_change::{ChangeError, ChangeOptions};
use kspec_core::{annotations, ChangeType, Configuration, FieldChanges, Resource, ResourceChange, ResourceType};
use kspec_reconcile::{Collector, Operation};
use kspec_selector::AggregateSelector;

use crate::MemoryBackend;

pub const MANAGER: &str = "memory";

#[derive(Debug, Clone)]
pub struct MemoryCollector {
    backend: MemoryBackend,
    resource_type: ResourceType,
}

impl MemoryCollector {
    pub fn new(backend: MemoryBackend, resource_type: ResourceType) -> Self { Self { backend, resource_type } }
}

#[async_trait]
impl Collector for MemoryCollector {
    async fn list_all(&self, _cfg: &Configuration, selector: &AggregateSelector) -> Result<Vec<Resource>> {
        let items = self.backend.list(&self.resource_type);
        let items = selector
            .filter(items)
            .into_iter()
            .map(|mut r| {
                r.metadata.annotations.insert(annotations::MANAGED_BY.to_string(), MANAGER.to_string());
                r
            })
            .collect();
        Ok(items)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryOperation {
    backend: MemoryBackend,
    resource_type: ResourceType,
}

impl MemoryOperation {
    pub fn new(backend: MemoryBackend, resource_type: ResourceType) -> Self { Self { backend, resource_type } }
}

#[async_trait]
impl Operation for MemoryOperation {
    fn compute_changes(
        &self,
        actual: Vec<Resource>,
        desired: Vec<Resource>,
        opts: &ChangeOptions,
    ) -> Result<Vec<ResourceChange>, ChangeError> {
        kspec_kafka::compute_changes(&self.resource_type, actual, desired, opts)
    }

    async fn apply(&self, change: &ResourceChange) -> Result<()> {
        let t0 = Instant::now();
        match change.change_type {
            ChangeType::Add => {
                let after = change.value.after.clone().ok_or_else(|| anyhow!("ADD '{}' has no desired state", change.key))?;
                self.backend.upsert(after);
            }
            ChangeType::Update => {
                let (Some(before), Some(after)) = (&change.value.before, &change.value.after) else {
                    return Err(anyhow!("UPDATE '{}' needs both states", change.key));
                };
                let mut spec = before.spec.as_object().cloned().unwrap_or_default();
                apply_fields(&mut spec, &change.fields);
                let mut next = after.clone().with_spec(Json::Object(spec));
                next.metadata.annotations.remove(annotations::MANAGED_BY);
                self.backend.upsert(next);
            }
            ChangeType::Delete => {
                let before = change.value.before.as_ref().ok_or_else(|| anyhow!("DELETE '{}' has no actual state", change.key))?;
                self.backend
                    .remove(&self.resource_type, before.name())
                    .ok_or_else(|| anyhow!("{} '{}' does not exist", self.resource_type.kind, before.name()))?;
            }
            ChangeType::None => return Ok(()),
        }
        counter!("memory_apply_total", 1u64, "type" => change.change_type.to_string());
        info!(kind = %self.resource_type, key = %change.key, change = %change.change_type, took_ms = %t0.elapsed().as_millis(), "memory: applied");
        Ok(())
    }
}

/// Write field changes onto a stored spec: unmanaged keys stay, deleted keys go, nested
/// changes are applied entry by entry.
pub fn apply_fields(target: &mut Map<String, Json>, fields: &FieldChanges) {
    for (key, c) in fields.iter() {
        match c.change_type {
            ChangeType::None => {}
            ChangeType::Delete => { target.remove(key); }
            _ if !c.fields.is_empty() => {
                let slot = target.entry(key.clone()).or_insert_with(|| Json::Object(Map::new()));
                if !slot.is_object() { *slot = Json::Object(Map::new()); }
                if let Some(nested) = slot.as_object_mut() { apply_fields(nested, &c.fields); }
            }
            _ => {
                if let Some(v) = &c.value.after { target.insert(key.clone(), v.clone()); }
            }
        }
    }
}
