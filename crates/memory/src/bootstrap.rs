//! Start-up wiring: build the registry once, then hand it to the controller.

use kspec_core::{Configuration, ResourceType};
use kspec_extension::{ExtensionDescriptor, ExtensionRegistry, RegistryError};
use kspec_reconcile::{Collector, IgnoreAnnotated, Operation, Transformation};
use tracing::info;

use crate::{MemoryBackend, MemoryCollector, MemoryOperation};

pub fn default_kinds() -> Vec<ResourceType> { kspec_kafka::kinds::all() }

/// Registry with a memory collector and operation for each of `kinds`, the built-in
/// transformations, and the Kafka validations enabled by `cfg`.
pub fn bootstrap(backend: &MemoryBackend, kinds: &[ResourceType], cfg: &Configuration) -> Result<ExtensionRegistry, RegistryError> {
    let mut registry = ExtensionRegistry::new();
    for rt in kinds.iter() {
        let (b, t) = (backend.clone(), rt.clone());
        registry.register(
            ExtensionDescriptor::<dyn Collector>::new(format!("memory-{}-collector", rt.kind.to_ascii_lowercase()), move || {
                Box::new(MemoryCollector::new(b.clone(), t.clone())) as Box<dyn Collector>
            })
            .for_type(rt.clone()),
        )?;
        let (b, t) = (backend.clone(), rt.clone());
        registry.register(
            ExtensionDescriptor::<dyn Operation>::new(format!("memory-{}-operation", rt.kind.to_ascii_lowercase()), move || {
                Box::new(MemoryOperation::new(b.clone(), t.clone())) as Box<dyn Operation>
            })
            .for_type(rt.clone()),
        )?;
    }
    registry.register(ExtensionDescriptor::<dyn Transformation>::new("ignore-annotated", || {
        Box::new(IgnoreAnnotated) as Box<dyn Transformation>
    }))?;
    kspec_kafka::register_extensions(&mut registry, cfg)?;
    info!(kinds = kinds.len(), registrations = registry.registrations().len(), "memory: registry built");
    Ok(registry)
}
