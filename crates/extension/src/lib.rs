//! kspec extension registry.
//!
//! Maps `(capability, resource type)` to factories. The registry is built once by an
//! explicit bootstrap routine, then shared read-only (typically behind an `Arc`).
//! Capabilities are trait objects (`dyn Collector`, `dyn Operation`, ...); each
//! resolution invokes the descriptor's supplier and hands back a fresh `Box<T>`.

#![forbid(unsafe_code)]

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kspec_core::ResourceType;
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub mod qualifier;

pub use qualifier::Qualifier;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no {capability} extension found for {resource_type}")]
    NoExtensionFound { capability: String, resource_type: String },
    #[error("ambiguous {capability} extension for {resource_type}: {candidates:?}")]
    AmbiguousExtension { capability: String, resource_type: String, candidates: Vec<String> },
    #[error("duplicate {capability} extension '{name}' for {resource_type}")]
    DuplicateExtension { capability: String, name: String, resource_type: String },
}

/// One registered factory. Immutable once registered.
pub struct ExtensionDescriptor<T: ?Sized> {
    name: String,
    resource_type: Option<ResourceType>,
    metadata: BTreeMap<String, String>,
    supplier: Arc<dyn Fn() -> Box<T> + Send + Sync>,
}

impl<T: ?Sized> ExtensionDescriptor<T> {
    pub fn new<F>(name: impl Into<String>, supplier: F) -> Self
    where
        F: Fn() -> Box<T> + Send + Sync + 'static,
    {
        Self { name: name.into(), resource_type: None, metadata: BTreeMap::new(), supplier: Arc::new(supplier) }
    }

    /// Bind to one resource type. Unbound descriptors act as wildcards.
    pub fn for_type(mut self, rt: ResourceType) -> Self {
        self.resource_type = Some(rt);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn resource_type(&self) -> Option<&ResourceType> { self.resource_type.as_ref() }
    pub fn metadata(&self, key: &str) -> Option<&str> { self.metadata.get(key).map(String::as_str) }
    pub fn is_wildcard(&self) -> bool { self.resource_type.is_none() }

    pub fn supports(&self, rt: &ResourceType) -> bool {
        self.resource_type.as_ref().map(|own| own == rt).unwrap_or(true)
    }

    pub fn instantiate(&self) -> Box<T> { (self.supplier)() }

    fn same_identity(&self, other: &Self) -> bool {
        self.name == other.name && self.resource_type == other.resource_type && self.metadata == other.metadata
    }
}

impl<T: ?Sized> fmt::Debug for ExtensionDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("name", &self.name)
            .field("resource_type", &self.resource_type)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Flat view of one registration, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationInfo {
    pub capability: String,
    pub name: String,
    pub resource_type: Option<ResourceType>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct ExtensionRegistry {
    // TypeId of the capability -> Vec<Arc<ExtensionDescriptor<T>>>
    slots: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
    listing: Vec<RegistrationInfo>,
}

impl ExtensionRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register<T: ?Sized + 'static>(&mut self, descriptor: ExtensionDescriptor<T>) -> Result<(), RegistryError> {
        let capability = capability_name::<T>();
        let slot = self
            .slots
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Vec::<Arc<ExtensionDescriptor<T>>>::new()));
        let Some(list) = slot.downcast_mut::<Vec<Arc<ExtensionDescriptor<T>>>>() else {
            unreachable!("slot type is keyed by TypeId")
        };
        if list.iter().any(|d| d.same_identity(&descriptor)) {
            return Err(RegistryError::DuplicateExtension {
                capability,
                name: descriptor.name.clone(),
                resource_type: render_type(descriptor.resource_type.as_ref()),
            });
        }
        debug!(capability = %capability, name = %descriptor.name, resource_type = %render_type(descriptor.resource_type.as_ref()), "registry: registered");
        self.listing.push(RegistrationInfo {
            capability,
            name: descriptor.name.clone(),
            resource_type: descriptor.resource_type.clone(),
            metadata: descriptor.metadata.clone(),
        });
        list.push(Arc::new(descriptor));
        Ok(())
    }

    /// All descriptors for a capability, in registration order.
    pub fn descriptors<T: ?Sized + 'static>(&self) -> &[Arc<ExtensionDescriptor<T>>] {
        self.slots
            .get(&TypeId::of::<T>())
            .and_then(|s| s.downcast_ref::<Vec<Arc<ExtensionDescriptor<T>>>>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn find<T: ?Sized + 'static>(&self, qualifier: &Qualifier) -> Vec<Arc<ExtensionDescriptor<T>>> {
        qualifier.filter(self.descriptors::<T>())
    }

    /// Exactly one extension for `rt`. A descriptor bound to `rt` wins over wildcards.
    pub fn get_extension<T: ?Sized + 'static>(&self, rt: &ResourceType) -> Result<Box<T>, RegistryError> {
        self.get_extension_with(rt, &Qualifier::everything())
    }

    /// Exactly one extension for `rt` among those kept by `qualifier`.
    pub fn get_extension_with<T: ?Sized + 'static>(
        &self,
        rt: &ResourceType,
        qualifier: &Qualifier,
    ) -> Result<Box<T>, RegistryError> {
        metrics::counter!("registry_lookups_total", 1u64, "capability" => capability_name::<T>());
        let candidates = Qualifier::by_type(rt).and(qualifier.clone()).filter(self.descriptors::<T>());
        let picked = match candidates.len() {
            0 | 1 => candidates,
            _ => {
                let exact: Vec<_> = candidates.iter().filter(|d| !d.is_wildcard()).cloned().collect();
                if exact.is_empty() { candidates } else { exact }
            }
        };
        match picked.as_slice() {
            [one] => Ok(one.instantiate()),
            [] => Err(RegistryError::NoExtensionFound {
                capability: capability_name::<T>(),
                resource_type: rt.to_string(),
            }),
            many => Err(RegistryError::AmbiguousExtension {
                capability: capability_name::<T>(),
                resource_type: rt.to_string(),
                candidates: many.iter().map(|d| d.name.clone()).collect(),
            }),
        }
    }

    /// Every extension kept by `qualifier`, freshly instantiated, in resolution order.
    pub fn get_all_extensions<T: ?Sized + 'static>(&self, qualifier: &Qualifier) -> Vec<Box<T>> {
        self.find::<T>(qualifier).iter().map(|d| d.instantiate()).collect()
    }

    pub fn registrations(&self) -> &[RegistrationInfo] { &self.listing }

    /// Resource types with at least one bound extension of capability `T`.
    pub fn resource_types<T: ?Sized + 'static>(&self) -> Vec<ResourceType> {
        let mut out: Vec<ResourceType> = self.descriptors::<T>().iter().filter_map(|d| d.resource_type.clone()).collect();
        out.sort();
        out.dedup();
        out
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry").field("registrations", &self.listing.len()).finish()
    }
}

/// `dyn kspec_reconcile::Collector` -> `Collector`.
pub fn capability_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).trim_start_matches("dyn ").to_string()
}

fn render_type(rt: Option<&ResourceType>) -> String {
    rt.map(|r| r.to_string()).unwrap_or_else(|| "*".to_string())
}
