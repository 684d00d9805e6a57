//! Collaborator contracts resolved through the extension registry.

use async_trait::async_trait;
use kspec_change::{compute_resource_changes, ChangeError, ChangeOptions};
use kspec_core::{annotations, ConfigError, Configuration, Resource, ResourceChange, ValidationError};
use kspec_selector::AggregateSelector;

use crate::{ReconciliationContext, ReconciliationMode};

/// Fetches the actual state of one resource kind from a backend.
#[async_trait]
pub trait Collector: Send + Sync {
    fn configure(&mut self, _cfg: &Configuration) -> Result<(), ConfigError> { Ok(()) }

    /// Backends may pre-filter with `selector`; the controller filters again regardless.
    async fn list_all(&self, cfg: &Configuration, selector: &AggregateSelector) -> anyhow::Result<Vec<Resource>>;
}

/// Executes classified changes of one resource kind against a backend.
#[async_trait]
pub trait Operation: Send + Sync {
    fn configure(&mut self, _cfg: &Configuration) -> Result<(), ConfigError> { Ok(()) }

    /// Modes this operation can run under. Empty means every mode.
    fn accepted_modes(&self) -> &[ReconciliationMode] { &[] }

    fn compute_changes(
        &self,
        actual: Vec<Resource>,
        desired: Vec<Resource>,
        opts: &ChangeOptions,
    ) -> Result<Vec<ResourceChange>, ChangeError> {
        compute_resource_changes(actual, desired, opts)
    }

    /// Whether this operation knows how to execute `change`.
    fn test(&self, _change: &ResourceChange) -> bool { true }

    fn describe(&self, change: &ResourceChange) -> String { change.summary() }

    async fn apply(&self, change: &ResourceChange) -> anyhow::Result<()>;
}

/// Rejects malformed desired state before collection.
pub trait Validation: Send + Sync {
    fn name(&self) -> &str;

    fn configure(&mut self, _cfg: &Configuration) -> Result<(), ConfigError> { Ok(()) }

    fn validate(&self, resource: &Resource) -> Result<(), ValidationError>;
}

/// Rewrites desired state before diffing. Returning `None` drops the resource.
pub trait Transformation: Send + Sync {
    fn name(&self) -> &str;

    fn configure(&mut self, _cfg: &Configuration) -> Result<(), ConfigError> { Ok(()) }

    fn transform(&self, resource: Resource, ctx: &ReconciliationContext) -> Option<Resource>;
}

/// Drops desired resources annotated `kspec.io/ignore: "true"`. Registered for every kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreAnnotated;

impl Transformation for IgnoreAnnotated {
    fn name(&self) -> &str { "ignore-annotated" }

    fn transform(&self, resource: Resource, _ctx: &ReconciliationContext) -> Option<Resource> {
        let ignored = resource.annotation(annotations::IGNORE).map(|v| v.trim().eq_ignore_ascii_case("true")).unwrap_or(false);
        if ignored { None } else { Some(resource) }
    }
}
