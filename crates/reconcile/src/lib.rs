//! kspec reconciliation controller.
//!
//! For every resource kind present in the desired state the controller runs
//! `COLLECTING -> FILTERING -> DIFFING -> EXECUTING -> DONE`, resolving its collector and
//! operation from the extension registry. Change execution is the only concurrent step.
//! A run returns one `ChangeResult` per change plus failure entries for resources or
//! kinds that never reached diffing; only wiring, configuration and duplicate-key
//! errors abort the whole run.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use kspec_change::ChangeError;
use kspec_core::{ChangeType, ConfigError, Configuration, ResourceChange, ResourceType};
use kspec_extension::RegistryError;
use kspec_selector::AggregateSelector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod controller;
pub mod extension;
pub mod mock;

pub use controller::{Reconciler, RunState};
pub use extension::{Collector, IgnoreAnnotated, Operation, Transformation, Validation};

/// Which change types a run may execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReconciliationMode {
    /// Only `Add`.
    Create,
    /// Only `Delete`.
    Delete,
    /// `Add` and `Update`.
    Update,
    /// Everything.
    #[default]
    Full,
}

impl ReconciliationMode {
    pub fn allows(self, t: ChangeType) -> bool {
        match (self, t) {
            (_, ChangeType::None) => false,
            (ReconciliationMode::Full, _) => true,
            (ReconciliationMode::Create, ChangeType::Add) => true,
            (ReconciliationMode::Delete, ChangeType::Delete) => true,
            (ReconciliationMode::Update, ChangeType::Add | ChangeType::Update) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReconciliationMode::Create => "CREATE",
            ReconciliationMode::Delete => "DELETE",
            ReconciliationMode::Update => "UPDATE",
            ReconciliationMode::Full => "FULL",
        }
    }
}

impl fmt::Display for ReconciliationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ReconciliationMode {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(ReconciliationMode::Create),
            "delete" => Ok(ReconciliationMode::Delete),
            "update" => Ok(ReconciliationMode::Update),
            "full" | "apply" => Ok(ReconciliationMode::Full),
            other => Err(ConfigError::invalid("mode", format!("unknown reconciliation mode '{}'", other))),
        }
    }
}

/// Per-run inputs besides the desired resources.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationContext {
    pub dry_run: bool,
    pub selector: AggregateSelector,
    pub configuration: Configuration,
}

impl ReconciliationContext {
    pub fn new(configuration: Configuration) -> Self { Self { configuration, ..Default::default() } }

    pub fn dry_run(mut self, on: bool) -> Self {
        self.dry_run = on;
        self
    }

    pub fn with_selector(mut self, selector: AggregateSelector) -> Self {
        self.selector = selector;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeStatus {
    /// Nothing to do.
    Ok,
    /// The operation applied the change.
    Changed,
    /// Dry-run: the change would be applied.
    Planned,
    /// Not executed: excluded by the mode or unsupported by the operation.
    Ignored,
    Failed,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeStatus::Ok => "OK",
            ChangeStatus::Changed => "CHANGED",
            ChangeStatus::Planned => "PLANNED",
            ChangeStatus::Ignored => "IGNORED",
            ChangeStatus::Failed => "FAILED",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeResult {
    pub status: ChangeStatus,
    #[serde(rename = "resourceType")]
    pub resource_type: ResourceType,
    /// Change key, resource name, or `*` for kind-level failures.
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<ResourceChange>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChangeResult {
    pub fn for_change(rt: &ResourceType, change: ResourceChange, status: ChangeStatus, description: String) -> Self {
        Self { status, resource_type: rt.clone(), key: change.key.clone(), change: Some(change), description, error: None }
    }

    pub fn failure(rt: &ResourceType, key: impl Into<String>, description: impl Into<String>, error: impl ToString) -> Self {
        Self {
            status: ChangeStatus::Failed,
            resource_type: rt.clone(),
            key: key.into(),
            change: None,
            description: description.into(),
            error: Some(error.to_string()),
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.status = ChangeStatus::Failed;
        self.error = Some(error.to_string());
        self
    }

    pub fn change_type(&self) -> Option<ChangeType> { self.change.as_ref().map(|c| c.change_type) }
    pub fn is_failed(&self) -> bool { self.status == ChangeStatus::Failed }
}

/// Backend query failure for one kind. Scoped to that kind's batch.
#[derive(Debug, Error)]
#[error("failed to collect {resource_type}: {message}")]
pub struct CollectorError {
    pub resource_type: ResourceType,
    pub message: String,
}

/// Apply-time failure of one change.
#[derive(Debug, Error)]
#[error("failed to apply {change_type} '{key}': {message}")]
pub struct OperationError {
    pub key: String,
    pub change_type: ChangeType,
    pub message: String,
}

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{resource_type}: {source}")]
    Change { resource_type: ResourceType, #[source] source: ChangeError },
}

/// Counts per status, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ok: usize,
    pub changed: usize,
    pub planned: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn of(results: &[ChangeResult]) -> Self {
        let mut s = Self::default();
        for r in results.iter() {
            match r.status {
                ChangeStatus::Ok => s.ok += 1,
                ChangeStatus::Changed => s.changed += 1,
                ChangeStatus::Planned => s.planned += 1,
                ChangeStatus::Ignored => s.ignored += 1,
                ChangeStatus::Failed => s.failed += 1,
            }
        }
        s
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} changed={} planned={} ignored={} failed={}",
            self.ok, self.changed, self.planned, self.ignored, self.failed
        )
    }
}

pub mod prelude {
    pub use super::{
        ChangeResult, ChangeStatus, Collector, Operation, ReconcileError, Reconciler, ReconciliationContext,
        ReconciliationMode, Transformation, Validation,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_gate_change_types() {
        use ChangeType::*;
        let m = ReconciliationMode::Create;
        assert!(m.allows(Add) && !m.allows(Update) && !m.allows(Delete) && !m.allows(None));
        let m = ReconciliationMode::Delete;
        assert!(!m.allows(Add) && !m.allows(Update) && m.allows(Delete));
        let m = ReconciliationMode::Update;
        assert!(m.allows(Add) && m.allows(Update) && !m.allows(Delete));
        let m = ReconciliationMode::Full;
        assert!(m.allows(Add) && m.allows(Update) && m.allows(Delete) && !m.allows(None));
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!("create".parse::<ReconciliationMode>().unwrap(), ReconciliationMode::Create);
        assert_eq!("FULL".parse::<ReconciliationMode>().unwrap(), ReconciliationMode::Full);
        assert!("sometimes".parse::<ReconciliationMode>().is_err());
    }
}
