//! kspec change computer: diff actual vs desired collections into typed changes.
//!
//! `ChangeComputer` is the generic keyed algorithm; `fields` holds the JSON field-level
//! diffs it is combined with; `resource_computer` wires both for plain resources keyed by
//! name.

#![forbid(unsafe_code)]

use std::fmt;

use kspec_core::config::CONFIG_DELETE_ORPHANS;
use kspec_core::{Change, ChangeType, ConfigError, Configuration, Resource, ResourceChange};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod engine;
pub mod fields;

pub use engine::{classify_default, prune_unchanged, ChangeComputer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Actual,
    Desired,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Side::Actual => "actual", Side::Desired => "desired" })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChangeError {
    #[error("duplicate key '{key}' in {side} state")]
    DuplicateKey { side: Side, key: String },
    #[error("change '{key}' has neither a before nor an after value")]
    EmptyValueChange { key: String },
}

/// Knobs shared by every change computer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOptions {
    /// Emit `Delete` for resources only present in actual state.
    pub delete_orphans: bool,
    /// Emit `Delete` for nested entries (config keys) only present in actual state.
    pub config_delete_orphans: bool,
    /// Keep `None` field changes in the output.
    pub keep_unchanged_fields: bool,
}

impl ChangeOptions {
    pub fn from_config(cfg: &Configuration) -> Result<Self, ConfigError> {
        let delete_orphans = cfg.delete_orphans()?;
        Ok(Self {
            delete_orphans,
            config_delete_orphans: cfg.get_bool(CONFIG_DELETE_ORPHANS)?.unwrap_or(delete_orphans),
            keep_unchanged_fields: false,
        })
    }

    pub fn with_delete_orphans(mut self, on: bool) -> Self {
        self.delete_orphans = on;
        self
    }

    pub fn with_config_delete_orphans(mut self, on: bool) -> Self {
        self.config_delete_orphans = on;
        self
    }
}

/// Computer for resources keyed by `metadata.name`, with field changes taken from the
/// top-level keys of `spec` and the reserved delete annotation honored.
pub fn resource_computer<'a>(opts: &ChangeOptions) -> ChangeComputer<'a, Resource, String, Resource> {
    let nested = opts.config_delete_orphans;
    ChangeComputer::new(|r: &Resource| r.name().to_string(), |r: &Resource| r.clone())
        .with_fields(move |b: Option<&Resource>, a: Option<&Resource>| {
            fields::diff_spec(b.map(|r| &r.spec), a.map(|r| &r.spec), nested)
        })
        .with_deletion_marker(Resource::is_marked_for_deletion)
        .delete_orphans(opts.delete_orphans)
        .keep_unchanged_fields(opts.keep_unchanged_fields)
}

pub fn compute_resource_changes(
    actual: Vec<Resource>,
    desired: Vec<Resource>,
    opts: &ChangeOptions,
) -> Result<Vec<ResourceChange>, ChangeError> {
    let changes = resource_computer(opts).compute(actual, desired)?;
    record(&changes);
    Ok(changes)
}

/// Count changes by type into `diff_changes_total{type}`.
pub fn record<K, V>(changes: &[Change<K, V>]) {
    for c in changes.iter() {
        counter!("diff_changes_total", 1u64, "type" => c.change_type.to_string());
    }
    tracing::debug!(summary = %ChangeSummary::of(changes), "diff: computed");
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub adds: usize,
    pub updates: usize,
    pub deletes: usize,
    pub unchanged: usize,
}

impl ChangeSummary {
    pub fn of<K, V>(changes: &[Change<K, V>]) -> Self {
        let mut s = Self::default();
        for c in changes.iter() {
            match c.change_type {
                ChangeType::Add => s.adds += 1,
                ChangeType::Update => s.updates += 1,
                ChangeType::Delete => s.deletes += 1,
                ChangeType::None => s.unchanged += 1,
            }
        }
        s
    }

    pub fn has_changes(&self) -> bool { self.adds + self.updates + self.deletes > 0 }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to add, {} to update, {} to delete, {} unchanged", self.adds, self.updates, self.deletes, self.unchanged)
    }
}
