//! Change data model: what a diff produces and what operations consume.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::model::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Add,
    Delete,
    Update,
    None,
}

impl ChangeType {
    /// Reporting severity; has no bearing on execution order.
    pub fn severity(self) -> u8 {
        match self {
            ChangeType::None => 0,
            ChangeType::Update => 1,
            ChangeType::Add => 2,
            ChangeType::Delete => 3,
        }
    }

    /// Aggregate field-level types into a resource-level type: `None` iff every input is
    /// `None`, otherwise `Update`. Never yields `Add`/`Delete`.
    pub fn reduce<I: IntoIterator<Item = ChangeType>>(types: I) -> ChangeType {
        types.into_iter().fold(ChangeType::None, |acc, t| {
            if acc == ChangeType::None && t == ChangeType::None { ChangeType::None } else { ChangeType::Update }
        })
    }

    pub fn is_none(self) -> bool { self == ChangeType::None }
}

impl PartialOrd for ChangeType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ChangeType {
    fn cmp(&self, other: &Self) -> Ordering { self.severity().cmp(&other.severity()) }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Add => "ADD",
            ChangeType::Delete => "DELETE",
            ChangeType::Update => "UPDATE",
            ChangeType::None => "NONE",
        };
        f.write_str(s)
    }
}

/// Before/after pair. At least one side is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange<V> {
    pub before: Option<V>,
    pub after: Option<V>,
}

impl<V> ValueChange<V> {
    /// Returns `None` when both sides are absent; such a pair describes nothing.
    pub fn new(before: Option<V>, after: Option<V>) -> Option<Self> {
        if before.is_none() && after.is_none() { return None; }
        Some(Self { before, after })
    }

    pub fn added(after: V) -> Self { Self { before: None, after: Some(after) } }
    pub fn deleted(before: V) -> Self { Self { before: Some(before), after: None } }
    pub fn updated(before: V, after: V) -> Self { Self { before: Some(before), after: Some(after) } }

    /// The side an operation should act on: `after` when present, else `before`.
    pub fn current(&self) -> Option<&V> { self.after.as_ref().or(self.before.as_ref()) }

    pub fn map<U, F: Fn(&V) -> U>(&self, f: F) -> ValueChange<U> {
        ValueChange { before: self.before.as_ref().map(&f), after: self.after.as_ref().map(&f) }
    }

    /// Drop the side that contradicts `change_type` (`Add` has no before, `Delete` no after).
    pub fn conform(self, change_type: ChangeType) -> Self {
        match change_type {
            ChangeType::Add => Self { before: None, after: self.after },
            ChangeType::Delete => Self { before: self.before, after: None },
            _ => self,
        }
    }
}

pub type FieldChange = Change<String, Json>;
pub type FieldChanges = BTreeMap<String, FieldChange>;

/// One classified change. `fields` holds nested per-field changes (possibly all `None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change<K, V> {
    pub key: K,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub value: ValueChange<V>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: FieldChanges,
}

impl<K, V> Change<K, V> {
    pub fn new(key: K, change_type: ChangeType, value: ValueChange<V>) -> Self {
        Self { key, change_type, value, fields: BTreeMap::new() }
    }

    pub fn with_fields(mut self, fields: FieldChanges) -> Self {
        self.fields = fields;
        self
    }

    /// True when at least one nested field change is not `None`.
    pub fn has_field_changes(&self) -> bool {
        self.fields.values().any(|c| !c.change_type.is_none())
    }

    /// Nested field change by path, e.g. `field("configs.retention.ms")`.
    pub fn field(&self, path: &str) -> Option<&FieldChange> {
        if let Some(c) = self.fields.get(path) { return Some(c); }
        let (head, tail) = path.split_once('.')?;
        self.fields.get(head).and_then(|c| c.field(tail))
    }
}

/// Resource-level change as consumed by operations. The key is the rendered identity.
pub type ResourceChange = Change<String, Resource>;

impl ResourceChange {
    pub fn resource(&self) -> Option<&Resource> { self.value.current() }

    /// One-line description used by plans and dry-run reports.
    pub fn summary(&self) -> String {
        let kind = self.resource().map(|r| r.kind.as_str()).unwrap_or("resource");
        let mut out = format!("{} {} '{}'", self.change_type, kind, self.key);
        let changed: Vec<String> = flatten_fields(&self.fields)
            .into_iter()
            .filter(|(_, t)| !t.is_none())
            .map(|(path, t)| format!("{}:{}", path, t))
            .collect();
        if !changed.is_empty() {
            out.push_str(" (");
            out.push_str(&changed.join(", "));
            out.push(')');
        }
        out
    }
}

/// Leaf field changes as `(dotted.path, type)`, depth first in key order.
pub fn flatten_fields(fields: &FieldChanges) -> Vec<(String, ChangeType)> {
    let mut out = Vec::new();
    for (k, c) in fields.iter() {
        if c.fields.is_empty() {
            out.push((k.clone(), c.change_type));
        } else {
            for (sub, t) in flatten_fields(&c.fields) { out.push((format!("{}.{}", k, sub), t)); }
        }
    }
    out
}
