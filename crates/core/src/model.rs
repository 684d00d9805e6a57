//! Resource model shared by every component.
//!
//! Resources are immutable value objects: they are built once from desired-state
//! documents or from backend queries and never edited in place.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Reserved annotation keys understood by the core.
pub mod annotations {
    /// Marks a desired-state resource for deletion regardless of its presence in the backend.
    pub const DELETE: &str = "kspec.io/delete";
    /// Set by collectors on resources they fetched; informational only.
    pub const MANAGED_BY: &str = "kspec.io/managed-by";
    /// `true` excludes a desired-state resource from reconciliation.
    pub const IGNORE: &str = "kspec.io/ignore";
}

/// Identity pair `(kind, apiVersion)`. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType {
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
}

impl ResourceType {
    pub fn new(kind: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self { kind: kind.into(), api_version: api_version.into() }
    }

    /// Parse a `apiVersion/Kind` key (e.g. `kafka.kspec.io/v1/KafkaTopic`).
    pub fn parse(key: &str) -> Option<Self> {
        let (api_version, kind) = key.rsplit_once('/')?;
        if api_version.is_empty() || kind.is_empty() { return None; }
        Some(Self::new(kind, api_version))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.annotations.insert(key.into(), value.to_string());
        self
    }
}

/// A reconcilable document: `kind`, `apiVersion`, `metadata` and an opaque `spec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Json::is_null")]
    pub spec: Json,
}

impl Resource {
    pub fn new(resource_type: &ResourceType, metadata: ObjectMeta, spec: Json) -> Self {
        Self {
            api_version: resource_type.api_version.clone(),
            kind: resource_type.kind.clone(),
            metadata,
            spec,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        ResourceType::new(self.kind.clone(), self.api_version.clone())
    }

    pub fn name(&self) -> &str { &self.metadata.name }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// Whether the resource carries the reserved delete annotation set to `true`.
    pub fn is_marked_for_deletion(&self) -> bool {
        self.annotation(annotations::DELETE)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// A managed resource must have a non-empty name.
    pub fn is_managed(&self) -> bool { !self.metadata.name.trim().is_empty() }

    /// Look up a value under `spec` by dotted path (`partitions`, `configs.retention.ms` is
    /// resolved greedily against object keys so keys containing dots still resolve).
    pub fn spec_value(&self, path: &str) -> Option<&Json> {
        lookup_path(&self.spec, path)
    }

    /// Render the whole resource as JSON (used by selectors that walk arbitrary paths).
    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }

    pub fn with_spec(mut self, spec: Json) -> Self {
        self.spec = spec;
        self
    }
}

/// Walk `path` through nested JSON objects. Segments are matched greedily so a key that
/// itself contains dots (e.g. `cleanup.policy`) is found before descending.
pub fn lookup_path<'a>(root: &'a Json, path: &str) -> Option<&'a Json> {
    if path.is_empty() { return Some(root); }
    let obj = root.as_object()?;
    if let Some(v) = obj.get(path) { return Some(v); }
    let mut idx = path.len();
    while let Some(pos) = path[..idx].rfind('.') {
        let (head, tail) = (&path[..pos], &path[pos + 1..]);
        if let Some(child) = obj.get(head) {
            if let Some(found) = lookup_path(child, tail) { return Some(found); }
        }
        idx = pos;
    }
    None
}
