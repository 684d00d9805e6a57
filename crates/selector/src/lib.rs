//! kspec selectors: pure predicates over a resource's metadata and spec.
//!
//! A `FieldSelector` extracts a value by dotted path and applies an operator;
//! an `AggregateSelector` combines selectors with ALL (default) or ANY semantics.
//! Selectors never perform I/O and hold no mutable state.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use kspec_core::model::lookup_path;
use kspec_core::Resource;
use regex::Regex;
use serde_json::Value as Json;
use smallvec::SmallVec;
use thiserror::Error;

pub mod expression;

pub use expression::{Operator, SelectorExpression};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("unknown selector operator '{0}'")]
    UnknownOperator(String),
    #[error("invalid selector '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
    #[error("invalid pattern in selector '{expr}': {reason}")]
    Pattern { expr: String, reason: String },
}

pub trait Selector: Send + Sync {
    fn apply(&self, resource: &Resource) -> bool;
}

/// Values found at a path. `None` is "absent"; an empty list is "present but not a scalar".
type Extracted = Option<SmallVec<[String; 2]>>;

/// Resolve a dotted path against a resource. Label and annotation keys are taken whole
/// (everything after `metadata.labels.`), so keys containing dots still resolve.
pub fn extract(resource: &Resource, path: &str) -> Extracted {
    let scalar = |s: &str| -> Extracted { Some(SmallVec::from_elem(s.to_string(), 1)) };
    match path {
        "kind" => return scalar(&resource.kind),
        "apiVersion" => return scalar(&resource.api_version),
        "metadata.name" => return scalar(&resource.metadata.name),
        _ => {}
    }
    if let Some(key) = path.strip_prefix("metadata.labels.") {
        return resource.label(key).and_then(scalar);
    }
    if let Some(key) = path.strip_prefix("metadata.annotations.") {
        return resource.annotation(key).and_then(scalar);
    }
    if let Some(rest) = path.strip_prefix("spec.") {
        return resource.spec_value(rest).and_then(json_values);
    }
    let doc = resource.to_json();
    lookup_path(&doc, path).and_then(json_values)
}

fn json_values(v: &Json) -> Extracted {
    match v {
        Json::Null => None,
        Json::String(s) => Some(SmallVec::from_elem(s.clone(), 1)),
        Json::Bool(_) | Json::Number(_) => Some(SmallVec::from_elem(v.to_string(), 1)),
        Json::Array(items) => Some(
            items
                .iter()
                .filter_map(|i| match i {
                    Json::String(s) => Some(s.clone()),
                    Json::Bool(_) | Json::Number(_) => Some(i.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        Json::Object(_) => Some(SmallVec::new()),
    }
}

#[derive(Debug, Clone)]
pub struct FieldSelector {
    expr: SelectorExpression,
    pattern: Option<Regex>,
}

impl FieldSelector {
    /// Validates arity and compiles `MATCHES` patterns up front. Patterns must match the
    /// whole extracted value.
    pub fn new(expr: SelectorExpression) -> Result<Self, SelectorError> {
        let expr = SelectorExpression::new(expr.key, expr.operator, expr.values)?;
        let pattern = match expr.operator {
            Operator::Matches => {
                let raw = expr.values.first().map(String::as_str).unwrap_or_default();
                let re = Regex::new(&format!("^(?:{})$", raw))
                    .map_err(|e| SelectorError::Pattern { expr: expr.to_string(), reason: e.to_string() })?;
                Some(re)
            }
            _ => None,
        };
        Ok(Self { expr, pattern })
    }

    pub fn parse(s: &str) -> Result<Self, SelectorError> { Self::new(SelectorExpression::parse(s)?) }

    pub fn expression(&self) -> &SelectorExpression { &self.expr }

    fn contains(&self, found: &[String]) -> bool {
        found.iter().any(|v| self.expr.values.iter().any(|w| w == v))
    }
}

impl Selector for FieldSelector {
    fn apply(&self, resource: &Resource) -> bool {
        let found = extract(resource, &self.expr.key);
        match self.expr.operator {
            Operator::Exists => found.is_some(),
            Operator::DoesNotExist => found.is_none(),
            Operator::In | Operator::Equals => found.map(|f| self.contains(&f)).unwrap_or(false),
            Operator::NotIn | Operator::NotEquals => !found.map(|f| self.contains(&f)).unwrap_or(false),
            Operator::Matches => match (found, self.pattern.as_ref()) {
                (Some(f), Some(re)) => f.iter().any(|v| re.is_match(v)),
                _ => false,
            },
        }
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&self.expr, f) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Match {
    #[default]
    All,
    Any,
}

/// Combination of selectors. An empty aggregate accepts everything.
#[derive(Clone, Default)]
pub struct AggregateSelector {
    selectors: Vec<Arc<dyn Selector>>,
    mode: Match,
}

impl AggregateSelector {
    pub fn all(selectors: Vec<Arc<dyn Selector>>) -> Self { Self { selectors, mode: Match::All } }
    pub fn any(selectors: Vec<Arc<dyn Selector>>) -> Self { Self { selectors, mode: Match::Any } }
    pub fn empty() -> Self { Self::default() }

    /// Parse a list of textual expressions into an ALL aggregate.
    pub fn parse_all<I, S>(exprs: I) -> Result<Self, SelectorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selectors: Vec<Arc<dyn Selector>> = Vec::new();
        for e in exprs { selectors.push(Arc::new(FieldSelector::parse(e.as_ref())?)); }
        Ok(Self::all(selectors))
    }

    pub fn with(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selectors.push(selector);
        self
    }

    pub fn is_empty(&self) -> bool { self.selectors.is_empty() }
    pub fn len(&self) -> usize { self.selectors.len() }
    pub fn mode(&self) -> Match { self.mode }

    /// Keep only resources accepted by this selector, preserving input order.
    pub fn filter(&self, resources: Vec<Resource>) -> Vec<Resource> {
        if self.is_empty() { return resources; }
        let before = resources.len();
        let kept: Vec<Resource> = resources.into_iter().filter(|r| self.apply(r)).collect();
        let dropped = before - kept.len();
        if dropped > 0 {
            metrics::counter!("selector_rejected_total", dropped as u64);
            tracing::debug!(kept = kept.len(), dropped, "selector: filtered");
        }
        kept
    }
}

impl fmt::Debug for AggregateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateSelector").field("selectors", &self.selectors.len()).field("mode", &self.mode).finish()
    }
}

impl Selector for AggregateSelector {
    fn apply(&self, resource: &Resource) -> bool {
        match self.mode {
            Match::All => self.selectors.iter().all(|s| s.apply(resource)),
            Match::Any => self.selectors.is_empty() || self.selectors.iter().any(|s| s.apply(resource)),
        }
    }
}

impl<F> Selector for F
where
    F: Fn(&Resource) -> bool + Send + Sync,
{
    fn apply(&self, resource: &Resource) -> bool { self(resource) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kspec_core::{ObjectMeta, ResourceType};
    use serde_json::json;

    fn res(name: &str) -> Resource {
        Resource::new(
            &ResourceType::new("KafkaTopic", "kafka.kspec.io/v1"),
            ObjectMeta::named(name)
                .with_label("a-label.key", "value")
                .with_annotation("an-annotation.key", "value"),
            json!({ "partitions": 3, "configs": { "cleanup.policy": "compact" }, "tags": ["a", "b"] }),
        )
    }

    fn sel(key: &str, op: Operator, values: &[&str]) -> FieldSelector {
        FieldSelector::new(SelectorExpression::new(key, op, values.iter().copied()).unwrap()).unwrap()
    }

    #[test]
    fn name_in_and_not_in_are_complements() {
        let inx = sel("metadata.name", Operator::In, &["x"]);
        let notin = sel("metadata.name", Operator::NotIn, &["x"]);
        for (r, expect) in [(res("x"), true), (res("y"), false)] {
            assert_eq!(inx.apply(&r), expect);
            assert_eq!(notin.apply(&r), !expect);
        }
    }

    #[test]
    fn dotted_label_and_annotation_keys() {
        let r = res("t");
        assert!(sel("metadata.labels.a-label.key", Operator::Equals, &["value"]).apply(&r));
        assert!(sel("metadata.annotations.an-annotation.key", Operator::Exists, &[]).apply(&r));
        assert!(!sel("metadata.labels.a-label.key", Operator::NotEquals, &["value"]).apply(&r));
    }

    #[test]
    fn missing_paths_are_absent_not_errors() {
        let r = res("t");
        let path = "metadata.labels.missing";
        assert!(!sel(path, Operator::In, &["v"]).apply(&r));
        assert!(!sel(path, Operator::Equals, &["v"]).apply(&r));
        assert!(!sel(path, Operator::Exists, &[]).apply(&r));
        assert!(!sel(path, Operator::Matches, &[".*"]).apply(&r));
        assert!(sel(path, Operator::NotIn, &["v"]).apply(&r));
        assert!(sel(path, Operator::NotEquals, &["v"]).apply(&r));
        assert!(sel(path, Operator::DoesNotExist, &[]).apply(&r));
        assert!(sel("spec.a.b.c", Operator::DoesNotExist, &[]).apply(&r));
    }

    #[test]
    fn spec_paths_stringify_scalars_and_arrays() {
        let r = res("t");
        assert!(sel("spec.partitions", Operator::Equals, &["3"]).apply(&r));
        assert!(sel("spec.configs.cleanup.policy", Operator::In, &["delete", "compact"]).apply(&r));
        assert!(sel("spec.tags", Operator::In, &["b"]).apply(&r));
        assert!(sel("spec.configs", Operator::Exists, &[]).apply(&r));
        assert!(!sel("spec.configs", Operator::Equals, &["{}"]).apply(&r));
        assert!(sel("kind", Operator::Equals, &["KafkaTopic"]).apply(&r));
    }

    #[test]
    fn matches_is_anchored() {
        let r = res("orders-eu");
        assert!(sel("metadata.name", Operator::Matches, &["orders-.*"]).apply(&r));
        assert!(!sel("metadata.name", Operator::Matches, &["orders"]).apply(&r));
        let bad = SelectorExpression::new("metadata.name", Operator::Matches, ["("]).unwrap();
        assert!(matches!(FieldSelector::new(bad), Err(SelectorError::Pattern { .. })));
    }

    #[test]
    fn aggregate_all_any_and_empty() {
        let a: Arc<dyn Selector> = Arc::new(sel("metadata.name", Operator::In, &["x"]));
        let b: Arc<dyn Selector> = Arc::new(sel("metadata.labels.a-label.key", Operator::Equals, &["value"]));
        let all = AggregateSelector::all(vec![a.clone(), b.clone()]);
        let any = AggregateSelector::any(vec![a, b]);
        assert!(all.apply(&res("x")));
        assert!(!all.apply(&res("y")));
        assert!(any.apply(&res("y")));
        assert!(AggregateSelector::empty().apply(&res("y")));
        assert!(AggregateSelector::any(Vec::new()).apply(&res("y")));
    }

    #[test]
    fn filter_preserves_order() {
        let agg = AggregateSelector::parse_all(["metadata.name NOTIN (b)"]).unwrap();
        let out = agg.filter(vec![res("c"), res("b"), res("a")]);
        let names: Vec<&str> = out.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn closures_are_selectors() {
        let agg = AggregateSelector::empty().with(Arc::new(|r: &Resource| r.name().starts_with('o')));
        assert!(agg.apply(&res("orders")));
        assert!(!agg.apply(&res("users")));
    }
}
