//! Qualifiers narrow a candidate list of descriptors.
//!
//! A qualifier is a filter `[descriptor] -> [descriptor]` rather than a per-item
//! predicate: `Any` concatenates its members' outputs in member order and `All`
//! feeds each member's output into the next.

use std::fmt;
use std::sync::Arc;

use kspec_core::ResourceType;

use crate::ExtensionDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Qualifier {
    /// Descriptor registered under exactly this name.
    ByName(String),
    /// Descriptor bound to this resource type, or registered for any type.
    ByResourceType(ResourceType),
    /// Descriptor whose static metadata carries `key = value`.
    ByMetadata { key: String, value: String },
    Any(Vec<Qualifier>),
    All(Vec<Qualifier>),
}

impl Qualifier {
    pub fn by_name(name: impl Into<String>) -> Self { Qualifier::ByName(name.into()) }
    pub fn by_type(rt: &ResourceType) -> Self { Qualifier::ByResourceType(rt.clone()) }
    pub fn by_metadata(key: impl Into<String>, value: impl Into<String>) -> Self {
        Qualifier::ByMetadata { key: key.into(), value: value.into() }
    }

    /// The qualifier that keeps every candidate.
    pub fn everything() -> Self { Qualifier::All(Vec::new()) }

    pub fn and(self, other: Qualifier) -> Self {
        match self {
            Qualifier::All(mut members) => { members.push(other); Qualifier::All(members) }
            q => Qualifier::All(vec![q, other]),
        }
    }

    pub fn or(self, other: Qualifier) -> Self {
        match self {
            Qualifier::Any(mut members) => { members.push(other); Qualifier::Any(members) }
            q => Qualifier::Any(vec![q, other]),
        }
    }

    /// Filter `candidates`, keeping their relative order. A descriptor kept by several
    /// `Any` members appears once, at the position of its first occurrence.
    pub fn filter<T: ?Sized>(&self, candidates: &[Arc<ExtensionDescriptor<T>>]) -> Vec<Arc<ExtensionDescriptor<T>>> {
        match self {
            Qualifier::ByName(name) => keep(candidates, |d| d.name() == name),
            Qualifier::ByResourceType(rt) => keep(candidates, |d| d.supports(rt)),
            Qualifier::ByMetadata { key, value } => keep(candidates, |d| d.metadata(key) == Some(value.as_str())),
            Qualifier::Any(members) => {
                let mut out: Vec<Arc<ExtensionDescriptor<T>>> = Vec::new();
                for q in members {
                    for d in q.filter(candidates) {
                        if !out.iter().any(|seen| Arc::ptr_eq(seen, &d)) { out.push(d); }
                    }
                }
                out
            }
            Qualifier::All(members) => {
                let mut out = candidates.to_vec();
                for q in members {
                    if out.is_empty() { break; }
                    out = q.filter(&out);
                }
                out
            }
        }
    }
}

fn keep<T: ?Sized, F>(candidates: &[Arc<ExtensionDescriptor<T>>], f: F) -> Vec<Arc<ExtensionDescriptor<T>>>
where
    F: Fn(&ExtensionDescriptor<T>) -> bool,
{
    candidates.iter().filter(|d| f(d)).cloned().collect()
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, op: &str, members: &[Qualifier]| -> fmt::Result {
            write!(f, "{}(", op)?;
            for (i, q) in members.iter().enumerate() {
                if i > 0 { f.write_str(", ")?; }
                write!(f, "{}", q)?;
            }
            f.write_str(")")
        };
        match self {
            Qualifier::ByName(n) => write!(f, "name={}", n),
            Qualifier::ByResourceType(rt) => write!(f, "type={}", rt),
            Qualifier::ByMetadata { key, value } => write!(f, "{}={}", key, value),
            Qualifier::Any(m) => join(f, "any", m),
            Qualifier::All(m) => join(f, "all", m),
        }
    }
}
