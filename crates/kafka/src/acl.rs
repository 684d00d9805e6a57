//! `KafkaAclEntry` change computer.
//!
//! An ACL entry is immutable: its identity is the whole binding, so the only possible
//! changes are `Add`, `Delete` or `None`. Spec shape:
//! `{ principal: "User:alice", resource: "TOPIC:orders", permission: "read" }`.

use kspec_change::{record, ChangeComputer, ChangeError, ChangeOptions};
use kspec_core::{ChangeType, FieldChanges, Resource, ResourceChange};

pub const PRINCIPAL: &str = "principal";
pub const RESOURCE: &str = "resource";
pub const PERMISSION: &str = "permission";

/// Identity of one binding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AclKey {
    pub principal: String,
    pub resource: String,
    pub permission: String,
}

impl AclKey {
    pub fn of(r: &Resource) -> Self {
        let part = |k: &str| r.spec.get(k).and_then(|v| v.as_str()).unwrap_or_default().trim().to_string();
        Self { principal: part(PRINCIPAL), resource: part(RESOURCE), permission: part(PERMISSION).to_ascii_lowercase() }
    }

    pub fn is_complete(&self) -> bool {
        !self.principal.is_empty() && !self.resource.is_empty() && !self.permission.is_empty()
    }
}

impl std::fmt::Display for AclKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.principal, self.resource, self.permission)
    }
}

pub fn acl_computer<'a>(opts: &ChangeOptions) -> ChangeComputer<'a, Resource, String, Resource> {
    ChangeComputer::new(|r: &Resource| AclKey::of(r).to_string(), |r: &Resource| r.clone())
        .with_classifier(|b: Option<&Resource>, a: Option<&Resource>, _: &FieldChanges| {
            Some(match (b, a) {
                (None, _) => ChangeType::Add,
                (_, None) => ChangeType::Delete,
                _ => ChangeType::None,
            })
        })
        .with_deletion_marker(Resource::is_marked_for_deletion)
        .delete_orphans(opts.delete_orphans)
}

pub fn compute_acl_changes(
    actual: Vec<Resource>,
    desired: Vec<Resource>,
    opts: &ChangeOptions,
) -> Result<Vec<ResourceChange>, ChangeError> {
    let changes = acl_computer(opts).compute(actual, desired)?;
    record(&changes);
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds;
    use kspec_core::{annotations, ObjectMeta};
    use serde_json::json;

    fn entry(name: &str, principal: &str, permission: &str) -> Resource {
        Resource::new(
            &kinds::acl_entry(),
            ObjectMeta::named(name),
            json!({ "principal": principal, "resource": "TOPIC:orders", "permission": permission }),
        )
    }

    #[test]
    fn bindings_are_keyed_by_identity_not_name() {
        // Same binding under a different name is the same entry.
        let actual = vec![entry("a", "User:alice", "read")];
        let desired = vec![entry("alice-read", "User:alice", "READ"), entry("bob", "User:bob", "write")];
        let out = compute_acl_changes(actual, desired, &ChangeOptions::default()).unwrap();
        let seen: Vec<(&str, ChangeType)> = out.iter().map(|c| (c.key.as_str(), c.change_type)).collect();
        assert_eq!(
            seen,
            vec![("User:alice|TOPIC:orders|read", ChangeType::None), ("User:bob|TOPIC:orders|write", ChangeType::Add)]
        );
    }

    #[test]
    fn entries_are_never_updated() {
        let mut changed = entry("a", "User:alice", "read");
        changed.spec["host"] = json!("10.0.0.1");
        let out = compute_acl_changes(vec![entry("a", "User:alice", "read")], vec![changed], &ChangeOptions::default()).unwrap();
        assert_eq!(out[0].change_type, ChangeType::None);
        assert!(out[0].fields.is_empty());
    }

    #[test]
    fn annotated_and_orphaned_entries_are_deleted() {
        let mut marked = entry("a", "User:alice", "read");
        marked.metadata = marked.metadata.with_annotation(annotations::DELETE, true);
        let actual = vec![entry("a", "User:alice", "read"), entry("b", "User:bob", "write")];
        let out = compute_acl_changes(actual.clone(), vec![marked.clone()], &ChangeOptions::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].change_type, ChangeType::Delete);
        let out = compute_acl_changes(actual, vec![marked], &ChangeOptions::default().with_delete_orphans(true)).unwrap();
        assert!(out.iter().all(|c| c.change_type == ChangeType::Delete));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn key_requires_all_parts() {
        assert!(AclKey::of(&entry("a", "User:alice", "read")).is_complete());
        let partial = Resource::new(&kinds::acl_entry(), ObjectMeta::named("x"), json!({ "principal": "User:x" }));
        assert!(!AclKey::of(&partial).is_complete());
    }
}
