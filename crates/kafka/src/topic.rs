//! `KafkaTopic` change computer.
//!
//! A topic spec has three managed fields: `partitions`, `replicas` and `configs`. The two
//! counts accept `-1` (or `null`) for "no preference"; a `null` config value declines to
//! manage that entry. Config entries are diffed one by one and reported nested under
//! `configs`, so `field("configs.retention.ms")` finds a single entry.

use serde_json::{Map, Value as Json};

use kspec_change::fields::{diff_entries, diff_scalar, is_no_preference, is_null};
use kspec_change::{record, ChangeComputer, ChangeError, ChangeOptions};
use kspec_core::{Change, ChangeType, FieldChanges, Resource, ResourceChange, ValueChange};

pub const PARTITIONS: &str = "partitions";
pub const REPLICAS: &str = "replicas";
pub const CONFIGS: &str = "configs";

pub fn topic_computer<'a>(opts: &ChangeOptions) -> ChangeComputer<'a, Resource, String, Resource> {
    let config_delete_orphans = opts.config_delete_orphans;
    ChangeComputer::new(|r: &Resource| r.name().to_string(), |r: &Resource| r.clone())
        .with_fields(move |b: Option<&Resource>, a: Option<&Resource>| topic_fields(b, a, config_delete_orphans))
        .with_deletion_marker(Resource::is_marked_for_deletion)
        .delete_orphans(opts.delete_orphans)
        .keep_unchanged_fields(opts.keep_unchanged_fields)
}

pub fn compute_topic_changes(
    actual: Vec<Resource>,
    desired: Vec<Resource>,
    opts: &ChangeOptions,
) -> Result<Vec<ResourceChange>, ChangeError> {
    let changes = topic_computer(opts).compute(actual, desired)?;
    record(&changes);
    Ok(changes)
}

/// Field changes of one topic. Deletions carry none.
pub fn topic_fields(
    before: Option<&Resource>,
    after: Option<&Resource>,
    config_delete_orphans: bool,
) -> Result<FieldChanges, ChangeError> {
    let mut out = FieldChanges::new();
    let Some(after) = after else { return Ok(out) };
    let prior = |key: &str| before.and_then(|r| r.spec.get(key));

    for name in [PARTITIONS, REPLICAS] {
        if let Some(c) = diff_scalar(name, prior(name), after.spec.get(name), &is_no_preference) {
            out.insert(name.to_string(), c);
        }
    }

    let b_cfg = prior(CONFIGS).and_then(Json::as_object);
    let a_cfg = after.spec.get(CONFIGS).and_then(Json::as_object);
    let entries = match a_cfg {
        Some(_) => diff_entries(b_cfg, a_cfg, config_delete_orphans, &is_null)?,
        None if config_delete_orphans => diff_entries(b_cfg, Some(&Map::new()), true, &is_null)?,
        None => FieldChanges::new(),
    };
    if entries.is_empty() { return Ok(out); }

    let change_type = match (b_cfg, a_cfg) {
        (None, _) => ChangeType::Add,
        (_, None) => ChangeType::Delete,
        _ => ChangeType::reduce(entries.values().map(|c| c.change_type)),
    };
    if let Some(value) = ValueChange::new(b_cfg.cloned().map(Json::Object), a_cfg.cloned().map(Json::Object)) {
        let container = Change::new(CONFIGS.to_string(), change_type, value.conform(change_type)).with_fields(entries);
        out.insert(CONFIGS.to_string(), container);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds;
    use kspec_core::{annotations, ObjectMeta};
    use serde_json::json;

    fn topic(name: &str, spec: Json) -> Resource { Resource::new(&kinds::topic(), ObjectMeta::named(name), spec) }

    fn spec(config_value: &str) -> Json {
        json!({ "partitions": 1, "replicas": 1, "configs": { "config.prop": config_value } })
    }

    #[test]
    fn changed_config_is_a_single_nested_update() {
        let out = compute_topic_changes(
            vec![topic("Test", spec("actual-value"))],
            vec![topic("Test", spec("expected-value"))],
            &ChangeOptions::default(),
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].change_type, ChangeType::Update);
        assert_eq!(kspec_core::change::flatten_fields(&out[0].fields).len(), 1);
        let entry = out[0].field("configs.config.prop").unwrap();
        assert_eq!(entry.change_type, ChangeType::Update);
        assert_eq!(entry.value, ValueChange::updated(json!("actual-value"), json!("expected-value")));
    }

    #[test]
    fn new_topic_is_added() {
        let out = compute_topic_changes(vec![], vec![topic("Test", spec("v"))], &ChangeOptions::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].change_type, ChangeType::Add);
        assert!(out[0].value.before.is_none());
        assert_eq!(out[0].field("configs").map(|c| c.change_type), Some(ChangeType::Add));
    }

    #[test]
    fn orphan_topic_follows_delete_flag() {
        let actual = topic("Test", spec("v"));
        let out = compute_topic_changes(vec![actual.clone()], vec![], &ChangeOptions::default().with_delete_orphans(true))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].change_type, ChangeType::Delete);
        assert_eq!(out[0].value, ValueChange::deleted(actual.clone()));
        assert!(out[0].fields.is_empty());
        let out = compute_topic_changes(vec![actual], vec![], &ChangeOptions::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn identical_topics_are_unchanged() {
        let t = topic("Test", spec("v"));
        let out = compute_topic_changes(vec![t.clone()], vec![t], &ChangeOptions::default()).unwrap();
        assert_eq!(out[0].change_type, ChangeType::None);
        assert!(out[0].fields.is_empty());
    }

    #[test]
    fn no_preference_counts_and_loose_config_values() {
        let actual = topic("t", json!({ "partitions": 12, "replicas": 3, "configs": { "retention.ms": "86400000" } }));
        let desired = topic("t", json!({ "partitions": -1, "configs": { "retention.ms": 86400000 } }));
        let out = compute_topic_changes(vec![actual], vec![desired], &ChangeOptions::default()).unwrap();
        assert_eq!(out[0].change_type, ChangeType::None);
    }

    #[test]
    fn orphaned_config_entries_need_their_own_flag() {
        let actual = topic("t", json!({ "partitions": 1, "configs": { "a": "1", "b": "2" } }));
        let desired = topic("t", json!({ "partitions": 1, "configs": { "a": "1" } }));
        let opts = ChangeOptions::default();
        let out = compute_topic_changes(vec![actual.clone()], vec![desired.clone()], &opts).unwrap();
        assert_eq!(out[0].change_type, ChangeType::None);

        let opts = opts.with_config_delete_orphans(true);
        let out = compute_topic_changes(vec![actual.clone()], vec![desired], &opts).unwrap();
        assert_eq!(out[0].change_type, ChangeType::Update);
        assert_eq!(out[0].field("configs.b").map(|c| c.change_type), Some(ChangeType::Delete));

        let bare = topic("t", json!({ "partitions": 1 }));
        let out = compute_topic_changes(vec![actual], vec![bare], &opts).unwrap();
        assert_eq!(out[0].field("configs").map(|c| c.change_type), Some(ChangeType::Delete));
        assert_eq!(out[0].field("configs").map(|c| c.fields.len()), Some(2));
        assert!(out[0].field("configs").and_then(|c| c.value.after.as_ref()).is_none());
    }

    #[test]
    fn delete_annotation_wins_over_spec() {
        let actual = topic("t", spec("v"));
        let marked = Resource::new(&kinds::topic(), ObjectMeta::named("t").with_annotation(annotations::DELETE, "true"), spec("w"));
        let out = compute_topic_changes(vec![actual], vec![marked.clone()], &ChangeOptions::default()).unwrap();
        assert_eq!(out[0].change_type, ChangeType::Delete);
        let out = compute_topic_changes(vec![], vec![marked], &ChangeOptions::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn partition_increase_is_a_field_update() {
        let out = compute_topic_changes(
            vec![topic("t", json!({ "partitions": 3 }))],
            vec![topic("t", json!({ "partitions": 6 }))],
            &ChangeOptions::default(),
        )
        .unwrap();
        let p = out[0].field(PARTITIONS).unwrap();
        assert_eq!(p.value, ValueChange::updated(json!(3), json!(6)));
        assert_eq!(out[0].summary(), "UPDATE KafkaTopic 't' (partitions:UPDATE)");
    }
}
