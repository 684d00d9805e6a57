use std::sync::Arc;

use kspec_core::{annotations, ChangeType, Configuration, ObjectMeta, Resource};
use kspec_kafka::{keys, kinds};
use kspec_memory::{bootstrap, default_kinds, snapshot, MemoryBackend};
use kspec_reconcile::prelude::*;
use kspec_reconcile::RunSummary;
use kspec_selector::AggregateSelector;
use serde_json::{json, Value as Json};

fn topic(name: &str, spec: Json) -> Resource { Resource::new(&kinds::topic(), ObjectMeta::named(name), spec) }

fn acl(name: &str, principal: &str, permission: &str) -> Resource {
    Resource::new(
        &kinds::acl_entry(),
        ObjectMeta::named(name),
        json!({ "principal": principal, "resource": "TOPIC:orders", "permission": permission }),
    )
}

fn reconciler(backend: &MemoryBackend, cfg: &Configuration) -> Reconciler {
    Reconciler::new(Arc::new(bootstrap(backend, &default_kinds(), cfg).unwrap()))
}

fn desired_state() -> Vec<Resource> {
    vec![
        topic("orders", json!({ "partitions": 6, "replicas": 3, "configs": { "retention.ms": 86400000, "cleanup.policy": "delete" } })),
        topic("payments", json!({ "partitions": -1, "replicas": -1 })),
        acl("alice-read", "User:alice", "read"),
        Resource::new(&kinds::client_quota(), ObjectMeta::named("clients"), json!({ "producerByteRate": 1024 })),
    ]
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let backend = MemoryBackend::new();
    let ctx = ReconciliationContext::default();
    let r = reconciler(&backend, &ctx.configuration);
    let first = r.reconcile(desired_state(), ReconciliationMode::Create, &ctx).await.unwrap();
    assert_eq!(RunSummary::of(&first).changed, 4);
    assert_eq!(backend.current().len(), 4);

    let second = r.plan(desired_state(), &ctx).await.unwrap();
    assert_eq!(second.len(), 4);
    assert!(second.iter().all(|c| c.status == ChangeStatus::Ok && c.change_type() == Some(ChangeType::None)));
}

#[tokio::test]
async fn update_keeps_unmanaged_state() {
    let backend = MemoryBackend::with_resources([topic(
        "orders",
        json!({ "partitions": 6, "replicas": 3, "configs": { "retention.ms": "1000", "segment.bytes": "1024" }, "owner": "team-a" }),
    )]);
    let ctx = ReconciliationContext::default();
    let desired = vec![topic("orders", json!({ "partitions": 12, "configs": { "retention.ms": "2000" } }))];
    let out = reconciler(&backend, &ctx.configuration).reconcile(desired, ReconciliationMode::Update, &ctx).await.unwrap();
    assert_eq!(out[0].status, ChangeStatus::Changed);
    assert_eq!(out[0].description, "UPDATE KafkaTopic 'orders' (configs.retention.ms:UPDATE, partitions:UPDATE)");
    let stored = backend.get(&kinds::topic(), "orders").unwrap();
    assert_eq!(
        stored.spec,
        json!({ "partitions": 12, "replicas": 3, "configs": { "retention.ms": "2000", "segment.bytes": "1024" }, "owner": "team-a" })
    );
}

#[tokio::test]
async fn orphans_are_deleted_only_when_asked() {
    let backend = MemoryBackend::with_resources([topic("orders", json!({})), topic("legacy", json!({})), acl("bob", "User:bob", "write")]);
    let desired = vec![topic("orders", json!({}))];

    let ctx = ReconciliationContext::default();
    let out = reconciler(&backend, &ctx.configuration).reconcile(desired.clone(), ReconciliationMode::Full, &ctx).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(backend.current().len(), 3);

    // ACL entries are only collected for kinds present in the desired state.
    let ctx = ReconciliationContext::new(Configuration::empty().with("delete-orphans", true));
    let out = reconciler(&backend, &ctx.configuration).reconcile(desired, ReconciliationMode::Full, &ctx).await.unwrap();
    let legacy = out.iter().find(|c| c.key == "legacy").unwrap();
    assert_eq!(legacy.change_type(), Some(ChangeType::Delete));
    assert_eq!(legacy.status, ChangeStatus::Changed);
    assert!(backend.get(&kinds::topic(), "legacy").is_none());
    assert!(backend.get(&kinds::acl_entry(), "bob").is_some());
}

#[tokio::test]
async fn acl_bindings_are_added_and_deleted_whole() {
    let backend = MemoryBackend::with_resources([acl("alice-read", "User:alice", "read")]);
    let mut revoked = acl("alice-read", "User:alice", "read");
    revoked.metadata = revoked.metadata.with_annotation(annotations::DELETE, true);
    let desired = vec![revoked, acl("alice-write", "User:alice", "write")];
    let ctx = ReconciliationContext::default();
    let out = reconciler(&backend, &ctx.configuration).reconcile(desired, ReconciliationMode::Full, &ctx).await.unwrap();
    let types: Vec<(String, Option<ChangeType>)> = out.iter().map(|c| (c.key.clone(), c.change_type())).collect();
    assert_eq!(
        types,
        vec![
            ("User:alice|TOPIC:orders|read".to_string(), Some(ChangeType::Delete)),
            ("User:alice|TOPIC:orders|write".to_string(), Some(ChangeType::Add)),
        ]
    );
    let names: Vec<String> = backend.list(&kinds::acl_entry()).iter().map(|r| r.name().to_string()).collect();
    assert_eq!(names, vec!["alice-write"]);
}

#[tokio::test]
async fn topic_policies_apply_before_diffing() {
    let backend = MemoryBackend::new();
    let ctx = ReconciliationContext::new(
        Configuration::empty()
            .with(keys::TOPIC_MAX_REPLICATION_FACTOR, 3)
            .with(keys::TOPIC_MIN_REPLICATION_FACTOR, 2)
            .with(keys::TOPIC_NAME_REGEX, "[a-z]+"),
    );
    let desired = vec![
        topic("small", json!({ "partitions": 1, "replicas": 1 })),
        topic("huge", json!({ "partitions": 1, "replicas": 5 })),
        topic("Bad_Name", json!({ "partitions": 1 })),
    ];
    let out = reconciler(&backend, &ctx.configuration).reconcile(desired, ReconciliationMode::Full, &ctx).await.unwrap();
    let failed: Vec<&str> = out.iter().filter(|c| c.is_failed()).map(|c| c.key.as_str()).collect();
    assert_eq!(failed, vec!["huge", "Bad_Name"]);
    assert_eq!(backend.current().len(), 1);
    assert_eq!(backend.get(&kinds::topic(), "small").and_then(|r| r.spec_value("replicas").cloned()), Some(json!(2)));
}

#[tokio::test]
async fn missing_validation_config_aborts() {
    let backend = MemoryBackend::new();
    // Registered because the key is present, then configured with an unusable value.
    let cfg = Configuration::empty().with(keys::TOPIC_MAX_REPLICATION_FACTOR, "many");
    let ctx = ReconciliationContext::new(cfg.clone());
    let err = reconciler(&backend, &cfg)
        .reconcile(vec![topic("t", json!({}))], ReconciliationMode::Full, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Config(_)));
    assert!(backend.current().is_empty());
}

#[tokio::test]
async fn ignored_and_unselected_resources_are_left_alone() {
    let backend = MemoryBackend::new();
    let ignored = Resource::new(&kinds::topic(), ObjectMeta::named("scratch").with_annotation(annotations::IGNORE, true), json!({}));
    let desired = vec![
        ignored,
        Resource::new(&kinds::topic(), ObjectMeta::named("prod-orders").with_label("env", "prod"), json!({})),
        Resource::new(&kinds::topic(), ObjectMeta::named("dev-orders").with_label("env", "dev"), json!({})),
    ];
    let ctx = ReconciliationContext::default().with_selector(AggregateSelector::parse_all(["metadata.labels.env IN (prod)"]).unwrap());
    let out = reconciler(&backend, &ctx.configuration).reconcile(desired, ReconciliationMode::Full, &ctx).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].key, "prod-orders");
    assert_eq!(backend.list(&kinds::topic()).len(), 1);
}

#[tokio::test]
async fn state_survives_a_save_and_load() {
    let backend = MemoryBackend::new();
    let ctx = ReconciliationContext::default();
    reconciler(&backend, &ctx.configuration).reconcile(desired_state(), ReconciliationMode::Full, &ctx).await.unwrap();

    let path = std::env::temp_dir().join(format!("kspec-state-{}.yaml", std::process::id()));
    backend.save(&path).unwrap();
    let reloaded = MemoryBackend::load(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(reloaded.current().all(), backend.current().all());
    assert_eq!(snapshot::parse_documents(&snapshot::render_documents(&reloaded.current().all()).unwrap()).unwrap().len(), 4);

    let plan = reconciler(&reloaded, &ctx.configuration).plan(desired_state(), &ctx).await.unwrap();
    assert!(plan.iter().all(|c| c.status == ChangeStatus::Ok));
}
