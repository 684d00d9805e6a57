//! Kafka resource kinds for kspec.
//!
//! Every kind lives under the `kafka.kspec.io/v1` API version. Topics and ACL entries
//! have dedicated change computers; the remaining kinds are diffed by their `spec` keys.

#![forbid(unsafe_code)]

use kspec_change::{compute_resource_changes, ChangeError, ChangeOptions};
use kspec_core::{Configuration, Resource, ResourceChange, ResourceType};
use kspec_extension::{ExtensionDescriptor, ExtensionRegistry, RegistryError};
use kspec_reconcile::{Transformation, Validation};
use tracing::debug;

pub mod acl;
pub mod topic;
pub mod transform;
pub mod validation;

pub use transform::TopicMinReplicasTransformation;
pub use validation::{
    AclEntryValidation, TopicMaxReplicationFactorValidation, TopicNameRegexValidation, TopicPartitionsValidation,
};

pub const API_VERSION: &str = "kafka.kspec.io/v1";

/// Configuration keys read by the Kafka extensions.
pub mod keys {
    pub const TOPIC_MAX_REPLICATION_FACTOR: &str = "topic-max-replication-factor";
    pub const TOPIC_MIN_REPLICATION_FACTOR: &str = "topic-min-replication-factor";
    pub const TOPIC_NAME_REGEX: &str = "topic-name-regex";
}

pub mod kinds {
    use super::API_VERSION;
    use kspec_core::ResourceType;

    pub const TOPIC: &str = "KafkaTopic";
    pub const ACL_ENTRY: &str = "KafkaAclEntry";
    pub const CLIENT_QUOTA: &str = "KafkaClientQuota";
    pub const CONNECTOR: &str = "KafkaConnector";
    pub const SCHEMA_SUBJECT: &str = "SchemaRegistrySubject";

    pub fn topic() -> ResourceType { ResourceType::new(TOPIC, API_VERSION) }
    pub fn acl_entry() -> ResourceType { ResourceType::new(ACL_ENTRY, API_VERSION) }
    pub fn client_quota() -> ResourceType { ResourceType::new(CLIENT_QUOTA, API_VERSION) }
    pub fn connector() -> ResourceType { ResourceType::new(CONNECTOR, API_VERSION) }
    pub fn schema_subject() -> ResourceType { ResourceType::new(SCHEMA_SUBJECT, API_VERSION) }

    /// Every kind this crate knows about.
    pub fn all() -> Vec<ResourceType> {
        vec![topic(), acl_entry(), client_quota(), connector(), schema_subject()]
    }
}

/// Diff one kind's batch with the computer that fits it.
pub fn compute_changes(
    rt: &ResourceType,
    actual: Vec<Resource>,
    desired: Vec<Resource>,
    opts: &ChangeOptions,
) -> Result<Vec<ResourceChange>, ChangeError> {
    if rt.api_version != API_VERSION {
        return compute_resource_changes(actual, desired, opts);
    }
    match rt.kind.as_str() {
        kinds::TOPIC => topic::compute_topic_changes(actual, desired, opts),
        kinds::ACL_ENTRY => acl::compute_acl_changes(actual, desired, opts),
        _ => compute_resource_changes(actual, desired, opts),
    }
}

/// Register the topic and ACL validations and the topic transformations.
///
/// Extensions that need a configuration key are only registered when `cfg` carries it;
/// once registered, configuring them without the key is an error.
pub fn register_extensions(registry: &mut ExtensionRegistry, cfg: &Configuration) -> Result<(), RegistryError> {
    let topic = kinds::topic();
    registry.register(
        ExtensionDescriptor::<dyn Validation>::new("topic-partitions", || {
            Box::new(TopicPartitionsValidation) as Box<dyn Validation>
        })
        .for_type(topic.clone()),
    )?;
    registry.register(
        ExtensionDescriptor::<dyn Validation>::new("acl-entry", || Box::new(AclEntryValidation) as Box<dyn Validation>)
            .for_type(kinds::acl_entry()),
    )?;
    if cfg.contains(keys::TOPIC_MAX_REPLICATION_FACTOR) {
        registry.register(
            ExtensionDescriptor::<dyn Validation>::new("topic-max-replication-factor", || {
                Box::new(TopicMaxReplicationFactorValidation::default()) as Box<dyn Validation>
            })
            .for_type(topic.clone()),
        )?;
    }
    if cfg.contains(keys::TOPIC_NAME_REGEX) {
        registry.register(
            ExtensionDescriptor::<dyn Validation>::new("topic-name-regex", || {
                Box::new(TopicNameRegexValidation::default()) as Box<dyn Validation>
            })
            .for_type(topic.clone()),
        )?;
    }
    if cfg.contains(keys::TOPIC_MIN_REPLICATION_FACTOR) {
        registry.register(
            ExtensionDescriptor::<dyn Transformation>::new("topic-min-replicas", || {
                Box::new(TopicMinReplicasTransformation::default()) as Box<dyn Transformation>
            })
            .for_type(topic),
        )?;
    }
    debug!(validations = registry.descriptors::<dyn Validation>().len(), "kafka: extensions registered");
    Ok(())
}
