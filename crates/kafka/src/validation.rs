//! Topic and ACL validations.

use regex::Regex;
use serde_json::Value as Json;

use kspec_change::fields::NO_PREFERENCE;
use kspec_core::{ConfigError, Configuration, Resource, ValidationError};
use kspec_reconcile::Validation;

use crate::acl::AclKey;
use crate::keys;
use crate::topic::{PARTITIONS, REPLICAS};

/// A count field must be absent, `null`, `-1` or a positive integer.
fn check_count(validation: &str, r: &Resource, field: &str) -> Result<Option<i64>, ValidationError> {
    match r.spec.get(field) {
        None | Some(Json::Null) => Ok(None),
        Some(v) => match v.as_i64() {
            Some(NO_PREFERENCE) => Ok(None),
            Some(n) if n > 0 => Ok(Some(n)),
            _ => Err(ValidationError::new(validation, r.name(), format!("'{}' must be a positive integer or -1, got {}", field, v))),
        },
    }
}

/// Rejects malformed partition and replica counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopicPartitionsValidation;

impl Validation for TopicPartitionsValidation {
    fn name(&self) -> &str { "topic-partitions" }

    fn validate(&self, r: &Resource) -> Result<(), ValidationError> {
        check_count(self.name(), r, PARTITIONS)?;
        check_count(self.name(), r, REPLICAS)?;
        Ok(())
    }
}

/// Rejects topics whose replication factor exceeds `topic-max-replication-factor`.
#[derive(Debug, Default, Clone)]
pub struct TopicMaxReplicationFactorValidation {
    max: Option<i64>,
}

impl TopicMaxReplicationFactorValidation {
    pub fn new(max: i64) -> Self { Self { max: Some(max) } }
}

impl Validation for TopicMaxReplicationFactorValidation {
    fn name(&self) -> &str { "topic-max-replication-factor" }

    fn configure(&mut self, cfg: &Configuration) -> Result<(), ConfigError> {
        let max = cfg
            .get_u64(keys::TOPIC_MAX_REPLICATION_FACTOR)?
            .ok_or_else(|| ConfigError::missing(keys::TOPIC_MAX_REPLICATION_FACTOR, self.name()))?;
        self.max = Some(max as i64);
        Ok(())
    }

    fn validate(&self, r: &Resource) -> Result<(), ValidationError> {
        let Some(max) = self.max else {
            return Err(ValidationError::new(self.name(), r.name(), "validation used before being configured"));
        };
        match check_count(self.name(), r, REPLICAS)? {
            Some(n) if n > max => Err(ValidationError::new(
                self.name(),
                r.name(),
                format!("replication factor is greater than the maximum allowed: {} > {}", n, max),
            )),
            _ => Ok(()),
        }
    }
}

/// Topic names must fully match at least one of the `topic-name-regex` patterns.
#[derive(Debug, Default, Clone)]
pub struct TopicNameRegexValidation {
    patterns: Vec<Regex>,
}

impl TopicNameRegexValidation {
    pub fn new<I: IntoIterator<Item = S>, S: AsRef<str>>(patterns: I) -> Result<Self, ConfigError> {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Regex::new(&format!("^(?:{})$", p.as_ref()))
                    .map_err(|e| ConfigError::invalid(keys::TOPIC_NAME_REGEX, e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }
}

impl Validation for TopicNameRegexValidation {
    fn name(&self) -> &str { "topic-name-regex" }

    fn configure(&mut self, cfg: &Configuration) -> Result<(), ConfigError> {
        let raw = cfg.get_string_list(keys::TOPIC_NAME_REGEX);
        if raw.is_empty() { return Err(ConfigError::missing(keys::TOPIC_NAME_REGEX, self.name())); }
        *self = Self::new(raw)?;
        Ok(())
    }

    fn validate(&self, r: &Resource) -> Result<(), ValidationError> {
        if self.patterns.iter().any(|p| p.is_match(r.name())) { return Ok(()); }
        let wanted: Vec<&str> = self.patterns.iter().map(Regex::as_str).collect();
        Err(ValidationError::new(self.name(), r.name(), format!("name does not match any of {:?}", wanted)))
    }
}

/// ACL entries need a principal, a resource and a permission.
#[derive(Debug, Default, Clone, Copy)]
pub struct AclEntryValidation;

impl Validation for AclEntryValidation {
    fn name(&self) -> &str { "acl-entry" }

    fn validate(&self, r: &Resource) -> Result<(), ValidationError> {
        if AclKey::of(r).is_complete() { return Ok(()); }
        Err(ValidationError::new(self.name(), r.name(), "principal, resource and permission are required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds;
    use kspec_core::ObjectMeta;
    use serde_json::json;

    fn topic(name: &str, spec: Json) -> Resource { Resource::new(&kinds::topic(), ObjectMeta::named(name), spec) }

    #[test]
    fn counts_must_be_positive_or_sentinel() {
        let v = TopicPartitionsValidation;
        assert!(v.validate(&topic("t", json!({ "partitions": 3, "replicas": -1 }))).is_ok());
        assert!(v.validate(&topic("t", json!({}))).is_ok());
        assert!(v.validate(&topic("t", json!({ "partitions": 0 }))).is_err());
        let err = v.validate(&topic("t", json!({ "replicas": "three" }))).unwrap_err();
        assert_eq!(err.validation, "topic-partitions");
        assert_eq!(err.resource, "t");
    }

    #[test]
    fn max_replication_factor_requires_configuration() {
        let mut v = TopicMaxReplicationFactorValidation::default();
        let err = v.configure(&Configuration::empty()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
        v.configure(&Configuration::empty().with(keys::TOPIC_MAX_REPLICATION_FACTOR, 3)).unwrap();
        assert!(v.validate(&topic("t", json!({ "replicas": 3 }))).is_ok());
        assert!(v.validate(&topic("t", json!({ "replicas": -1 }))).is_ok());
        assert!(v.validate(&topic("t", json!({ "replicas": 4 }))).is_err());
    }

    #[test]
    fn name_regex_is_anchored() {
        let mut v = TopicNameRegexValidation::default();
        assert!(v.configure(&Configuration::empty()).is_err());
        v.configure(&Configuration::empty().with(keys::TOPIC_NAME_REGEX, "[a-z]+-events, audit")).unwrap();
        assert!(v.validate(&topic("orders-events", json!({}))).is_ok());
        assert!(v.validate(&topic("audit", json!({}))).is_ok());
        assert!(v.validate(&topic("audit-log", json!({}))).is_err());
        let bad = Configuration::empty().with(keys::TOPIC_NAME_REGEX, "(");
        assert!(matches!(v.configure(&bad), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn acl_entries_need_every_part() {
        let r = Resource::new(&kinds::acl_entry(), ObjectMeta::named("a"), json!({ "principal": "User:a", "resource": "TOPIC:t" }));
        assert!(AclEntryValidation.validate(&r).is_err());
    }
}
