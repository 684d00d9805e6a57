use serde_json::{json, Value as Json};
use tracing::debug;

use kspec_change::fields::NO_PREFERENCE;
use kspec_core::{ConfigError, Configuration, Resource};
use kspec_reconcile::{ReconciliationContext, Transformation};

use crate::keys;
use crate::topic::REPLICAS;

/// Raises `replicas` to `topic-min-replication-factor`. Topics without a replica count,
/// or with the `-1` sentinel, are left to the broker default.
#[derive(Debug, Default, Clone)]
pub struct TopicMinReplicasTransformation {
    min: Option<i64>,
}

impl TopicMinReplicasTransformation {
    pub fn new(min: i64) -> Self { Self { min: Some(min) } }
}

impl Transformation for TopicMinReplicasTransformation {
    fn name(&self) -> &str { "topic-min-replicas" }

    fn configure(&mut self, cfg: &Configuration) -> Result<(), ConfigError> {
        let min = cfg
            .get_u64(keys::TOPIC_MIN_REPLICATION_FACTOR)?
            .ok_or_else(|| ConfigError::missing(keys::TOPIC_MIN_REPLICATION_FACTOR, self.name()))?;
        self.min = Some(min as i64);
        Ok(())
    }

    fn transform(&self, mut resource: Resource, _ctx: &ReconciliationContext) -> Option<Resource> {
        let (Some(min), Some(current)) = (self.min, resource.spec.get(REPLICAS).and_then(Json::as_i64)) else {
            return Some(resource);
        };
        if current != NO_PREFERENCE && current < min {
            debug!(topic = %resource.name(), from = current, to = min, "kafka: raising replicas");
            if let Some(spec) = resource.spec.as_object_mut() { spec.insert(REPLICAS.to_string(), json!(min)); }
        }
        Some(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds;
    use kspec_core::ObjectMeta;

    fn replicas_after(t: &TopicMinReplicasTransformation, spec: Json) -> Option<Json> {
        let r = Resource::new(&kinds::topic(), ObjectMeta::named("t"), spec);
        t.transform(r, &ReconciliationContext::default()).and_then(|r| r.spec.get(REPLICAS).cloned())
    }

    #[test]
    fn raises_only_low_explicit_counts() {
        let mut t = TopicMinReplicasTransformation::default();
        t.configure(&Configuration::empty().with(keys::TOPIC_MIN_REPLICATION_FACTOR, 3)).unwrap();
        assert_eq!(replicas_after(&t, json!({ "replicas": 6 })), Some(json!(6)));
        assert_eq!(replicas_after(&t, json!({ "replicas": 1 })), Some(json!(3)));
        assert_eq!(replicas_after(&t, json!({ "replicas": -1 })), Some(json!(-1)));
        assert_eq!(replicas_after(&t, json!({ "partitions": 1 })), None);
    }

    #[test]
    fn requires_configuration() {
        let mut t = TopicMinReplicasTransformation::default();
        assert!(matches!(t.configure(&Configuration::empty()), Err(ConfigError::Missing { .. })));
        assert_eq!(replicas_after(&TopicMinReplicasTransformation::new(2), json!({ "replicas": 1 })), Some(json!(2)));
    }
}
