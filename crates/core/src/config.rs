//! Configuration bag handed to extensions and to the controller.
//!
//! Keys are kebab-case (`delete-orphans`). Values are JSON so YAML/JSON documents and
//! environment overrides land in the same shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::ConfigError;

pub const DELETE_ORPHANS: &str = "delete-orphans";
pub const CONFIG_DELETE_ORPHANS: &str = "config-delete-orphans";
pub const APPLY_CONCURRENCY: &str = "apply-concurrency";

pub const DEFAULT_APPLY_CONCURRENCY: u64 = 8;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    props: Map<String, Json>,
}

impl Configuration {
    pub fn empty() -> Self { Self::default() }

    pub fn from_map(props: Map<String, Json>) -> Self { Self { props } }

    /// Lift `PREFIX_SOME_KEY=value` environment variables into `some-key` properties.
    /// Values parse as JSON when possible (`true`, `3`), otherwise stay strings.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    pub fn from_vars<I: IntoIterator<Item = (String, String)>>(prefix: &str, vars: I) -> Self {
        let head = format!("{}_", prefix);
        let mut props = Map::new();
        for (k, v) in vars {
            let Some(rest) = k.strip_prefix(&head) else { continue };
            if rest.is_empty() { continue; }
            let key = rest.to_ascii_lowercase().replace('_', "-");
            let value = serde_json::from_str::<Json>(&v).unwrap_or(Json::String(v));
            props.insert(key, value);
        }
        Self { props }
    }

    pub fn with(mut self, key: &str, value: impl Into<Json>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    /// Properties of `other` win over ours.
    pub fn merge(&self, other: &Configuration) -> Configuration {
        let mut props = self.props.clone();
        for (k, v) in other.props.iter() { props.insert(k.clone(), v.clone()); }
        Self { props }
    }

    pub fn get(&self, key: &str) -> Option<&Json> { self.props.get(key) }

    pub fn contains(&self, key: &str) -> bool { self.props.contains_key(key) }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.props.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::Bool(b)) => Ok(Some(*b)),
            Some(Json::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(ConfigError::invalid(key, format!("expected a boolean, got '{}'", s))),
            },
            Some(other) => Err(ConfigError::invalid(key, format!("expected a boolean, got {}", other))),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.props.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| ConfigError::invalid(key, format!("expected a non-negative integer, got {}", n))),
            Some(Json::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| ConfigError::invalid(key, format!("expected a non-negative integer, got '{}'", s))),
            Some(other) => Err(ConfigError::invalid(key, format!("expected an integer, got {}", other))),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(|v| v.as_str())
    }

    /// Accepts a JSON array of strings or a comma separated string.
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.props.get(key) {
            Some(Json::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            Some(Json::String(s)) => s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn delete_orphans(&self) -> Result<bool, ConfigError> {
        Ok(self.get_bool(DELETE_ORPHANS)?.unwrap_or(false))
    }

    pub fn apply_concurrency(&self) -> Result<usize, ConfigError> {
        let n = self.get_u64(APPLY_CONCURRENCY)?.unwrap_or(DEFAULT_APPLY_CONCURRENCY);
        Ok((n as usize).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_vars_become_kebab_case_props() {
        let vars = vec![
            ("KSPEC_DELETE_ORPHANS".to_string(), "true".to_string()),
            ("KSPEC_APPLY_CONCURRENCY".to_string(), "4".to_string()),
            ("KSPEC_TOPIC_NAME_REGEX".to_string(), "^[a-z]+$".to_string()),
            ("OTHER_DELETE_ORPHANS".to_string(), "false".to_string()),
        ];
        let cfg = Configuration::from_vars("KSPEC", vars);
        assert!(cfg.delete_orphans().unwrap());
        assert_eq!(cfg.apply_concurrency().unwrap(), 4);
        assert_eq!(cfg.get_str("topic-name-regex"), Some("^[a-z]+$"));
    }

    #[test]
    fn typed_getters_reject_garbage() {
        let cfg = Configuration::empty().with(DELETE_ORPHANS, "maybe").with(APPLY_CONCURRENCY, -1);
        assert!(matches!(cfg.delete_orphans(), Err(ConfigError::Invalid { .. })));
        assert!(cfg.apply_concurrency().is_err());
    }

    #[test]
    fn merge_prefers_other_and_defaults_apply() {
        let base = Configuration::empty().with(DELETE_ORPHANS, false).with("x", "a");
        let over = Configuration::empty().with(DELETE_ORPHANS, true);
        let merged = base.merge(&over);
        assert!(merged.delete_orphans().unwrap());
        assert_eq!(merged.get_str("x"), Some("a"));
        assert_eq!(Configuration::empty().apply_concurrency().unwrap(), 8);
        assert_eq!(
            Configuration::empty().with("clusters", "a, b,,c").get_string_list("clusters"),
            vec!["a", "b", "c"]
        );
    }
}
