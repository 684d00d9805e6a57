use thiserror::Error;

/// Malformed or missing extension configuration. Fatal before any reconciliation step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration property '{key}' for {extension}")]
    Missing { key: String, extension: String },
    #[error("invalid value for configuration property '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub fn missing(key: &str, extension: &str) -> Self {
        Self::Missing { key: key.to_string(), extension: extension.to_string() }
    }

    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid { key: key.to_string(), reason: reason.into() }
    }
}

/// A desired-state resource was rejected by a validation. Scoped to that resource.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("validation '{validation}' failed for '{resource}': {message}")]
pub struct ValidationError {
    pub validation: String,
    pub resource: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(validation: &str, resource: &str, message: impl Into<String>) -> Self {
        Self { validation: validation.to_string(), resource: resource.to_string(), message: message.into() }
    }
}
