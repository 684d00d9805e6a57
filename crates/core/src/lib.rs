//! kspec core types: the resource model every reconcilable entity satisfies,
//! the change data model produced by diffing, and the configuration bag handed
//! to extensions.

#![forbid(unsafe_code)]

pub mod change;
pub mod config;
pub mod error;
pub mod model;

pub use change::{Change, ChangeType, FieldChange, FieldChanges, ResourceChange, ValueChange};
pub use config::Configuration;
pub use error::{ConfigError, ValidationError};
pub use model::{annotations, ObjectMeta, Resource, ResourceType};

pub mod prelude {
    pub use super::{
        Change, ChangeType, ConfigError, Configuration, FieldChange, FieldChanges, ObjectMeta, Resource,
        ResourceChange, ResourceType, ValidationError, ValueChange,
    };
}
