use lumen_core::{ObjectId, PropertyKey};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReactiveError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    #[error("{instance} is not a valid vm (accessing field \"{field}\")")]
    InvalidVm { instance: String, field: String },

    #[error("field \"{field}\" is not configurable")]
    NotConfigurable { field: String },

    #[error("\"{field}\" is not an observed field")]
    UnknownField { field: String },
}

impl ReactiveError {
    #[must_use]
    pub fn invalid_vm(instance: ObjectId, field: &PropertyKey) -> Self {
        Self::InvalidVm {
            instance: instance.to_string(),
            field: field.to_string(),
        }
    }

    #[must_use]
    pub fn not_configurable(field: &PropertyKey) -> Self {
        Self::NotConfigurable {
            field: field.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::UnknownField {
            field: field.into(),
        }
    }
}
