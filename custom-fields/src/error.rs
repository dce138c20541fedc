//! Error types for custom field operations

use thiserror::Error;

use crate::config::ConfigError;
use crate::owner::OwnerRef;
use crate::types::FieldId;

/// Result type for custom field operations
pub type Result<T> = std::result::Result<T, FieldsError>;

/// Errors that can occur in custom field operations.
///
/// Value-level validation failures are not errors; they come back as a
/// [`ValidationReport`](crate::validation::ValidationReport).
#[derive(Debug, Error)]
pub enum FieldsError {
    /// A field id could not be resolved within the owner's field set
    #[error("field {field_id} does not belong to {owner}")]
    FieldDoesNotBelongToModel { field_id: FieldId, owner: OwnerRef },

    /// A reorder batch did not name every field in the scope exactly once
    #[error("wrong number of fields for ordering: expected {expected}, got {actual}")]
    WrongNumberOfFieldsForOrdering { expected: usize, actual: usize },

    /// A reorder batch named the same field twice
    #[error("field {field_id} appears more than once in the ordering")]
    DuplicateFieldInOrdering { field_id: FieldId },

    /// Field not found by id
    #[error("field not found: {id}")]
    FieldNotFound { id: FieldId },

    /// Field type name outside the supported set
    #[error("unknown field type: {name}")]
    UnknownFieldType { name: String },

    /// Field definition is malformed
    #[error("invalid field definition: {message}")]
    InvalidDefinition { message: String },

    /// Field type cannot change once responses exist
    #[error("field {id} has responses; its type cannot change")]
    TypeLocked { id: FieldId },

    /// No loader registered for the owner kind
    #[error("unknown owner kind: {kind}")]
    UnknownOwnerKind { kind: String },

    /// The loader for the owner kind could not find the owner
    #[error("owner not found: {owner}")]
    OwnerNotFound { owner: OwnerRef },

    /// Persistence layer failure
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl FieldsError {
    /// Create an invalid definition error
    pub fn invalid_definition(message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            message: message.into(),
        }
    }

    /// Wrap a persistence-layer error
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }

    /// Whether this error rejected a reorder request before anything was written
    pub fn is_ordering_error(&self) -> bool {
        matches!(
            self,
            Self::WrongNumberOfFieldsForOrdering { .. }
                | Self::DuplicateFieldInOrdering { .. }
                | Self::FieldDoesNotBelongToModel { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FieldsError::FieldNotFound { id: FieldId::new(7) };
        assert_eq!(err.to_string(), "field not found: 7");
    }

    #[test]
    fn test_does_not_belong_names_owner() {
        let err = FieldsError::FieldDoesNotBelongToModel {
            field_id: FieldId::new(3),
            owner: OwnerRef::new("survey", "12"),
        };
        assert_eq!(err.to_string(), "field 3 does not belong to survey#12");
        assert!(err.is_ordering_error());
    }

    #[test]
    fn test_wrong_number_of_fields() {
        let err = FieldsError::WrongNumberOfFieldsForOrdering {
            expected: 3,
            actual: 2,
        };
        assert!(err.to_string().contains("expected 3"));
        assert!(err.to_string().contains("got 2"));
    }

    #[test]
    fn test_storage_helper() {
        let err = FieldsError::storage("disk full");
        assert!(!err.is_ordering_error());
        assert_eq!(err.to_string(), "storage error: disk full");
    }
}
