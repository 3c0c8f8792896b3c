//! Error types for the model layer.

use thiserror::Error;

use crate::EntityType;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while loading schemas or checking entities against them.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// No schema is registered for the entity type.
    #[error("can't find \"{0}\" entity schema")]
    Missing(EntityType),

    /// The schema document itself is malformed.
    #[error("invalid \"{entity_type}\" schema: {reason}")]
    Invalid {
        entity_type: EntityType,
        reason: String,
    },

    /// An entity does not conform to its schema.
    #[error("invalid {entity_type}: {reason}")]
    InvalidEntity {
        entity_type: EntityType,
        reason: String,
    },

    /// A string does not name a known entity type.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// A JSON value that should be an object is not one.
    #[error("entity must be a JSON object, got: {0}")]
    NotAnObject(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error while reading schema files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
