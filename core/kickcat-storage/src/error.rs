//! Error types for the storage layer.

use kickcat_model::{EntityType, SchemaError};
use std::path::PathBuf;
use thiserror::Error;

use crate::{EntryId, EntryState};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Schema missing or entity not conforming to it.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A mutation was attempted in a state that forbids it.
    #[error("an entry in state \"{state}\" can't be {operation}")]
    InvalidStateTransition {
        state: EntryState,
        operation: &'static str,
    },

    /// The property is not declared as a reference.
    #[error("property \"{property}\" of {entity_type} is not a reference")]
    NotAReference {
        entity_type: EntityType,
        property: String,
    },

    /// Removing a reference would leave a required property unset.
    #[error("required reference \"{property}\" of {entity_type} can't be removed")]
    RequiredReference {
        entity_type: EntityType,
        property: String,
    },

    /// No entry with this id in the registry.
    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
