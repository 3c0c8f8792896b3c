//! Error types for the sync layer.

use kickcat_model::EntityType;
use kickcat_storage::StorageError;
use serde_json::Value;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Storage or schema error from either side.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The entity to pull does not exist remotely.
    #[error("can't find {entity_type} with {key} equal to {value} in the remote storage")]
    NotFound {
        entity_type: EntityType,
        key: String,
        value: Value,
    },
}

impl From<kickcat_model::SchemaError> for SyncError {
    fn from(err: kickcat_model::SchemaError) -> Self {
        SyncError::Storage(StorageError::Schema(err))
    }
}
