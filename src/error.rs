//! Error types for bucket quota enforcement

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::ports::ObjectDeleteError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while measuring or reclaiming storage
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Object Store Errors
    // =========================================================================
    /// Transport, auth or backing-store failure. Propagated, never retried here.
    #[error("Object store unavailable: {0}")]
    ObjectStoreUnavailable(String),

    /// Bucket does not exist
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// Object does not exist
    #[error("Object not found: {bucket}/{object}")]
    ObjectNotFound { bucket: String, object: String },

    /// Bucket still holds objects
    #[error("Bucket not empty: {0}")]
    BucketNotEmpty(String),

    /// Bucket already exists
    #[error("Bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// Bucket or object name rejected by the store
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    // =========================================================================
    // Transfer Errors
    // =========================================================================
    /// Upload source is missing or not a regular file
    #[error("Can't upload {}: not present or not a file", path.display())]
    SourceFileMissing { path: PathBuf },

    // =========================================================================
    // Reclamation Errors
    // =========================================================================
    /// Some objects of a bucket could not be removed
    #[error("Failed to remove {} object(s) from bucket {bucket}", failures.len())]
    PartialDeleteFailure {
        bucket: String,
        failures: Vec<ObjectDeleteError>,
    },

    /// Remove-objects-then-remove-bucket sequence failed partway
    #[error("Failed to delete bucket {bucket}: {reason}")]
    BucketDeleteFailure { bucket: String, reason: String },

    /// Aggregation could not measure every bucket
    #[error("Storage statistics incomplete: {failed} bucket(s) could not be measured ({})", buckets.join(", "))]
    IncompleteStats { failed: usize, buckets: Vec<String> },

    // =========================================================================
    // General Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error means the target simply is not there.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::BucketNotFound(_) | Error::ObjectNotFound { .. }
        )
    }
}
