//! Storage layer error types
//!
//! All errors that can occur while reading or writing the `.gitmap` directory
//! are defined here. I/O and JSON failures always carry the path involved.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::InvalidNameError;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// filesystem failure, with the operation that was attempted
    #[error("io error while trying to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// a file held JSON that could not be parsed or produced
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization failed outside of any file
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// a stored document is not a JSON object
    #[error("document at {path} is not a json object")]
    NotAnObject { path: PathBuf },

    /// an identifier or ref name failed validation
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// the specified branch was not found
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// the specified tag was not found
    #[error("tag not found: {0}")]
    TagNotFound(String),

    /// branch already exists
    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// tag already exists
    #[error("tag already exists: {0}")]
    TagAlreadyExists(String),

    /// a new ref would collide with an existing one along its path
    /// (`feature` vs `feature/x`)
    #[error("ref '{name}' collides with existing ref '{existing}'")]
    RefNameConflict { name: String, existing: String },

    /// a stash entry listed in the stack has no file
    #[error("stash entry not found: {0}")]
    StashEntryNotFound(String),

    /// data integrity check failed
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// another writer holds the repository lock
    #[error("repository is locked by another operation ({path})")]
    Locked { path: PathBuf },
}

impl StorageError {
    /// build a closure that wraps an io::Error with its context
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StorageError::Io { op, path, source }
    }

    /// build a closure that wraps a serde_json::Error with its path
    pub(crate) fn json(path: impl Into<PathBuf>) -> impl FnOnce(serde_json::Error) -> Self {
        let path = path.into();
        move |source| StorageError::Json { path, source }
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::CommitNotFound(_)
                | StorageError::BranchNotFound(_)
                | StorageError::TagNotFound(_)
                | StorageError::StashEntryNotFound(_)
        )
    }

    /// check if this error is a name collision
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::BranchAlreadyExists(_)
                | StorageError::TagAlreadyExists(_)
                | StorageError::RefNameConflict { .. }
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
