//! Repository errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::merge::MergeError;
use crate::storage::{InvalidNameError, StorageError};

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Repository errors.
///
/// Merge conflicts are not errors: they come back as
/// [`MergeOutcome::Conflicted`](crate::repo::MergeOutcome::Conflicted).
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("not a gitmap repository: {0}")]
    NotARepository(PathBuf),

    #[error("repository already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("cannot do this in detached HEAD state; check out a branch first")]
    DetachedHead,

    #[error("cannot delete the checked-out branch '{0}'")]
    DeleteCurrentBranch(String),

    #[error("cannot merge branch '{0}' into itself")]
    MergeIntoSelf(String),

    #[error("branch '{0}' has no commits")]
    BranchHasNoCommits(String),

    #[error("repository has no commits")]
    NoCommits,

    #[error("no changes to stash")]
    NothingToStash,

    #[error("invalid stash index {index} (stash has {len} entries)")]
    StashIndexOutOfRange { index: usize, len: usize },

    #[error("{0} unresolved conflict(s) remain")]
    UnresolvedConflicts(usize),

    #[error("merge into '{0}' is stale: the branch moved or is no longer checked out")]
    StaleMerge(String),

    #[error("document must be a json object")]
    InvalidDocument,
}

impl RepoError {
    /// check if this error means something the caller named does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            RepoError::NotARepository(_) => true,
            RepoError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// check if the operation was refused because of the repository state
    pub fn is_precondition(&self) -> bool {
        match self {
            RepoError::AlreadyExists(_)
            | RepoError::DetachedHead
            | RepoError::DeleteCurrentBranch(_)
            | RepoError::MergeIntoSelf(_)
            | RepoError::BranchHasNoCommits(_)
            | RepoError::NoCommits
            | RepoError::NothingToStash
            | RepoError::StashIndexOutOfRange { .. }
            | RepoError::UnresolvedConflicts(_)
            | RepoError::StaleMerge(_)
            | RepoError::InvalidName(_)
            | RepoError::InvalidDocument => true,
            RepoError::Storage(e) => e.is_conflict() || matches!(e, StorageError::Locked { .. }),
            _ => false,
        }
    }
}
