//!  Branch, tag and HEAD management.
//!
//!  refs are small text files holding a commit id. This module handles:
//! - HEAD, attached (`ref: refs/heads/<branch>`) or detached (raw commit id)
//! - branch lifecycle (create, move, delete, list)
//! - tag lifecycle (create, delete, list)
//!
//! A branch file may be empty: the branch exists but has no commits yet.
//! Names may be nested (`feature/roads`), which maps onto subdirectories.

use std::path::Path;

use tracing::{debug, warn};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::layout::{atomic_write, list_ref_names, prune_empty_dirs, read_text, remove_file, Layout};
use crate::storage::types::{BranchName, CommitId, Head, TagName};

/// prefix of an attached HEAD
const HEAD_REF_PREFIX: &str = "ref: refs/heads/";

/// Manages refs (HEAD, branches, tags).
pub struct RefManager;

impl RefManager {
    /// Read where HEAD points.
    ///
    /// A bare branch name is accepted as attached when that branch exists.
    pub fn read_head(layout: &Layout) -> StorageResult<Head> {
        let path = layout.head();
        let text = read_text(&path)?.unwrap_or_default();
        let text = text.trim();

        if text.is_empty() {
            return Err(StorageError::CorruptedData {
                path,
                reason: "HEAD is empty".to_string(),
            });
        }

        if let Some(name) = text.strip_prefix(HEAD_REF_PREFIX) {
            return Ok(Head::Attached(BranchName::new(name)?));
        }

        if let Ok(branch) = BranchName::new(text) {
            if Self::branch_exists(layout, &branch) {
                return Ok(Head::Attached(branch));
            }
        }

        let id = CommitId::new(text).map_err(|e| StorageError::CorruptedData {
            path,
            reason: format!("HEAD is neither a ref nor a commit id: {}", e),
        })?;
        Ok(Head::Detached(id))
    }

    /// Attach HEAD to a branch.
    pub fn set_head_attached(layout: &Layout, branch: &BranchName) -> StorageResult<()> {
        atomic_write(&layout.head(), format!("{}{}", HEAD_REF_PREFIX, branch).as_bytes())?;
        debug!(branch = %branch, "HEAD attached");
        Ok(())
    }

    /// Detach HEAD at a commit.
    pub fn set_head_detached(layout: &Layout, commit: &CommitId) -> StorageResult<()> {
        atomic_write(&layout.head(), commit.as_str().as_bytes())?;
        debug!(commit = %commit, "HEAD detached");
        Ok(())
    }

    /// Check if a branch exists.
    pub fn branch_exists(layout: &Layout, branch: &BranchName) -> bool {
        layout.branch(branch).is_file()
    }

    /// Resolve a branch to its commit; None if the branch has no commits yet.
    pub fn resolve_branch(layout: &Layout, branch: &BranchName) -> StorageResult<Option<CommitId>> {
        let path = layout.branch(branch);
        let text = read_text(&path)?.ok_or_else(|| StorageError::BranchNotFound(branch.to_string()))?;
        parse_target(&text, &path)
    }

    /// Create a new branch pointing to `target` (or to nothing).
    pub fn create_branch(layout: &Layout, branch: &BranchName, target: Option<&CommitId>) -> StorageResult<()> {
        if Self::branch_exists(layout, branch) {
            return Err(StorageError::BranchAlreadyExists(branch.to_string()));
        }
        check_ref_collision(&layout.heads(), branch.as_str())?;
        let text = target.map(CommitId::as_str).unwrap_or_default();
        atomic_write(&layout.branch(branch), text.as_bytes())?;
        debug!(branch = %branch, target = ?target, "created branch");
        Ok(())
    }

    /// Point a branch at a commit, creating it if needed.
    pub fn update_branch(layout: &Layout, branch: &BranchName, target: &CommitId) -> StorageResult<()> {
        atomic_write(&layout.branch(branch), target.as_str().as_bytes())?;
        debug!(branch = %branch, target = %target, "moved branch");
        Ok(())
    }

    /// Delete a branch ref. Commits are never touched.
    pub fn delete_branch(layout: &Layout, branch: &BranchName) -> StorageResult<()> {
        let path = layout.branch(branch);
        if !remove_file(&path)? {
            return Err(StorageError::BranchNotFound(branch.to_string()));
        }
        prune_empty_dirs(&path, &layout.heads());
        debug!(branch = %branch, "deleted branch");
        Ok(())
    }

    /// List all branches, sorted by name.
    pub fn list_branches(layout: &Layout) -> StorageResult<Vec<BranchName>> {
        Ok(list_ref_names(&layout.heads())?
            .into_iter()
            .filter_map(|name| match BranchName::new(name.as_str()) {
                Ok(branch) => Some(branch),
                Err(e) => {
                    warn!(name = %name, error = %e, "skipping unreadable branch ref");
                    None
                }
            })
            .collect())
    }

    /// Check if a tag exists.
    pub fn tag_exists(layout: &Layout, tag: &TagName) -> bool {
        layout.tag(tag).is_file()
    }

    /// Resolve a tag; None if it does not exist.
    pub fn resolve_tag(layout: &Layout, tag: &TagName) -> StorageResult<Option<CommitId>> {
        let path = layout.tag(tag);
        match read_text(&path)? {
            Some(text) => parse_target(&text, &path),
            None => Ok(None),
        }
    }

    /// Create a tag. Tags never move once created.
    pub fn create_tag(layout: &Layout, tag: &TagName, target: &CommitId) -> StorageResult<()> {
        if Self::tag_exists(layout, tag) {
            return Err(StorageError::TagAlreadyExists(tag.to_string()));
        }
        check_ref_collision(&layout.tags(), tag.as_str())?;
        atomic_write(&layout.tag(tag), target.as_str().as_bytes())?;
        debug!(tag = %tag, target = %target, "created tag");
        Ok(())
    }

    /// Delete a tag.
    pub fn delete_tag(layout: &Layout, tag: &TagName) -> StorageResult<()> {
        let path = layout.tag(tag);
        if !remove_file(&path)? {
            return Err(StorageError::TagNotFound(tag.to_string()));
        }
        prune_empty_dirs(&path, &layout.tags());
        debug!(tag = %tag, "deleted tag");
        Ok(())
    }

    /// List all tags, sorted by name.
    pub fn list_tags(layout: &Layout) -> StorageResult<Vec<TagName>> {
        Ok(list_ref_names(&layout.tags())?
            .into_iter()
            .filter_map(|name| match TagName::new(name.as_str()) {
                Ok(tag) => Some(tag),
                Err(e) => {
                    warn!(name = %name, error = %e, "skipping unreadable tag ref");
                    None
                }
            })
            .collect())
    }
}

/// refuse a name whose path crosses an existing ref file, or that names a
/// directory of nested refs
fn check_ref_collision(root: &Path, name: &str) -> StorageResult<()> {
    let conflict = |existing: String| StorageError::RefNameConflict {
        name: name.to_string(),
        existing,
    };

    let mut prefix = String::new();
    let mut parts = name.split('/').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            break;
        }
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        if root.join(&prefix).is_file() {
            return Err(conflict(prefix));
        }
    }

    let path = root.join(name);
    if path.is_dir() {
        let existing = list_ref_names(&path)?
            .into_iter()
            .next()
            .map(|nested| format!("{}/{}", name, nested))
            .unwrap_or_else(|| format!("{}/", name));
        return Err(conflict(existing));
    }
    Ok(())
}

/// parse the contents of a ref file
fn parse_target(text: &str, path: &Path) -> StorageResult<Option<CommitId>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    CommitId::new(text)
        .map(Some)
        .map_err(|e| StorageError::CorruptedData {
            path: path.to_path_buf(),
            reason: format!("invalid commit id in ref: {}", e),
        })
}
