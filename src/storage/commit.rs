//! Commit creation and history traversal
//!
//! commits are immutable snapshots of the whole document. In gitmap:
//! - every commit carries the full document, never a delta
//! - a commit has at most two parents (`parent2` only for merges)
//! - commits are never rewritten or garbage collected
//!
//! this module handles commit creation, storage, history walking and merge
//! base detection

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::storage::document::Document;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::layout::{read_json, write_json};
use crate::storage::types::CommitId;

/// number of hex characters kept from the content hash
pub const COMMIT_ID_LEN: usize = 12;

/// an immutable snapshot plus lineage metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub message: String,
    pub author: String,
    /// ISO-8601 creation time
    pub timestamp: String,
    #[serde(default)]
    pub parent: Option<CommitId>,
    /// second parent, only set on merge commits
    #[serde(default)]
    pub parent2: Option<CommitId>,
    #[serde(rename = "map_data", alias = "document", default)]
    pub document: Document,
}

impl Commit {
    /// check if this is a merge commit (has two parents)
    pub fn is_merge(&self) -> bool {
        self.parent2.is_some()
    }

    /// check if this commit starts a history
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// all parents, first parent first
    pub fn parents(&self) -> impl Iterator<Item = &CommitId> {
        self.parent.iter().chain(self.parent2.iter())
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }

    /// parse the timestamp; accepts RFC 3339 and naive ISO-8601 (read as UTC)
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// hashed form of a commit; fields are declared in sorted key order
#[derive(Serialize)]
struct CanonicalCommit<'a> {
    author: &'a str,
    map_data: &'a Document,
    message: &'a str,
    parent: Option<&'a CommitId>,
    parent2: Option<&'a CommitId>,
    timestamp: &'a str,
}

/// Derive a commit id from everything the commit records.
///
/// The id is the first 12 hex characters of the SHA-256 of the canonical
/// (key-sorted) JSON of the commit's fields, so identical inputs always give
/// the same id.
pub fn generate_commit_id(
    message: &str,
    author: &str,
    timestamp: &str,
    parent: Option<&CommitId>,
    parent2: Option<&CommitId>,
    document: &Document,
) -> StorageResult<CommitId> {
    let canonical = CanonicalCommit {
        author,
        map_data: document,
        message,
        parent,
        parent2,
        timestamp,
    };
    let bytes = serde_json::to_vec(&canonical)?;
    let digest = hex::encode(Sha256::digest(&bytes));
    Ok(CommitId::from_digest(digest[..COMMIT_ID_LEN].to_string()))
}

/// builder for creating commits with a fluent interface
#[derive(Debug, Clone, Default)]
pub struct CommitBuilder {
    document: Document,
    parent: Option<CommitId>,
    parent2: Option<CommitId>,
    message: String,
    author: String,
    timestamp: Option<DateTime<Utc>>,
}

impl CommitBuilder {
    /// create a new CommitBuilder for a snapshot of `document`
    pub fn new(document: Document) -> Self {
        Self {
            document,
            ..Default::default()
        }
    }

    /// set the first parent (None for a root commit)
    pub fn parent(mut self, parent: Option<CommitId>) -> Self {
        self.parent = parent;
        self
    }

    /// set the second parent (for merge commits)
    pub fn second_parent(mut self, parent: CommitId) -> Self {
        self.parent2 = Some(parent);
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// set the author
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// pin the creation time instead of using the clock
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// stamp the commit and derive its id
    pub fn build(self) -> StorageResult<Commit> {
        let timestamp = self
            .timestamp
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let id = generate_commit_id(
            &self.message,
            &self.author,
            &timestamp,
            self.parent.as_ref(),
            self.parent2.as_ref(),
            &self.document,
        )?;

        Ok(Commit {
            id,
            message: self.message,
            author: self.author,
            timestamp,
            parent: self.parent,
            parent2: self.parent2,
            document: self.document,
        })
    }
}

/// persistent store of commit objects (`objects/commits/<id>.json`)
#[derive(Debug, Clone)]
pub struct CommitStore {
    dir: PathBuf,
}

impl CommitStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, id: &CommitId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// persist a commit; an id that is already stored is left untouched
    pub fn save(&self, commit: &Commit) -> StorageResult<()> {
        let path = self.path(&commit.id);
        if path.exists() {
            debug!(commit = %commit.id, "commit already stored");
            return Ok(());
        }
        write_json(&path, commit)?;
        debug!(commit = %commit.id, parent = ?commit.parent, "stored commit");
        Ok(())
    }

    /// load a commit, None if it is not stored
    pub fn get(&self, id: &CommitId) -> StorageResult<Option<Commit>> {
        let path = self.path(id);
        let Some(commit) = read_json::<Commit>(&path)? else {
            return Ok(None);
        };
        if &commit.id != id {
            return Err(StorageError::CorruptedData {
                path,
                reason: format!("file holds commit {}", commit.id),
            });
        }
        Ok(Some(commit))
    }

    /// load a commit, failing with CommitNotFound if it is not stored
    pub fn load(&self, id: &CommitId) -> StorageResult<Commit> {
        self.get(id)?
            .ok_or_else(|| StorageError::CommitNotFound(id.to_string()))
    }

    pub fn exists(&self, id: &CommitId) -> bool {
        self.path(id).is_file()
    }

    /// walk first parents from `start`
    pub fn history(&self, start: CommitId) -> HistoryIterator<'_> {
        HistoryIterator {
            store: self,
            next: Some(start),
        }
    }

    /// check whether `ancestor` is reachable from `descendant` (inclusive)
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> StorageResult<bool> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([descendant.clone()]);

        while let Some(id) = queue.pop_front() {
            if &id == ancestor {
                return Ok(true);
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            let commit = self.load(&id)?;
            queue.extend(commit.parents().cloned());
        }
        Ok(false)
    }

    /// find the merge base (nearest common ancestor) of two commits
    ///
    /// returns None if the histories are unrelated
    pub fn merge_base(&self, a: &CommitId, b: &CommitId) -> StorageResult<Option<CommitId>> {
        let ancestors_of_a = self.ancestors(a)?;

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([b.clone()]);
        while let Some(id) = queue.pop_front() {
            if ancestors_of_a.contains(&id) {
                debug!(a = %a, b = %b, base = %id, "found merge base");
                return Ok(Some(id));
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            let commit = self.load(&id)?;
            queue.extend(commit.parents().cloned());
        }

        debug!(a = %a, b = %b, "no common ancestor");
        Ok(None)
    }

    /// every commit reachable from `start`, itself included
    fn ancestors(&self, start: &CommitId) -> StorageResult<HashSet<CommitId>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let commit = self.load(&id)?;
            queue.extend(commit.parents().cloned());
        }
        Ok(seen)
    }
}

/// iterate over first-parent history starting from a commit
///
/// a parent that is missing from the store ends the walk with CommitNotFound
pub struct HistoryIterator<'a> {
    store: &'a CommitStore,
    next: Option<CommitId>,
}

impl Iterator for HistoryIterator<'_> {
    type Item = StorageResult<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        match self.store.load(&id) {
            Ok(commit) => {
                self.next = commit.parent.clone();
                Some(Ok(commit))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// message formatting for commit-producing operations
pub struct CommitMessage;

impl CommitMessage {
    /// format a message for a merge commit
    pub fn merge(theirs: &str, ours: &str) -> String {
        format!("Merge branch '{}' into '{}'", theirs, ours)
    }

    /// format a message for a cherry-picked commit
    pub fn cherry_pick(source: &Commit) -> String {
        format!("Cherry-pick {}: {}", source.id.short(), source.message)
    }

    /// format a message for a revert commit
    pub fn revert(target: &Commit) -> String {
        format!(
            "Revert \"{}\"\n\nThis reverts commit {}.",
            target.summary(),
            target.id
        )
    }
}
