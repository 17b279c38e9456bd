//! Stash stack
//!
//! each entry is stored as `stash/<id>.json`; `stash/stack.json` holds the
//! entry ids, most recent first. Positions are always relative to that order
//! (0 = most recent).

use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use ulid::Ulid;

use crate::storage::document::Document;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::layout::{read_json, remove_file, write_json};
use crate::storage::types::CommitId;

/// a saved-aside index snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StashEntry {
    pub id: String,
    pub message: String,
    /// branch checked out when the entry was pushed (None when detached)
    #[serde(default)]
    pub branch: Option<String>,
    /// HEAD commit when the entry was pushed
    #[serde(default)]
    pub head: Option<CommitId>,
    #[serde(default)]
    pub created_at: String,
    pub index_data: Document,
}

impl StashEntry {
    /// create an entry with a fresh id and the current time
    pub fn new(message: impl Into<String>, branch: Option<String>, head: Option<CommitId>, index_data: Document) -> Self {
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            message: message.into(),
            branch,
            head,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            index_data,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StashStack {
    dir: PathBuf,
}

impl StashStack {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn stack_path(&self) -> PathBuf {
        self.dir.join("stack.json")
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// entry ids, most recent first
    fn ids(&self) -> StorageResult<Vec<String>> {
        Ok(read_json(&self.stack_path())?.unwrap_or_default())
    }

    fn write_ids(&self, ids: &[String]) -> StorageResult<()> {
        write_json(&self.stack_path(), ids)
    }

    fn load_entry(&self, id: &str) -> StorageResult<StashEntry> {
        read_json(&self.entry_path(id))?.ok_or_else(|| StorageError::StashEntryNotFound(id.to_string()))
    }

    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.ids()?.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// push an entry on top of the stack
    pub fn push(&self, entry: &StashEntry) -> StorageResult<()> {
        write_json(&self.entry_path(&entry.id), entry)?;

        let mut ids = self.ids()?;
        ids.insert(0, entry.id.clone());
        self.write_ids(&ids)?;

        debug!(stash = %entry.id, depth = ids.len(), "pushed stash entry");
        Ok(())
    }

    /// all entries, most recent first
    pub fn list(&self) -> StorageResult<Vec<StashEntry>> {
        self.ids()?.iter().map(|id| self.load_entry(id)).collect()
    }

    /// the entry at `position`, None if out of range
    pub fn get(&self, position: usize) -> StorageResult<Option<StashEntry>> {
        match self.ids()?.get(position) {
            Some(id) => self.load_entry(id).map(Some),
            None => Ok(None),
        }
    }

    /// remove and return the entry at `position`, None if out of range
    pub fn remove(&self, position: usize) -> StorageResult<Option<StashEntry>> {
        let mut ids = self.ids()?;
        if position >= ids.len() {
            return Ok(None);
        }

        let entry = self.load_entry(&ids[position])?;
        ids.remove(position);
        self.write_ids(&ids)?;
        remove_file(&self.entry_path(&entry.id))?;

        debug!(stash = %entry.id, position, "removed stash entry");
        Ok(Some(entry))
    }

    /// remove every entry, returning how many there were
    pub fn clear(&self) -> StorageResult<usize> {
        let ids = self.ids()?;
        self.write_ids(&[])?;
        for id in &ids {
            remove_file(&self.entry_path(id))?;
        }

        debug!(count = ids.len(), "cleared stash");
        Ok(ids.len())
    }
}
