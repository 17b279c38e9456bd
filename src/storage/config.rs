//! Repository configuration (`.gitmap/config.json`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::error::StorageResult;
use crate::storage::layout::{read_json, write_json};

/// current on-disk format version
pub const FORMAT_VERSION: &str = "1.0";

/// How `Repository::merge` combines two branches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// union of both sides, any differing sub-element is a conflict
    #[default]
    TwoWay,
    /// compare both sides against their merge base
    ThreeWay,
}

/// Connection info for the hosted service the document is synchronized with.
///
/// The core only stores it; the sync layer reads and writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,
    /// id of the hosted item a cloned repository came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl Remote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            folder_id: None,
            folder_name: None,
            item_id: None,
        }
    }

    /// set the folder the remote publishes into
    pub fn folder(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.folder_id = Some(id.into());
        self.folder_name = Some(name.into());
        self
    }

    /// set the hosted item id
    pub fn item(mut self, id: impl Into<String>) -> Self {
        self.item_id = Some(id.into());
        self
    }
}

/// Per-repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub version: String,
    /// default author for commits
    pub user_name: String,
    pub user_email: String,
    pub project_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<Remote>,
    pub merge_strategy: MergeStrategy,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            user_name: String::new(),
            user_email: String::new(),
            project_name: String::new(),
            remote: None,
            merge_strategy: MergeStrategy::default(),
        }
    }
}

impl RepoConfig {
    /// Set the default author.
    pub fn with_user(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.user_name = name.into();
        self.user_email = email.into();
        self
    }

    /// Set the project name.
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    /// Set the remote.
    pub fn with_remote(mut self, remote: Remote) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Set the merge strategy.
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    /// author recorded when a commit names none
    pub fn author(&self) -> String {
        if self.user_name.is_empty() {
            "Unknown".to_string()
        } else {
            self.user_name.clone()
        }
    }

    /// load from disk; a missing file yields the defaults
    pub fn load(path: &Path) -> StorageResult<Self> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> StorageResult<()> {
        write_json(path, self)
    }
}
