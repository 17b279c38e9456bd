//! Merge conflicts and how they get resolved.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::storage::Collection;

/// a sub-element that differs between both sides with no rule to decide
///
/// conflicts are always whole-element: the caller picks one side in full
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub collection: Collection,
    pub layer_id: String,
    pub layer_title: String,
    /// our version; `null` when we deleted the element
    pub ours_value: Value,
    pub theirs_value: Value,
    /// common ancestor version, only in three-way merges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_value: Option<Value>,
}

/// which side of a conflict to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Ours,
    Theirs,
    Base,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resolution::Ours => "ours",
            Resolution::Theirs => "theirs",
            Resolution::Base => "base",
        };
        f.write_str(s)
    }
}

impl FromStr for Resolution {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ours" => Ok(Resolution::Ours),
            "theirs" => Ok(Resolution::Theirs),
            "base" => Ok(Resolution::Base),
            other => Err(MergeError::InvalidResolution(other.to_string())),
        }
    }
}

/// errors from conflict resolution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// `base` was chosen but the merge had no common ancestor version
    #[error("no base version available for '{0}'")]
    NoBaseVersion(String),

    #[error("invalid resolution strategy: {0}")]
    InvalidResolution(String),

    /// no pending conflict has this id
    #[error("no pending conflict for '{0}'")]
    ConflictNotFound(String),
}

/// Pick the value that resolves a conflict.
pub fn resolve_conflict(conflict: &Conflict, choice: Resolution) -> Result<Value, MergeError> {
    match choice {
        Resolution::Ours => Ok(conflict.ours_value.clone()),
        Resolution::Theirs => Ok(conflict.theirs_value.clone()),
        Resolution::Base => conflict
            .base_value
            .clone()
            .ok_or_else(|| MergeError::NoBaseVersion(conflict.layer_id.clone())),
    }
}
