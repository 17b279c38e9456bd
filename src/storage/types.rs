//! core type-safe wrappers around the identifiers used by the storage layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a commit object.
///
/// Commit ids double as file names under `objects/commits/`, so they are
/// validated to never contain path separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitId(String);

impl CommitId {
    /// length of the short form shown in messages
    pub const SHORT_LEN: usize = 8;

    /// parse a CommitId from its textual form
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidNameError> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if id.len() > 64 {
            return Err(InvalidNameError::TooLong(id.len()));
        }
        for (i, c) in id.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        Ok(Self(id))
    }

    /// build an id from a digest that is already known to be hex
    pub(crate) fn from_digest(hex: String) -> Self {
        Self(hex)
    }

    /// short form of the commit ID
    pub fn short(&self) -> &str {
        let end = self.0.len().min(Self::SHORT_LEN);
        &self.0[..end]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CommitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CommitId {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CommitId> for String {
    fn from(id: CommitId) -> Self {
        id.0
    }
}

/// Validate a ref name (branch or tag).
///
/// Names may be nested (`feature/roads`) because they map onto a directory
/// tree under `refs/`, but must never escape it. No path part may start with
/// `.`; those entries are reserved for temp files and skipped when listing.
fn validate_ref_name(name: &str) -> Result<(), InvalidNameError> {
    if name.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if name.len() > 255 {
        return Err(InvalidNameError::TooLong(name.len()));
    }
    if name.contains("..") || name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return Err(InvalidNameError::InvalidPath(name.to_string()));
    }
    for (i, c) in name.chars().enumerate() {
        if c.is_whitespace() || c.is_control() || c == '\\' || c == ':' {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }
    if name.split('/').any(|part| part.starts_with('.') || part.ends_with(".tmp")) {
        return Err(InvalidNameError::Reserved(name.to_string()));
    }
    Ok(())
}

/// a branch name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// the default branch created by `init`
    pub const MAIN: &'static str = "main";

    /// create a new BranchName
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    /// the main branch
    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    /// get the full ref path (e.g., "refs/heads/main")
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

/// a tag name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagName(String);

impl TagName {
    /// create a new TagName
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    /// get the full ref path (e.g., "refs/tags/v1.0.0")
    pub fn as_ref_path(&self) -> String {
        format!("refs/tags/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TagName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// where HEAD points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// HEAD follows a branch; new commits advance it
    Attached(BranchName),
    /// HEAD names a commit directly
    Detached(CommitId),
}

impl Head {
    /// the branch HEAD is attached to, if any
    pub fn branch(&self) -> Option<&BranchName> {
        match self {
            Head::Attached(branch) => Some(branch),
            Head::Detached(_) => None,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Head::Detached(_))
    }
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Head::Attached(branch) => write!(f, "{}", branch),
            Head::Detached(id) => write!(f, "(detached at {})", id.short()),
        }
    }
}

/// error type for invalid names (commit ids, branches, tags)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    Reserved(String),
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::Reserved(name) => write!(f, "'{}' is a reserved name", name),
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}
