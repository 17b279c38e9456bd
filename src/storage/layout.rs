//! On-disk layout of a repository and the low-level file helpers.
//!
//! ```text
//! <root>/.gitmap/
//!   config.json
//!   HEAD
//!   index.json
//!   LOCK                     (only while a writer is active)
//!   refs/heads/<branch>
//!   refs/tags/<tag>
//!   refs/remotes/origin/
//!   objects/commits/<id>.json
//!   stash/stack.json
//!   stash/<entry>.json
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, TagName};

/// name of the repository directory inside the project root
pub const REPO_DIR: &str = ".gitmap";

/// resolved paths of one repository
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    dir: PathBuf,
}

impl Layout {
    /// layout for the project rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dir = root.join(REPO_DIR);
        Self { root, dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// the `.gitmap` directory
    ///
    /// files inside `commits()` and `stash()` are named by their stores
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    pub fn head(&self) -> PathBuf {
        self.dir.join("HEAD")
    }

    pub fn index(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    pub fn lock(&self) -> PathBuf {
        self.dir.join("LOCK")
    }

    pub fn refs(&self) -> PathBuf {
        self.dir.join("refs")
    }

    pub fn heads(&self) -> PathBuf {
        self.refs().join("heads")
    }

    pub fn tags(&self) -> PathBuf {
        self.refs().join("tags")
    }

    pub fn remotes(&self) -> PathBuf {
        self.refs().join("remotes")
    }

    pub fn branch(&self, name: &BranchName) -> PathBuf {
        self.dir.join(name.as_ref_path())
    }

    pub fn tag(&self, name: &TagName) -> PathBuf {
        self.dir.join(name.as_ref_path())
    }

    pub fn commits(&self) -> PathBuf {
        self.dir.join("objects").join("commits")
    }

    pub fn stash(&self) -> PathBuf {
        self.dir.join("stash")
    }

    /// paths that must exist for the repository to be usable
    pub fn required_paths(&self) -> Vec<PathBuf> {
        vec![
            self.dir.clone(),
            self.head(),
            self.config(),
            self.heads(),
            self.tags(),
            self.commits(),
        ]
    }
}

/// create a directory and its parents
pub(crate) fn ensure_dir(path: &Path) -> StorageResult<()> {
    fs::create_dir_all(path).map_err(StorageError::io("create directory", path))
}

/// write `contents` to `path` atomically
///
/// the data lands in a temp file next to the target and is renamed over it,
/// so readers never see a partial file.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> StorageResult<()> {
    let parent = path.parent().ok_or_else(|| StorageError::CorruptedData {
        path: path.to_path_buf(),
        reason: "path has no parent directory".to_string(),
    })?;
    ensure_dir(parent)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(StorageError::io("create temp file in", parent))?;
    tmp.write_all(contents).map_err(StorageError::io("write", tmp.path().to_path_buf()))?;
    tmp.as_file().sync_all().map_err(StorageError::io("sync", path))?;
    tmp.persist(path).map_err(|e| StorageError::Io {
        op: "persist",
        path: path.to_path_buf(),
        source: e.error,
    })?;

    debug!(path = %path.display(), bytes = contents.len(), "wrote file");
    Ok(())
}

/// serialize a value as pretty JSON and write it atomically
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(StorageError::json(path))?;
    atomic_write(path, &bytes)
}

/// read and parse a JSON file; a missing file yields None
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let Some(text) = read_text(path)? else {
        return Ok(None);
    };
    let value = serde_json::from_str(&text).map_err(StorageError::json(path))?;
    Ok(Some(value))
}

/// read a text file; a missing file yields None
pub(crate) fn read_text(path: &Path) -> StorageResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io("read", path)(e)),
    }
}

/// remove a file, treating an already missing file as success
pub(crate) fn remove_file(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io("remove", path)(e)),
    }
}

/// remove empty directories between `path` and `stop` (exclusive)
pub(crate) fn prune_empty_dirs(path: &Path, stop: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// names of all files under `dir`, relative to it, with `/` separators, sorted
pub(crate) fn list_ref_names(dir: &Path) -> StorageResult<Vec<String>> {
    let mut names = Vec::new();
    collect_ref_names(dir, "", &mut names)?;
    names.sort();
    Ok(names)
}

fn collect_ref_names(dir: &Path, prefix: &str, out: &mut Vec<String>) -> StorageResult<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StorageError::io("list", dir)(e)),
    };

    for entry in entries {
        let entry = entry.map_err(StorageError::io("list", dir))?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        // temp files of an atomic write; ref names never start with '.'
        if file_name.starts_with('.') {
            continue;
        }
        let name = if prefix.is_empty() {
            file_name
        } else {
            format!("{}/{}", prefix, file_name)
        };
        let file_type = entry.file_type().map_err(StorageError::io("stat", entry.path()))?;
        if file_type.is_dir() {
            collect_ref_names(&entry.path(), &name, out)?;
        } else {
            out.push(name);
        }
    }
    Ok(())
}
