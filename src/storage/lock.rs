//! Advisory single-writer lock.
//!
//! Mutating repository operations hold `.gitmap/LOCK` for their whole
//! duration. The file contains the pid of the holder. It is purely advisory:
//! readers never look at it, and the rest of the on-disk format is unaffected.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::storage::error::{StorageError, StorageResult};

/// RAII guard for the repository lock; the lock file is removed on drop
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
}

impl RepoLock {
    /// take the lock, failing with `StorageError::Locked` if it is held
    pub fn acquire(path: &Path) -> StorageResult<Self> {
        Self::acquire_with(path, |file| writeln!(file, "{}", std::process::id()))
    }

    fn acquire_with(path: &Path, write_holder: impl FnOnce(&mut File) -> std::io::Result<()>) -> StorageResult<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::Locked { path: path.to_path_buf() });
            }
            Err(e) => return Err(StorageError::io("create lock", path)(e)),
        };

        // dropping the guard removes the file if the pid cannot be written
        let lock = Self { path: path.to_path_buf() };
        write_holder(&mut file).map_err(StorageError::io("write lock", path))?;
        debug!(path = %path.display(), "acquired repository lock");

        Ok(lock)
    }

    /// pid recorded in an existing lock file, if readable
    pub fn holder(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    /// remove a lock left behind by a crashed writer
    ///
    /// returns true if a lock file was present
    pub fn break_lock(path: &Path) -> StorageResult<bool> {
        let holder = Self::holder(path);
        match fs::remove_file(path) {
            Ok(()) => {
                warn!(path = %path.display(), pid = ?holder, "removed repository lock");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io("remove lock", path)(e)),
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        // already gone if someone forced it
        let _ = fs::remove_file(&self.path);
    }
}
