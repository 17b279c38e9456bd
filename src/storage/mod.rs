//! storage layer for gitmap
//!
//! this module owns everything under `<root>/.gitmap/`. The upper layers
//! (diff, merge, repository) only see documents, commits and refs, never
//! file paths.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Repository                           │
//! │   (branch / checkout / commit / merge / stash / tag ...)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌──────────────┬──────┴───────┬──────────────┐
//!        │              │              │              │
//!        ▼              ▼              ▼              ▼
//!  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐
//!  │   refs    │  │   index   │  │   stash   │  │  config   │
//!  │ HEAD/tags │  │ (staged)  │  │  (stack)  │  │           │
//!  └───────────┘  └───────────┘  └───────────┘  └───────────┘
//!        │              │              │
//!        └──────────────┼──────────────┘
//!                       ▼
//!                ┌─────────────┐
//!                │   commit    │
//!                │  (history)  │
//!                └─────────────┘
//!                       │
//!                       ▼
//!              layout (atomic file I/O)
//!  ```

mod commit;
mod config;
mod document;
mod error;
mod index;
mod layout;
mod lock;
mod refs;
mod stash;
mod types;

// Re-export public API
pub use commit::{generate_commit_id, Commit, CommitBuilder, CommitMessage, CommitStore, HistoryIterator, COMMIT_ID_LEN};
pub use config::{MergeStrategy, Remote, RepoConfig, FORMAT_VERSION};
pub use document::{element_id, element_title, keyed_elements, Collection, Document};
pub use error::{StorageError, StorageResult};
pub use index::StagingIndex;
pub use layout::{Layout, REPO_DIR};
pub use lock::RepoLock;
pub use refs::RefManager;
pub use stash::{StashEntry, StashStack};
pub use types::{BranchName, CommitId, Head, InvalidNameError, TagName};

// Re-export for internal use by other modules
pub(crate) use layout::ensure_dir;
