//! gitmap - version control for web-map documents
//!
//! A map is one JSON document whose `layers` and `tables` are lists of
//! sub-elements identified by `id`. This crate keeps its history in a
//! `.gitmap/` directory next to the project: commits, branches, tags, a
//! staging index and a stash, with diff and merge working per sub-element.
//!
//! # Example
//!
//! ```no_run
//! use gitmap::Repository;
//! use serde_json::json;
//!
//! let repo = Repository::init("./my_map", "City Map", "Ada", "ada@example.com").unwrap();
//! repo.update_index_value(json!({"title": "City", "layers": [{"id": "roads"}]})).unwrap();
//! repo.create_commit("Add roads", None, None).unwrap();
//!
//! for commit in repo.get_commit_history(None).unwrap() {
//!     println!("{} {}", commit.id.short(), commit.summary());
//! }
//! ```

pub mod diff;
pub mod merge;
pub mod repo;
pub mod storage;

pub use diff::{diff_maps, format_diff_summary, MapDiff};
pub use merge::{merge_maps, MergeResult, Resolution};
pub use repo::{CommitOutcome, MergeOutcome, RepoError, RepoResult, Repository};
pub use storage::{BranchName, Commit, CommitId, Document, TagName};
