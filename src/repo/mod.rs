//! Repository layer
//!
//! the public entry point of the crate. [`Repository`] runs every
//! operation of the version-control state machine on top of the storage
//! layer, and delegates document comparison to `diff` and `merge`.
//!
//! # Example
//!
//! ```no_run
//! use gitmap::repo::{MergeOutcome, Repository};
//! use serde_json::json;
//!
//! let repo = Repository::init("./roads", "", "Ada", "ada@example.com").unwrap();
//! repo.update_index_value(json!({"layers": [{"id": "a", "title": "Roads"}]})).unwrap();
//! repo.create_commit("first", None, None).unwrap();
//!
//! repo.create_branch("feat").unwrap();
//! repo.checkout_branch("feat").unwrap();
//! repo.update_index_value(json!({"layers": [{"id": "a", "title": "Roads"}, {"id": "b"}]})).unwrap();
//! repo.create_commit("second", None, None).unwrap();
//!
//! repo.checkout_branch("main").unwrap();
//! match repo.merge("feat").unwrap() {
//!     MergeOutcome::Conflicted(pending) => println!("{} conflicts", pending.result.conflicts.len()),
//!     outcome => println!("{:?}", outcome.commit().map(|c| &c.id)),
//! }
//! ```

mod api;
mod error;
mod events;
mod merge;
mod revert;

pub use api::{CommitOutcome, Repository, Status};
pub use error::{RepoError, RepoResult};
pub use events::{EventBuffer, EventKind, EventSink, RepoEvent};
pub use merge::{MergeOptions, MergeOutcome, PendingMerge};
pub use revert::compute_revert;
