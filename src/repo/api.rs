//! The repository façade.
//!
//! [`Repository`] ties the storage pieces together and enforces the state
//! machine: HEAD attached to a branch or detached at a commit, branch
//! pointers that only move forward through commits, and an index that the
//! next commit captures.
//!
//! Every mutating operation runs under [`Repository::with_write_lock`], which
//! serializes writers in this process and holds `.gitmap/LOCK` against other
//! processes. Reads take no lock.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::diff::{diff_maps, MapDiff};
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::events::{EventKind, EventSink, RepoEvent};
use crate::storage::{
    ensure_dir, BranchName, Commit, CommitBuilder, CommitId, CommitStore, Document, Head, Layout, RefManager,
    RepoConfig, RepoLock, StagingIndex, StashEntry, StashStack, StorageError, TagName,
};

/// result of a commit-producing operation
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Created(Commit),
    /// the document to commit equals HEAD's; nothing was written
    NothingToCommit,
}

impl CommitOutcome {
    pub fn commit(&self) -> Option<&Commit> {
        match self {
            CommitOutcome::Created(commit) => Some(commit),
            CommitOutcome::NothingToCommit => None,
        }
    }

    pub fn into_commit(self) -> Option<Commit> {
        match self {
            CommitOutcome::Created(commit) => Some(commit),
            CommitOutcome::NothingToCommit => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CommitOutcome::Created(_))
    }
}

/// snapshot of the working state
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub head: Head,
    pub head_commit: Option<CommitId>,
    /// index relative to HEAD's document
    pub changes: MapDiff,
    pub stash_count: usize,
}

impl Status {
    pub fn is_clean(&self) -> bool {
        !self.changes.has_changes()
    }
}

/// a commit about to be written on the current branch
pub(super) struct CommitDraft {
    pub document: Document,
    pub message: String,
    pub author: Option<String>,
    pub second_parent: Option<CommitId>,
}

/// A gitmap repository rooted at a project directory.
///
/// Cheap to clone; clones share the writer mutex and event sink.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<RepositoryInner>,
}

struct RepositoryInner {
    layout: Layout,
    commits: CommitStore,
    index: StagingIndex,
    stash: StashStack,
    writer: Arc<Mutex<()>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.inner.layout.root())
            .field("has_sink", &self.inner.sink.is_some())
            .finish()
    }
}

impl Repository {
    fn from_layout(layout: Layout, sink: Option<Arc<dyn EventSink>>) -> Self {
        Self::from_parts(layout, Arc::new(Mutex::new(())), sink)
    }

    fn from_parts(layout: Layout, writer: Arc<Mutex<()>>, sink: Option<Arc<dyn EventSink>>) -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                commits: CommitStore::new(layout.commits()),
                index: StagingIndex::new(layout.index()),
                stash: StashStack::new(layout.stash()),
                writer,
                sink,
                layout,
            }),
        }
    }

    // ==================== Lifecycle ====================

    /// Open an existing repository at `root`.
    pub fn open(root: impl AsRef<Path>) -> RepoResult<Self> {
        let layout = Layout::new(root.as_ref());
        if !layout.dir().is_dir() {
            return Err(RepoError::NotARepository(root.as_ref().to_path_buf()));
        }
        Ok(Self::from_layout(layout, None))
    }

    /// Initialize a new repository at `root`.
    ///
    /// An empty `project_name` defaults to the name of the root directory.
    pub fn init(root: impl AsRef<Path>, project_name: &str, user_name: &str, user_email: &str) -> RepoResult<Self> {
        let root = root.as_ref();
        let layout = Layout::new(root);
        if layout.dir().exists() {
            return Err(RepoError::AlreadyExists(layout.dir().to_path_buf()));
        }

        ensure_dir(layout.dir())?;
        let _lock = RepoLock::acquire(&layout.lock())?;

        for dir in [layout.heads(), layout.tags(), layout.remotes().join("origin"), layout.commits(), layout.stash()] {
            ensure_dir(&dir)?;
        }

        let project_name = if project_name.is_empty() {
            root.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            project_name.to_string()
        };
        RepoConfig::default()
            .with_user(user_name, user_email)
            .with_project_name(project_name.as_str())
            .save(&layout.config())?;

        let main = BranchName::main();
        RefManager::create_branch(&layout, &main, None)?;
        RefManager::set_head_attached(&layout, &main)?;
        StagingIndex::new(layout.index()).save(&Document::new())?;

        info!(root = %root.display(), project = %project_name, "initialized repository");
        Ok(Self::from_layout(layout, None))
    }

    /// Find the repository containing `start`, walking up parent directories.
    pub fn discover(start: impl AsRef<Path>) -> RepoResult<Self> {
        let start = start.as_ref();
        start
            .ancestors()
            .find(|dir| Layout::new(*dir).dir().is_dir())
            .map(|root| Self::from_layout(Layout::new(root), None))
            .ok_or_else(|| RepoError::NotARepository(start.to_path_buf()))
    }

    /// Attach an event sink. Events are sent after each successful mutation.
    ///
    /// The returned handle keeps sharing the writer mutex with `self` and
    /// its clones; only the new handle reports to `sink`.
    pub fn with_event_sink(self, sink: Arc<dyn EventSink>) -> Self {
        Self::from_parts(self.inner.layout.clone(), Arc::clone(&self.inner.writer), Some(sink))
    }

    pub fn root(&self) -> &Path {
        self.inner.layout.root()
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    pub fn exists(&self) -> bool {
        self.inner.layout.dir().is_dir()
    }

    /// check that every required file and directory is present
    pub fn is_valid(&self) -> bool {
        self.inner.layout.required_paths().iter().all(|path| path.exists())
    }

    /// Remove a lock file left behind by a crashed writer.
    ///
    /// Returns true if there was one.
    pub fn force_unlock(&self) -> RepoResult<bool> {
        Ok(RepoLock::break_lock(&self.inner.layout.lock())?)
    }

    /// Run a mutation with exclusive access to the repository.
    pub fn with_write_lock<F, T>(&self, f: F) -> RepoResult<T>
    where
        F: FnOnce() -> RepoResult<T>,
    {
        let _writer = self.inner.writer.lock();
        let _lock = RepoLock::acquire(&self.inner.layout.lock())?;
        f()
    }

    pub(super) fn commits(&self) -> &CommitStore {
        &self.inner.commits
    }

    pub(super) fn emit(&self, event: RepoEvent) {
        if let Some(sink) = &self.inner.sink {
            sink.record(&event);
        }
    }

    pub(super) fn event(&self, kind: EventKind) -> RepoEvent {
        RepoEvent::new(kind, self.root().display().to_string())
    }

    // ==================== Config and index ====================

    pub fn get_config(&self) -> RepoResult<RepoConfig> {
        Ok(RepoConfig::load(&self.inner.layout.config())?)
    }

    pub fn update_config(&self, config: &RepoConfig) -> RepoResult<()> {
        self.with_write_lock(|| Ok(config.save(&self.inner.layout.config())?))
    }

    /// The staged document.
    pub fn get_index(&self) -> RepoResult<Document> {
        Ok(self.inner.index.load()?)
    }

    /// Replace the staged document.
    pub fn update_index(&self, document: &Document) -> RepoResult<()> {
        self.with_write_lock(|| Ok(self.inner.index.save(document)?))
    }

    /// Stage an arbitrary JSON value; it must be an object.
    pub fn update_index_value(&self, value: Value) -> RepoResult<()> {
        let document = Document::from_value(value).ok_or(RepoError::InvalidDocument)?;
        self.update_index(&document)
    }

    pub(super) fn write_index(&self, document: &Document) -> RepoResult<()> {
        Ok(self.inner.index.save(document)?)
    }

    // ==================== HEAD and branches ====================

    pub fn head(&self) -> RepoResult<Head> {
        Ok(RefManager::read_head(&self.inner.layout)?)
    }

    /// The checked-out branch, None when HEAD is detached.
    pub fn current_branch(&self) -> RepoResult<Option<BranchName>> {
        Ok(self.head()?.branch().cloned())
    }

    /// The commit HEAD resolves to, None before the first commit.
    pub fn head_commit(&self) -> RepoResult<Option<CommitId>> {
        match self.head()? {
            Head::Attached(branch) => {
                if !RefManager::branch_exists(&self.inner.layout, &branch) {
                    warn!(branch = %branch, "HEAD points at a missing branch");
                    return Ok(None);
                }
                Ok(RefManager::resolve_branch(&self.inner.layout, &branch)?)
            }
            Head::Detached(id) => Ok(Some(id)),
        }
    }

    /// Document of the HEAD commit, empty before the first commit.
    pub fn head_document(&self) -> RepoResult<Document> {
        self.commit_document(self.head_commit()?.as_ref())
    }

    pub(super) fn commit_document(&self, id: Option<&CommitId>) -> RepoResult<Document> {
        match id {
            Some(id) => Ok(self.inner.commits.load(id)?.document),
            None => Ok(Document::new()),
        }
    }

    pub fn list_branches(&self) -> RepoResult<Vec<BranchName>> {
        Ok(RefManager::list_branches(&self.inner.layout)?)
    }

    pub fn branch_exists(&self, name: &str) -> RepoResult<bool> {
        let branch = BranchName::new(name)?;
        Ok(RefManager::branch_exists(&self.inner.layout, &branch))
    }

    /// Tip of a branch, None when it has no commits yet.
    pub fn get_branch_commit(&self, name: &str) -> RepoResult<Option<CommitId>> {
        let branch = BranchName::new(name)?;
        Ok(RefManager::resolve_branch(&self.inner.layout, &branch)?)
    }

    /// Create a branch at the HEAD commit.
    #[instrument(skip(self))]
    pub fn create_branch(&self, name: &str) -> RepoResult<BranchName> {
        let branch = BranchName::new(name)?;
        self.with_write_lock(|| {
            let target = self.head_commit()?;
            self.create_branch_locked(&branch, target.as_ref())
        })?;
        Ok(branch)
    }

    /// Create a branch at a specific commit.
    #[instrument(skip(self))]
    pub fn create_branch_at(&self, name: &str, commit: &CommitId) -> RepoResult<BranchName> {
        let branch = BranchName::new(name)?;
        self.with_write_lock(|| {
            self.ensure_commit(commit)?;
            self.create_branch_locked(&branch, Some(commit))
        })?;
        Ok(branch)
    }

    fn create_branch_locked(&self, branch: &BranchName, target: Option<&CommitId>) -> RepoResult<()> {
        RefManager::create_branch(&self.inner.layout, branch, target)?;
        info!(branch = %branch, target = ?target, "created branch");

        self.emit(
            self.event(EventKind::BranchCreate)
                .reference(branch.as_str())
                .payload(json!({ "commit": target })),
        );
        Ok(())
    }

    /// Move an existing branch to a commit.
    #[instrument(skip(self))]
    pub fn update_branch(&self, name: &str, commit: &CommitId) -> RepoResult<()> {
        let branch = BranchName::new(name)?;
        self.with_write_lock(|| {
            if !RefManager::branch_exists(&self.inner.layout, &branch) {
                return Err(StorageError::BranchNotFound(branch.to_string()).into());
            }
            self.ensure_commit(commit)?;
            RefManager::update_branch(&self.inner.layout, &branch, commit)?;
            info!(branch = %branch, commit = %commit, "moved branch");
            Ok(())
        })
    }

    /// Delete a branch ref. Its commits stay in the store.
    #[instrument(skip(self))]
    pub fn delete_branch(&self, name: &str) -> RepoResult<()> {
        let branch = BranchName::new(name)?;
        self.with_write_lock(|| {
            if self.current_branch()?.as_ref() == Some(&branch) {
                return Err(RepoError::DeleteCurrentBranch(branch.to_string()));
            }
            RefManager::delete_branch(&self.inner.layout, &branch)?;
            info!(branch = %branch, "deleted branch");
            self.emit(self.event(EventKind::BranchDelete).reference(branch.as_str()));
            Ok(())
        })
    }

    /// Attach HEAD to a branch and load its tip into the index.
    ///
    /// Whatever was staged is overwritten; callers stash first if needed.
    #[instrument(skip(self))]
    pub fn checkout_branch(&self, name: &str) -> RepoResult<()> {
        let branch = BranchName::new(name)?;
        self.with_write_lock(|| {
            if !RefManager::branch_exists(&self.inner.layout, &branch) {
                return Err(StorageError::BranchNotFound(branch.to_string()).into());
            }
            let tip = RefManager::resolve_branch(&self.inner.layout, &branch)?;
            let document = self.commit_document(tip.as_ref())?;

            RefManager::set_head_attached(&self.inner.layout, &branch)?;
            self.write_index(&document)?;

            info!(branch = %branch, commit = ?tip, "checked out branch");
            self.emit(
                self.event(EventKind::Checkout)
                    .reference(branch.as_str())
                    .payload(json!({ "commit": tip, "detached": false })),
            );
            Ok(())
        })
    }

    /// Detach HEAD at a commit and load its document into the index.
    #[instrument(skip(self))]
    pub fn checkout_commit(&self, commit: &CommitId) -> RepoResult<()> {
        self.with_write_lock(|| {
            let target = self.inner.commits.load(commit)?;
            RefManager::set_head_detached(&self.inner.layout, commit)?;
            self.write_index(&target.document)?;

            info!(commit = %commit, "detached HEAD");
            self.emit(
                self.event(EventKind::Checkout)
                    .reference(commit.as_str())
                    .payload(json!({ "commit": commit, "detached": true })),
            );
            Ok(())
        })
    }

    // ==================== Commits ====================

    /// Commit the index on the current branch.
    ///
    /// `author` falls back to the configured user name.
    #[instrument(skip(self))]
    pub fn create_commit(&self, message: &str, author: Option<&str>, rationale: Option<&str>) -> RepoResult<CommitOutcome> {
        self.with_write_lock(|| {
            let draft = CommitDraft {
                document: self.get_index()?,
                message: message.to_string(),
                author: author.map(str::to_string),
                second_parent: None,
            };
            self.write_commit(EventKind::Commit, draft, rationale)
        })
    }

    /// Write a commit on the current branch and advance it. Caller holds the lock.
    ///
    /// A draft equal to HEAD's document is a no-op, unless it carries a second
    /// parent (a merge always records its lineage).
    pub(super) fn write_commit(&self, kind: EventKind, draft: CommitDraft, rationale: Option<&str>) -> RepoResult<CommitOutcome> {
        let branch = self.current_branch()?.ok_or(RepoError::DetachedHead)?;
        let parent = RefManager::resolve_branch(&self.inner.layout, &branch)?;

        if draft.second_parent.is_none() && draft.document == self.commit_document(parent.as_ref())? {
            debug!(branch = %branch, "nothing to commit");
            return Ok(CommitOutcome::NothingToCommit);
        }

        let author = match draft.author {
            Some(author) if !author.is_empty() => author,
            _ => self.get_config()?.author(),
        };

        let mut builder = CommitBuilder::new(draft.document)
            .parent(parent)
            .message(draft.message)
            .author(author);
        if let Some(second) = draft.second_parent {
            builder = builder.second_parent(second);
        }
        let commit = builder.build()?;

        self.inner.commits.save(&commit)?;
        self.write_index(&commit.document)?;
        RefManager::update_branch(&self.inner.layout, &branch, &commit.id)?;

        info!(commit = %commit.id, branch = %branch, kind = %kind, "created commit");
        self.emit(
            self.event(kind)
                .reference(commit.id.as_str())
                .actor(commit.author.as_str())
                .rationale(rationale)
                .payload(json!({
                    "message": commit.message,
                    "parent": commit.parent,
                    "parent2": commit.parent2,
                    "layers_count": commit.document.layers().len(),
                    "tables_count": commit.document.tables().len(),
                    "branch": branch,
                })),
        );
        Ok(CommitOutcome::Created(commit))
    }

    pub fn get_commit(&self, id: &CommitId) -> RepoResult<Commit> {
        Ok(self.inner.commits.load(id)?)
    }

    fn ensure_commit(&self, id: &CommitId) -> RepoResult<()> {
        if !self.inner.commits.exists(id) {
            return Err(StorageError::CommitNotFound(id.to_string()).into());
        }
        Ok(())
    }

    /// First-parent history from HEAD, newest first.
    pub fn get_commit_history(&self, limit: Option<usize>) -> RepoResult<Vec<Commit>> {
        match self.head_commit()? {
            Some(head) => self.history_from(&head, limit),
            None => Ok(Vec::new()),
        }
    }

    /// First-parent history from any commit, newest first.
    pub fn history_from(&self, start: &CommitId, limit: Option<usize>) -> RepoResult<Vec<Commit>> {
        let commits = self
            .inner
            .commits
            .history(start.clone())
            .take(limit.unwrap_or(usize::MAX))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(commits)
    }

    /// Nearest common ancestor of two commits.
    ///
    /// None when the histories are unrelated or either commit is unknown.
    pub fn find_common_ancestor(&self, a: &CommitId, b: &CommitId) -> RepoResult<Option<CommitId>> {
        if !self.inner.commits.exists(a) || !self.inner.commits.exists(b) {
            return Ok(None);
        }
        Ok(self.inner.commits.merge_base(a, b)?)
    }

    // ==================== Status and diff ====================

    /// Index relative to HEAD's document.
    pub fn diff_index(&self) -> RepoResult<MapDiff> {
        Ok(diff_maps(&self.get_index()?, &self.head_document()?))
    }

    /// Changes that lead from `base` to `target`.
    pub fn diff_commits(&self, base: &CommitId, target: &CommitId) -> RepoResult<MapDiff> {
        let base = self.inner.commits.load(base)?;
        let target = self.inner.commits.load(target)?;
        Ok(diff_maps(&target.document, &base.document))
    }

    pub fn has_uncommitted_changes(&self) -> RepoResult<bool> {
        Ok(self.diff_index()?.has_changes())
    }

    pub fn status(&self) -> RepoResult<Status> {
        Ok(Status {
            head: self.head()?,
            head_commit: self.head_commit()?,
            changes: self.diff_index()?,
            stash_count: self.inner.stash.len()?,
        })
    }

    // ==================== Tags ====================

    /// Tag a commit, HEAD's by default.
    #[instrument(skip(self))]
    pub fn create_tag(&self, name: &str, commit: Option<&CommitId>) -> RepoResult<CommitId> {
        let tag = TagName::new(name)?;
        self.with_write_lock(|| {
            if RefManager::tag_exists(&self.inner.layout, &tag) {
                return Err(StorageError::TagAlreadyExists(tag.to_string()).into());
            }
            let target = match commit {
                Some(id) => {
                    self.ensure_commit(id)?;
                    id.clone()
                }
                None => self.head_commit()?.ok_or(RepoError::NoCommits)?,
            };

            RefManager::create_tag(&self.inner.layout, &tag, &target)?;
            info!(tag = %tag, commit = %target, "created tag");
            self.emit(
                self.event(EventKind::TagCreate)
                    .reference(tag.as_str())
                    .payload(json!({ "commit": target })),
            );
            Ok(target)
        })
    }

    pub fn get_tag(&self, name: &str) -> RepoResult<Option<CommitId>> {
        let tag = TagName::new(name)?;
        Ok(RefManager::resolve_tag(&self.inner.layout, &tag)?)
    }

    #[instrument(skip(self))]
    pub fn delete_tag(&self, name: &str) -> RepoResult<()> {
        let tag = TagName::new(name)?;
        self.with_write_lock(|| {
            RefManager::delete_tag(&self.inner.layout, &tag)?;
            info!(tag = %tag, "deleted tag");
            self.emit(self.event(EventKind::TagDelete).reference(tag.as_str()));
            Ok(())
        })
    }

    pub fn list_tags(&self) -> RepoResult<Vec<TagName>> {
        Ok(RefManager::list_tags(&self.inner.layout)?)
    }

    // ==================== Stash ====================

    /// Save the index aside and reset it to HEAD's document.
    #[instrument(skip(self))]
    pub fn stash_push(&self, message: Option<&str>) -> RepoResult<StashEntry> {
        self.with_write_lock(|| {
            let staged = self.get_index()?;
            let head_document = self.head_document()?;
            if staged == head_document {
                return Err(RepoError::NothingToStash);
            }

            let branch = self.current_branch()?;
            let head = self.head_commit()?;
            let message = match message {
                Some(message) => message.to_string(),
                None => format!(
                    "WIP on {}: {}",
                    branch.as_ref().map(BranchName::as_str).unwrap_or("(detached)"),
                    head.as_ref().map(CommitId::short).unwrap_or("(no commits)")
                ),
            };

            let entry = StashEntry::new(message, branch.map(String::from), head, staged);
            self.inner.stash.push(&entry)?;
            self.write_index(&head_document)?;

            info!(stash = %entry.id, "stashed index");
            self.emit(
                self.event(EventKind::StashPush)
                    .reference(entry.id.as_str())
                    .payload(json!({ "message": entry.message, "branch": entry.branch })),
            );
            Ok(entry)
        })
    }

    /// Stash entries, most recent first.
    pub fn stash_list(&self) -> RepoResult<Vec<StashEntry>> {
        Ok(self.inner.stash.list()?)
    }

    /// The entry at `index` without removing it.
    pub fn stash_peek(&self, index: usize) -> RepoResult<StashEntry> {
        match self.inner.stash.get(index)? {
            Some(entry) => Ok(entry),
            None => Err(self.out_of_range(index)?),
        }
    }

    /// Restore the entry at `index` into the index and drop it.
    #[instrument(skip(self))]
    pub fn stash_pop(&self, index: usize) -> RepoResult<StashEntry> {
        self.with_write_lock(|| {
            let entry = self.stash_peek(index)?;
            self.write_index(&entry.index_data)?;
            self.inner.stash.remove(index)?;

            info!(stash = %entry.id, "applied stash entry");
            self.emit(self.event(EventKind::StashPop).reference(entry.id.as_str()));
            Ok(entry)
        })
    }

    /// Remove the entry at `index` without applying it.
    #[instrument(skip(self))]
    pub fn stash_drop(&self, index: usize) -> RepoResult<StashEntry> {
        self.with_write_lock(|| {
            let entry = match self.inner.stash.remove(index)? {
                Some(entry) => entry,
                None => return Err(self.out_of_range(index)?),
            };

            info!(stash = %entry.id, "dropped stash entry");
            self.emit(self.event(EventKind::StashDrop).reference(entry.id.as_str()));
            Ok(entry)
        })
    }

    /// Remove every stash entry, returning how many there were.
    #[instrument(skip(self))]
    pub fn stash_clear(&self) -> RepoResult<usize> {
        self.with_write_lock(|| {
            let count = self.inner.stash.clear()?;
            info!(count, "cleared stash");
            self.emit(self.event(EventKind::StashClear).payload(json!({ "count": count })));
            Ok(count)
        })
    }

    fn out_of_range(&self, index: usize) -> RepoResult<RepoError> {
        Ok(RepoError::StashIndexOutOfRange {
            index,
            len: self.inner.stash.len()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::events::EventBuffer;
    use crate::storage::Collection;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path(), "Test Project", "Ada", "ada@example.com").unwrap();
        (dir, repo)
    }

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn commit(repo: &Repository, value: Value, message: &str) -> Commit {
        repo.update_index(&doc(value)).unwrap();
        repo.create_commit(message, None, None).unwrap().into_commit().unwrap()
    }

    #[test]
    fn test_init_layout() {
        let (dir, repo) = setup();

        assert!(repo.exists());
        assert!(repo.is_valid());
        assert!(dir.path().join(".gitmap/refs/remotes/origin").is_dir());
        assert_eq!(repo.head().unwrap(), Head::Attached(BranchName::main()));
        assert_eq!(repo.head_commit().unwrap(), None);
        assert_eq!(repo.list_branches().unwrap(), vec![BranchName::main()]);
        assert!(repo.get_index().unwrap().is_empty());

        let config = repo.get_config().unwrap();
        assert_eq!(config.project_name, "Test Project");
        assert_eq!(config.user_name, "Ada");
        assert!(!dir.path().join(".gitmap/LOCK").exists());
    }

    #[test]
    fn test_init_twice_fails() {
        let (dir, _repo) = setup();
        let result = Repository::init(dir.path(), "", "", "");
        assert!(matches!(result, Err(RepoError::AlreadyExists(_))));
    }

    #[test]
    fn test_init_defaults_project_name() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("city-map");
        let repo = Repository::init(&root, "", "", "").unwrap();
        assert_eq!(repo.get_config().unwrap().project_name, "city-map");
    }

    #[test]
    fn test_open_and_discover() {
        let (dir, _repo) = setup();

        assert!(Repository::open(dir.path()).is_ok());

        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        let found = Repository::discover(&nested).unwrap();
        assert_eq!(found.root(), dir.path());

        let other = TempDir::new().unwrap();
        let err = Repository::open(other.path()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_commit_chain() {
        let (_dir, repo) = setup();

        let mut ids = Vec::new();
        for i in 0..5 {
            let c = commit(&repo, json!({"layers": [{"id": "a", "v": i}]}), &format!("commit {}", i));
            ids.push(c.id);
        }

        let history = repo.get_commit_history(None).unwrap();
        assert_eq!(history.len(), 5);
        let walked: Vec<CommitId> = history.iter().map(|c| c.id.clone()).collect();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(walked, expected);
        assert!(history.last().unwrap().is_root());

        let limited = repo.get_commit_history(Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].message, "commit 4");
    }

    #[test]
    fn test_nothing_to_commit() {
        let (_dir, repo) = setup();

        // empty index, no commits
        assert_eq!(repo.create_commit("empty", None, None).unwrap(), CommitOutcome::NothingToCommit);

        commit(&repo, json!({"layers": [{"id": "a"}]}), "first");
        let outcome = repo.create_commit("again", None, None).unwrap();
        assert_eq!(outcome, CommitOutcome::NothingToCommit);
        assert_eq!(repo.get_commit_history(None).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_author_fallback() {
        let (_dir, repo) = setup();

        let c = commit(&repo, json!({"title": "x"}), "first");
        assert_eq!(c.author, "Ada");

        repo.update_index_value(json!({"title": "y"})).unwrap();
        let c = repo.create_commit("second", Some("Grace"), None).unwrap().into_commit().unwrap();
        assert_eq!(c.author, "Grace");
    }

    #[test]
    fn test_commit_detached_fails() {
        let (_dir, repo) = setup();
        let first = commit(&repo, json!({"layers": [{"id": "a"}]}), "first");

        repo.checkout_commit(&first.id).unwrap();
        assert!(repo.head().unwrap().is_detached());
        assert_eq!(repo.current_branch().unwrap(), None);
        assert_eq!(repo.head_commit().unwrap(), Some(first.id.clone()));

        repo.update_index_value(json!({"layers": []})).unwrap();
        let err = repo.create_commit("detached", None, None).unwrap_err();
        assert!(matches!(err, RepoError::DetachedHead));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_has_uncommitted_changes() {
        let (_dir, repo) = setup();
        assert!(!repo.has_uncommitted_changes().unwrap());

        repo.update_index_value(json!({"some": "data"})).unwrap();
        assert!(repo.has_uncommitted_changes().unwrap());

        repo.create_commit("first", None, None).unwrap();
        assert!(!repo.has_uncommitted_changes().unwrap());

        let status = repo.status().unwrap();
        assert!(status.is_clean());
        assert_eq!(status.stash_count, 0);
    }

    #[test]
    fn test_update_index_rejects_non_object() {
        let (_dir, repo) = setup();
        let err = repo.update_index_value(json!([1, 2])).unwrap_err();
        assert!(matches!(err, RepoError::InvalidDocument));
    }

    #[test]
    fn test_branch_lifecycle() {
        let (_dir, repo) = setup();

        // a branch created before any commit has no tip
        repo.create_branch("early").unwrap();
        assert_eq!(repo.get_branch_commit("early").unwrap(), None);

        let first = commit(&repo, json!({"layers": [{"id": "a"}]}), "first");
        repo.create_branch("feature/roads").unwrap();
        assert_eq!(repo.get_branch_commit("feature/roads").unwrap(), Some(first.id.clone()));
        assert!(repo.branch_exists("feature/roads").unwrap());

        let err = repo.create_branch("feature/roads").unwrap_err();
        assert!(err.is_precondition());

        let names: Vec<String> = repo.list_branches().unwrap().into_iter().map(String::from).collect();
        assert_eq!(names, vec!["early", "feature/roads", "main"]);

        repo.delete_branch("feature/roads").unwrap();
        assert!(!repo.branch_exists("feature/roads").unwrap());
        assert!(repo.delete_branch("feature/roads").unwrap_err().is_not_found());

        let err = repo.delete_branch("main").unwrap_err();
        assert!(matches!(err, RepoError::DeleteCurrentBranch(_)));

        // commits survive branch deletion
        assert!(repo.get_commit(&first.id).is_ok());
    }

    #[test]
    fn test_create_branch_at_and_update_branch() {
        let (_dir, repo) = setup();
        let first = commit(&repo, json!({"layers": [{"id": "a"}]}), "first");
        let second = commit(&repo, json!({"layers": [{"id": "b"}]}), "second");

        repo.create_branch_at("old", &first.id).unwrap();
        assert_eq!(repo.get_branch_commit("old").unwrap(), Some(first.id.clone()));

        repo.update_branch("old", &second.id).unwrap();
        assert_eq!(repo.get_branch_commit("old").unwrap(), Some(second.id.clone()));

        assert!(repo.update_branch("missing", &second.id).unwrap_err().is_not_found());

        let bogus = CommitId::new("deadbeef0000").unwrap();
        assert!(repo.create_branch_at("bad", &bogus).unwrap_err().is_not_found());
        assert!(!repo.branch_exists("bad").unwrap());
    }

    #[test]
    fn test_invalid_branch_name() {
        let (_dir, repo) = setup();
        let err = repo.create_branch("bad name").unwrap_err();
        assert!(matches!(err, RepoError::InvalidName(_)));

        // dot-prefixed names would be hidden from listings
        assert!(matches!(repo.create_branch(".tmpwork").unwrap_err(), RepoError::InvalidName(_)));
        assert!(matches!(repo.branch_exists(".tmpwork").unwrap_err(), RepoError::InvalidName(_)));
        let names: Vec<String> = repo.list_branches().unwrap().into_iter().map(String::from).collect();
        assert_eq!(names, vec!["main"]);
    }

    #[test]
    fn test_nested_branch_name_collision() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"layers": [{"id": "a"}]}), "first");
        repo.create_branch("feature").unwrap();
        repo.create_branch("a/b").unwrap();

        let err = repo.create_branch("feature/x").unwrap_err();
        assert!(matches!(err, RepoError::Storage(StorageError::RefNameConflict { .. })));
        assert!(err.is_precondition());
        assert!(repo.create_branch("a").unwrap_err().is_precondition());

        repo.create_tag("v1", None).unwrap();
        assert!(repo.create_tag("v1/rc", None).unwrap_err().is_precondition());
    }

    #[test]
    fn test_checkout_loads_index() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"layers": [{"id": "a"}]}), "first");

        repo.create_branch("feat").unwrap();
        repo.checkout_branch("feat").unwrap();
        assert_eq!(repo.current_branch().unwrap(), Some(BranchName::new("feat").unwrap()));
        commit(&repo, json!({"layers": [{"id": "a"}, {"id": "b"}]}), "second");

        repo.checkout_branch("main").unwrap();
        assert_eq!(repo.get_index().unwrap().ids(Collection::Layers), vec!["a"]);

        repo.checkout_branch("feat").unwrap();
        assert_eq!(repo.get_index().unwrap().ids(Collection::Layers), vec!["a", "b"]);

        assert!(repo.checkout_branch("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_checkout_branch_without_commits_clears_index() {
        let (_dir, repo) = setup();
        repo.create_branch("empty").unwrap();
        commit(&repo, json!({"layers": [{"id": "a"}]}), "first");

        repo.checkout_branch("empty").unwrap();
        assert!(repo.get_index().unwrap().is_empty());
    }

    #[test]
    fn test_find_common_ancestor() {
        let (_dir, repo) = setup();
        let first = commit(&repo, json!({"layers": [{"id": "a"}]}), "first");

        repo.create_branch("feat").unwrap();
        let main_tip = commit(&repo, json!({"layers": [{"id": "a"}, {"id": "m"}]}), "main");
        repo.checkout_branch("feat").unwrap();
        let feat_tip = commit(&repo, json!({"layers": [{"id": "a"}, {"id": "f"}]}), "feat");

        assert_eq!(repo.find_common_ancestor(&main_tip.id, &feat_tip.id).unwrap(), Some(first.id.clone()));
        assert_eq!(repo.find_common_ancestor(&first.id, &first.id).unwrap(), Some(first.id.clone()));

        let bogus = CommitId::new("0123456789ab").unwrap();
        assert_eq!(repo.find_common_ancestor(&bogus, &first.id).unwrap(), None);
    }

    #[test]
    fn test_diff_index_and_commits() {
        let (_dir, repo) = setup();
        let first = commit(&repo, json!({"layers": [{"id": "a", "title": "A"}]}), "first");
        let second = commit(&repo, json!({"layers": [{"id": "a", "title": "A"}, {"id": "b", "title": "B"}]}), "second");

        let diff = repo.diff_commits(&first.id, &second.id).unwrap();
        assert_eq!(diff.added_layers().len(), 1);
        assert_eq!(diff.added_layers()[0].layer_id, "b");
        assert!(diff.removed_layers().is_empty());

        repo.update_index_value(json!({"layers": [{"id": "b", "title": "B"}]})).unwrap();
        let diff = repo.diff_index().unwrap();
        assert_eq!(diff.removed_layers().len(), 1);
        assert_eq!(diff.removed_layers()[0].layer_id, "a");
    }

    #[test]
    fn test_tags() {
        let (_dir, repo) = setup();

        let err = repo.create_tag("v0", None).unwrap_err();
        assert!(matches!(err, RepoError::NoCommits));

        let first = commit(&repo, json!({"layers": [{"id": "a"}]}), "first");
        let second = commit(&repo, json!({"layers": [{"id": "b"}]}), "second");

        assert_eq!(repo.create_tag("v1", None).unwrap(), second.id);
        assert_eq!(repo.create_tag("release/v0.9", Some(&first.id)).unwrap(), first.id);
        assert!(repo.create_tag("v1", None).unwrap_err().is_precondition());

        let bogus = CommitId::new("0123456789ab").unwrap();
        assert!(repo.create_tag("v2", Some(&bogus)).unwrap_err().is_not_found());

        assert_eq!(repo.get_tag("v1").unwrap(), Some(second.id.clone()));
        assert_eq!(repo.get_tag("missing").unwrap(), None);

        let names: Vec<String> = repo.list_tags().unwrap().iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["release/v0.9", "v1"]);

        repo.delete_tag("v1").unwrap();
        assert!(repo.delete_tag("v1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_stash_round_trip() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"layers": [{"id": "a"}]}), "first");

        let staged = doc(json!({"layers": [{"id": "a"}, {"id": "wip"}]}));
        repo.update_index(&staged).unwrap();
        let before = repo.stash_list().unwrap().len();

        let entry = repo.stash_push(None).unwrap();
        assert!(entry.message.starts_with("WIP on main: "));
        assert_eq!(repo.get_index().unwrap(), repo.head_document().unwrap());
        assert_eq!(repo.stash_list().unwrap().len(), before + 1);

        let popped = repo.stash_pop(0).unwrap();
        assert_eq!(popped.id, entry.id);
        assert_eq!(repo.get_index().unwrap(), staged);
        assert_eq!(repo.stash_list().unwrap().len(), before);
    }

    #[test]
    fn test_stash_nothing_to_stash() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"layers": [{"id": "a"}]}), "first");
        assert!(matches!(repo.stash_push(None), Err(RepoError::NothingToStash)));
    }

    #[test]
    fn test_stash_ordering_and_errors() {
        let (_dir, repo) = setup();

        assert!(matches!(
            repo.stash_pop(0),
            Err(RepoError::StashIndexOutOfRange { index: 0, len: 0 })
        ));
        assert!(matches!(repo.stash_drop(0), Err(RepoError::StashIndexOutOfRange { .. })));

        repo.update_index_value(json!({"layers": [{"id": "one"}]})).unwrap();
        repo.stash_push(Some("First")).unwrap();
        repo.update_index_value(json!({"layers": [{"id": "two"}]})).unwrap();
        repo.stash_push(Some("Second")).unwrap();

        let entries = repo.stash_list().unwrap();
        assert_eq!(entries[0].message, "Second");
        assert_eq!(entries[1].message, "First");
        assert_eq!(repo.stash_peek(1).unwrap().message, "First");
        assert!(matches!(
            repo.stash_peek(5),
            Err(RepoError::StashIndexOutOfRange { index: 5, len: 2 })
        ));

        let dropped = repo.stash_drop(0).unwrap();
        assert_eq!(dropped.message, "Second");
        assert_eq!(repo.stash_clear().unwrap(), 1);
        assert!(repo.stash_list().unwrap().is_empty());
    }

    #[test]
    fn test_stash_detached_message() {
        let (_dir, repo) = setup();
        let first = commit(&repo, json!({"layers": [{"id": "a"}]}), "first");
        repo.checkout_commit(&first.id).unwrap();

        repo.update_index_value(json!({"layers": []})).unwrap();
        let entry = repo.stash_push(None).unwrap();
        assert_eq!(entry.message, format!("WIP on (detached): {}", first.id.short()));
        assert_eq!(entry.branch, None);
        assert_eq!(entry.head, Some(first.id));
    }

    #[test]
    fn test_lock_blocks_writers() {
        let (dir, repo) = setup();
        let lock = RepoLock::acquire(&dir.path().join(".gitmap/LOCK")).unwrap();

        let err = repo.create_branch("blocked").unwrap_err();
        assert!(matches!(err, RepoError::Storage(StorageError::Locked { .. })));
        assert!(err.is_precondition());

        // reads still work
        assert!(repo.list_branches().is_ok());

        drop(lock);
        repo.create_branch("blocked").unwrap();
    }

    #[test]
    fn test_force_unlock() {
        let (dir, repo) = setup();
        std::fs::write(dir.path().join(".gitmap/LOCK"), "999999").unwrap();

        assert!(repo.force_unlock().unwrap());
        assert!(!repo.force_unlock().unwrap());
        repo.create_branch("after").unwrap();
    }

    #[test]
    fn test_sink_handle_shares_writer_mutex() {
        let (_dir, repo) = setup();
        let before = repo.clone();
        let with_sink = repo.with_event_sink(Arc::new(EventBuffer::new()));

        assert!(Arc::ptr_eq(&before.inner.writer, &with_sink.inner.writer));
        let _held = before.inner.writer.lock();
        assert!(with_sink.inner.writer.try_lock().is_none());
    }

    #[test]
    fn test_events_emitted_after_success() {
        let (_dir, repo) = setup();
        let buffer = Arc::new(EventBuffer::new());
        let repo = repo.with_event_sink(buffer.clone());

        let first = commit(&repo, json!({"layers": [{"id": "a"}]}), "first");
        repo.create_branch("feat").unwrap();
        repo.create_tag("v1", None).unwrap();
        let _ = repo.create_branch("feat");
        let _ = repo.create_commit("noop", None, Some("why"));

        assert_eq!(
            buffer.kinds(),
            vec![EventKind::Commit, EventKind::BranchCreate, EventKind::TagCreate]
        );

        let events = buffer.events();
        assert_eq!(events[0].reference.as_deref(), Some(first.id.as_str()));
        assert_eq!(events[0].actor.as_deref(), Some("Ada"));
        assert_eq!(events[0].payload["layers_count"], 1);
        assert_eq!(events[0].payload["branch"], "main");
    }
}
