//! Branch merges, cherry-pick and revert.
//!
//! All three produce a commit on the current branch through
//! `Repository::write_commit`, so they share its lineage rules and events.
//!
//! ```text
//!   merge(feat)
//!     ours   = index, or HEAD's document when the index is empty
//!     theirs = tip of feat
//!     base   = merge base (three-way strategy only)
//!        │
//!        ▼
//!   merge_maps ──► conflicts? ──yes──► Conflicted(PendingMerge)
//!                      │                    │ resolve + conclude_merge
//!                      no ◄─────────────────┘
//!                      ▼
//!        stage merged document ──► commit (parent2 = feat tip)
//! ```

use tracing::{info, instrument};

use crate::merge::{merge_maps, MergeResult};
use crate::repo::api::{CommitDraft, CommitOutcome, Repository};
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::events::EventKind;
use crate::repo::revert::compute_revert;
use crate::storage::{BranchName, Commit, CommitId, CommitMessage, MergeStrategy, RefManager, StorageError};

/// how a merge should run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// overrides the configured strategy
    pub strategy: Option<MergeStrategy>,
    /// stage the merged document without committing
    pub no_commit: bool,
}

impl MergeOptions {
    pub fn strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn no_commit(mut self) -> Self {
        self.no_commit = true;
        self
    }
}

/// a merge that has been computed but not committed
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMerge {
    pub result: MergeResult,
    /// branch being merged into
    pub ours: BranchName,
    pub theirs: BranchName,
    pub ours_commit: Option<CommitId>,
    pub theirs_commit: CommitId,
    /// common ancestor used for a three-way merge
    pub base: Option<CommitId>,
}

impl PendingMerge {
    pub fn has_conflicts(&self) -> bool {
        self.result.has_conflicts()
    }

    pub fn message(&self) -> String {
        CommitMessage::merge(self.theirs.as_str(), self.ours.as_str())
    }
}

/// result of a merge
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// merge commit written; its second parent is the merged branch tip
    Committed(Commit),
    /// merged document staged in the index, no commit written
    Staged(PendingMerge),
    /// conflicts need resolving before [`Repository::conclude_merge`]
    Conflicted(PendingMerge),
    /// the branch is already contained in ours
    UpToDate,
}

impl MergeOutcome {
    pub fn commit(&self) -> Option<&Commit> {
        match self {
            MergeOutcome::Committed(commit) => Some(commit),
            _ => None,
        }
    }

    pub fn is_conflicted(&self) -> bool {
        matches!(self, MergeOutcome::Conflicted(_))
    }
}

impl Repository {
    /// Merge a branch into the current one with default options.
    pub fn merge(&self, branch: &str) -> RepoResult<MergeOutcome> {
        self.merge_with(branch, MergeOptions::default())
    }

    #[instrument(skip(self))]
    pub fn merge_with(&self, branch: &str, options: MergeOptions) -> RepoResult<MergeOutcome> {
        let theirs = BranchName::new(branch)?;
        self.with_write_lock(|| {
            let pending = self.prepare_merge(theirs, options)?;
            let Some(pending) = pending else {
                return Ok(MergeOutcome::UpToDate);
            };

            if pending.has_conflicts() {
                info!(
                    theirs = %pending.theirs,
                    conflicts = pending.result.conflicts.len(),
                    "merge stopped on conflicts"
                );
                return Ok(MergeOutcome::Conflicted(pending));
            }
            self.conclude_locked(pending, options.no_commit)
        })
    }

    /// Commit (or stage) a merge once all its conflicts are resolved.
    #[instrument(skip(self, pending), fields(theirs = %pending.theirs))]
    pub fn conclude_merge(&self, pending: PendingMerge, no_commit: bool) -> RepoResult<MergeOutcome> {
        self.with_write_lock(|| self.conclude_locked(pending, no_commit))
    }

    /// compute the merge; None when theirs is already merged
    fn prepare_merge(&self, theirs: BranchName, options: MergeOptions) -> RepoResult<Option<PendingMerge>> {
        let ours = self.current_branch()?.ok_or(RepoError::DetachedHead)?;
        if ours == theirs {
            return Err(RepoError::MergeIntoSelf(theirs.to_string()));
        }
        if !RefManager::branch_exists(self.layout(), &theirs) {
            return Err(StorageError::BranchNotFound(theirs.to_string()).into());
        }

        let theirs_commit = RefManager::resolve_branch(self.layout(), &theirs)?
            .ok_or_else(|| RepoError::BranchHasNoCommits(theirs.to_string()))?;
        let ours_commit = RefManager::resolve_branch(self.layout(), &ours)?;

        if let Some(ours_commit) = &ours_commit {
            if self.commits().is_ancestor(&theirs_commit, ours_commit)? {
                info!(ours = %ours, theirs = %theirs, "already up to date");
                return Ok(None);
            }
        }

        let staged = self.get_index()?;
        let ours_document = if staged.is_empty() {
            self.commit_document(ours_commit.as_ref())?
        } else {
            staged
        };
        let theirs_document = self.commit_document(Some(&theirs_commit))?;

        let strategy = match options.strategy {
            Some(strategy) => strategy,
            None => self.get_config()?.merge_strategy,
        };
        let base = match (strategy, &ours_commit) {
            (MergeStrategy::ThreeWay, Some(ours_commit)) => self.commits().merge_base(ours_commit, &theirs_commit)?,
            _ => None,
        };
        let base_document = match &base {
            Some(base) => Some(self.commit_document(Some(base))?),
            None => None,
        };

        let result = merge_maps(&ours_document, &theirs_document, base_document.as_ref());
        Ok(Some(PendingMerge {
            result,
            ours,
            theirs,
            ours_commit,
            theirs_commit,
            base,
        }))
    }

    fn conclude_locked(&self, pending: PendingMerge, no_commit: bool) -> RepoResult<MergeOutcome> {
        if pending.has_conflicts() {
            return Err(RepoError::UnresolvedConflicts(pending.result.conflicts.len()));
        }
        // ours must still be checked out at the tip the merge was computed against
        let current = self.current_branch()?;
        let tip = RefManager::resolve_branch(self.layout(), &pending.ours)?;
        if current.as_ref() != Some(&pending.ours) || tip != pending.ours_commit {
            return Err(RepoError::StaleMerge(pending.ours.to_string()));
        }

        self.write_index(&pending.result.merged_data)?;
        if no_commit {
            info!(theirs = %pending.theirs, "merge staged");
            return Ok(MergeOutcome::Staged(pending));
        }

        let draft = CommitDraft {
            message: pending.message(),
            document: pending.result.merged_data,
            author: None,
            second_parent: Some(pending.theirs_commit),
        };
        match self.write_commit(EventKind::Merge, draft, None)? {
            CommitOutcome::Created(commit) => Ok(MergeOutcome::Committed(commit)),
            CommitOutcome::NothingToCommit => Ok(MergeOutcome::UpToDate),
        }
    }

    /// Copy a commit's document onto the current branch as a new commit.
    ///
    /// This takes the source snapshot as a whole; it does not replay only
    /// the changes the source introduced.
    #[instrument(skip(self))]
    pub fn cherry_pick(&self, commit: &CommitId, rationale: Option<&str>) -> RepoResult<CommitOutcome> {
        self.with_write_lock(|| {
            let source = self.get_commit(commit)?;
            if self.current_branch()?.is_none() {
                return Err(RepoError::DetachedHead);
            }

            let draft = CommitDraft {
                message: CommitMessage::cherry_pick(&source),
                document: source.document,
                author: None,
                second_parent: None,
            };
            self.write_commit(EventKind::CherryPick, draft, rationale)
        })
    }

    /// Undo what a commit changed, on top of HEAD, as a new commit.
    ///
    /// A root commit is reverted against an empty document.
    #[instrument(skip(self))]
    pub fn revert(&self, commit: &CommitId, rationale: Option<&str>) -> RepoResult<CommitOutcome> {
        self.with_write_lock(|| {
            let target = self.get_commit(commit)?;
            if self.current_branch()?.is_none() {
                return Err(RepoError::DetachedHead);
            }

            let parent_document = self.commit_document(target.parent.as_ref())?;
            let current = self.head_document()?;
            let document = compute_revert(&current, &target.document, &parent_document);

            let draft = CommitDraft {
                message: CommitMessage::revert(&target),
                document,
                author: None,
                second_parent: None,
            };
            self.write_commit(EventKind::Revert, draft, rationale)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::Resolution;
    use crate::repo::events::EventBuffer;
    use crate::storage::{Collection, Document};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path(), "merge", "Ada", "ada@example.com").unwrap();
        (dir, repo)
    }

    fn commit(repo: &Repository, value: Value, message: &str) -> Commit {
        repo.update_index_value(value).unwrap();
        repo.create_commit(message, None, None).unwrap().into_commit().unwrap()
    }

    fn layer_ids(document: &Document) -> Vec<String> {
        document.ids(Collection::Layers)
    }

    /// main and feat diverge from a shared first commit
    fn diverged(repo: &Repository, main: Value, feat: Value) -> (Commit, Commit) {
        repo.create_branch("feat").unwrap();
        let main_tip = commit(repo, main, "on main");
        repo.checkout_branch("feat").unwrap();
        let feat_tip = commit(repo, feat, "on feat");
        repo.checkout_branch("main").unwrap();
        (main_tip, feat_tip)
    }

    #[test]
    fn test_end_to_end_merge() {
        let (_dir, repo) = setup();

        repo.update_index_value(json!({"layers": [{"id": "a"}]})).unwrap();
        let first = repo.create_commit("first", None, None).unwrap().into_commit().unwrap();

        repo.create_branch("feat").unwrap();
        repo.checkout_branch("feat").unwrap();
        repo.update_index_value(json!({"layers": [{"id": "a"}, {"id": "b"}]})).unwrap();
        let second = repo.create_commit("second", None, None).unwrap().into_commit().unwrap();

        repo.checkout_branch("main").unwrap();
        let outcome = repo.merge("feat").unwrap();

        let MergeOutcome::Committed(merge_commit) = outcome else {
            panic!("expected a merge commit, got {:?}", outcome);
        };
        assert_eq!(layer_ids(&merge_commit.document), vec!["a", "b"]);
        assert_eq!(merge_commit.parent, Some(first.id));
        assert_eq!(merge_commit.parent2, Some(second.id));
        assert_eq!(merge_commit.message, "Merge branch 'feat' into 'main'");
        assert!(merge_commit.is_merge());

        assert_eq!(repo.get_branch_commit("main").unwrap(), Some(merge_commit.id.clone()));
        assert_eq!(layer_ids(&repo.get_index().unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_merge_preconditions() {
        let (_dir, repo) = setup();

        assert!(matches!(repo.merge("main"), Err(RepoError::MergeIntoSelf(_))));
        assert!(repo.merge("ghost").unwrap_err().is_not_found());

        repo.create_branch("empty").unwrap();
        assert!(matches!(repo.merge("empty"), Err(RepoError::BranchHasNoCommits(_))));

        let first = commit(&repo, json!({"layers": [{"id": "a"}]}), "first");
        repo.checkout_commit(&first.id).unwrap();
        assert!(matches!(repo.merge("main"), Err(RepoError::DetachedHead)));
    }

    #[test]
    fn test_merge_up_to_date() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"layers": [{"id": "a"}]}), "first");
        repo.create_branch("old").unwrap();
        commit(&repo, json!({"layers": [{"id": "a"}, {"id": "b"}]}), "second");

        assert_eq!(repo.merge("old").unwrap(), MergeOutcome::UpToDate);
    }

    #[test]
    fn test_merge_conflict_then_conclude() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"layers": [{"id": "x", "v": 0}]}), "base");
        let (main_tip, feat_tip) = diverged(
            &repo,
            json!({"layers": [{"id": "x", "v": 1}]}),
            json!({"layers": [{"id": "x", "v": 2}]}),
        );

        let outcome = repo.merge("feat").unwrap();
        let MergeOutcome::Conflicted(mut pending) = outcome else {
            panic!("expected conflicts");
        };
        assert_eq!(pending.result.conflicts.len(), 1);
        assert_eq!(pending.result.conflicts[0].layer_id, "x");
        assert_eq!(pending.ours_commit, Some(main_tip.id.clone()));

        // nothing moved while the merge is pending
        assert_eq!(repo.get_branch_commit("main").unwrap(), Some(main_tip.id.clone()));

        let err = repo.conclude_merge(pending.clone(), false).unwrap_err();
        assert!(matches!(err, RepoError::UnresolvedConflicts(1)));

        pending.result.resolve_all(Resolution::Theirs).unwrap();
        let MergeOutcome::Committed(merged) = repo.conclude_merge(pending, false).unwrap() else {
            panic!("expected a merge commit");
        };
        assert_eq!(merged.document.layers(), &[json!({"id": "x", "v": 2})]);
        assert_eq!(merged.parent2, Some(feat_tip.id));
    }

    #[test]
    fn test_conclude_refuses_stale_merge() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"layers": [{"id": "x", "v": 0}]}), "base");
        let (main_tip, feat_tip) = diverged(
            &repo,
            json!({"layers": [{"id": "x", "v": 1}]}),
            json!({"layers": [{"id": "x", "v": 2}]}),
        );

        let MergeOutcome::Conflicted(mut pending) = repo.merge("feat").unwrap() else {
            panic!("expected conflicts");
        };
        pending.result.resolve_all(Resolution::Ours).unwrap();

        // another branch checked out
        repo.checkout_branch("feat").unwrap();
        let err = repo.conclude_merge(pending.clone(), false).unwrap_err();
        assert!(matches!(err, RepoError::StaleMerge(ref branch) if branch == "main"));
        assert!(err.is_precondition());
        assert_eq!(repo.get_branch_commit("feat").unwrap(), Some(feat_tip.id.clone()));

        // ours moved since the merge was computed
        repo.checkout_branch("main").unwrap();
        let moved = commit(&repo, json!({"layers": [{"id": "x", "v": 1}, {"id": "y"}]}), "moved on");
        let err = repo.conclude_merge(pending, false).unwrap_err();
        assert!(matches!(err, RepoError::StaleMerge(_)));
        assert_eq!(repo.get_branch_commit("main").unwrap(), Some(moved.id.clone()));
        assert_eq!(moved.parent, Some(main_tip.id));
    }

    #[test]
    fn test_merge_no_commit_stages() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"layers": [{"id": "a"}]}), "base");
        let (main_tip, _) = diverged(
            &repo,
            json!({"layers": [{"id": "a"}, {"id": "m"}]}),
            json!({"layers": [{"id": "a"}, {"id": "f"}]}),
        );

        let outcome = repo.merge_with("feat", MergeOptions::default().no_commit()).unwrap();
        let MergeOutcome::Staged(pending) = outcome else {
            panic!("expected a staged merge");
        };
        assert_eq!(pending.result.added, vec!["f"]);
        assert_eq!(repo.get_branch_commit("main").unwrap(), Some(main_tip.id));
        assert_eq!(layer_ids(&repo.get_index().unwrap()), vec!["a", "m", "f"]);

        // the staged merge can still be committed with its lineage
        let MergeOutcome::Committed(merged) = repo.conclude_merge(pending, false).unwrap() else {
            panic!("expected a merge commit");
        };
        assert!(merged.is_merge());
    }

    #[test]
    fn test_two_way_merge_conflicts_on_one_sided_edit() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"layers": [{"id": "a", "v": 0}, {"id": "b", "v": 0}]}), "base");
        diverged(
            &repo,
            json!({"layers": [{"id": "a", "v": 1}, {"id": "b", "v": 0}]}),
            json!({"layers": [{"id": "a", "v": 0}, {"id": "b", "v": 2}]}),
        );

        let outcome = repo.merge("feat").unwrap();
        let MergeOutcome::Conflicted(pending) = outcome else {
            panic!("expected conflicts");
        };
        assert_eq!(pending.result.conflicts.len(), 2);
        assert_eq!(pending.base, None);
    }

    #[test]
    fn test_three_way_merge_uses_merge_base() {
        let (_dir, repo) = setup();
        let base = commit(&repo, json!({"layers": [{"id": "a", "v": 0}, {"id": "b", "v": 0}]}), "base");
        diverged(
            &repo,
            json!({"layers": [{"id": "a", "v": 1}, {"id": "b", "v": 0}]}),
            json!({"layers": [{"id": "a", "v": 0}, {"id": "b", "v": 2}]}),
        );

        let outcome = repo
            .merge_with("feat", MergeOptions::default().strategy(MergeStrategy::ThreeWay))
            .unwrap();
        let MergeOutcome::Committed(merged) = outcome else {
            panic!("expected a clean three-way merge, got {:?}", outcome);
        };
        assert_eq!(
            merged.document.layers(),
            &[json!({"id": "a", "v": 1}), json!({"id": "b", "v": 2})]
        );

        let history = repo.history_from(&merged.id, None).unwrap();
        assert_eq!(history.last().map(|c| c.id.clone()), Some(base.id));
    }

    #[test]
    fn test_configured_strategy_is_used() {
        let (_dir, repo) = setup();
        let config = repo.get_config().unwrap().with_merge_strategy(MergeStrategy::ThreeWay);
        repo.update_config(&config).unwrap();
        assert_eq!(repo.get_config().unwrap(), config);

        commit(&repo, json!({"layers": [{"id": "a", "v": 0}]}), "base");
        diverged(
            &repo,
            json!({"layers": [{"id": "a", "v": 0}, {"id": "m"}]}),
            json!({"layers": [{"id": "a", "v": 5}]}),
        );

        let merged = repo.merge("feat").unwrap();
        let layers = merged.commit().unwrap().document.layers().to_vec();
        assert_eq!(layers, vec![json!({"id": "a", "v": 5}), json!({"id": "m"})]);
    }

    #[test]
    fn test_cherry_pick() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"layers": [{"id": "a"}]}), "base");
        repo.create_branch("feat").unwrap();
        repo.checkout_branch("feat").unwrap();
        let picked = commit(&repo, json!({"layers": [{"id": "a"}, {"id": "hotfix"}]}), "Add hotfix layer");
        repo.checkout_branch("main").unwrap();

        let outcome = repo.cherry_pick(&picked.id, Some("needed on main")).unwrap();
        let new_commit = outcome.commit().unwrap();

        assert_ne!(new_commit.id, picked.id);
        assert!(new_commit.message.contains(picked.id.short()));
        assert_eq!(new_commit.message, format!("Cherry-pick {}: Add hotfix layer", picked.id.short()));
        assert_eq!(new_commit.document, picked.document);
        assert_eq!(new_commit.parent2, None);

        // picking the same snapshot again changes nothing
        assert_eq!(repo.cherry_pick(&picked.id, None).unwrap(), CommitOutcome::NothingToCommit);

        let bogus = CommitId::new("0123456789ab").unwrap();
        assert!(repo.cherry_pick(&bogus, None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_revert() {
        let (_dir, repo) = setup();
        commit(&repo, json!({"title": "Map", "layers": [{"id": "1", "title": "A"}]}), "base");
        let added = commit(
            &repo,
            json!({"title": "Map v2", "layers": [{"id": "1", "title": "A"}, {"id": "2", "title": "B"}]}),
            "Add B",
        );
        commit(
            &repo,
            json!({"title": "Map v2", "layers": [{"id": "1", "title": "A"}, {"id": "2", "title": "B"}, {"id": "3"}]}),
            "Add 3",
        );

        let outcome = repo.revert(&added.id, None).unwrap();
        let reverted = outcome.commit().unwrap();

        assert_eq!(layer_ids(&reverted.document), vec!["1", "3"]);
        assert_eq!(reverted.document.get("title"), Some(&json!("Map")));
        assert_eq!(
            reverted.message,
            format!("Revert \"Add B\"\n\nThis reverts commit {}.", added.id)
        );
        assert_eq!(layer_ids(&repo.get_index().unwrap()), vec!["1", "3"]);
    }

    #[test]
    fn test_revert_initial_commit() {
        let (_dir, repo) = setup();
        let first = commit(&repo, json!({"layers": [{"id": "1"}, {"id": "2"}]}), "first");

        let outcome = repo.revert(&first.id, None).unwrap();
        let reverted = outcome.commit().unwrap();
        assert!(reverted.document.layers().is_empty());
        assert_eq!(reverted.parent, Some(first.id.clone()));
    }

    #[test]
    fn test_cherry_pick_and_revert_refuse_detached_head() {
        let (_dir, repo) = setup();
        let first = commit(&repo, json!({"layers": [{"id": "1"}]}), "first");
        repo.checkout_commit(&first.id).unwrap();

        assert!(matches!(repo.cherry_pick(&first.id, None), Err(RepoError::DetachedHead)));
        assert!(matches!(repo.revert(&first.id, None), Err(RepoError::DetachedHead)));
    }

    #[test]
    fn test_merge_events_carry_rationale() {
        let (_dir, repo) = setup();
        let buffer = Arc::new(EventBuffer::new());
        let repo = repo.with_event_sink(buffer.clone());

        commit(&repo, json!({"layers": [{"id": "a"}]}), "base");
        diverged(
            &repo,
            json!({"layers": [{"id": "a"}, {"id": "m"}]}),
            json!({"layers": [{"id": "a"}, {"id": "f"}]}),
        );
        let merged = repo.merge("feat").unwrap();
        let revert_target = merged.commit().unwrap().id.clone();
        repo.revert(&revert_target, Some("bad merge")).unwrap();

        let events = buffer.events();
        let merge_event = events.iter().find(|e| e.kind == EventKind::Merge).unwrap();
        assert!(merge_event.payload["parent2"].is_string());

        let revert_event = events.last().unwrap();
        assert_eq!(revert_event.kind, EventKind::Revert);
        assert_eq!(revert_event.rationale.as_deref(), Some("bad merge"));
    }
}
