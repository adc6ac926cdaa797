//! The version-control capability the sync engine consumes.
//!
//! [`GitCli`](crate::git::GitCli) is the production implementation. The
//! orchestrator only ever talks to `&dyn Vcs`, so tests substitute an
//! in-memory fake.

use devflow_core::{Change, CommitId};

use crate::error::SyncError;

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommitId),
    /// Nothing was staged relative to `HEAD`. Not an error.
    Noop,
}

/// Operations over one local checkout. Paths are repo-relative with forward
/// slashes.
pub trait Vcs {
    /// Fetch `branch` from `remote`, updating the remote-tracking ref.
    fn fetch(&self, remote: &str, branch: &str) -> Result<(), SyncError>;

    /// Resolve a ref (branch, remote-tracking ref, or SHA) to a commit.
    fn resolve_ref(&self, reference: &str) -> Result<CommitId, SyncError>;

    /// True when `commit` exists locally and is an ancestor of (or equal to)
    /// `head`. A pointer rewritten out of history fails the second check even
    /// if the object is still around.
    fn ensure_reachable(&self, commit: &CommitId, head: &CommitId) -> Result<bool, SyncError>;

    /// Path-level changes between two commits, in VCS output order, with
    /// rename detection enabled.
    fn diff_name_status(&self, base: &CommitId, head: &CommitId) -> Result<Vec<Change>, SyncError>;

    /// Every tracked file at `commit`.
    fn list_all_files(&self, commit: &CommitId) -> Result<Vec<String>, SyncError>;

    /// Raw blob content of `path` at `commit`.
    fn read_file(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>, SyncError>;

    /// Prepare a private work tree on local branch `name`, created or reset
    /// to `from`. The caller's checkout keeps its HEAD, index and files.
    fn checkout_branch(&self, name: &str, from: &str) -> Result<(), SyncError>;

    /// Copy `paths` from the checkout into the work tree and force-add them,
    /// even if ignored. Files missing from the checkout are staged as
    /// deletions.
    fn stage(&self, paths: &[String]) -> Result<(), SyncError>;

    /// Commit the work tree's index.
    fn commit(&self, message: &str) -> Result<CommitOutcome, SyncError>;

    /// Rebase the work branch onto `onto`. On conflict the rebase is aborted
    /// before [`SyncError::PublishConflict`] is returned.
    fn rebase_onto(&self, onto: &str) -> Result<(), SyncError>;

    /// Push `local` to `remote_branch` on `remote`. Never forced.
    fn push(&self, remote: &str, local: &str, remote_branch: &str) -> Result<(), SyncError>;

    /// Push `local` over `remote_branch`, a branch only devflow writes. The
    /// push is refused if the remote branch moved since it was last read.
    fn push_replacing(&self, remote: &str, local: &str, remote_branch: &str) -> Result<(), SyncError>;

    /// Tear down whatever `checkout_branch` set up. The branch itself stays.
    fn release_worktree(&self) -> Result<(), SyncError> {
        Ok(())
    }

    /// Keep `pattern` out of `git status` for this clone only.
    fn exclude_locally(&self, _pattern: &str) -> Result<(), SyncError> {
        Ok(())
    }
}
