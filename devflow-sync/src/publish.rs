//! Publishing the knowledge-base subtree back to the remote.
//!
//! Both strategies share the same preparation:
//!
//! 1. Fetch the default branch; set up a private work tree of the work
//!    branch at its tip. The caller's checkout is never switched or reset.
//! 2. Copy in and force-add only the knowledge-base subtree.
//! 3. Commit. Nothing staged → [`PublishOutcome::Noop`], no push.
//! 4. Re-fetch and rebase onto the default branch; conflicts abort the
//!    rebase and fail.
//!
//! They differ only in where the result goes: [`DirectPush`] fast-forwards
//! the default branch, [`BranchReview`] replaces a dedicated branch and
//! hands it to a [`ReviewRequester`]. The work tree is released afterwards,
//! whether or not the publish succeeded.

use devflow_core::{CommitId, SyncConfig};

use crate::error::{BoxError, SyncError};
use crate::vcs::{CommitOutcome, Vcs};

/// Inputs shared by every strategy.
#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    /// The source commit the artifacts describe.
    pub head: &'a CommitId,
    pub message: &'a str,
    /// Repo-relative paths to stage (the knowledge-base subtree).
    pub paths: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The default branch now contains `commit`.
    Pushed { commit: CommitId, branch: String },
    /// `branch` was pushed and handed to the review collaborator, which
    /// returned `request` (an id or URL).
    ReviewRequested {
        commit: CommitId,
        branch: String,
        request: String,
    },
    /// Nothing to commit.
    Noop,
}

impl PublishOutcome {
    pub fn commit(&self) -> Option<&CommitId> {
        match self {
            PublishOutcome::Pushed { commit, .. } | PublishOutcome::ReviewRequested { commit, .. } => Some(commit),
            PublishOutcome::Noop => None,
        }
    }
}

/// A publish strategy.
pub trait Publisher {
    fn name(&self) -> &'static str;

    fn publish(&self, vcs: &dyn Vcs, request: &PublishRequest<'_>) -> Result<PublishOutcome, SyncError>;
}

// ---------------------------------------------------------------------------
// Shared preparation
// ---------------------------------------------------------------------------

/// Branch names every strategy needs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    remote: String,
    default_branch: String,
    work_branch: String,
}

impl Target {
    fn from_config(config: &SyncConfig) -> Self {
        Self {
            remote: config.remote.clone(),
            default_branch: config.default_branch.clone(),
            work_branch: config.work_branch.clone(),
        }
    }

    fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote, self.default_branch)
    }

    /// Steps 1-4. `None` when there was nothing to commit.
    fn prepare(&self, vcs: &dyn Vcs, request: &PublishRequest<'_>) -> Result<Option<CommitId>, SyncError> {
        let onto = self.remote_ref();
        vcs.fetch(&self.remote, &self.default_branch)?;
        vcs.checkout_branch(&self.work_branch, &onto)?;
        vcs.stage(request.paths)?;

        match vcs.commit(request.message)? {
            CommitOutcome::Noop => {
                tracing::info!(head = %request.head, "no knowledge-base changes to commit");
                return Ok(None);
            }
            CommitOutcome::Committed(commit) => {
                tracing::debug!(commit = %commit, "knowledge-base commit created");
            }
        }

        vcs.fetch(&self.remote, &self.default_branch)?;
        vcs.rebase_onto(&onto)?;
        vcs.resolve_ref(&self.work_branch).map(Some)
    }

    /// Run `publish` against a prepared work tree, then release it.
    fn with_worktree<F>(&self, vcs: &dyn Vcs, publish: F) -> Result<PublishOutcome, SyncError>
    where
        F: FnOnce() -> Result<PublishOutcome, SyncError>,
    {
        let result = publish();
        if let Err(e) = vcs.release_worktree() {
            tracing::warn!(error = %e, "failed to remove publish work tree");
        }
        result
    }
}

// ---------------------------------------------------------------------------
// DirectPush
// ---------------------------------------------------------------------------

/// Rebase-and-push straight onto the default branch.
#[derive(Debug, Clone)]
pub struct DirectPush {
    target: Target,
}

impl DirectPush {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            target: Target::from_config(config),
        }
    }
}

impl Publisher for DirectPush {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn publish(&self, vcs: &dyn Vcs, request: &PublishRequest<'_>) -> Result<PublishOutcome, SyncError> {
        let t = &self.target;
        t.with_worktree(vcs, || {
            let Some(commit) = t.prepare(vcs, request)? else {
                return Ok(PublishOutcome::Noop);
            };
            vcs.push(&t.remote, &t.work_branch, &t.default_branch)?;
            tracing::info!(commit = %commit, branch = %t.default_branch, "pushed knowledge base");
            Ok(PublishOutcome::Pushed {
                commit,
                branch: t.default_branch.clone(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// BranchReview
// ---------------------------------------------------------------------------

/// What the review collaborator is asked to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub branch: String,
    pub base: String,
    pub title: String,
    pub head: CommitId,
}

/// Opens a review (pull request, merge request, ...) for a pushed branch.
pub trait ReviewRequester {
    /// Returns an identifier or URL for the created request. Called again
    /// when a rerun replaces a branch that is still under review.
    fn request_review(&self, request: &ReviewRequest) -> Result<String, BoxError>;
}

/// Push a dedicated branch and hand it off for review.
pub struct BranchReview {
    target: Target,
    branch_prefix: String,
    requester: Box<dyn ReviewRequester>,
}

impl BranchReview {
    pub fn new(config: &SyncConfig, requester: Box<dyn ReviewRequester>) -> Self {
        Self {
            target: Target::from_config(config),
            branch_prefix: config.publish.review_branch_prefix.clone(),
            requester,
        }
    }

    /// `<prefix><short sha>`, e.g. `devflow/sync-0123abc`.
    pub fn branch_for(&self, head: &CommitId) -> String {
        format!("{}{}", self.branch_prefix, head.short())
    }

    fn push_for_review(&self, vcs: &dyn Vcs, request: &PublishRequest<'_>) -> Result<PublishOutcome, SyncError> {
        let Some(commit) = self.target.prepare(vcs, request)? else {
            return Ok(PublishOutcome::Noop);
        };
        let t = &self.target;
        let branch = self.branch_for(request.head);
        // A rerun before the review is merged rebuilds the same branch.
        vcs.push_replacing(&t.remote, &t.work_branch, &branch)?;

        let review = ReviewRequest {
            branch: branch.clone(),
            base: t.default_branch.clone(),
            title: request.message.to_owned(),
            head: request.head.clone(),
        };
        let id = self.requester.request_review(&review).map_err(SyncError::Review)?;
        tracing::info!(commit = %commit, branch = %branch, request = %id, "review requested");
        Ok(PublishOutcome::ReviewRequested {
            commit,
            branch,
            request: id,
        })
    }
}

impl Publisher for BranchReview {
    fn name(&self) -> &'static str {
        "review"
    }

    fn publish(&self, vcs: &dyn Vcs, request: &PublishRequest<'_>) -> Result<PublishOutcome, SyncError> {
        let t = &self.target;
        t.with_worktree(vcs, || self.push_for_review(vcs, request))
    }
}
