//! Resolves the tracked remote branch and validates stored pointers.

use devflow_core::{CommitId, SyncConfig};

use crate::error::SyncError;
use crate::vcs::Vcs;

pub struct CommitResolver<'a> {
    vcs: &'a dyn Vcs,
    remote: &'a str,
    branch: &'a str,
}

impl<'a> CommitResolver<'a> {
    pub fn new(vcs: &'a dyn Vcs, config: &'a SyncConfig) -> Self {
        Self {
            vcs,
            remote: &config.remote,
            branch: &config.default_branch,
        }
    }

    fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    /// Fetch the tracked branch, then resolve its tip. Not retried.
    pub fn resolve_remote_head(&self) -> Result<CommitId, SyncError> {
        self.vcs.fetch(self.remote, self.branch)?;
        self.local_remote_head()
    }

    /// The remote-tracking ref as of the last fetch. No network access.
    pub fn local_remote_head(&self) -> Result<CommitId, SyncError> {
        self.vcs.resolve_ref(&self.remote_ref())
    }

    /// Whether `commit` is still part of `head`'s history. Lookup failures
    /// other than timeouts count as unreachable.
    pub fn ensure_reachable(&self, commit: &CommitId, head: &CommitId) -> Result<bool, SyncError> {
        match self.vcs.ensure_reachable(commit, head) {
            Ok(reachable) => Ok(reachable),
            Err(e @ SyncError::Timeout { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(commit = %commit, error = %e, "reachability check failed");
                Ok(false)
            }
        }
    }
}
