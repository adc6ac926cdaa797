//! Shared entrypoints used by the CLI: wire the production pieces together
//! for one checkout.

use std::path::Path;

use devflow_core::{PublishPolicy, RepositoryCheckout, SyncConfig};
use devflow_renderer::TemplateEngine;

use crate::builder::BuilderRegistry;
use crate::error::{BoxError, SyncError};
use crate::git::GitCli;
use crate::lock::{self, LockHolder};
use crate::orchestrator::{ChangePlan, ChangePlanner, Orchestrator, SyncOptions, SyncReport};
use crate::publish::{BranchReview, DirectPush, Publisher, ReviewRequest, ReviewRequester};
use crate::staleness::{self, KnowledgeBaseStatus};

/// Review collaborator that only records the pushed branch in the log. Used
/// when no platform integration is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReviewRequester;

impl ReviewRequester for LogReviewRequester {
    fn request_review(&self, request: &ReviewRequest) -> Result<String, BoxError> {
        tracing::info!(
            branch = %request.branch,
            base = %request.base,
            title = %request.title,
            "review branch pushed; open a pull request to merge it"
        );
        Ok(request.branch.clone())
    }
}

/// The publisher for `policy`. The review policy falls back to
/// [`LogReviewRequester`] when no requester is given.
pub fn publisher_for(
    policy: PublishPolicy,
    config: &SyncConfig,
    requester: Option<Box<dyn ReviewRequester>>,
) -> Box<dyn Publisher> {
    match policy {
        PublishPolicy::Direct => Box::new(DirectPush::new(config)),
        PublishPolicy::Review => Box::new(BranchReview::new(
            config,
            requester.unwrap_or_else(|| Box::new(LogReviewRequester)),
        )),
    }
}

fn checkout_for(root: &Path, git: &GitCli, config: &SyncConfig) -> RepositoryCheckout {
    let checkout = RepositoryCheckout::new(root);
    match git.remote_url(&config.remote) {
        Some(url) => checkout.with_remote(url),
        None => checkout,
    }
}

/// Run one sync of the checkout at `root` with `git`, the default builders,
/// and the publisher for `policy`.
pub fn run_sync(
    config: &SyncConfig,
    root: &Path,
    policy: PublishPolicy,
    options: SyncOptions,
    requester: Option<Box<dyn ReviewRequester>>,
) -> Result<SyncReport, SyncError> {
    config.validate()?;
    let git = GitCli::new(root, config).with_deadline(options.deadline);
    let checkout = checkout_for(root, &git, config);
    let templates = TemplateEngine::new(config.template_dir.as_deref())?;
    let builders = BuilderRegistry::with_defaults(config);
    let publisher = publisher_for(policy, config, requester);

    Orchestrator::new(config, &git, &builders, publisher.as_ref(), &templates).sync(&checkout, &options)
}

/// Fetch and compute the pending change set without building.
pub fn preview_changes(config: &SyncConfig, root: &Path) -> Result<ChangePlan, SyncError> {
    config.validate()?;
    let git = GitCli::new(root, config);
    ChangePlanner::new(config, &git).plan(root)
}

/// Classify the knowledge base without fetching.
pub fn status(config: &SyncConfig, root: &Path) -> Result<KnowledgeBaseStatus, SyncError> {
    let git = GitCli::new(root, config);
    staleness::check(config, root, &git)
}

/// Remove the writer lock. Returns the holder that was evicted, if any.
pub fn unlock(config: &SyncConfig, root: &Path) -> Result<Option<LockHolder>, SyncError> {
    let path = config.lock_file_path(root);
    let holder = lock::inspect(&path)?;
    if lock::force_release(&path)? {
        tracing::warn!(path = %path.display(), "writer lock removed by operator");
    }
    Ok(holder)
}
