//! The sync state machine.
//!
//! ```text
//! Idle → LockAcquired → BaseValidated → Diffed → BuiltArtifacts
//!      → StateAdvanced → Published → Done
//! ```
//!
//! Every fatal error is wrapped in [`SyncError::Failed`] carrying the stage
//! that was being entered. The writer lock is held from `LockAcquired` until
//! the sync returns, whichever way it returns.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use devflow_core::{Change, CommitId, RepositoryCheckout, SnapshotMeta, SyncConfig};
use devflow_renderer::{CommitContext, TemplateEngine};

use crate::builder::{ArtifactOutput, BuildContext, BuilderRegistry, SourceTree};
use crate::diff::DiffEngine;
use crate::error::SyncError;
use crate::lock::WriterLock;
use crate::manifest::ArtifactManifest;
use crate::pointer::StateStore;
use crate::preview::{preview_staging, FileDiff};
use crate::publish::{PublishOutcome, PublishRequest, Publisher};
use crate::resolver::CommitResolver;
use crate::vcs::Vcs;
use crate::writer::{promote, Staging, WriteResult};

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Idle,
    LockAcquired,
    BaseValidated,
    Diffed,
    BuiltArtifacts,
    StateAdvanced,
    Published,
    Done,
    Failed,
}

impl SyncStage {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStage::Idle => "idle",
            SyncStage::LockAcquired => "lock_acquired",
            SyncStage::BaseValidated => "base_validated",
            SyncStage::Diffed => "diffed",
            SyncStage::BuiltArtifacts => "built_artifacts",
            SyncStage::StateAdvanced => "state_advanced",
            SyncStage::Published => "published",
            SyncStage::Done => "done",
            SyncStage::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Overall deadline, checked between stages. VCS subprocesses get the
    /// same deadline through their own runner.
    pub deadline: Option<Instant>,
    /// Build into staging and report diffs; mutate nothing.
    pub dry_run: bool,
}

/// The base/head pair and the change set between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePlan {
    /// Pointer read at sync start.
    pub previous: Option<CommitId>,
    /// Effective base after validation and fallbacks. `None` = full rebuild.
    pub base: Option<CommitId>,
    pub head: CommitId,
    pub changes: Vec<Change>,
}

impl ChangePlan {
    pub fn full_rebuild(&self) -> bool {
        self.base.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub plan: ChangePlan,
    /// Stages passed through, in order, ending in `Done`.
    pub stages: Vec<SyncStage>,
    pub written: Vec<WriteResult>,
    /// Metadata written this run; `None` when the pointer did not move.
    pub meta: Option<SnapshotMeta>,
    /// `None` on dry runs.
    pub publish: Option<PublishOutcome>,
    /// Staged-vs-current diffs; only filled on dry runs.
    pub previews: Vec<FileDiff>,
}

impl SyncReport {
    pub fn pointer_advanced(&self) -> bool {
        self.meta.is_some()
    }
}

struct ValidatedBase {
    previous: Option<CommitId>,
    base: Option<CommitId>,
    head: CommitId,
}

struct Progress {
    started: Instant,
    deadline: Option<Instant>,
    stage: SyncStage,
    stages: Vec<SyncStage>,
}

impl Progress {
    fn new(deadline: Option<Instant>) -> Self {
        Self {
            started: Instant::now(),
            deadline,
            stage: SyncStage::Idle,
            stages: vec![SyncStage::Idle],
        }
    }

    /// The stage the next failure is attributed to.
    fn attempting(&self) -> SyncStage {
        match self.stage {
            SyncStage::Idle => SyncStage::LockAcquired,
            SyncStage::LockAcquired => SyncStage::BaseValidated,
            SyncStage::BaseValidated => SyncStage::Diffed,
            SyncStage::Diffed => SyncStage::BuiltArtifacts,
            SyncStage::BuiltArtifacts => SyncStage::StateAdvanced,
            SyncStage::StateAdvanced => SyncStage::Published,
            SyncStage::Published | SyncStage::Done | SyncStage::Failed => SyncStage::Done,
        }
    }

    fn check_deadline(&self) -> Result<(), SyncError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(SyncError::Timeout {
                command: format!("sync before {}", self.attempting()),
                after: self.started.elapsed(),
            }),
            _ => Ok(()),
        }
    }

    fn enter(&mut self, stage: SyncStage) {
        tracing::debug!(from = %self.stage, to = %stage, "sync stage");
        self.stage = stage;
        self.stages.push(stage);
    }

    /// Annotate `err` with the stage being attempted.
    fn fail(&self, err: SyncError) -> SyncError {
        err.at(self.attempting())
    }
}

// ---------------------------------------------------------------------------
// ChangePlanner
// ---------------------------------------------------------------------------

/// Resolves head and computes the change set since the stored pointer,
/// applying the full-rebuild fallbacks. Takes no lock and writes nothing, so
/// `devflow changes` can use it directly.
pub struct ChangePlanner<'a> {
    config: &'a SyncConfig,
    vcs: &'a dyn Vcs,
}

impl<'a> ChangePlanner<'a> {
    pub fn new(config: &'a SyncConfig, vcs: &'a dyn Vcs) -> Self {
        Self { config, vcs }
    }

    pub fn plan(&self, root: &Path) -> Result<ChangePlan, SyncError> {
        let state = StateStore::new(self.config, root);
        let validated = self.validate_base(&state)?;
        self.diff(validated)
    }

    /// Resolve head and decide the base: the stored pointer, unless a
    /// publish is unconfirmed or the pointer left `head`'s history.
    fn validate_base(&self, state: &StateStore) -> Result<ValidatedBase, SyncError> {
        let resolver = CommitResolver::new(self.vcs, self.config);
        let previous = state.read_pointer()?;
        let head = resolver.resolve_remote_head()?;

        let mut base = previous.clone();
        if let Some(pending) = state.pending()? {
            tracing::warn!(
                commit = %pending.commit,
                prepared_at = %pending.prepared_at,
                "previous publish was never confirmed; falling back to full rebuild"
            );
            base = None;
        }
        if let Some(candidate) = base.take() {
            if resolver.ensure_reachable(&candidate, &head)? {
                base = Some(candidate);
            } else {
                tracing::warn!(base = %candidate, head = %head, "base commit unreachable; falling back to full rebuild");
            }
        }
        Ok(ValidatedBase { previous, base, head })
    }

    /// Compute the change set, retrying once as a full enumeration when an
    /// incremental diff fails.
    fn diff(&self, validated: ValidatedBase) -> Result<ChangePlan, SyncError> {
        let ValidatedBase {
            previous,
            mut base,
            head,
        } = validated;
        let reserved = self.config.reserved_prefixes();
        let engine = DiffEngine::new(self.vcs, &reserved);
        let changes = match engine.diff(base.as_ref(), &head) {
            Ok(changes) => changes,
            Err(e @ SyncError::Timeout { .. }) => return Err(e),
            Err(e) if base.is_some() => {
                tracing::warn!(
                    base = ?base.as_ref().map(CommitId::as_str),
                    head = %head,
                    error = %e,
                    "diff failed; falling back to full rebuild"
                );
                base = None;
                engine.diff(None, &head)?
            }
            Err(e) => return Err(e),
        };

        Ok(ChangePlan {
            previous,
            base,
            head,
            changes,
        })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Sequences one sync for one checkout. Holds no state between syncs.
pub struct Orchestrator<'a> {
    config: &'a SyncConfig,
    vcs: &'a dyn Vcs,
    builders: &'a BuilderRegistry,
    publisher: &'a dyn Publisher,
    templates: &'a TemplateEngine,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a SyncConfig,
        vcs: &'a dyn Vcs,
        builders: &'a BuilderRegistry,
        publisher: &'a dyn Publisher,
        templates: &'a TemplateEngine,
    ) -> Self {
        Self {
            config,
            vcs,
            builders,
            publisher,
            templates,
        }
    }

    /// Run one sync.
    pub fn sync(&self, checkout: &RepositoryCheckout, options: &SyncOptions) -> Result<SyncReport, SyncError> {
        let mut progress = Progress::new(options.deadline);
        let root = checkout.path();
        tracing::info!(checkout = %root.display(), publisher = self.publisher.name(), dry_run = options.dry_run, "sync starting");

        progress.check_deadline().map_err(|e| progress.fail(e))?;
        if let Err(e) = self.vcs.exclude_locally(&self.config.lock_dir_exclude_pattern()) {
            tracing::warn!(error = %e, "could not exclude the lock directory from git status");
        }
        let lock = WriterLock::acquire(&self.config.lock_file_path(root), root, self.config.locks.max_age())
            .map_err(|e| progress.fail(e))?;
        progress.enter(SyncStage::LockAcquired);

        let result = self
            .run_locked(checkout, options, &mut progress)
            .map_err(|e| progress.fail(e));

        if let Err(e) = lock.release() {
            tracing::warn!(error = %e, "failed to release writer lock");
        }

        match &result {
            Ok(report) => tracing::info!(
                head = %report.plan.head,
                changes = report.plan.changes.len(),
                full_rebuild = report.plan.full_rebuild(),
                "sync done"
            ),
            Err(e) => tracing::error!(error = %e, stage = ?e.stage(), "sync failed"),
        }
        result
    }

    fn run_locked(
        &self,
        checkout: &RepositoryCheckout,
        options: &SyncOptions,
        progress: &mut Progress,
    ) -> Result<SyncReport, SyncError> {
        let root = checkout.path();
        let state = StateStore::new(self.config, root);

        // LockAcquired → BaseValidated → Diffed
        progress.check_deadline()?;
        let planner = ChangePlanner::new(self.config, self.vcs);
        let validated = planner.validate_base(&state)?;
        progress.enter(SyncStage::BaseValidated);

        progress.check_deadline()?;
        let plan = planner.diff(validated)?;
        progress.enter(SyncStage::Diffed);
        tracing::info!(
            base = ?plan.base.as_ref().map(CommitId::as_str),
            head = %plan.head,
            changes = plan.changes.len(),
            "diff computed"
        );

        // Diffed → BuiltArtifacts
        progress.check_deadline()?;
        let staging = Staging::create(&self.config.staging_path(root))?;
        self.build_all(checkout, &plan, staging.path())?;
        progress.enter(SyncStage::BuiltArtifacts);

        let kb_dir = self.config.knowledge_base_path(root);
        if options.dry_run {
            let previews = preview_staging(&staging, &kb_dir, &self.kb_relative())?;
            progress.enter(SyncStage::Done);
            return Ok(SyncReport {
                plan,
                stages: progress.stages.clone(),
                written: Vec::new(),
                meta: None,
                publish: None,
                previews,
            });
        }

        // BuiltArtifacts → StateAdvanced. The pending marker goes first: a
        // crash between promotion and the pointer write, or a publish that
        // never lands, forces the next sync to rebuild from scratch.
        progress.check_deadline()?;
        state.mark_pending(&plan.head, plan.previous.as_ref())?;
        let manifest_path = self.config.manifest_path(root);
        let mut manifest = ArtifactManifest::load(&manifest_path)?;
        let written = promote(&staging, &kb_dir, &mut manifest)?;
        drop(staging);

        let meta = if self.should_advance(&plan) {
            state.write_pointer(&plan.head)?;
            let meta = state.write_meta(&plan.head, &plan.changes)?;
            manifest.commit = Some(plan.head.clone());
            Some(meta)
        } else {
            tracing::info!(head = %plan.head, "no relevant changes; pointer unchanged");
            None
        };
        manifest.save(&manifest_path)?;
        progress.enter(SyncStage::StateAdvanced);

        // StateAdvanced → Published
        progress.check_deadline()?;
        let commit_ctx = CommitContext::new(plan.head.as_str(), plan.changes.len());
        let message = self.templates.render_commit_message(&commit_ctx)?;
        let paths = vec![self.kb_relative()];
        let request = PublishRequest {
            head: &plan.head,
            message: &message,
            paths: &paths,
        };
        let outcome = self.publisher.publish(self.vcs, &request)?;
        state.clear_pending()?;
        progress.enter(SyncStage::Published);

        progress.enter(SyncStage::Done);
        Ok(SyncReport {
            plan,
            stages: progress.stages.clone(),
            written,
            meta,
            publish: Some(outcome),
            previews: Vec::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    fn build_all(&self, checkout: &RepositoryCheckout, plan: &ChangePlan, output_dir: &Path) -> Result<(), SyncError> {
        let root = checkout.path();
        let reserved = self.config.reserved_prefixes();
        let source = SourceTree::new(self.vcs, &plan.head, &reserved);
        let artifacts: Vec<ArtifactOutput> = self.builders.outputs();
        let kb_dir = self.config.knowledge_base_path(root);
        let ctx = BuildContext {
            checkout,
            head: &plan.head,
            full_rebuild: plan.full_rebuild(),
            previous_dir: &kb_dir,
            output_dir,
            source: &source,
            config: self.config,
            templates: self.templates,
            artifacts: &artifacts,
        };

        for builder in self.builders.iter() {
            let name = builder.name().to_owned();
            tracing::debug!(builder = %name, "building");
            builder
                .build(&ctx, &plan.changes)
                .map_err(|source| SyncError::Builder {
                    name: name.clone(),
                    source,
                })?;
            for output in builder.outputs() {
                if !output_dir.join(&output.file).is_file() {
                    return Err(SyncError::Builder {
                        name,
                        source: format!("did not produce {}", output.file).into(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The pointer moves when it is behind `head` and something relevant
    /// changed, or when this run is a full rebuild. Advancing on an empty
    /// incremental change set would commit a new pointer for every sync
    /// commit, which in turn is a new head.
    fn should_advance(&self, plan: &ChangePlan) -> bool {
        plan.previous.as_ref() != Some(&plan.head) && (plan.full_rebuild() || !plan.changes.is_empty())
    }

    /// The subtree as a repo-relative path, e.g. `.devflow`.
    fn kb_relative(&self) -> String {
        self.config
            .reserved_prefixes()
            .first()
            .map(|p| p.trim_end_matches('/').to_owned())
            .unwrap_or_else(|| self.config.knowledge_base_dir.to_string_lossy().into_owned())
    }
}
