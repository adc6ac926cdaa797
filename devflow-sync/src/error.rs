//! Error types for devflow-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use devflow_core::ConfigError;
use devflow_renderer::RenderError;

use crate::lock::LockInfo;
use crate::orchestrator::SyncStage;

/// Errors produced by external collaborators (builders, review requesters).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another sync holds the writer lock for this checkout.
    #[error("writer lock busy: {path}")]
    LockBusy {
        path: PathBuf,
        holder: Option<LockInfo>,
    },

    /// Fetching or resolving the tracked branch failed.
    #[error("cannot resolve {reference}: {message}")]
    RefResolution { reference: String, message: String },

    /// `diff --name-status` (or the full file listing) failed.
    #[error("cannot diff {base}..{head}: {message}")]
    DiffComputation {
        base: String,
        head: String,
        message: String,
    },

    /// A registered builder returned an error.
    #[error("builder `{name}` failed: {source}")]
    Builder {
        name: String,
        #[source]
        source: BoxError,
    },

    /// Rebasing the work branch onto the remote default branch conflicted.
    /// The rebase has already been aborted.
    #[error("rebase onto {onto} conflicted and was aborted: {detail}")]
    PublishConflict { onto: String, detail: String },

    /// Network or permission failure while pushing.
    #[error("push {local} -> {remote} failed: {message}")]
    Push {
        local: String,
        remote: String,
        message: String,
    },

    /// The review-request collaborator failed after the branch was pushed.
    #[error("review request failed: {0}")]
    Review(#[source] BoxError),

    /// Any other VCS command failure, with its command line and stderr.
    #[error("`{command}` failed: {stderr}")]
    Vcs { command: String, stderr: String },

    /// A VCS subprocess (or the whole sync) ran past its deadline.
    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON error reading or writing sync state.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A fatal error, annotated with the stage the sync was in.
    #[error("sync failed at {stage}: {source}")]
    Failed {
        stage: SyncStage,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Wrap `self` with the stage it occurred in. Already-wrapped errors keep
    /// their original stage.
    pub fn at(self, stage: SyncStage) -> SyncError {
        match self {
            already @ SyncError::Failed { .. } => already,
            other => SyncError::Failed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, with any stage annotation stripped.
    pub fn root(&self) -> &SyncError {
        match self {
            SyncError::Failed { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage a fatal error occurred in, if annotated.
    pub fn stage(&self) -> Option<SyncStage> {
        match self {
            SyncError::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
