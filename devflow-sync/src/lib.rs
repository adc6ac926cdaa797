//! # devflow-sync
//!
//! Incremental knowledge-base synchronization.
//!
//! One sync of one checkout takes the writer lock, resolves the remote head,
//! diffs it against the stored commit pointer, runs every registered
//! [`Builder`] into a staging area, promotes the results into the
//! knowledge-base subtree, advances the pointer, and publishes the subtree
//! through a [`Publisher`]. [`pipeline::run_sync`] wires the production
//! pieces; [`Orchestrator`] accepts any [`Vcs`], builders, and publisher.

pub mod builder;
pub mod builders;
pub mod diff;
pub mod error;
pub mod git;
pub mod lock;
pub mod manifest;
pub mod orchestrator;
pub mod pipeline;
pub mod pointer;
pub mod preview;
pub mod publish;
pub mod resolver;
pub mod staleness;
pub mod vcs;
pub mod writer;

pub use builder::{ArtifactOutput, BuildContext, BuildError, Builder, BuilderRegistry, SourceTree};
pub use diff::DiffEngine;
pub use error::{BoxError, SyncError};
pub use git::GitCli;
pub use lock::{LockHolder, LockInfo, WriterLock};
pub use orchestrator::{ChangePlan, ChangePlanner, Orchestrator, SyncOptions, SyncReport, SyncStage};
pub use pointer::{PendingPublish, StateStore};
pub use publish::{
    BranchReview, DirectPush, PublishOutcome, PublishRequest, Publisher, ReviewRequest, ReviewRequester,
};
pub use resolver::CommitResolver;
pub use staleness::KnowledgeBaseStatus;
pub use vcs::{CommitOutcome, Vcs};
pub use writer::WriteResult;
