//! Knowledge-base status for `devflow status`.
//!
//! Signal precedence:
//! 1. `Locked` (a sync is running, or crashed holding the lock)
//! 2. `NeverSynced` (no pointer and no pending publish)
//! 3. `PendingPublish` (state advanced but the publish never confirmed)
//! 4. `Modified` (an artifact no longer matches its recorded hash)
//! 5. `Behind` (the locally known remote head has relevant changes)
//! 6. `Current`
//!
//! Nothing here fetches; `Behind` reflects the last fetch.

use std::path::{Path, PathBuf};

use serde::Serialize;

use devflow_core::{CommitId, SyncConfig};

use crate::diff::DiffEngine;
use crate::error::SyncError;
use crate::lock::{self, LockHolder};
use crate::manifest::ArtifactManifest;
use crate::pointer::StateStore;
use crate::resolver::CommitResolver;
use crate::vcs::Vcs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KnowledgeBaseStatus {
    NeverSynced,
    Locked {
        pid: Option<u32>,
        age_secs: Option<u64>,
    },
    PendingPublish {
        commit: CommitId,
    },
    Modified {
        files: Vec<PathBuf>,
    },
    Behind {
        pointer: CommitId,
        head: CommitId,
    },
    Current {
        pointer: CommitId,
    },
}

impl KnowledgeBaseStatus {
    fn locked(holder: &LockHolder) -> Self {
        KnowledgeBaseStatus::Locked {
            pid: holder.info.as_ref().map(|i| i.pid),
            age_secs: holder.age.map(|a| a.as_secs()),
        }
    }

    /// Short label for tables.
    pub fn label(&self) -> &'static str {
        match self {
            KnowledgeBaseStatus::NeverSynced => "never synced",
            KnowledgeBaseStatus::Locked { .. } => "locked",
            KnowledgeBaseStatus::PendingPublish { .. } => "pending publish",
            KnowledgeBaseStatus::Modified { .. } => "modified",
            KnowledgeBaseStatus::Behind { .. } => "behind",
            KnowledgeBaseStatus::Current { .. } => "current",
        }
    }
}

/// Classify the knowledge base of the checkout at `root`.
pub fn check(config: &SyncConfig, root: &Path, vcs: &dyn Vcs) -> Result<KnowledgeBaseStatus, SyncError> {
    if let Some(holder) = lock::inspect(&config.lock_file_path(root))? {
        return Ok(KnowledgeBaseStatus::locked(&holder));
    }

    let state = StateStore::new(config, root);
    let pointer = state.read_pointer()?;
    let pending = state.pending()?;
    let pointer = match (pointer, pending) {
        (_, Some(pending)) => {
            return Ok(KnowledgeBaseStatus::PendingPublish {
                commit: pending.commit,
            })
        }
        (None, None) => return Ok(KnowledgeBaseStatus::NeverSynced),
        (Some(pointer), None) => pointer,
    };

    let manifest = ArtifactManifest::load(&config.manifest_path(root))?;
    let modified = manifest.modified_files(&config.knowledge_base_path(root))?;
    if !modified.is_empty() {
        return Ok(KnowledgeBaseStatus::Modified { files: modified });
    }

    let head = match CommitResolver::new(vcs, config).local_remote_head() {
        Ok(head) => head,
        Err(e) => {
            tracing::warn!(error = %e, "remote head unknown; skipping behind check");
            return Ok(KnowledgeBaseStatus::Current { pointer });
        }
    };
    if head == pointer {
        return Ok(KnowledgeBaseStatus::Current { pointer });
    }

    let reserved = config.reserved_prefixes();
    let behind = match DiffEngine::new(vcs, &reserved).diff(Some(&pointer), &head) {
        Ok(changes) => !changes.is_empty(),
        Err(e) => {
            tracing::warn!(error = %e, "cannot diff pointer against remote head");
            true
        }
    };
    Ok(if behind {
        KnowledgeBaseStatus::Behind { pointer, head }
    } else {
        KnowledgeBaseStatus::Current { pointer }
    })
}
