//! Pointer, snapshot metadata, and the pending-publish marker.
//!
//! ```text
//! <checkout>/
//!   <subtree>/commit-pointer         "<sha>\n"
//!   <subtree>/snapshot-meta.json     SnapshotMeta
//!   <lock-dir>/pending-publish.json  PendingPublish (local only)
//! ```
//!
//! All writes go through a `.tmp` sibling and a rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devflow_core::types::rfc3339_secs;
use devflow_core::{Change, CommitId, SnapshotMeta, SyncConfig};

use crate::error::{io_err, SyncError};

/// Written when state has advanced locally but the publish is not yet
/// confirmed. Its presence at the start of a sync forces a full rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPublish {
    pub commit: CommitId,
    /// The pointer before this sync, if any.
    pub previous: Option<CommitId>,
    #[serde(with = "rfc3339_secs")]
    pub prepared_at: DateTime<Utc>,
}

/// File-backed state for one checkout.
#[derive(Debug, Clone)]
pub struct StateStore {
    pointer: PathBuf,
    meta: PathBuf,
    pending: PathBuf,
}

impl StateStore {
    pub fn new(config: &SyncConfig, checkout: &Path) -> Self {
        Self {
            pointer: config.pointer_path(checkout),
            meta: config.meta_path(checkout),
            pending: config.pending_publish_path(checkout),
        }
    }

    pub fn pointer_path(&self) -> &Path {
        &self.pointer
    }

    // -----------------------------------------------------------------------
    // Pointer
    // -----------------------------------------------------------------------

    /// The last synchronized commit. A missing or blank file means "never
    /// synced".
    pub fn read_pointer(&self) -> Result<Option<CommitId>, SyncError> {
        let Some(raw) = read_optional(&self.pointer)? else {
            return Ok(None);
        };
        let sha = raw.trim();
        Ok((!sha.is_empty()).then(|| CommitId::from(sha)))
    }

    pub fn write_pointer(&self, commit: &CommitId) -> Result<(), SyncError> {
        write_atomic(&self.pointer, format!("{commit}\n").as_bytes())
    }

    // -----------------------------------------------------------------------
    // Snapshot metadata
    // -----------------------------------------------------------------------

    pub fn read_meta(&self) -> Result<Option<SnapshotMeta>, SyncError> {
        match read_optional(&self.meta)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Overwrite the metadata wholesale.
    pub fn write_meta(&self, commit: &CommitId, changes: &[Change]) -> Result<SnapshotMeta, SyncError> {
        let meta = SnapshotMeta::new(commit, changes, Utc::now());
        let mut json = serde_json::to_string_pretty(&meta)?;
        json.push('\n');
        write_atomic(&self.meta, json.as_bytes())?;
        Ok(meta)
    }

    // -----------------------------------------------------------------------
    // Pending publish
    // -----------------------------------------------------------------------

    pub fn pending(&self) -> Result<Option<PendingPublish>, SyncError> {
        match read_optional(&self.pending)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn mark_pending(&self, commit: &CommitId, previous: Option<&CommitId>) -> Result<PendingPublish, SyncError> {
        let pending = PendingPublish {
            commit: commit.clone(),
            previous: previous.cloned(),
            prepared_at: Utc::now(),
        };
        write_atomic(&self.pending, &serde_json::to_vec_pretty(&pending)?)?;
        Ok(pending)
    }

    pub fn clear_pending(&self) -> Result<(), SyncError> {
        match std::fs::remove_file(&self.pending) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&self.pending, e)),
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, SyncError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Write `bytes` to `<path>.tmp`, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}
