//! Artifact hash manifest: SHA-256 of every promoted artifact.
//!
//! Persisted as `<lock-dir>/artifact-hashes.json`, outside the committed
//! subtree. Promotion consults it to skip unchanged files; `status` uses it
//! to spot hand-edited artifacts.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use devflow_core::CommitId;

use crate::error::{io_err, SyncError};
use crate::pointer::write_atomic;

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// On-disk manifest payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Commit the recorded artifacts were built for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitId>,
    /// Artifact file name (relative to the subtree) → hex digest.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl ArtifactManifest {
    /// Load from `path`; a missing file is an empty manifest.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(io_err(path, e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, digest: impl Into<String>) {
        self.files.insert(name.into(), digest.into());
    }

    /// Artifacts under `kb_dir` whose current content no longer matches the
    /// recorded digest. A recorded file that was deleted counts as modified.
    pub fn modified_files(&self, kb_dir: &Path) -> Result<Vec<PathBuf>, SyncError> {
        let mut modified = Vec::new();
        for (name, digest) in &self.files {
            let path = kb_dir.join(name);
            match std::fs::read(&path) {
                Ok(bytes) if sha256_hex(&bytes) == *digest => {}
                Ok(_) => modified.push(path),
                Err(e) if e.kind() == ErrorKind::NotFound => modified.push(path),
                Err(e) => return Err(io_err(&path, e)),
            }
        }
        Ok(modified)
    }
}
