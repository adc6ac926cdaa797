//! Staging area and hash-gated promotion into the knowledge-base subtree.
//!
//! ## Promotion protocol
//!
//! 1. Builders write into a private staging directory.
//! 2. Only after every builder succeeded, each staged file is hashed.
//! 3. Identical to what is on disk → skipped.
//! 4. Otherwise written to `<target>.devflow.tmp` and renamed into place.
//! 5. Artifacts recorded in the manifest but no longer staged are removed.
//! 6. The manifest is updated; the caller saves it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, SyncError};
use crate::manifest::{sha256_hex, ArtifactManifest};

/// Outcome of promoting one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Content changed or the file did not previously exist.
    Written { path: PathBuf },
    /// Content hash matched the file already on disk.
    Unchanged { path: PathBuf },
    /// No longer produced by any builder.
    Removed { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path }
            | WriteResult::Unchanged { path }
            | WriteResult::Removed { path } => path,
        }
    }

    pub fn changed(&self) -> bool {
        !matches!(self, WriteResult::Unchanged { .. })
    }
}

// ---------------------------------------------------------------------------
// atomic_write
// ---------------------------------------------------------------------------

/// Write `bytes` to `path` via a `.devflow.tmp` sibling unless the file
/// already holds exactly these bytes.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<WriteResult, SyncError> {
    let tmp = PathBuf::from(format!("{}.devflow.tmp", path.display()));
    atomic_write_with_tmp(path, bytes, &tmp)
}

fn atomic_write_with_tmp(path: &Path, bytes: &[u8], tmp: &Path) -> Result<WriteResult, SyncError> {
    match std::fs::read(path) {
        Ok(existing) if sha256_hex(&existing) == sha256_hex(bytes) => {
            tracing::debug!("unchanged: {}", path.display());
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(path, e)),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(tmp, bytes).map_err(|e| io_err(tmp, e))?;
    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::info!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// A fresh, private directory for one build. Removed on drop.
#[derive(Debug)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    /// Create `dir` empty, discarding leftovers from an interrupted sync.
    pub fn create(dir: &Path) -> Result<Self, SyncError> {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(dir, e)),
        }
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Every staged file, relative to the staging root with `/` separators,
    /// sorted.
    pub fn files(&self) -> Result<Vec<String>, SyncError> {
        let mut out = Vec::new();
        collect_files(&self.dir, &self.dir, &mut out)?;
        out.sort();
        Ok(out)
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.dir.display(), error = %e, "failed to remove staging dir");
            }
        }
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), SyncError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path.strip_prefix(root).unwrap_or(path.as_path());
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// promote
// ---------------------------------------------------------------------------

/// Move every staged artifact into `kb_dir`, updating `manifest`.
pub fn promote(
    staging: &Staging,
    kb_dir: &Path,
    manifest: &mut ArtifactManifest,
) -> Result<Vec<WriteResult>, SyncError> {
    let staged = staging.files()?;
    let mut results = Vec::with_capacity(staged.len());

    for name in &staged {
        let source = staging.path().join(name);
        let bytes = std::fs::read(&source).map_err(|e| io_err(&source, e))?;
        let result = atomic_write(&kb_dir.join(name), &bytes)?;
        manifest.insert(name.clone(), sha256_hex(&bytes));
        results.push(result);
    }

    let orphans: Vec<String> = manifest
        .files
        .keys()
        .filter(|name| !staged.contains(name))
        .cloned()
        .collect();
    for name in orphans {
        let path = kb_dir.join(&name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("removed: {}", path.display());
                results.push(WriteResult::Removed { path });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path, e)),
        }
        manifest.files.remove(&name);
    }

    Ok(results)
}
