//! Builder plumbing: the [`Builder`] trait, the context handed to each
//! builder, and the ordered [`BuilderRegistry`].
//!
//! Builders never touch the knowledge-base subtree directly. They read the
//! previous artifacts from it, read sources at `head` through
//! [`SourceTree`], and write their outputs into the staging directory. The
//! orchestrator promotes the staging directory only when every builder
//! succeeded.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use devflow_core::{Change, CommitId, RepositoryCheckout, SyncConfig};
use devflow_renderer::TemplateEngine;

use crate::builders::{DependencyGraphBuilder, ReadmeBuilder, StructureBuilder};
use crate::diff::DiffEngine;
use crate::error::{BoxError, SyncError};
use crate::vcs::Vcs;

/// Error type returned by builders. Any error type converts into it.
pub type BuildError = BoxError;

/// One file a builder produces inside the subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactOutput {
    pub file: String,
    pub description: String,
}

impl ArtifactOutput {
    pub fn new(file: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            description: description.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceTree
// ---------------------------------------------------------------------------

/// Read-only view of the repository at the commit being synced.
pub struct SourceTree<'a> {
    vcs: &'a dyn Vcs,
    head: &'a CommitId,
    reserved: &'a [String],
}

impl<'a> SourceTree<'a> {
    pub fn new(vcs: &'a dyn Vcs, head: &'a CommitId, reserved: &'a [String]) -> Self {
        Self { vcs, head, reserved }
    }

    pub fn head(&self) -> &CommitId {
        self.head
    }

    /// Every tracked file outside the reserved subtrees, sorted.
    pub fn files(&self) -> Result<Vec<String>, SyncError> {
        DiffEngine::new(self.vcs, self.reserved).files_at(self.head)
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>, SyncError> {
        self.vcs.read_file(self.head, path)
    }

    /// Lossy UTF-8 view of [`read`](Self::read).
    pub fn read_to_string(&self, path: &str) -> Result<String, SyncError> {
        Ok(String::from_utf8_lossy(&self.read(path)?).into_owned())
    }
}

// ---------------------------------------------------------------------------
// BuildContext
// ---------------------------------------------------------------------------

/// Everything one builder invocation may look at.
pub struct BuildContext<'a> {
    pub checkout: &'a RepositoryCheckout,
    pub head: &'a CommitId,
    /// True when `changes` is a full enumeration rather than a diff.
    pub full_rebuild: bool,
    /// The current knowledge-base subtree (previous artifacts).
    pub previous_dir: &'a Path,
    /// Staging directory receiving this build's artifacts.
    pub output_dir: &'a Path,
    pub source: &'a SourceTree<'a>,
    pub config: &'a SyncConfig,
    pub templates: &'a TemplateEngine,
    /// Outputs of every registered builder, in registration order.
    pub artifacts: &'a [ArtifactOutput],
}

impl<'a> BuildContext<'a> {
    /// `owner/repo` or the checkout directory name.
    pub fn repository(&self) -> String {
        self.checkout.display_name()
    }

    /// The previous version of artifact `name`. Always `None` on a full
    /// rebuild, so builders start from scratch.
    pub fn previous(&self, name: &str) -> Result<Option<Vec<u8>>, BuildError> {
        if self.full_rebuild {
            return Ok(None);
        }
        let path = self.previous_dir.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(crate::error::io_err(path, e).into()),
        }
    }

    /// Write artifact `name` into the staging directory.
    pub fn write(&self, name: &str, content: impl AsRef<[u8]>) -> Result<PathBuf, BuildError> {
        let path = self.output_dir.join(name);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| crate::error::io_err(dir, e))?;
        }
        std::fs::write(&path, content).map_err(|e| crate::error::io_err(&path, e))?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// A pluggable artifact generator.
///
/// `build` receives the change set since the previous sync and must leave
/// every file listed by `outputs` in `ctx.output_dir`. Returning an error
/// aborts the whole sync before anything is published.
pub trait Builder {
    fn name(&self) -> &str;

    fn outputs(&self) -> Vec<ArtifactOutput>;

    fn build(&self, ctx: &BuildContext<'_>, changes: &[Change]) -> Result<(), BuildError>;
}

/// Builders in invocation order. Names are unique.
#[derive(Default)]
pub struct BuilderRegistry {
    builders: Vec<Box<dyn Builder>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The structure, dependency-graph, and readme builders, configured with
    /// the artifact names from `config.files`.
    pub fn with_defaults(config: &SyncConfig) -> Self {
        let mut registry = Self::new();
        registry.register(StructureBuilder::new(&config.files));
        registry.register(DependencyGraphBuilder::new(&config.files));
        registry.register(ReadmeBuilder::new(&config.files));
        registry
    }

    /// Append `builder`. Registering a name twice replaces the earlier
    /// builder in place.
    pub fn register(&mut self, builder: impl Builder + 'static) -> &mut Self {
        let builder: Box<dyn Builder> = Box::new(builder);
        match self.builders.iter().position(|b| b.name() == builder.name()) {
            Some(idx) => {
                tracing::warn!(builder = builder.name(), "replacing registered builder");
                self.builders[idx] = builder;
            }
            None => self.builders.push(builder),
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Builder> {
        self.builders.iter().map(|b| b.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.builders.iter().map(|b| b.name()).collect()
    }

    pub fn outputs(&self) -> Vec<ArtifactOutput> {
        self.builders.iter().flat_map(|b| b.outputs()).collect()
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}
