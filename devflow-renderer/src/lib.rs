//! # devflow-renderer
//!
//! Tera-based template engine that renders the human-readable knowledge-base
//! artifacts (`repo-structure.md`, `README.md`) and the sync commit message.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use devflow_renderer::{CommitContext, TemplateEngine};
//!
//! fn message(sha: &str) -> Option<String> {
//!     let engine = TemplateEngine::new(None).ok()?;
//!     engine.render_commit_message(&CommitContext::new(sha, 3)).ok()
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{CommitContext, ReadmeContext, StructureContext};
pub use engine::{ArtifactTemplate, TemplateEngine};
pub use error::RenderError;
