//! Source analysis for `devflow-detector`.
//!
//! Everything here works on content handed in by the caller (usually blobs
//! read at a specific commit), never on the working tree. That keeps the
//! knowledge-base builders deterministic for a given commit.
//!
//! - [`language`]: map a repo path to a [`Language`].
//! - [`facts`]: per-file facts (size, lines, functions, classes, imports).
//! - [`ignore`]: paths left out of the knowledge base.
//! - [`resolve`]: turn raw import strings into intra-repo paths.
//! - [`stack`]: infer the primary language and framework from root manifests.

pub mod facts;
pub mod ignore;
pub mod language;
pub mod resolve;
pub mod stack;

use thiserror::Error;

pub use facts::{analyze, is_binary, SourceFacts, Symbol};
pub use ignore::is_ignored;
pub use language::Language;
pub use resolve::{go_module_name, ImportResolver};
pub use stack::{detect_stack, is_manifest, Confidence, DetectedStack, Manifests, StackCategory};

/// Errors from source analysis.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("could not determine stack: no known manifest at the repository root")]
    UnknownStack,
}
