//! Tera rendering engine: [`ArtifactTemplate`] and [`TemplateEngine`].
//!
//! | Template          | Embedded name          | Rendered into        |
//! |-------------------|------------------------|----------------------|
//! | Structure         | `structure.md.tera`    | `repo-structure.md`  |
//! | Readme            | `readme.md.tera`       | `README.md`          |
//! | CommitMessage     | `commit_message.tera`  | the sync commit      |
//!
//! Output file names are configurable in `SyncConfig::files`; the table shows
//! the defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tera::Tera;

use crate::context::{to_tera_context, CommitContext, ReadmeContext, StructureContext};
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("structure.md.tera", include_str!("templates/structure.md.tera")),
    ("readme.md.tera", include_str!("templates/readme.md.tera")),
    ("commit_message.tera", include_str!("templates/commit_message.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

/// Override templates: `*.tera` files directly inside `dir`. A missing
/// directory means no overrides.
fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut templates = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let name = normalize_template_name(path.strip_prefix(dir).unwrap_or(path.as_path()));
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = TPLS
        .iter()
        .map(|(name, content)| (normalize_template_name(Path::new(name)), (*content).to_string()))
        .collect();
    if let Some(dir) = user_template_dir {
        templates.extend(load_user_templates(dir)?);
    }

    let mut tera = Tera::default();
    tera.add_raw_templates(templates)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// ArtifactTemplate
// ---------------------------------------------------------------------------

/// Every template the knowledge base renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactTemplate {
    Structure,
    Readme,
    CommitMessage,
}

impl ArtifactTemplate {
    pub fn all() -> &'static [ArtifactTemplate] {
        &[
            ArtifactTemplate::Structure,
            ArtifactTemplate::Readme,
            ArtifactTemplate::CommitMessage,
        ]
    }

    /// Name under which the template is registered (and may be overridden).
    pub fn template_name(&self) -> &'static str {
        match self {
            ArtifactTemplate::Structure => "structure.md.tera",
            ArtifactTemplate::Readme => "readme.md.tera",
            ArtifactTemplate::CommitMessage => "commit_message.tera",
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for rendering templates with optional user overrides.
///
/// `user_template_dir` may contain `.tera` files that override embedded
/// defaults by name (e.g. a custom `readme.md.tera`). Create once and reuse.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(TemplateEngine { tera })
    }

    /// Render `template` with any serializable context. Line endings are
    /// normalised to `\n` so overrides authored on Windows render the same.
    pub fn render<C: Serialize>(&self, template: ArtifactTemplate, ctx: &C) -> Result<String, RenderError> {
        let tera_ctx = to_tera_context(ctx)?;
        let out = self.tera.render(template.template_name(), &tera_ctx)?;
        Ok(out.replace("\r\n", "\n"))
    }

    pub fn render_structure(&self, ctx: &StructureContext) -> Result<String, RenderError> {
        self.render(ArtifactTemplate::Structure, ctx)
    }

    pub fn render_readme(&self, ctx: &ReadmeContext) -> Result<String, RenderError> {
        self.render(ArtifactTemplate::Readme, ctx)
    }

    /// Commit messages are a single trimmed paragraph.
    pub fn render_commit_message(&self, ctx: &CommitContext) -> Result<String, RenderError> {
        Ok(self.render(ArtifactTemplate::CommitMessage, ctx)?.trim().to_owned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
