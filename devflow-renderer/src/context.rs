//! Template contexts: serializable rendering payloads, one per template.
//!
//! Contexts carry no timestamps. The same commit must always render to the
//! same bytes, otherwise every sync would produce a spurious diff.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::RenderError;

/// Directory names worth calling out in the structure overview.
const KEY_DIRECTORIES: &[(&str, &str)] = &[
    ("src", "Source code"),
    ("lib", "Library code"),
    ("app", "Application code"),
    ("cmd", "Command entry points"),
    ("internal", "Internal packages"),
    ("pkg", "Public packages"),
    ("packages", "Package/module code"),
    ("crates", "Workspace crates"),
    ("components", "UI components"),
    ("pages", "Application pages"),
    ("routes", "Route definitions"),
    ("handlers", "Request handlers"),
    ("controllers", "Controllers"),
    ("services", "Service layer"),
    ("models", "Data models"),
    ("middleware", "Middleware"),
    ("types", "Type definitions"),
    ("utils", "Utility functions"),
    ("config", "Configuration"),
    ("migrations", "Database migrations"),
    ("scripts", "Scripts"),
    ("docs", "Documentation"),
    ("tests", "Tests"),
    ("test", "Tests"),
    ("__tests__", "Tests"),
    ("public", "Public assets"),
    ("static", "Static files"),
    ("assets", "Asset files"),
];

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

/// Payload for `structure.md.tera`.
#[derive(Debug, Clone, Serialize)]
pub struct StructureContext {
    pub repository: String,
    pub stack: Option<StackCtx>,
    pub tree: Vec<TreeLine>,
    pub directory_count: usize,
    pub file_count: usize,
    pub total_size: String,
    pub languages: Vec<LanguageCount>,
    pub key_directories: Vec<KeyDirectory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackCtx {
    pub language: String,
    pub framework: Option<String>,
    pub category: String,
}

/// One line of the indented directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeLine {
    pub indent: String,
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageCount {
    pub language: String,
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyDirectory {
    pub path: String,
    pub description: String,
}

/// Input for one file in [`StructureContext::from_files`].
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub size: u64,
    pub language: Option<String>,
}

impl StructureContext {
    /// Build the context from every described file at a commit, keyed by
    /// repo-relative path.
    pub fn from_files(
        repository: impl Into<String>,
        stack: Option<StackCtx>,
        files: &BTreeMap<String, FileEntry>,
    ) -> Self {
        let dirs: BTreeSet<&str> = files.keys().flat_map(|p| ancestors(p)).collect();
        let tree = tree_lines(files.keys().map(String::as_str), &dirs);

        let mut by_language: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in files.values() {
            if let Some(lang) = &entry.language {
                *by_language.entry(lang.as_str()).or_default() += 1;
            }
        }
        let mut languages: Vec<LanguageCount> = by_language
            .into_iter()
            .map(|(language, files)| LanguageCount {
                language: language.to_owned(),
                files,
            })
            .collect();
        // Most common first; ties stay alphabetical (stable sort).
        languages.sort_by(|a, b| b.files.cmp(&a.files));

        let key_directories = dirs
            .iter()
            .filter_map(|dir| {
                let name = dir.rsplit('/').next().unwrap_or(dir);
                KEY_DIRECTORIES
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, description)| KeyDirectory {
                        path: (*dir).to_owned(),
                        description: (*description).to_owned(),
                    })
            })
            .collect();

        StructureContext {
            repository: repository.into(),
            stack,
            tree,
            directory_count: dirs.len(),
            file_count: files.len(),
            total_size: human_size(files.values().map(|f| f.size).sum()),
            languages,
            key_directories,
        }
    }
}

/// All proper ancestor directories of `path` (`a/b/c.rs` → `a`, `a/b`).
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(idx, _)| &path[..idx])
}

fn tree_lines<'a>(files: impl Iterator<Item = &'a str>, dirs: &BTreeSet<&'a str>) -> Vec<TreeLine> {
    let mut entries: Vec<(&str, bool)> = dirs.iter().map(|d| (*d, true)).collect();
    entries.extend(files.map(|f| (f, false)));
    // Sort by path components so a directory's children follow it directly.
    entries.sort_by(|a, b| a.0.split('/').cmp(b.0.split('/')));

    entries
        .into_iter()
        .map(|(path, is_dir)| {
            let depth = path.matches('/').count();
            TreeLine {
                indent: "  ".repeat(depth),
                name: path.rsplit('/').next().unwrap_or(path).to_owned(),
                is_dir,
            }
        })
        .collect()
}

/// Format a byte count as `512 B`, `1.5 KB`, `3.2 MB`, ...
pub fn human_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let suffix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {suffix}B", bytes as f64 / div as f64)
}

// ---------------------------------------------------------------------------
// README
// ---------------------------------------------------------------------------

/// Payload for `readme.md.tera`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadmeContext {
    pub repository: String,
    pub files: Vec<ArtifactFileCtx>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactFileCtx {
    pub name: String,
    pub description: String,
}

impl ReadmeContext {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.files.push(ArtifactFileCtx {
            name: name.into(),
            description: description.into(),
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Commit message
// ---------------------------------------------------------------------------

/// Payload for `commit_message.tera`.
#[derive(Debug, Clone, Serialize)]
pub struct CommitContext {
    pub sha: String,
    pub short_sha: String,
    pub changed_files: usize,
}

impl CommitContext {
    pub fn new(sha: &str, changed_files: usize) -> Self {
        Self {
            sha: sha.to_owned(),
            short_sha: sha.chars().take(7).collect(),
            changed_files,
        }
    }
}

/// Convert any context to a [`tera::Context`].
pub(crate) fn to_tera_context<C: Serialize>(ctx: &C) -> Result<tera::Context, RenderError> {
    tera::Context::from_serialize(ctx).map_err(RenderError::from)
}
