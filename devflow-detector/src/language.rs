//! Path → language mapping.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Languages the knowledge base distinguishes.
///
/// Serialized lowercase (`"typescript"`, `"csharp"`), which is the form
/// written to `file-metadata.json` and `dependency-graph.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    JavaScript,
    Jsx,
    TypeScript,
    Tsx,
    Python,
    Rust,
    Java,
    Kotlin,
    Scala,
    C,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Swift,
    Dart,
    Elixir,
    Haskell,
    Lua,
    Vue,
    Svelte,
    Html,
    Css,
    Scss,
    Json,
    Yaml,
    Toml,
    Xml,
    Markdown,
    Shell,
    Sql,
    Dockerfile,
}

impl Language {
    /// Detect the language of a repo-relative path from its extension (or,
    /// for a few well-known files, its name). `None` when unrecognised.
    pub fn from_path(path: &str) -> Option<Language> {
        let name = path.rsplit('/').next().unwrap_or(path);
        if name == "Dockerfile" || name.starts_with("Dockerfile.") {
            return Some(Language::Dockerfile);
        }
        let ext = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => return None,
        };
        let lang = match ext.as_str() {
            "go" => Language::Go,
            "js" | "mjs" | "cjs" => Language::JavaScript,
            "jsx" => Language::Jsx,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "py" | "pyi" => Language::Python,
            "rs" => Language::Rust,
            "java" => Language::Java,
            "kt" | "kts" => Language::Kotlin,
            "scala" => Language::Scala,
            "c" | "h" => Language::C,
            "cc" | "cpp" | "cxx" | "hpp" | "hh" => Language::Cpp,
            "cs" => Language::CSharp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "swift" => Language::Swift,
            "dart" => Language::Dart,
            "ex" | "exs" => Language::Elixir,
            "hs" => Language::Haskell,
            "lua" => Language::Lua,
            "vue" => Language::Vue,
            "svelte" => Language::Svelte,
            "html" | "htm" => Language::Html,
            "css" => Language::Css,
            "scss" | "sass" => Language::Scss,
            "json" => Language::Json,
            "yaml" | "yml" => Language::Yaml,
            "toml" => Language::Toml,
            "xml" => Language::Xml,
            "md" | "markdown" => Language::Markdown,
            "sh" | "bash" | "zsh" => Language::Shell,
            "sql" => Language::Sql,
            "dockerfile" => Language::Dockerfile,
            _ => return None,
        };
        Some(lang)
    }

    /// Lowercase identifier, identical to the serialized form.
    pub fn name(self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::JavaScript => "javascript",
            Language::Jsx => "jsx",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::Kotlin => "kotlin",
            Language::Scala => "scala",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Swift => "swift",
            Language::Dart => "dart",
            Language::Elixir => "elixir",
            Language::Haskell => "haskell",
            Language::Lua => "lua",
            Language::Vue => "vue",
            Language::Svelte => "svelte",
            Language::Html => "html",
            Language::Css => "css",
            Language::Scss => "scss",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Toml => "toml",
            Language::Xml => "xml",
            Language::Markdown => "markdown",
            Language::Shell => "shell",
            Language::Sql => "sql",
            Language::Dockerfile => "dockerfile",
        }
    }

    /// True for the JavaScript family, which shares import syntax.
    pub fn is_js_like(self) -> bool {
        matches!(
            self,
            Language::JavaScript
                | Language::Jsx
                | Language::TypeScript
                | Language::Tsx
                | Language::Vue
                | Language::Svelte
        )
    }

    /// Languages whose imports are extracted and resolved to repository files.
    pub fn tracks_imports(self) -> bool {
        matches!(self, Language::Go | Language::Python | Language::Rust) || self.is_js_like()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
