//! Resolve raw import strings to files tracked in the same repository.
//!
//! Only imports that can point inside the repository are considered:
//! relative JS/TS specifiers, Python modules, Go packages under the module
//! path from `go.mod`, and Rust `crate::` paths. Everything else (standard
//! library, third-party packages) resolves to `None`.

use std::collections::BTreeSet;

use crate::language::Language;

const JS_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "vue", "svelte"];

/// Extract the module path from `go.mod` content.
pub fn go_module_name(go_mod: &str) -> Option<String> {
    go_mod.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("module")?;
        let name = rest.trim().trim_matches('"');
        (!name.is_empty()).then(|| name.to_owned())
    })
}

/// Resolves imports against the set of files present at one commit.
#[derive(Debug, Clone)]
pub struct ImportResolver<'a> {
    files: &'a BTreeSet<String>,
    go_module: Option<&'a str>,
}

impl<'a> ImportResolver<'a> {
    pub fn new(files: &'a BTreeSet<String>) -> Self {
        Self {
            files,
            go_module: None,
        }
    }

    pub fn with_go_module(mut self, module: Option<&'a str>) -> Self {
        self.go_module = module;
        self
    }

    /// Resolve every import of `from`, returning sorted, unique targets.
    /// A file never depends on itself.
    pub fn resolve_all(&self, from: &str, language: Language, imports: &[String]) -> Vec<String> {
        let resolved: BTreeSet<String> = imports
            .iter()
            .filter_map(|import| self.resolve(from, language, import))
            .filter(|target| target != from)
            .collect();
        resolved.into_iter().collect()
    }

    /// Resolve one import. Go imports resolve to a package directory; all
    /// other languages resolve to a file.
    pub fn resolve(&self, from: &str, language: Language, import: &str) -> Option<String> {
        match language {
            Language::Go => self.resolve_go(import),
            Language::Python => self.resolve_python(from, import),
            Language::Rust => self.resolve_rust(from, import),
            lang if lang.is_js_like() => self.resolve_js(from, import),
            _ => None,
        }
    }

    fn resolve_js(&self, from: &str, import: &str) -> Option<String> {
        if !(import.starts_with("./") || import.starts_with("../")) {
            return None;
        }
        let target = normalize(&join(parent_dir(from), import))?;
        let mut candidates = vec![target.clone()];
        candidates.extend(JS_EXTENSIONS.iter().map(|ext| format!("{target}.{ext}")));
        candidates.extend(JS_EXTENSIONS.iter().map(|ext| format!("{target}/index.{ext}")));
        self.first_known(candidates)
    }

    fn resolve_python(&self, from: &str, import: &str) -> Option<String> {
        let dots = import.chars().take_while(|&c| c == '.').count();
        let module = import[dots..].replace('.', "/");

        let bases: Vec<String> = if dots > 0 {
            // `from .models import x` is relative to the importing package.
            let mut base = parent_dir(from).to_owned();
            for _ in 1..dots {
                base = parent_dir(&base).to_owned();
            }
            vec![base]
        } else {
            vec![String::new(), "src".to_owned(), parent_dir(from).to_owned()]
        };

        let candidates = bases.iter().flat_map(|base| {
            let stem = join(base, &module);
            [format!("{stem}.py"), format!("{stem}/__init__.py")]
        });
        self.first_known(candidates.filter_map(|c| normalize(&c)))
    }

    fn resolve_go(&self, import: &str) -> Option<String> {
        let module = self.go_module?;
        let dir = if import == module {
            ""
        } else {
            import.strip_prefix(module)?.strip_prefix('/')?
        };
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let has_package = self
            .files
            .range(prefix.clone()..)
            .take_while(|f| f.starts_with(&prefix))
            .any(|f| {
                let rest = &f[prefix.len()..];
                !rest.contains('/') && rest.ends_with(".go")
            });
        has_package.then(|| if dir.is_empty() { ".".to_owned() } else { dir.to_owned() })
    }

    fn resolve_rust(&self, from: &str, import: &str) -> Option<String> {
        let path = import.strip_prefix("crate::")?;
        let root = if from.starts_with("src/") {
            "src/".to_owned()
        } else {
            let idx = from.find("/src/")?;
            from[..idx + "/src/".len()].to_owned()
        };
        let segments: Vec<&str> = path.split("::").filter(|s| !s.is_empty()).collect();
        // Longest module prefix wins: `crate::a::b::Item` may live in a/b.rs or a.rs.
        let candidates = (1..=segments.len()).rev().flat_map(|n| {
            let module = segments[..n].join("/");
            [format!("{root}{module}.rs"), format!("{root}{module}/mod.rs")]
        });
        self.first_known(candidates)
    }

    fn first_known(&self, candidates: impl IntoIterator<Item = String>) -> Option<String> {
        candidates.into_iter().find(|c| self.files.contains(c))
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn join(base: &str, rel: &str) -> String {
    if base.is_empty() {
        rel.to_owned()
    } else {
        format!("{base}/{rel}")
    }
}

/// Collapse `.` and `..` segments. `None` when the path escapes the root.
fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}
