//! Per-file source facts.
//!
//! Extraction is line-oriented and deliberately shallow: it recognises the
//! common declaration and import forms of each language without parsing.
//! Unsupported languages still get size and line counts.

use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Bytes inspected by [`is_binary`].
const BINARY_SNIFF_LEN: usize = 8192;

/// A named declaration and the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub line: usize,
}

/// Facts recorded for one text file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFacts {
    pub language: Option<Language>,
    pub size: u64,
    pub lines: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<Symbol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<Symbol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
}

/// Heuristic binary check: a NUL byte, or more than 30% control characters,
/// in the first 8 KiB.
pub fn is_binary(content: &[u8]) -> bool {
    let head = &content[..content.len().min(BINARY_SNIFF_LEN)];
    if head.is_empty() {
        return false;
    }
    if head.contains(&0) {
        return true;
    }
    let control = head
        .iter()
        .filter(|&&b| b < 32 && !matches!(b, b'\n' | b'\r' | b'\t'))
        .count();
    control * 10 > head.len() * 3
}

/// Analyze one file. Returns `None` for binary content.
pub fn analyze(path: &str, content: &[u8]) -> Option<SourceFacts> {
    if is_binary(content) {
        return None;
    }
    let text = String::from_utf8_lossy(content);
    let language = Language::from_path(path);
    let mut facts = SourceFacts {
        language,
        size: content.len() as u64,
        lines: text.lines().count(),
        functions: Vec::new(),
        classes: Vec::new(),
        imports: Vec::new(),
    };

    match language {
        Some(Language::Go) => scan_go(&text, &mut facts),
        Some(Language::Python) => scan_python(&text, &mut facts),
        Some(Language::Rust) => scan_rust(&text, &mut facts),
        Some(lang) if lang.is_js_like() => scan_js(&text, &mut facts),
        _ => {}
    }
    dedup_in_place(&mut facts.imports);
    Some(facts)
}

// ---------------------------------------------------------------------------
// Go
// ---------------------------------------------------------------------------

fn scan_go(text: &str, facts: &mut SourceFacts) {
    let mut in_import_block = false;
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();

        if in_import_block {
            if line.starts_with(')') {
                in_import_block = false;
            } else if let Some(path) = quoted(line, '"') {
                facts.imports.push(path.to_owned());
            }
            continue;
        }

        if let Some(rest) = line
            .strip_prefix("import")
            .filter(|r| r.starts_with(|c: char| c.is_whitespace() || c == '('))
        {
            let rest = rest.trim_start();
            if rest.starts_with('(') {
                in_import_block = true;
            } else if let Some(path) = quoted(rest, '"') {
                facts.imports.push(path.to_owned());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("func ") {
            // Skip a method receiver: `func (s *Server) Run(...)`.
            let rest = if rest.starts_with('(') {
                rest.find(')').map(|i| rest[i + 1..].trim_start()).unwrap_or("")
            } else {
                rest
            };
            if let Some(name) = leading_ident(rest) {
                facts.functions.push(symbol(name, idx));
            }
        } else if let Some(rest) = line.strip_prefix("type ") {
            let mut parts = rest.split_whitespace();
            if let (Some(name), Some("struct" | "interface")) =
                (parts.next(), parts.next().map(|k| k.trim_end_matches('{')))
            {
                facts.classes.push(symbol(name, idx));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// JavaScript / TypeScript
// ---------------------------------------------------------------------------

fn scan_js(text: &str, facts: &mut SourceFacts) {
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let decl = strip_js_modifiers(line);

        if let Some(rest) = decl
            .strip_prefix("function ")
            .or_else(|| decl.strip_prefix("function*"))
        {
            let rest = rest.trim_start_matches('*').trim_start();
            if let Some(name) = leading_ident(rest) {
                facts.functions.push(symbol(name, idx));
            }
        } else if let Some(rest) = decl.strip_prefix("class ") {
            if let Some(name) = leading_ident(rest) {
                facts.classes.push(symbol(name, idx));
            }
        } else if let Some(rest) = decl
            .strip_prefix("const ")
            .or_else(|| decl.strip_prefix("let "))
        {
            // `const handler = async (req) => ...`
            if let Some((lhs, rhs)) = rest.split_once('=') {
                let rhs = rhs.trim_start();
                let is_arrow = rhs.contains("=>")
                    && (rhs.starts_with('(') || rhs.starts_with("async") || leading_ident(rhs).is_some());
                if is_arrow || rhs.starts_with("function") {
                    if let Some(name) = leading_ident(lhs.trim()) {
                        facts.functions.push(symbol(name, idx));
                    }
                }
            }
        }

        if line.starts_with("import ") || line.starts_with("export ") {
            if let Some((_, source)) = line.rsplit_once(" from ") {
                if let Some(path) = quoted_any(source) {
                    facts.imports.push(path.to_owned());
                }
            } else if line.starts_with("import ") {
                // Side-effect import: `import './styles.css'`
                if let Some(path) = quoted_any(&line["import ".len()..]) {
                    facts.imports.push(path.to_owned());
                }
            }
        }

        let mut rest = line;
        while let Some(pos) = rest.find("require(") {
            rest = &rest[pos + "require(".len()..];
            if let Some(path) = quoted_any(rest) {
                facts.imports.push(path.to_owned());
            }
        }
    }
}

fn strip_js_modifiers(mut line: &str) -> &str {
    loop {
        let before = line;
        for prefix in ["export ", "default ", "async ", "abstract ", "declare "] {
            if let Some(rest) = line.strip_prefix(prefix) {
                line = rest.trim_start();
            }
        }
        if line == before {
            return line;
        }
    }
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

fn scan_python(text: &str, facts: &mut SourceFacts) {
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();

        if let Some(rest) = line
            .strip_prefix("def ")
            .or_else(|| line.strip_prefix("async def "))
        {
            if let Some(name) = leading_ident(rest) {
                facts.functions.push(symbol(name, idx));
            }
        } else if let Some(rest) = line.strip_prefix("class ") {
            if let Some(name) = leading_ident(rest) {
                facts.classes.push(symbol(name, idx));
            }
        } else if let Some(rest) = line.strip_prefix("from ") {
            // `from pkg.mod import a, b` records the module, not the names.
            if let Some(module) = rest.split_whitespace().next() {
                facts.imports.push(module.to_owned());
            }
        } else if let Some(rest) = line.strip_prefix("import ") {
            for item in rest.split(',') {
                if let Some(module) = item.split_whitespace().next() {
                    facts.imports.push(module.to_owned());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rust
// ---------------------------------------------------------------------------

fn scan_rust(text: &str, facts: &mut SourceFacts) {
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let decl = strip_rust_visibility(line);

        if let Some(rest) = decl.strip_prefix("use ") {
            let path = rest
                .split(|c| c == '{' || c == ';' || c == ' ')
                .next()
                .unwrap_or("")
                .trim_end_matches("::");
            if !path.is_empty() {
                facts.imports.push(path.to_owned());
            }
            continue;
        }

        let decl = ["async ", "const ", "unsafe ", "extern \"C\" "]
            .iter()
            .fold(decl, |d, p| d.strip_prefix(p).unwrap_or(d));

        if let Some(rest) = decl.strip_prefix("fn ") {
            if let Some(name) = leading_ident(rest) {
                facts.functions.push(symbol(name, idx));
            }
        } else if let Some(rest) = decl
            .strip_prefix("struct ")
            .or_else(|| decl.strip_prefix("enum "))
            .or_else(|| decl.strip_prefix("trait "))
        {
            if let Some(name) = leading_ident(rest) {
                facts.classes.push(symbol(name, idx));
            }
        }
    }
}

fn strip_rust_visibility(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix("pub(") {
        return rest.find(')').map(|i| rest[i + 1..].trim_start()).unwrap_or(line);
    }
    line.strip_prefix("pub ").unwrap_or(line)
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn symbol(name: &str, idx: usize) -> Symbol {
    Symbol {
        name: name.to_owned(),
        line: idx + 1,
    }
}

fn leading_ident(s: &str) -> Option<&str> {
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '$'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let ident = &s[..end];
    match ident.chars().next() {
        Some(c) if !c.is_ascii_digit() => Some(ident),
        _ => None,
    }
}

/// First `delim`-quoted substring of `s`.
fn quoted(s: &str, delim: char) -> Option<&str> {
    let start = s.find(delim)? + delim.len_utf8();
    let len = s[start..].find(delim)?;
    Some(&s[start..start + len])
}

/// First substring quoted with `'`, `"` or a backtick, whichever opens first.
fn quoted_any(s: &str) -> Option<&str> {
    let open = s.find(&['\'', '"', '`'][..])?;
    let delim = s[open..].chars().next()?;
    quoted(&s[open..], delim)
}

fn dedup_in_place(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}
