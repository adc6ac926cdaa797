//! Paths the knowledge base never describes: vendored and generated
//! directories, lock files, and media/binary formats.

const IGNORED_DIRS: &[&str] = &[
    "node_modules", ".git", ".svn", ".hg", "dist", "build", ".next", ".nuxt", "out",
    "coverage", ".nyc_output", "__pycache__", ".pytest_cache", ".vscode", ".idea", ".venv",
    "venv", "target", "bin", "obj", ".gradle", ".mvn", ".turbo", ".vercel", ".netlify",
];

const IGNORED_FILES: &[&str] = &[
    "package-lock.json", "yarn.lock", "pnpm-lock.yaml", "bun.lockb", "go.sum", "Cargo.lock",
    "Pipfile.lock", "poetry.lock", "Gemfile.lock", "composer.lock", "mix.lock", "pubspec.lock",
    ".env", ".env.local", ".env.production", ".env.development", ".DS_Store", "Thumbs.db",
];

const IGNORED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "bmp", "tiff",
    "mp4", "avi", "mov", "mkv", "webm", "mp3", "wav", "flac", "ogg",
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    "zip", "rar", "7z", "tar", "gz", "bz2", "xz",
    "exe", "dll", "so", "dylib", "deb", "rpm",
    "ttf", "otf", "woff", "woff2", "eot",
    "bin", "dat", "db", "sqlite", "sqlite3", "lockb",
];

/// True when `path` (repo-relative, `/`-separated) should be left out of
/// every knowledge-base artifact.
pub fn is_ignored(path: &str) -> bool {
    let mut segments = path.split('/').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            return is_ignored_file(segment);
        }
        if IGNORED_DIRS.contains(&segment) {
            return true;
        }
    }
    false
}

fn is_ignored_file(name: &str) -> bool {
    if IGNORED_FILES.contains(&name) || name.ends_with(".min.js") || name.ends_with(".min.css") {
        return true;
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            IGNORED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}
