//! Stack detection from root-level manifests.
//!
//! `detect_stack(manifests)` inspects the manifest files found at the root of
//! a commit and returns the primary language, framework, and project
//! category. Checks are ordered by specificity: language-specific manifests
//! take priority over generic ones.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::DetectError;

/// Root-level files that feed stack detection.
pub const MANIFEST_NAMES: &[&str] = &[
    "composer.json",
    "pubspec.yaml",
    "Cargo.toml",
    "go.mod",
    "mix.exs",
    "build.gradle",
    "build.gradle.kts",
    "pom.xml",
    "Gemfile",
    "Package.swift",
    "package.json",
    "tsconfig.json",
    "requirements.txt",
    "pyproject.toml",
    "Pipfile",
    "setup.py",
];

const DOTNET_SUFFIXES: &[&str] = &[".csproj", ".sln", ".fsproj"];

/// True when `path` is a root-level manifest [`detect_stack`] reads.
pub fn is_manifest(path: &str) -> bool {
    !path.contains('/')
        && (MANIFEST_NAMES.contains(&path) || DOTNET_SUFFIXES.iter().any(|s| path.ends_with(s)))
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Manifest contents keyed by root-level file name.
#[derive(Debug, Clone, Default)]
pub struct Manifests {
    files: BTreeMap<String, String>,
}

impl Manifests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.files.insert(name.into(), content.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn with_suffix<'s>(&'s self, suffix: &'s str) -> impl Iterator<Item = (&'s str, &'s str)> {
        self.files
            .iter()
            .filter(move |(name, _)| name.ends_with(suffix))
            .map(|(name, content)| (name.as_str(), content.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Manifests {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut manifests = Manifests::new();
        for (name, content) in iter {
            manifests.insert(name, content);
        }
        manifests
    }
}

/// Broad project category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StackCategory {
    Backend,
    Frontend,
    Mobile,
    Ml,
}

impl fmt::Display for StackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StackCategory::Backend => "backend",
            StackCategory::Frontend => "frontend",
            StackCategory::Mobile => "mobile",
            StackCategory::Ml => "machine learning",
        };
        f.write_str(label)
    }
}

/// Confidence level of a detected stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Manifest present and a framework matched.
    High,
    /// Manifest present but no framework match.
    Medium,
}

/// A detected technology stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedStack {
    /// Primary programming language (e.g. `"Rust"`, `"TypeScript"`).
    pub primary_language: String,
    /// Framework or runtime, if identified (e.g. `"Next.js"`, `"Axum"`).
    pub framework: Option<String>,
    pub category: StackCategory,
    pub confidence: Confidence,
}

impl DetectedStack {
    fn new(language: &str, framework: Option<&str>, category: StackCategory) -> Self {
        Self {
            primary_language: language.to_string(),
            framework: framework.map(str::to_string),
            category,
            confidence: if framework.is_some() {
                Confidence::High
            } else {
                Confidence::Medium
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Detect the technology stack from root-level manifests.
///
/// Returns `DetectError::UnknownStack` if no known manifest is present.
pub fn detect_stack(manifests: &Manifests) -> Result<DetectedStack, DetectError> {
    let detectors: &[fn(&Manifests) -> Result<Option<DetectedStack>, DetectError>] = &[
        detect_php,
        detect_dart,
        detect_rust,
        detect_go,
        detect_elixir,
        detect_jvm,
        detect_dotnet,
        detect_ruby,
        detect_swift,
        detect_javascript,
        detect_python,
    ];
    for detect in detectors {
        if let Some(stack) = detect(manifests)? {
            return Ok(stack);
        }
    }
    Err(DetectError::UnknownStack)
}

// ---------------------------------------------------------------------------
// Language detectors
// ---------------------------------------------------------------------------

fn detect_php(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    let Some(content) = m.get("composer.json") else { return Ok(None) };
    let lower = content.to_lowercase();

    let framework = if lower.contains("laravel/framework") {
        Some("Laravel")
    } else if lower.contains("symfony/symfony") || lower.contains("symfony/framework-bundle") {
        Some("Symfony")
    } else if lower.contains("slim/slim") {
        Some("Slim")
    } else {
        None
    };
    Ok(Some(DetectedStack::new("PHP", framework, StackCategory::Backend)))
}

fn detect_dart(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    let Some(content) = m.get("pubspec.yaml") else { return Ok(None) };
    let doc: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| DetectError::ParseError {
        path: "pubspec.yaml".to_owned(),
        message: e.to_string(),
    })?;

    let is_flutter = doc
        .get("dependencies")
        .and_then(|deps| deps.get("flutter"))
        .is_some();
    Ok(Some(if is_flutter {
        DetectedStack::new("Dart", Some("Flutter"), StackCategory::Mobile)
    } else {
        DetectedStack::new("Dart", None, StackCategory::Backend)
    }))
}

fn detect_rust(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    let Some(content) = m.get("Cargo.toml") else { return Ok(None) };
    let lower = content.to_lowercase();

    let framework = if lower.contains("actix-web") {
        Some("Actix Web")
    } else if lower.contains("axum") {
        Some("Axum")
    } else if lower.contains("tauri") {
        Some("Tauri")
    } else if lower.contains("leptos") {
        Some("Leptos")
    } else if lower.contains("rocket") {
        Some("Rocket")
    } else {
        None
    };
    let category = match framework {
        Some("Tauri" | "Leptos") => StackCategory::Frontend,
        _ => StackCategory::Backend,
    };
    Ok(Some(DetectedStack::new("Rust", framework, category)))
}

fn detect_go(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    let Some(content) = m.get("go.mod") else { return Ok(None) };
    let lower = content.to_lowercase();

    let framework = if lower.contains("gin-gonic/gin") {
        Some("Gin")
    } else if lower.contains("labstack/echo") {
        Some("Echo")
    } else if lower.contains("gofiber/fiber") {
        Some("Fiber")
    } else if lower.contains("go-chi/chi") {
        Some("Chi")
    } else {
        None
    };
    Ok(Some(DetectedStack::new("Go", framework, StackCategory::Backend)))
}

fn detect_elixir(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    let Some(content) = m.get("mix.exs") else { return Ok(None) };
    let framework = content.to_lowercase().contains(":phoenix").then_some("Phoenix");
    Ok(Some(DetectedStack::new("Elixir", framework, StackCategory::Backend)))
}

fn detect_jvm(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    let (content, language) = if let Some(c) = m.get("build.gradle.kts") {
        (c, "Kotlin")
    } else if let Some(c) = m.get("build.gradle") {
        (c, "Java")
    } else if let Some(c) = m.get("pom.xml") {
        (c, "Java")
    } else {
        return Ok(None);
    };

    let lower = content.to_lowercase();
    let framework = if lower.contains("spring-boot") || lower.contains("springframework") {
        Some("Spring Boot")
    } else if lower.contains("quarkus") {
        Some("Quarkus")
    } else if lower.contains("micronaut") {
        Some("Micronaut")
    } else {
        None
    };
    Ok(Some(DetectedStack::new(language, framework, StackCategory::Backend)))
}

fn detect_dotnet(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    if !DOTNET_SUFFIXES.iter().any(|s| m.with_suffix(s).next().is_some()) {
        return Ok(None);
    }
    let csproj = m
        .with_suffix(".csproj")
        .map(|(_, content)| content.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    let framework = if csproj.contains("maui") {
        Some("MAUI")
    } else if csproj.contains("blazor") || csproj.contains("microsoft.aspnetcore.components") {
        Some("Blazor")
    } else if csproj.contains("microsoft.aspnetcore") || csproj.contains("microsoft.net.sdk.web") {
        Some("ASP.NET Core")
    } else {
        None
    };
    let category = match framework {
        Some("MAUI") => StackCategory::Mobile,
        Some("Blazor") => StackCategory::Frontend,
        _ => StackCategory::Backend,
    };
    Ok(Some(DetectedStack::new("C#", framework, category)))
}

fn detect_ruby(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    let Some(content) = m.get("Gemfile") else { return Ok(None) };
    let lower = content.to_lowercase();

    let framework = if lower.contains("\"rails\"") || lower.contains("'rails'") {
        Some("Rails")
    } else if lower.contains("sinatra") {
        Some("Sinatra")
    } else {
        None
    };
    Ok(Some(DetectedStack::new("Ruby", framework, StackCategory::Backend)))
}

fn detect_swift(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    let Some(content) = m.get("Package.swift") else { return Ok(None) };
    let lower = content.to_lowercase();

    let (framework, category) = if lower.contains("vapor") {
        (Some("Vapor"), StackCategory::Backend)
    } else {
        (None, StackCategory::Mobile)
    };
    Ok(Some(DetectedStack::new("Swift", framework, category)))
}

fn detect_javascript(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    let Some(content) = m.get("package.json") else { return Ok(None) };
    let json: serde_json::Value = serde_json::from_str(content).map_err(|e| DetectError::ParseError {
        path: "package.json".to_owned(),
        message: e.to_string(),
    })?;

    let deps = collect_package_json_deps(&json);
    let is_typescript = m.contains("tsconfig.json") || deps.contains("typescript");
    let language = if is_typescript { "TypeScript" } else { "JavaScript" };

    // Most specific framework first: meta-frameworks before their base library.
    let table: &[(&[&str], &str, StackCategory)] = &[
        (&["next"], "Next.js", StackCategory::Frontend),
        (&["nuxt", "nuxt3"], "Nuxt", StackCategory::Frontend),
        (&["@remix-run/react"], "Remix", StackCategory::Frontend),
        (&["astro"], "Astro", StackCategory::Frontend),
        (&["@angular/core"], "Angular", StackCategory::Frontend),
        (&["@sveltejs/kit"], "SvelteKit", StackCategory::Frontend),
        (&["svelte"], "Svelte", StackCategory::Frontend),
        (&["vue"], "Vue", StackCategory::Frontend),
        (&["react-native"], "React Native", StackCategory::Mobile),
        (&["react"], "React", StackCategory::Frontend),
        (&["@nestjs/core"], "NestJS", StackCategory::Backend),
        (&["express"], "Express", StackCategory::Backend),
        (&["fastify"], "Fastify", StackCategory::Backend),
        (&["koa"], "Koa", StackCategory::Backend),
    ];
    let matched = table
        .iter()
        .find(|(keys, _, _)| keys.iter().any(|k| deps.contains(*k)));

    Ok(Some(match matched {
        Some((_, name, category)) => DetectedStack::new(language, Some(*name), *category),
        None => DetectedStack::new(language, None, StackCategory::Backend),
    }))
}

fn detect_python(m: &Manifests) -> Result<Option<DetectedStack>, DetectError> {
    let Some(content) = ["requirements.txt", "pyproject.toml", "Pipfile", "setup.py"]
        .iter()
        .find_map(|name| m.get(name))
    else {
        return Ok(None);
    };
    let lower = content.to_lowercase();

    let (framework, category) = if lower.contains("fastapi") {
        (Some("FastAPI"), StackCategory::Backend)
    } else if lower.contains("django") {
        (Some("Django"), StackCategory::Backend)
    } else if lower.contains("flask") {
        (Some("Flask"), StackCategory::Backend)
    } else if lower.contains("streamlit") {
        (Some("Streamlit"), StackCategory::Ml)
    } else if lower.contains("torch") {
        (Some("PyTorch"), StackCategory::Ml)
    } else if lower.contains("tensorflow") || lower.contains("keras") {
        (Some("TensorFlow"), StackCategory::Ml)
    } else if lower.contains("scikit-learn") || lower.contains("sklearn") {
        (Some("scikit-learn"), StackCategory::Ml)
    } else {
        (None, StackCategory::Backend)
    };
    Ok(Some(DetectedStack::new("Python", framework, category)))
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn collect_package_json_deps(json: &serde_json::Value) -> HashSet<String> {
    let mut deps = HashSet::new();
    for key in &["dependencies", "devDependencies", "peerDependencies"] {
        if let Some(obj) = json.get(key).and_then(|v| v.as_object()) {
            deps.extend(obj.keys().cloned());
        }
    }
    deps
}
