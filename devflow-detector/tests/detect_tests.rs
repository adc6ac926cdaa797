//! Parameterised detection tests for `devflow-detector`.
//!
//! Manifests are supplied in memory, the way the knowledge-base builders
//! read them from a commit.

use std::collections::BTreeSet;

use devflow_detector::{
    analyze, detect_stack, go_module_name, is_manifest, Confidence, DetectError, ImportResolver,
    Language, Manifests, StackCategory,
};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn one(name: &str, content: &str) -> Manifests {
    [(name, content)].into_iter().collect()
}

fn pkg_json(deps: &[(&str, &str)]) -> String {
    let entries: Vec<String> = deps.iter().map(|(k, v)| format!(r#""{k}": "{v}""#)).collect();
    format!(r#"{{"name": "app", "dependencies": {{{}}}}}"#, entries.join(", "))
}

// ---------------------------------------------------------------------------
// Stack detection
// ---------------------------------------------------------------------------

#[rstest]
#[case("actix-web", "Actix Web", StackCategory::Backend)]
#[case("axum", "Axum", StackCategory::Backend)]
#[case("tauri", "Tauri", StackCategory::Frontend)]
#[case("leptos", "Leptos", StackCategory::Frontend)]
fn rust_detection(#[case] dep: &str, #[case] fw: &str, #[case] category: StackCategory) {
    let m = one("Cargo.toml", &format!("[dependencies]\n{dep} = \"1\"\n"));
    let s = detect_stack(&m).expect("detect");
    assert_eq!(s.primary_language, "Rust");
    assert_eq!(s.framework.as_deref(), Some(fw));
    assert_eq!(s.category, category);
    assert_eq!(s.confidence, Confidence::High);
}

#[test]
fn rust_no_framework_is_medium_confidence() {
    let m = one("Cargo.toml", "[dependencies]\nserde = \"1\"\n");
    let s = detect_stack(&m).expect("detect");
    assert!(s.framework.is_none());
    assert_eq!(s.confidence, Confidence::Medium);
}

#[rstest]
#[case("github.com/gin-gonic/gin", "Gin")]
#[case("github.com/labstack/echo/v4", "Echo")]
#[case("github.com/go-chi/chi/v5", "Chi")]
fn go_detection(#[case] dep: &str, #[case] fw: &str) {
    let m = one("go.mod", &format!("module example.com/app\n\nrequire {dep} v1.0.0\n"));
    let s = detect_stack(&m).expect("detect");
    assert_eq!(s.primary_language, "Go");
    assert_eq!(s.framework.as_deref(), Some(fw));
}

#[rstest]
#[case("next", "Next.js", StackCategory::Frontend)]
#[case("react", "React", StackCategory::Frontend)]
#[case("react-native", "React Native", StackCategory::Mobile)]
#[case("express", "Express", StackCategory::Backend)]
#[case("@nestjs/core", "NestJS", StackCategory::Backend)]
fn js_framework_detection(#[case] dep: &str, #[case] fw: &str, #[case] category: StackCategory) {
    let m = one("package.json", &pkg_json(&[(dep, "^1.0.0")]));
    let s = detect_stack(&m).expect("detect");
    assert_eq!(s.primary_language, "JavaScript");
    assert_eq!(s.framework.as_deref(), Some(fw));
    assert_eq!(s.category, category);
}

#[test]
fn next_wins_over_react() {
    let m = one("package.json", &pkg_json(&[("react", "^18"), ("next", "^14")]));
    assert_eq!(detect_stack(&m).unwrap().framework.as_deref(), Some("Next.js"));
}

#[test]
fn tsconfig_marks_typescript() {
    let m: Manifests = [
        ("package.json", pkg_json(&[("express", "^4")])),
        ("tsconfig.json", "{}".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(detect_stack(&m).unwrap().primary_language, "TypeScript");
}

#[test]
fn malformed_package_json_is_a_parse_error() {
    let err = detect_stack(&one("package.json", "{not json")).unwrap_err();
    assert!(matches!(err, DetectError::ParseError { ref path, .. } if path == "package.json"));
}

#[test]
fn flutter_from_pubspec_dependencies() {
    let pubspec = "name: app\ndependencies:\n  flutter:\n    sdk: flutter\n";
    let s = detect_stack(&one("pubspec.yaml", pubspec)).expect("detect");
    assert_eq!(s.framework.as_deref(), Some("Flutter"));
    assert_eq!(s.category, StackCategory::Mobile);
}

#[rstest]
#[case("fastapi==0.110\n", "FastAPI", StackCategory::Backend)]
#[case("torch>=2\n", "PyTorch", StackCategory::Ml)]
fn python_detection(#[case] reqs: &str, #[case] fw: &str, #[case] category: StackCategory) {
    let s = detect_stack(&one("requirements.txt", reqs)).expect("detect");
    assert_eq!(s.primary_language, "Python");
    assert_eq!(s.framework.as_deref(), Some(fw));
    assert_eq!(s.category, category);
}

#[test]
fn csproj_detects_dotnet() {
    let s = detect_stack(&one("Api.csproj", "<Project Sdk=\"Microsoft.NET.Sdk.Web\">")).expect("detect");
    assert_eq!(s.primary_language, "C#");
    assert_eq!(s.framework.as_deref(), Some("ASP.NET Core"));
}

#[test]
fn specific_manifest_beats_generic_one() {
    let m: Manifests = [
        ("package.json", pkg_json(&[("react", "^18")])),
        ("go.mod", "module x\n".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(detect_stack(&m).unwrap().primary_language, "Go");
}

#[test]
fn no_manifest_is_unknown() {
    assert!(matches!(detect_stack(&Manifests::new()), Err(DetectError::UnknownStack)));
}

#[rstest]
#[case("Cargo.toml", true)]
#[case("Web.csproj", true)]
#[case("crates/a/Cargo.toml", false)]
#[case("README.md", false)]
fn manifest_names(#[case] path: &str, #[case] expected: bool) {
    assert_eq!(is_manifest(path), expected);
}

// ---------------------------------------------------------------------------
// Facts + resolution
// ---------------------------------------------------------------------------

#[test]
fn go_package_imports_resolve_to_directories() {
    let files: BTreeSet<String> = ["main.go", "internal/db/db.go", "internal/db/sql/q.go"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let module = go_module_name("module github.com/acme/api\n").unwrap();
    let resolver = ImportResolver::new(&files).with_go_module(Some(&module));

    let facts = analyze(
        "main.go",
        b"package main\n\nimport (\n\t\"fmt\"\n\t\"github.com/acme/api/internal/db\"\n)\n",
    )
    .unwrap();
    let deps = resolver.resolve_all("main.go", Language::Go, &facts.imports);
    assert_eq!(deps, vec!["internal/db"]);
}

#[test]
fn python_relative_and_absolute_modules_resolve() {
    let files: BTreeSet<String> = ["app/__init__.py", "app/models.py", "app/views.py", "util.py"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let resolver = ImportResolver::new(&files);
    let imports = vec![".models".to_string(), "util".to_string(), "os".to_string()];
    let deps = resolver.resolve_all("app/views.py", Language::Python, &imports);
    assert_eq!(deps, vec!["app/models.py", "util.py"]);
}

#[test]
fn rust_crate_paths_resolve_to_module_files() {
    let files: BTreeSet<String> = ["core/src/lib.rs", "core/src/config.rs", "core/src/net/mod.rs"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let resolver = ImportResolver::new(&files);
    let imports = vec!["crate::config".to_string(), "crate::net::Client".to_string()];
    let deps = resolver.resolve_all("core/src/lib.rs", Language::Rust, &imports);
    assert_eq!(deps, vec!["core/src/config.rs", "core/src/net/mod.rs"]);
}
