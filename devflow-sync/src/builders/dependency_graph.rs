//! `dependency-graph`: intra-repository import edges.
//!
//! Imports are stored per node so incremental runs only re-scan changed
//! files. Resolved `dependencies` are recomputed for every node on every run,
//! since adding or removing one file can change what another file's imports
//! resolve to.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use devflow_core::config::ArtifactFiles;
use devflow_core::Change;
use devflow_detector::{analyze, go_module_name, ImportResolver, Language};

use crate::builder::{ArtifactOutput, BuildContext, BuildError, Builder};
use crate::builders::{patch_entries, starting_point, to_json};
use crate::error::SyncError;

const GO_MOD: &str = "go.mod";

/// `dependency-graph.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<DependencyNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub file: String,
    pub language: Language,
    /// Raw import strings, in source order.
    #[serde(default)]
    pub imports: Vec<String>,
    /// Repository paths the imports resolve to, sorted.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// What is kept per file between runs.
#[derive(Debug, Clone)]
struct Scanned {
    language: Language,
    imports: Vec<String>,
}

pub struct DependencyGraphBuilder {
    file: String,
}

impl DependencyGraphBuilder {
    pub fn new(files: &ArtifactFiles) -> Self {
        Self {
            file: files.dependency_graph.clone(),
        }
    }
}

fn parse_previous(bytes: &[u8]) -> Result<BTreeMap<String, Scanned>, serde_json::Error> {
    let graph: DependencyGraph = serde_json::from_slice(bytes)?;
    Ok(graph
        .nodes
        .into_iter()
        .map(|n| {
            let scanned = Scanned {
                language: n.language,
                imports: n.imports,
            };
            (n.file, scanned)
        })
        .collect())
}

fn scan(path: &str, content: &[u8]) -> Option<Scanned> {
    let facts = analyze(path, content)?;
    let language = facts.language.filter(|l| l.tracks_imports())?;
    Some(Scanned {
        language,
        imports: facts.imports,
    })
}

impl Builder for DependencyGraphBuilder {
    fn name(&self) -> &str {
        "dependency-graph"
    }

    fn outputs(&self) -> Vec<ArtifactOutput> {
        vec![ArtifactOutput::new(&self.file, "Import dependencies between source files")]
    }

    fn build(&self, ctx: &BuildContext<'_>, changes: &[Change]) -> Result<(), BuildError> {
        let (mut scanned, changes) = starting_point(ctx, self.name(), &self.file, changes, parse_previous)?;
        patch_entries(&mut scanned, &changes, ctx.source, scan)?;

        let go_module = if scanned.values().any(|s| s.language == Language::Go) {
            match ctx.source.read_to_string(GO_MOD) {
                Ok(content) => go_module_name(&content),
                Err(e @ SyncError::Timeout { .. }) => return Err(e.into()),
                Err(_) => None,
            }
        } else {
            None
        };

        let universe: BTreeSet<String> = scanned.keys().cloned().collect();
        let resolver = ImportResolver::new(&universe).with_go_module(go_module.as_deref());
        let nodes = scanned
            .into_iter()
            .map(|(file, s)| DependencyNode {
                dependencies: resolver.resolve_all(&file, s.language, &s.imports),
                file,
                language: s.language,
                imports: s.imports,
            })
            .collect();

        ctx.write(&self.file, to_json(&DependencyGraph { nodes })?)?;
        Ok(())
    }
}
