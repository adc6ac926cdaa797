//! `structure`: per-file facts plus the rendered repository overview.

use std::collections::BTreeMap;

use devflow_core::config::ArtifactFiles;
use devflow_core::Change;
use devflow_detector::{analyze, detect_stack, is_manifest, DetectError, Manifests, SourceFacts};
use devflow_renderer::context::{FileEntry, StackCtx};
use devflow_renderer::StructureContext;

use crate::builder::{ArtifactOutput, BuildContext, BuildError, Builder};
use crate::builders::{patch_entries, starting_point, to_json};

pub struct StructureBuilder {
    structure_file: String,
    metadata_file: String,
}

impl StructureBuilder {
    pub fn new(files: &ArtifactFiles) -> Self {
        Self {
            structure_file: files.structure.clone(),
            metadata_file: files.file_metadata.clone(),
        }
    }

    fn stack(&self, ctx: &BuildContext<'_>, facts: &BTreeMap<String, SourceFacts>) -> Result<Option<StackCtx>, BuildError> {
        let mut manifests = Manifests::new();
        for path in facts.keys().filter(|p| is_manifest(p)) {
            manifests.insert(path.clone(), ctx.source.read_to_string(path)?);
        }
        match detect_stack(&manifests) {
            Ok(stack) => Ok(Some(StackCtx {
                language: stack.primary_language,
                framework: stack.framework,
                category: stack.category.to_string(),
            })),
            Err(DetectError::UnknownStack) => Ok(None),
            Err(e) => {
                tracing::warn!(error = %e, "stack detection skipped");
                Ok(None)
            }
        }
    }
}

impl Builder for StructureBuilder {
    fn name(&self) -> &str {
        "structure"
    }

    fn outputs(&self) -> Vec<ArtifactOutput> {
        vec![
            ArtifactOutput::new(&self.structure_file, "Repository structure and statistics"),
            ArtifactOutput::new(&self.metadata_file, "Per-file language, size, and symbol facts"),
        ]
    }

    fn build(&self, ctx: &BuildContext<'_>, changes: &[Change]) -> Result<(), BuildError> {
        let (mut facts, changes) = starting_point(ctx, self.name(), &self.metadata_file, changes, |bytes| {
            serde_json::from_slice::<BTreeMap<String, SourceFacts>>(bytes)
        })?;
        patch_entries(&mut facts, &changes, ctx.source, analyze)?;

        let entries: BTreeMap<String, FileEntry> = facts
            .iter()
            .map(|(path, f)| {
                let entry = FileEntry {
                    size: f.size,
                    language: f.language.map(|l| l.name().to_owned()),
                };
                (path.clone(), entry)
            })
            .collect();
        let structure = StructureContext::from_files(ctx.repository(), self.stack(ctx, &facts)?, &entries);

        ctx.write(&self.structure_file, ctx.templates.render_structure(&structure)?)?;
        ctx.write(&self.metadata_file, to_json(&facts)?)?;
        tracing::debug!(files = facts.len(), "structure built");
        Ok(())
    }
}
