//! `readme`: describes the knowledge-base files themselves.

use devflow_core::config::{ArtifactFiles, META_FILE, POINTER_FILE};
use devflow_core::Change;
use devflow_renderer::ReadmeContext;

use crate::builder::{ArtifactOutput, BuildContext, BuildError, Builder};

pub struct ReadmeBuilder {
    file: String,
}

impl ReadmeBuilder {
    pub fn new(files: &ArtifactFiles) -> Self {
        Self {
            file: files.readme.clone(),
        }
    }
}

impl Builder for ReadmeBuilder {
    fn name(&self) -> &str {
        "readme"
    }

    fn outputs(&self) -> Vec<ArtifactOutput> {
        vec![ArtifactOutput::new(&self.file, "This overview")]
    }

    fn build(&self, ctx: &BuildContext<'_>, _changes: &[Change]) -> Result<(), BuildError> {
        let listed = ctx
            .artifacts
            .iter()
            .filter(|a| a.file != self.file)
            .fold(ReadmeContext::new(ctx.repository()), |readme, a| {
                readme.with_file(&a.file, &a.description)
            })
            .with_file(POINTER_FILE, "Commit the knowledge base was last synchronized against")
            .with_file(META_FILE, "Provenance of the last sync: commit, changed files, time");
        ctx.write(&self.file, ctx.templates.render_readme(&listed)?)?;
        Ok(())
    }
}
