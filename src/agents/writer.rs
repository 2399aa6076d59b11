use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::diff::{build_file_context, source_files_from_diff};
use crate::error::{Error, Result};
use crate::generate::TextGenerator;
use crate::prompts::PromptEngine;
use crate::schema::{FixRecord, parse_fix_records};

/// Generates whole-file fix proposals for a PR diff.
pub struct WriterAgent {
    generator: Box<dyn TextGenerator>,
    prompts: PromptEngine,
}

impl WriterAgent {
    pub fn new(generator: Box<dyn TextGenerator>, prompts: PromptEngine) -> Self {
        Self { generator, prompts }
    }

    /// Ask the generator for fixes to the files touched by `diff`, reading
    /// their current content from `repo_path` for context.
    ///
    /// An unparseable reply is recovered locally as "no fixes produced" —
    /// the run proceeds without crashing. Generation failures still
    /// propagate.
    pub fn generate_fixes(&self, diff: &str, repo_path: &Path) -> Result<Vec<FixRecord>> {
        if diff.trim().is_empty() {
            warn!("empty diff, nothing to fix");
            return Ok(Vec::new());
        }

        let files = source_files_from_diff(diff);
        info!(count = files.len(), "source files referenced by diff");
        let file_context = build_file_context(repo_path, &files);

        let mut vars = HashMap::new();
        vars.insert("file_context".to_string(), file_context);
        vars.insert("diff".to_string(), diff.to_string());
        let prompt = self.prompts.render_phase("fix", &vars)?;

        let raw = self.generator.generate(&prompt)?;
        info!(reply_len = raw.len(), "generator replied");

        match parse_fix_records(&raw) {
            Ok(fixes) => {
                info!(count = fixes.len(), "parsed fix records");
                Ok(fixes)
            }
            Err(Error::MalformedResponse(detail)) => {
                warn!(%detail, "generator reply not parseable, treating as no fixes");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}
