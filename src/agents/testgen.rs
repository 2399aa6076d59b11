use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::diff::truncate_chars;
use crate::error::{Error, Result};
use crate::generate::TextGenerator;
use crate::github::ChangedFile;
use crate::prompts::PromptEngine;
use crate::schema::{TestCase, parse_test_cases};

const MAX_DIFF_CHARS: usize = 5000;

/// Generates test cases for code changed by a PR and writes them into the
/// working copy.
pub struct TestAgent {
    generator: Box<dyn TextGenerator>,
    prompts: PromptEngine,
}

impl TestAgent {
    pub fn new(generator: Box<dyn TextGenerator>, prompts: PromptEngine) -> Self {
        Self { generator, prompts }
    }

    /// Ask the generator for test cases covering the diff. An unparseable
    /// reply is recovered locally as "no test cases produced".
    pub fn generate(&self, diff: &str, files: &[ChangedFile]) -> Result<Vec<TestCase>> {
        if diff.trim().is_empty() {
            warn!("empty diff, no test cases to generate");
            return Ok(Vec::new());
        }

        let files_json = serde_json::to_string_pretty(files)
            .map_err(|e| Error::Orchestrator(format!("failed to serialize changed files: {e}")))?;

        let mut vars = HashMap::new();
        vars.insert("files_json".to_string(), files_json);
        vars.insert(
            "diff".to_string(),
            truncate_chars(diff, MAX_DIFF_CHARS).to_string(),
        );
        let prompt = self.prompts.render_phase("testgen", &vars)?;

        let raw = self.generator.generate(&prompt)?;
        match parse_test_cases(&raw) {
            Ok(cases) => {
                info!(count = cases.len(), "generated test cases");
                Ok(cases)
            }
            Err(Error::MalformedResponse(detail)) => {
                warn!(%detail, "generator reply not parseable, no test cases");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Write one generated test case under the working copy, creating parent
    /// directories. Import lines come first, with `import pytest` guaranteed.
    pub fn write_test_file(&self, repo_path: &Path, case: &TestCase) -> Result<PathBuf> {
        let path = repo_path.join(&case.file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut import_lines: Vec<String> = case
            .imports
            .iter()
            .map(|imp| {
                if imp.starts_with("import ") || imp.starts_with("from ") {
                    imp.clone()
                } else {
                    format!("import {imp}")
                }
            })
            .collect();
        if !import_lines.iter().any(|l| l == "import pytest") {
            import_lines.insert(0, "import pytest".to_string());
        }

        let content = format!("{}\n\n{}\n", import_lines.join("\n"), case.test_code);
        std::fs::write(&path, content)?;
        info!(path = %path.display(), "wrote test file");
        Ok(path)
    }

    /// Render a Markdown report of the generated cases.
    pub fn render_report(cases: &[TestCase]) -> String {
        if cases.is_empty() {
            return "### 📋 Test Generation\n\nNo new test cases needed or generated.\n".to_string();
        }

        let mut report = String::from("### 📋 Test Generation\n\n");
        report.push_str(&format!("Generated {} new test case(s):\n\n", cases.len()));
        for (i, case) in cases.iter().enumerate() {
            report.push_str(&format!("**Test {}:** {}\n", i + 1, case.description));
            report.push_str(&format!("- **File:** `{}`\n", case.file));
            report.push_str(&format!("- **Targets:** `{}`\n\n", case.target_file));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct CannedGenerator {
        replies: RefCell<Vec<Result<String>>>,
    }

    impl TextGenerator for CannedGenerator {
        fn generate(&self, _prompt: &str) -> Result<String> {
            self.replies.borrow_mut().remove(0)
        }
    }

    fn canned(reply: &str) -> Box<CannedGenerator> {
        Box::new(CannedGenerator {
            replies: RefCell::new(vec![Ok(reply.to_string())]),
        })
    }

    fn case(file: &str, imports: &[&str]) -> TestCase {
        TestCase {
            file: file.to_string(),
            target_file: "calc.py".to_string(),
            test_code: "def test_add():\n    assert add(1, 2) == 3".to_string(),
            description: "covers add".to_string(),
            imports: imports.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_diff_skips_generation() {
        let agent = TestAgent::new(canned("unused"), PromptEngine::new(None));
        assert!(agent.generate("", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_generate_parses_cases() {
        let reply = r#"[{"file": "tests/test_calc.py", "target_file": "calc.py", "test_code": "def test_x():\n    pass", "description": "d", "imports": ["pytest"]}]"#;
        let agent = TestAgent::new(canned(reply), PromptEngine::new(None));
        let cases = agent.generate("+ x", &[]).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].file, "tests/test_calc.py");
    }

    #[test]
    fn test_generate_malformed_reply_recovered() {
        let agent = TestAgent::new(canned("no json"), PromptEngine::new(None));
        assert!(agent.generate("+ x", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_write_test_file_creates_dirs_and_pytest_import() {
        let dir = tempfile::tempdir().unwrap();
        let agent = TestAgent::new(canned("unused"), PromptEngine::new(None));
        let path = agent
            .write_test_file(dir.path(), &case("tests/unit/test_calc.py", &["from calc import add"]))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("import pytest\nfrom calc import add\n"));
        assert!(content.contains("def test_add():"));
    }

    #[test]
    fn test_write_test_file_bare_module_import() {
        let dir = tempfile::tempdir().unwrap();
        let agent = TestAgent::new(canned("unused"), PromptEngine::new(None));
        let path = agent
            .write_test_file(dir.path(), &case("test_calc.py", &["os", "import sys"]))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("import os\n"));
        assert!(content.contains("import sys\n"));
        // pytest not duplicated, inserted exactly once at the top
        assert_eq!(content.matches("import pytest").count(), 1);
    }

    #[test]
    fn test_render_report_empty() {
        let report = TestAgent::render_report(&[]);
        assert!(report.contains("No new test cases"));
    }

    #[test]
    fn test_render_report_lists_cases() {
        let report = TestAgent::render_report(&[case("tests/test_calc.py", &[])]);
        assert!(report.contains("Generated 1 new test case(s)"));
        assert!(report.contains("`tests/test_calc.py`"));
        assert!(report.contains("`calc.py`"));
    }
}
