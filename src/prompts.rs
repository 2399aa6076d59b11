use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

const DEFAULT_FIX: &str = include_str!("default_prompts/fix.md");
const DEFAULT_REVIEW: &str = include_str!("default_prompts/review.md");
const DEFAULT_TESTGEN: &str = include_str!("default_prompts/testgen.md");

/// Known template variable names for validation.
const KNOWN_VARIABLES: &[&str] = &["diff", "files_json", "file_context"];

fn default_template(phase: &str) -> Option<&'static str> {
    match phase {
        "fix" => Some(DEFAULT_FIX),
        "review" => Some(DEFAULT_REVIEW),
        "testgen" => Some(DEFAULT_TESTGEN),
        _ => None,
    }
}

fn template_filename(phase: &str) -> String {
    format!("{phase}.md")
}

/// Prompt template engine with default templates and user overrides.
pub struct PromptEngine {
    override_dir: Option<String>,
}

impl PromptEngine {
    pub fn new(override_dir: Option<String>) -> Self {
        Self { override_dir }
    }

    /// Load a prompt template for the given phase.
    /// User overrides in `override_dir` take precedence over defaults.
    pub fn load_template(&self, phase: &str) -> Result<String> {
        if let Some(ref dir) = self.override_dir {
            let path = Path::new(dir).join(template_filename(phase));
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    Error::Prompt(format!(
                        "failed to read override template {}: {e}",
                        path.display()
                    ))
                });
            }
        }

        default_template(phase)
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Prompt(format!("unknown prompt phase: {phase}")))
    }

    /// Load a template and render it with the given variables.
    pub fn render_phase(&self, phase: &str, vars: &HashMap<String, String>) -> Result<String> {
        let template = self.load_template(phase)?;
        render_template(&template, vars)
    }
}

/// Render a template string by substituting `{{variable}}` placeholders.
/// Errors on unknown variables (strict mode).
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next(); // consume second {
            let mut var_name = String::new();
            let mut found_close = false;

            while let Some(c2) = chars.next() {
                if c2 == '}' && chars.peek() == Some(&'}') {
                    chars.next(); // consume second }
                    found_close = true;
                    break;
                }
                var_name.push(c2);
            }

            if !found_close {
                return Err(Error::Prompt(format!(
                    "unclosed template variable: {{{{{var_name}"
                )));
            }

            let var_name = var_name.trim();
            if !KNOWN_VARIABLES.contains(&var_name) {
                return Err(Error::Prompt(format!(
                    "unknown template variable: {var_name}"
                )));
            }

            match vars.get(var_name) {
                Some(value) => result.push_str(value),
                None => {
                    return Err(Error::Prompt(format!(
                        "missing value for template variable: {var_name}"
                    )));
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_default_fix() {
        let engine = PromptEngine::new(None);
        let template = engine.load_template("fix").unwrap();
        assert!(template.contains("{{file_context}}"));
        assert!(template.contains("{{diff}}"));
        assert!(template.contains("file_path"));
        assert!(template.contains("new_code"));
    }

    #[test]
    fn test_load_default_review() {
        let engine = PromptEngine::new(None);
        let template = engine.load_template("review").unwrap();
        assert!(template.contains("{{files_json}}"));
        assert!(template.contains("logic_issues"));
        assert!(template.contains("overall_recommendation"));
    }

    #[test]
    fn test_load_default_testgen() {
        let engine = PromptEngine::new(None);
        let template = engine.load_template("testgen").unwrap();
        assert!(template.contains("test_code"));
        assert!(template.contains("{{diff}}"));
    }

    #[test]
    fn test_load_unknown_phase() {
        let engine = PromptEngine::new(None);
        let err = engine.load_template("deploy").unwrap_err();
        assert!(err.to_string().contains("unknown prompt phase"));
    }

    #[test]
    fn test_override_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let override_path = dir.path().join("fix.md");
        fs::write(&override_path, "Custom fix template for {{diff}}").unwrap();

        let engine = PromptEngine::new(Some(dir.path().to_string_lossy().to_string()));
        let template = engine.load_template("fix").unwrap();
        assert_eq!(template, "Custom fix template for {{diff}}");
    }

    #[test]
    fn test_override_fallback_to_default() {
        let dir = TempDir::new().unwrap();
        // No override file for "review"
        let engine = PromptEngine::new(Some(dir.path().to_string_lossy().to_string()));
        let template = engine.load_template("review").unwrap();
        assert!(template.contains("logic_issues"));
    }

    #[test]
    fn test_render_basic_substitution() {
        let mut vars = HashMap::new();
        vars.insert("diff".to_string(), "+added line".to_string());

        let result = render_template("Diff:\n{{diff}}", &vars).unwrap();
        assert_eq!(result, "Diff:\n+added line");
    }

    #[test]
    fn test_render_with_whitespace_in_braces() {
        let mut vars = HashMap::new();
        vars.insert("diff".to_string(), "x".to_string());

        let result = render_template("Diff: {{ diff }}", &vars).unwrap();
        assert_eq!(result, "Diff: x");
    }

    #[test]
    fn test_render_unknown_variable_errors() {
        let vars = HashMap::new();
        let err = render_template("{{unknown_var}}", &vars).unwrap_err();
        assert!(err.to_string().contains("unknown template variable"));
    }

    #[test]
    fn test_render_missing_value_errors() {
        let vars = HashMap::new();
        let err = render_template("{{diff}}", &vars).unwrap_err();
        assert!(err.to_string().contains("missing value"));
    }

    #[test]
    fn test_render_unclosed_variable() {
        let vars = HashMap::new();
        let err = render_template("{{diff", &vars).unwrap_err();
        assert!(err.to_string().contains("unclosed template variable"));
    }

    #[test]
    fn test_render_single_brace_passthrough() {
        let vars = HashMap::new();
        let result = render_template("JSON: {\"key\": \"value\"}", &vars).unwrap();
        assert_eq!(result, "JSON: {\"key\": \"value\"}");
    }

    #[test]
    fn test_render_phase_end_to_end() {
        let engine = PromptEngine::new(None);
        let mut vars = HashMap::new();
        vars.insert("file_context".to_string(), "FILE: calc.py".to_string());
        vars.insert("diff".to_string(), "+fixed".to_string());

        let result = engine.render_phase("fix", &vars).unwrap();
        assert!(result.contains("FILE: calc.py"));
        assert!(result.contains("+fixed"));
        assert!(!result.contains("{{diff}}"));
    }

    #[test]
    fn test_default_templates_render_cleanly() {
        // Every default template must use only known variables.
        let engine = PromptEngine::new(None);
        let mut vars = HashMap::new();
        for name in KNOWN_VARIABLES {
            vars.insert(name.to_string(), "value".to_string());
        }
        for phase in ["fix", "review", "testgen"] {
            engine.render_phase(phase, &vars).unwrap();
        }
    }
}
