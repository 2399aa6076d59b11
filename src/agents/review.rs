use std::collections::HashMap;

use tracing::info;

use crate::diff::truncate_chars;
use crate::error::{Error, Result};
use crate::generate::TextGenerator;
use crate::github::ChangedFile;
use crate::prompts::PromptEngine;
use crate::schema::{ReviewReport, parse_review_report};

/// The diff is truncated before prompting so one giant PR cannot blow the
/// request size.
const MAX_DIFF_CHARS: usize = 5000;

/// Number of style issues shown in full in the PR comment.
const MAX_STYLE_ISSUES_SHOWN: usize = 5;

/// Analyzes a PR for logic, security, and style issues.
pub struct ReviewAgent {
    generator: Box<dyn TextGenerator>,
    prompts: PromptEngine,
}

impl ReviewAgent {
    pub fn new(generator: Box<dyn TextGenerator>, prompts: PromptEngine) -> Self {
        Self { generator, prompts }
    }

    pub fn analyze(&self, diff: &str, files: &[ChangedFile]) -> Result<ReviewReport> {
        if diff.trim().is_empty() {
            return Ok(ReviewReport::empty("No changes to review"));
        }

        let files_json = serde_json::to_string_pretty(files)
            .map_err(|e| Error::Orchestrator(format!("failed to serialize changed files: {e}")))?;

        let mut vars = HashMap::new();
        vars.insert("files_json".to_string(), files_json);
        vars.insert(
            "diff".to_string(),
            truncate_chars(diff, MAX_DIFF_CHARS).to_string(),
        );
        let prompt = self.prompts.render_phase("review", &vars)?;

        let raw = self.generator.generate(&prompt)?;
        let report = parse_review_report(&raw)?;

        info!(
            logic_issues = report.logic_issues.len(),
            security_issues = report.security_issues.len(),
            style_issues = report.style_issues.len(),
            recommendation = report.overall_recommendation.label(),
            "review completed"
        );

        Ok(report)
    }

    /// Render the review as a PR comment.
    pub fn render_comment(report: &ReviewReport) -> String {
        let mut comment = String::from("## 🔍 Code Review\n\n");

        comment.push_str(&format!("**Summary:** {}\n\n", report.summary));
        if let Some(score) = report.overall_score {
            comment.push_str(&format!("**Code Quality Score:** {score}/100\n\n"));
        }

        if !report.logic_issues.is_empty() {
            comment.push_str("### ❌ Logic Issues\n");
            for issue in &report.logic_issues {
                comment.push_str(&format!(
                    "- **[{}]** {}: {}\n",
                    issue.severity.label(),
                    issue.file,
                    issue.issue
                ));
                if let Some(ref suggestion) = issue.suggestion {
                    comment.push_str(&format!("  > Fix: {suggestion}\n"));
                }
            }
            comment.push('\n');
        }

        if !report.security_issues.is_empty() {
            comment.push_str("### 🔐 Security Issues\n");
            for issue in &report.security_issues {
                comment.push_str(&format!(
                    "- **[{}]** {}: {}\n",
                    issue.severity.label(),
                    issue.file,
                    issue.issue
                ));
                if let Some(ref suggestion) = issue.suggestion {
                    comment.push_str(&format!("  > Fix: {suggestion}\n"));
                }
            }
            comment.push('\n');
        }

        if !report.style_issues.is_empty() {
            comment.push_str("### 📝 Style Issues\n");
            for issue in report.style_issues.iter().take(MAX_STYLE_ISSUES_SHOWN) {
                comment.push_str(&format!("- {}: {}\n", issue.file, issue.issue));
            }
            if report.style_issues.len() > MAX_STYLE_ISSUES_SHOWN {
                comment.push_str(&format!(
                    "- ... and {} more style issues\n",
                    report.style_issues.len() - MAX_STYLE_ISSUES_SHOWN
                ));
            }
            comment.push('\n');
        }

        if !report.edge_cases_at_risk.is_empty() {
            comment.push_str("### ⚠️ Edge Cases At Risk\n");
            for case in &report.edge_cases_at_risk {
                comment.push_str(&format!("- {case}\n"));
            }
            comment.push('\n');
        }

        comment.push_str(&format!(
            "**Recommendation:** {}\n",
            report.overall_recommendation.label()
        ));

        comment
    }
}
