//! Typed shapes of generator replies and their parse functions.
//!
//! Every parser runs the same recovery pipeline first: trim the reply to its
//! JSON span, escape stray line breaks inside string values, then parse
//! strictly. Anything still unparseable is a [`Error::MalformedResponse`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sanitize::{extract_json_payload, looks_double_escaped, sanitize, unescape_code};

/// One proposed code change: a complete replacement for one file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FixRecord {
    pub file_path: String,
    /// Entire file content, never a fragment or a patch.
    pub new_code: String,
    #[serde(default)]
    pub issue: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    RequestChanges,
    Reject,
}

impl Recommendation {
    pub fn label(&self) -> &'static str {
        match self {
            Recommendation::Approve => "Approve",
            Recommendation::RequestChanges => "Request Changes",
            Recommendation::Reject => "Reject",
        }
    }
}

/// A line reference as the generator emits it: a number or a range string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum LineRef {
    Number(u64),
    Text(String),
}

impl fmt::Display for LineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineRef::Number(n) => write!(f, "{n}"),
            LineRef::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogicIssue {
    pub severity: Severity,
    pub file: String,
    #[serde(default)]
    pub line: Option<LineRef>,
    pub issue: String,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecurityIssue {
    pub severity: Severity,
    pub file: String,
    pub issue: String,
    #[serde(default)]
    pub exploit: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StyleIssue {
    pub severity: Severity,
    pub file: String,
    pub issue: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// Structured review of a PR, by issue class.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReviewReport {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub logic_issues: Vec<LogicIssue>,
    #[serde(default)]
    pub security_issues: Vec<SecurityIssue>,
    #[serde(default)]
    pub style_issues: Vec<StyleIssue>,
    #[serde(default)]
    pub edge_cases_at_risk: Vec<String>,
    pub overall_recommendation: Recommendation,
    #[serde(default)]
    pub overall_score: Option<u32>,
}

impl ReviewReport {
    /// An empty report for a PR with nothing to review.
    pub fn empty(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            logic_issues: Vec::new(),
            security_issues: Vec::new(),
            style_issues: Vec::new(),
            edge_cases_at_risk: Vec::new(),
            overall_recommendation: Recommendation::Approve,
            overall_score: None,
        }
    }

    pub fn total_issues(&self) -> usize {
        self.logic_issues.len() + self.security_issues.len() + self.style_issues.len()
    }
}

/// One generated test case to be written into the working copy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TestCase {
    pub file: String,
    #[serde(default)]
    pub target_file: String,
    pub test_code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub imports: Vec<String>,
}

/// Parse a generator reply into fix records.
///
/// `new_code` from double-escaping producers (escape sequences but no literal
/// newline) gets a second unescape pass; code that parsed cleanly is left
/// alone.
pub fn parse_fix_records(raw: &str) -> Result<Vec<FixRecord>> {
    let json = sanitize(extract_json_payload(raw));
    let mut records: Vec<FixRecord> = serde_json::from_str(&json)
        .map_err(|e| Error::MalformedResponse(format!("failed to parse fix records: {e}")))?;

    for record in &mut records {
        if looks_double_escaped(&record.new_code) {
            record.new_code = unescape_code(&record.new_code);
        }
    }

    Ok(records)
}

pub fn parse_review_report(raw: &str) -> Result<ReviewReport> {
    let json = sanitize(extract_json_payload(raw));
    serde_json::from_str(&json)
        .map_err(|e| Error::MalformedResponse(format!("failed to parse review report: {e}")))
}

pub fn parse_test_cases(raw: &str) -> Result<Vec<TestCase>> {
    let json = sanitize(extract_json_payload(raw));
    serde_json::from_str(&json)
        .map_err(|e| Error::MalformedResponse(format!("failed to parse test cases: {e}")))
}
