use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_API_ROOT: &str = "https://generativelanguage.googleapis.com";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Hosted text-generation service: a prompt in, free-form text out.
pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gemini `generateContent` client. Deliberately not `Debug`: the API key
/// must not end up in logs.
#[derive(Clone)]
pub struct GeminiGenerator {
    api_key: String,
    model: String,
    api_root: String,
}

impl GeminiGenerator {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            api_root: DEFAULT_API_ROOT.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_root, self.model
        )
    }

    fn request_body(prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        })
    }
}

// --- Response types ---

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: String,
}

/// Concatenate the text parts of the first candidate. Empty output is a
/// generation error: the caller always needs usable text.
fn extract_text(response: GenerateResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(Error::Generation(
            "generator returned no usable text".to_string(),
        ));
    }
    Ok(text)
}

/// Only retry rate-limits (429), server errors (5xx), and transport errors.
fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
        ureq::Error::Transport(_) => true,
    }
}

impl TextGenerator for GeminiGenerator {
    fn generate(&self, prompt: &str) -> Result<String> {
        let body = Self::request_body(prompt);
        let endpoint = self.endpoint();
        debug!(model = %self.model, prompt_len = prompt.len(), "calling generator");

        let mut backoff_ms = INITIAL_BACKOFF_MS;
        for attempt in 1..=MAX_RETRIES {
            match ureq::post(&endpoint)
                .set("x-goog-api-key", &self.api_key)
                .set("Content-Type", "application/json")
                .send_json(&body)
            {
                Ok(response) => {
                    let parsed: GenerateResponse = response.into_json().map_err(|e| {
                        Error::Generation(format!("failed to parse generator response: {e}"))
                    })?;
                    return extract_text(parsed);
                }
                Err(ref e) if attempt < MAX_RETRIES && is_retryable(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        backoff_ms,
                        "retrying generator call after transient error"
                    );
                    thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms *= 2;
                }
                Err(e) => {
                    return Err(Error::Generation(format!("generator request failed: {e}")));
                }
            }
        }
        unreachable!()
    }
}
