//! Gemini completion client for the enrichment phases.
//!
//! A thin blocking HTTP wrapper: one request, one response, no retries.
//! Callers decide whether a failure aborts the phase or just skips an item.

use crate::config::Config;
use crate::error::{PipelineError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^```(?:json)?\s*").unwrap());

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Use a custom base URL (for proxies or alternative endpoints).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Build a client from the pipeline configuration; fails when no API key
    /// is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            PipelineError::Llm("GEMINI_API_KEY not found in environment variables".to_string())
        })?;
        Ok(Self::new(api_key, config.model_name.clone()))
    }

    /// Send `prompt` plus `content` and parse the reply as JSON. Markdown
    /// code fences around the JSON are stripped first.
    pub fn call_json(&self, prompt: &str, content: &str) -> Result<serde_json::Value> {
        let text = self.call_text(prompt, content)?;
        let cleaned = strip_code_fences(&text);
        serde_json::from_str(&cleaned).map_err(|e| {
            error!("unparsable LLM JSON response: {e}");
            debug!("raw response: {text}");
            PipelineError::Llm(format!("response was not valid JSON: {e}"))
        })
    }

    /// Send `prompt` plus `content` and return the raw text reply.
    pub fn call_text(&self, prompt: &str, content: &str) -> Result<String> {
        let full_prompt = format!("{prompt}\n\nCONTENT:\n{content}");
        debug!("prompt length: {} chars", full_prompt.len());

        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: full_prompt }],
            }],
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model
        );
        let response = ureq::post(&url)
            .set("x-goog-api-key", &self.api_key)
            .set("content-type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .send_json(&request)
            .map_err(|e| PipelineError::Llm(format!("generateContent request failed: {e}")))?;

        let response: GenerateContentResponse = response
            .into_json()
            .map_err(|e| PipelineError::Llm(format!("unreadable response body: {e}")))?;

        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| PipelineError::Llm("response contained no candidates".to_string()))?;

        Ok(text.trim().to_string())
    }
}

/// Remove leading ```` ```json ```` / ```` ``` ```` fence lines.
pub(crate) fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}
