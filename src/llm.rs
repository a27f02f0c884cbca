//! Generative model client used for RAG summaries.
//!
//! Providers, selected by `[llm] provider`:
//! - `disabled`: every call fails; answers carry the error text instead.
//! - `gemini`: Google `generateContent`, key from `GEMINI_API_KEY` or `GENAI_API_KEY`.
//! - `openai`: `/v1/chat/completions`, key from `OPENAI_API_KEY`.
//!
//! Requests go through [`crate::retry::post_json`], so 429/5xx responses
//! and connection errors back off and retry.

use anyhow::{anyhow, bail, Result};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::retry;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_URL: &str = "https://api.openai.com";

/// Model name that [`generate`] will use for this config.
pub fn model_name(config: &LlmConfig) -> String {
    match (&config.model, config.provider.as_str()) {
        (Some(model), _) => model.clone(),
        (None, "gemini") => DEFAULT_GEMINI_MODEL.to_string(),
        (None, "openai") => DEFAULT_OPENAI_MODEL.to_string(),
        (None, other) => other.to_string(),
    }
}

/// Send a single prompt and return the model's text answer.
pub async fn generate(config: &LlmConfig, prompt: &str) -> Result<String> {
    match config.provider.as_str() {
        "gemini" => generate_gemini(config, prompt).await,
        "openai" => generate_openai(config, prompt).await,
        "disabled" => bail!("LLM provider is disabled. Set [llm] provider in config."),
        other => bail!("Unknown LLM provider: {}", other),
    }
}

fn http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn gemini_api_key() -> Result<String> {
    std::env::var("GEMINI_API_KEY")
        .or_else(|_| std::env::var("GENAI_API_KEY"))
        .map_err(|_| anyhow!("GEMINI_API_KEY (or GENAI_API_KEY) not set"))
}

async fn generate_gemini(config: &LlmConfig, prompt: &str) -> Result<String> {
    let api_key = gemini_api_key()?;
    let base = config.url.as_deref().unwrap_or(GEMINI_URL);
    let url = format!(
        "{}/v1beta/models/{}:generateContent",
        base.trim_end_matches('/'),
        model_name(config)
    );

    let body = serde_json::json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
    });
    let json = retry::post_json(
        &http_client(config)?,
        &url,
        &[("x-goog-api-key", api_key)],
        &body,
        config.max_retries,
        "Gemini",
    )
    .await?;
    parse_gemini_response(&json)
}

/// Join the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates");
            anyhow!("Invalid Gemini response: {}", reason)
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        bail!("Gemini response contained no text");
    }
    Ok(text)
}

async fn generate_openai(config: &LlmConfig, prompt: &str) -> Result<String> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
    let base = config.url.as_deref().unwrap_or(OPENAI_URL);

    let body = serde_json::json!({
        "model": model_name(config),
        "messages": [{ "role": "user", "content": prompt }],
    });
    let json = retry::post_json(
        &http_client(config)?,
        &format!("{}/v1/chat/completions", base.trim_end_matches('/')),
        &[("Authorization", format!("Bearer {}", api_key))],
        &body,
        config.max_retries,
        "OpenAI",
    )
    .await?;

    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}
