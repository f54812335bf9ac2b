use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Text-generation capability. The pipeline neither knows nor cares which
/// provider sits behind it; errors surface as empty strings after retries.
#[async_trait]
pub trait GenerateText: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible client over the responses endpoint.
pub struct LlmClient {
    pub client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            base_url: cfg.llm_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.llm_key.clone(),
            model: cfg.llm_model.clone(),
        })
    }

    pub fn with_client(client: Client, cfg: &Config) -> Self {
        Self {
            client,
            base_url: cfg.llm_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.llm_key.clone(),
            model: cfg.llm_model.clone(),
        }
    }
}

#[async_trait]
impl GenerateText for LlmClient {
    async fn generate_text(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "input": [
                {"role": "user", "content": prompt},
            ],
        });

        let resp = self
            .client
            .post(format!("{}/v1/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("LLM request failed")?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!("LLM HTTP {}", status.as_u16());
            if !raw.is_empty() {
                let snippet = raw.chars().take(800).collect::<String>();
                warn!("LLM raw body: {snippet}");
            }
            return Ok(String::new());
        }

        match extract_output_text(&raw) {
            Some(text) => Ok(text),
            None => {
                warn!("LLM response parse failed");
                if !raw.is_empty() {
                    let snippet = raw.chars().take(800).collect::<String>();
                    warn!("LLM raw body: {snippet}");
                }
                Ok(String::new())
            }
        }
    }
}

/// Pulls the first `output_text` item out of a responses-API payload.
/// Error payloads are logged field by field and yield `None`.
pub fn extract_output_text(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error") {
        if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
            warn!("LLM error message: {msg}");
        }
        if let Some(typ) = err.get("type").and_then(|v| v.as_str()) {
            warn!("LLM error type: {typ}");
        }
        if let Some(code) = err.get("code").and_then(|v| v.as_str()) {
            warn!("LLM error code: {code}");
        }
        return None;
    }

    let output = root.get("output")?.as_array()?;
    for item in output {
        let Some(content) = item.get("content").and_then(|v| v.as_array()) else {
            continue;
        };
        for entry in content {
            let typ = entry.get("type").and_then(|v| v.as_str());
            let text = entry.get("text").and_then(|v| v.as_str());
            if typ == Some("output_text") {
                if let Some(text) = text {
                    return Some(text.to_string());
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_output_text() {
        let raw = r#"{"output":[{"content":[{"type":"output_text","text":"hello world"}]}]}"#;
        assert_eq!(extract_output_text(raw).as_deref(), Some("hello world"));
    }

    #[test]
    fn skips_non_text_content() {
        let raw = r#"{"output":[{"content":[{"type":"reasoning"},{"type":"output_text","text":"later"}]}]}"#;
        assert_eq!(extract_output_text(raw).as_deref(), Some("later"));
    }

    #[test]
    fn error_payload_yields_none() {
        let raw = r#"{"error":{"message":"rate limited","type":"rate_limit","code":"429"}}"#;
        assert!(extract_output_text(raw).is_none());
    }

    #[test]
    fn garbage_yields_none() {
        assert!(extract_output_text("not json").is_none());
        assert!(extract_output_text("{}").is_none());
    }
}
