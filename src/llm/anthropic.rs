//! Anthropic messages backend (`POST {url}/v1/messages`).

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{api_key_from_env, user_content, ChatBackend};
use crate::config::LlmConfig;

const ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicChat {
    name: String,
    model: String,
    url: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicChat {
    /// Build from config. The key comes from `api_key_env`, default
    /// `ANTHROPIC_API_KEY`.
    pub fn new(name: &str, config: &LlmConfig) -> Result<Self> {
        let api_key = api_key_from_env(config, "ANTHROPIC_API_KEY");
        Self::build(name, config, api_key)
    }

    pub fn with_api_key(name: &str, config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        Self::build(name, config, Some(api_key.into()))
    }

    fn build(name: &str, config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            name: name.to_string(),
            model: config.model.clone(),
            url: config
                .url
                .as_deref()
                .unwrap_or(ANTHROPIC_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        })
    }
}

/// Concatenate the `text` blocks of a messages response.
fn response_text(payload: &Value) -> String {
    payload["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[async_trait]
impl ChatBackend for AnthropicChat {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, system_prompt: &str, context: &str, message: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("{}: API key not set", self.name))?;

        let body = json!({
            "model": self.model,
            "system": system_prompt,
            "messages": [
                {"role": "user", "content": user_content(context, message)},
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Anthropic messages error {}: {}", status, text);
        }

        let payload: Value = resp.json().await?;
        Ok(response_text(&payload))
    }
}
