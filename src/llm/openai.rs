//! OpenAI chat completions backend (`POST {url}/v1/chat/completions`).

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{api_key_from_env, user_content, ChatBackend};
use crate::config::LlmConfig;

const OPENAI_URL: &str = "https://api.openai.com";

pub struct OpenAIChat {
    name: String,
    model: String,
    url: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAIChat {
    /// Build from config. The key comes from `api_key_env`, default
    /// `OPENAI_API_KEY`; a missing key only fails when the backend is used.
    pub fn new(name: &str, config: &LlmConfig) -> Result<Self> {
        let api_key = api_key_from_env(config, "OPENAI_API_KEY");
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
                .unwrap_or(OPENAI_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAIChat {
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
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_content(context, message)},
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("OpenAI chat error {}: {}", status, text);
        }

        let payload: Value = resp.json().await?;
        Ok(payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}
