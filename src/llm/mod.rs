//! Chat-completion backends.
//!
//! Every backend implements [`ChatBackend`]; generation code picks one by
//! name from an [`LlmRegistry`] and never branches on the vendor.
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │            LlmRegistry           │
//! │  "GPT-4o"  → OpenAIChat          │
//! │  "Claude3" → AnthropicChat       │
//! │  custom    → Box<dyn ChatBackend>│
//! └──────────────────────────────────┘
//! ```
//!
//! Backends are built from the `[llm.<name>]` tables of the config file.

pub mod anthropic;
pub mod openai;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::config::LlmConfig;

pub use anthropic::AnthropicChat;
pub use openai::OpenAIChat;

/// A chat-completion backend.
///
/// `complete` receives the system prompt, the retrieved context, and the
/// user's message, and returns the model's text. An empty string is a
/// valid return; callers decide whether it is usable.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Name users select this backend by.
    fn name(&self) -> &str;

    async fn complete(&self, system_prompt: &str, context: &str, message: &str) -> Result<String>;
}

/// Body of the user turn: retrieved context followed by the request.
pub fn user_content(context: &str, message: &str) -> String {
    if context.trim().is_empty() {
        message.to_string()
    } else {
        format!("# 参考情報\n{}\n\n# 依頼\n{}", context, message)
    }
}

/// Resolve a backend's API key from its configured environment variable.
pub(crate) fn api_key_from_env(config: &LlmConfig, default_env: &str) -> Option<String> {
    let var = config.api_key_env.as_deref().unwrap_or(default_env);
    std::env::var(var).ok().filter(|k| !k.is_empty())
}

/// Named chat backends.
pub struct LlmRegistry {
    backends: Vec<Box<dyn ChatBackend>>,
}

impl LlmRegistry {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Registry holding one backend per `[llm.<name>]` table.
    pub fn from_config(llms: &BTreeMap<String, LlmConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (name, config) in llms {
            let backend: Box<dyn ChatBackend> = match config.kind.as_str() {
                "openai" => Box::new(OpenAIChat::new(name, config)?),
                "anthropic" => Box::new(AnthropicChat::new(name, config)?),
                other => bail!("llm.{}: unknown kind '{}'", name, other),
            };
            registry.register(backend);
        }
        Ok(registry)
    }

    /// Add a backend. A later backend with the same name shadows earlier ones.
    pub fn register(&mut self, backend: Box<dyn ChatBackend>) {
        self.backends.push(backend);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ChatBackend> {
        self.backends
            .iter()
            .rev()
            .find(|b| b.name() == name)
            .map(|b| b.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl Default for LlmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, &'static str);

    #[async_trait]
    impl ChatBackend for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        async fn complete(&self, _s: &str, _c: &str, _m: &str) -> Result<String> {
            Ok(self.1.to_string())
        }
    }

    #[tokio::test]
    async fn test_later_registration_shadows() {
        let mut registry = LlmRegistry::new();
        registry.register(Box::new(Fixed("GPT-4o", "old")));
        registry.register(Box::new(Fixed("GPT-4o", "new")));
        let backend = registry.get("GPT-4o").unwrap();
        assert_eq!(backend.complete("", "", "").await.unwrap(), "new");
        assert_eq!(registry.names(), vec!["GPT-4o"]);
        assert!(registry.get("Claude3").is_none());
    }

    #[test]
    fn test_default_config_builds_both_backends() {
        let llms = crate::config::Config::minimal("db.sqlite".into()).llm;
        let registry = LlmRegistry::from_config(&llms).unwrap();
        assert_eq!(registry.names(), vec!["Claude3", "GPT-4o"]);
    }

    #[test]
    fn test_user_content_without_context() {
        assert_eq!(user_content("  ", "書いて"), "書いて");
        assert!(user_content("資料", "書いて").contains("資料"));
    }
}
