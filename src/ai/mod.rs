// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Language model providers
//!
//! The organizer only ever asks a model for text: a category name or a
//! JSON organization plan. It never lets a model touch the filesystem.

pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::{AiConfig, AiProvider};
use crate::Result;

pub use ollama::{LocalModel, OllamaClient};
pub use openai::OpenAiClient;

/// A backend that answers a system + user prompt with text
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Send one prompt and return the raw reply
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Build the configured provider, if it is usable
pub fn from_config(config: &AiConfig) -> Result<Option<Box<dyn LanguageModel>>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider {
        AiProvider::OpenAi => match config.api_key() {
            Some(key) => Ok(Some(Box::new(openai_client(config, key, timeout)?))),
            None => {
                error!("{} not set; AI features disabled", crate::config::OPENAI_KEY_ENV);
                Ok(None)
            }
        },
        AiProvider::Local => {
            let client = OllamaClient::new(&config.ollama_url, timeout)?;
            Ok(Some(Box::new(LocalModel::new(
                client,
                &config.local_model,
                config.retries,
            ))))
        }
        AiProvider::None => {
            warn!("No AI provider configured");
            Ok(None)
        }
    }
}

fn openai_client(config: &AiConfig, key: String, timeout: Duration) -> Result<OpenAiClient> {
    Ok(OpenAiClient::new(&config.openai_url, key, &config.openai_model, timeout)?
        .with_sampling(config.temperature, config.max_tokens))
}

/// Parse a JSON object out of a model reply
///
/// Tries the whole reply, then a fenced code block, then the outermost
/// braces.
pub fn parse_json_reply(content: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(content.trim()) {
        if value.is_object() {
            return Some(value);
        }
    }

    if content.contains("```") {
        if let Ok(fence) = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```") {
            if let Some(inner) = fence.captures(content).and_then(|c| c.get(1)) {
                if let Ok(value) = serde_json::from_str::<Value>(inner.as_str()) {
                    return Some(value);
                }
            }
        }
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end > start {
        if let Ok(value) = serde_json::from_str::<Value>(&content[start..=end]) {
            return Some(value);
        }
    }

    error!("Failed to parse JSON from model reply");
    None
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records the prompts it saw
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub fn last_user_prompt(&self) -> Option<String> {
            self.prompts.lock().unwrap().last().map(|(_, u)| u.clone())
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, system: &str, user: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| crate::OrganizerError::AiUnavailable("script exhausted".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_client_uses_configured_sampling() {
        let config = AiConfig { temperature: 0.0, max_tokens: 20, ..AiConfig::default() };
        let client = openai_client(&config, "k".into(), Duration::from_secs(5)).unwrap();
        let request = serde_json::to_value(client.request("sys", "usr")).unwrap();
        assert_eq!(request["temperature"], 0.0);
        assert_eq!(request["max_tokens"], 20);
        assert_eq!(request["model"], config.openai_model.as_str());
    }

    #[test]
    fn test_parse_direct_json() {
        let v = parse_json_reply(r#"{"folders": {"a": [1]}}"#).unwrap();
        assert_eq!(v, json!({"folders": {"a": [1]}}));
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "Here you go:\n```json\n{\"folders\": {\"invoices\": [3, 4]}}\n```\nDone.";
        let v = parse_json_reply(reply).unwrap();
        assert_eq!(v["folders"]["invoices"], json!([3, 4]));
    }

    #[test]
    fn test_parse_embedded_braces() {
        let v = parse_json_reply("Sure! {\"folders\": {}} hope that helps").unwrap();
        assert_eq!(v, json!({"folders": {}}));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_json_reply("no json here").is_none());
        assert!(parse_json_reply("} backwards {").is_none());
    }

    #[test]
    fn test_none_provider_builds_nothing() {
        let config = AiConfig {
            provider: AiProvider::None,
            ..AiConfig::default()
        };
        assert!(from_config(&config).unwrap().is_none());
    }
}
