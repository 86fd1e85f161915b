use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Local or cloud Ollama server (`/api/chat`).
    Ollama,
    OpenAi,
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
    Claude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: LlmProvider,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    pub api_base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call deadline in seconds. `0` disables the deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> LlmProvider {
    LlmProvider::Ollama
}

fn default_model_id() -> String {
    "gpt-oss:120b-cloud".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: String::new(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url
        } else {
            match self.provider {
                LlmProvider::Ollama => "http://localhost:11434",
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
                LlmProvider::Claude => "https://api.anthropic.com",
            }
        }
    }

    /// The per-call deadline, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_disabled_at_zero() {
        let config = ModelConfig {
            timeout_secs: 0,
            ..ModelConfig::default()
        };
        assert!(config.timeout().is_none());
        assert_eq!(
            ModelConfig::default().timeout(),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_base_url_defaults() {
        let mut config = ModelConfig::default();
        assert_eq!(config.base_url(), "http://localhost:11434");
        config.provider = LlmProvider::Groq;
        assert_eq!(config.base_url(), "https://api.groq.com/openai");
        config.api_base_url = Some("http://10.0.0.2:8080".into());
        assert_eq!(config.base_url(), "http://10.0.0.2:8080");
    }
}
