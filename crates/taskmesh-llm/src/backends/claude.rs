use super::{read_json, LlmBackend};
use crate::config::ModelConfig;
use async_trait::async_trait;
use serde::Serialize;
use taskmesh_core::{Message, Role, TaskmeshError, TaskmeshResult};

/// Claude (Anthropic) API backend.
pub struct ClaudeBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn build_body(&self, model: &str, messages: &[Message]) -> serde_json::Value {
        // The Messages API takes the system prompt as a top-level field.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let api_messages: Vec<ClaudeMessage> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| ClaudeMessage {
                role: m.role.as_str(),
                content: m.content.clone(),
            })
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": api_messages,
        });

        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }

        body
    }
}

#[async_trait]
impl LlmBackend for ClaudeBackend {
    async fn chat(&self, model: &str, messages: &[Message]) -> TaskmeshResult<serde_json::Value> {
        let url = format!("{}/v1/messages", self.config.base_url());
        let body = self.build_body(model, messages);

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TaskmeshError::Http(e.to_string()))?;

        read_json("Claude", resp).await
    }
}

#[derive(Serialize)]
struct ClaudeMessage {
    role: &'static str,
    content: String,
}
