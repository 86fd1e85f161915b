use super::{read_json, LlmBackend};
use crate::config::ModelConfig;
use async_trait::async_trait;
use taskmesh_core::{Message, TaskmeshError, TaskmeshResult};

/// Ollama `/api/chat` backend (local daemon or ollama.com cloud models).
pub struct OllamaBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn build_body(&self, model: &str, messages: &[Message]) -> serde_json::Value {
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        serde_json::json!({
            "model": model,
            "messages": api_messages,
            "stream": false,
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens,
            },
        })
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn chat(&self, model: &str, messages: &[Message]) -> TaskmeshResult<serde_json::Value> {
        let url = format!("{}/api/chat", self.config.base_url());
        let body = self.build_body(model, messages);

        let mut request = self.http.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| TaskmeshError::Http(e.to_string()))?;

        read_json("Ollama", resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_disables_streaming() {
        let backend = OllamaBackend::new(ModelConfig::default());
        let body = backend.build_body(
            "llama3",
            &[Message::system("plan"), Message::user("write a sort")],
        );
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "write a sort");
    }
}
