use crate::backends::claude::ClaudeBackend;
use crate::backends::ollama::OllamaBackend;
use crate::backends::openai::OpenAiBackend;
use crate::backends::LlmBackend;
use crate::config::{LlmProvider, ModelConfig};
use crate::normalize;
use std::time::Duration;
use taskmesh_core::{Message, TaskmeshError, TaskmeshResult};
use tracing::{debug, warn};

/// One normalized exchange with the model collaborator.
#[derive(Debug, Clone)]
pub struct LlmReply {
    /// Plain reply text extracted from the provider response.
    pub text: String,
    /// Token usage as reported by the provider, if any.
    pub tokens: Option<u64>,
    /// The raw provider body, kept for diagnostics.
    pub raw: serde_json::Value,
}

impl LlmReply {
    /// Reported usage, or a whitespace word count when the provider gave none.
    pub fn tokens_or_estimate(&self) -> u64 {
        self.tokens
            .unwrap_or_else(|| normalize::estimate_tokens(&self.text))
    }
}

/// LLM client that dispatches to the correct provider backend.
///
/// Every call is bounded by an optional deadline; an expired deadline surfaces
/// as [`TaskmeshError::Timeout`] rather than hanging the run.
pub struct LlmClient {
    backend: Box<dyn LlmBackend>,
    model: String,
    timeout: Option<Duration>,
}

impl LlmClient {
    pub fn from_config(config: ModelConfig) -> Self {
        let model = config.model_id.clone();
        let timeout = config.timeout();
        let backend: Box<dyn LlmBackend> = match config.provider {
            LlmProvider::Ollama => Box::new(OllamaBackend::new(config)),
            LlmProvider::Claude => Box::new(ClaudeBackend::new(config)),
            LlmProvider::OpenAi | LlmProvider::OpenRouter | LlmProvider::Groq => {
                Box::new(OpenAiBackend::new(config))
            }
        };
        Self {
            backend,
            model,
            timeout,
        }
    }

    /// Create from a pre-built backend (scripted test doubles, custom providers).
    pub fn from_backend(backend: Box<dyn LlmBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends the ordered message list and normalizes the reply.
    pub async fn chat(&self, messages: &[Message]) -> TaskmeshResult<LlmReply> {
        debug!(model = %self.model, messages = messages.len(), "Sending chat request");

        let call = self.backend.chat(&self.model, messages);
        let raw = match self.timeout {
            Some(deadline) => match tokio::time::timeout(deadline, call).await {
                Ok(result) => result?,
                Err(_) => {
                    let millis = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                    warn!(model = %self.model, millis, "Model call timed out");
                    return Err(TaskmeshError::Timeout { millis });
                }
            },
            None => call.await?,
        };

        let text = normalize::response_text(&raw);
        let tokens = normalize::token_usage(&raw);
        Ok(LlmReply { text, tokens, raw })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed(serde_json::Value);

    #[async_trait]
    impl LlmBackend for Fixed {
        async fn chat(&self, _model: &str, _messages: &[Message]) -> TaskmeshResult<serde_json::Value> {
            Ok(self.0.clone())
        }
    }

    struct Slow;

    #[async_trait]
    impl LlmBackend for Slow {
        async fn chat(&self, _model: &str, _messages: &[Message]) -> TaskmeshResult<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::json!("late"))
        }
    }

    #[tokio::test]
    async fn test_chat_normalizes_reply() {
        let client = LlmClient::from_backend(
            Box::new(Fixed(serde_json::json!({"message": {"content": "hi there"}}))),
            "test-model",
        );
        let reply = client.chat(&[Message::user("hello")]).await.unwrap();
        assert_eq!(reply.text, "hi there");
        assert_eq!(reply.tokens, None);
        assert_eq!(reply.tokens_or_estimate(), 2);
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let client = LlmClient::from_backend(Box::new(Slow), "slow")
            .with_timeout(Some(Duration::from_millis(20)));
        let err = client.chat(&[Message::user("x")]).await.unwrap_err();
        assert!(matches!(err, TaskmeshError::Timeout { millis: 20 }));
        assert_eq!(err.to_string(), "Model call timed out after 20ms");
        assert!(err.is_recoverable());
    }
}
