pub mod claude;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use reqwest::StatusCode;
use taskmesh_core::{Message, TaskmeshError, TaskmeshResult, RATE_LIMIT_MARKERS};

/// Trait for model collaborator backends.
///
/// A backend sends one blocking request/response exchange and hands back the
/// provider's raw JSON body. Shapes differ per provider; callers extract text
/// through [`crate::normalize`] and never inspect the body themselves.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `LlmBackend` for your struct
/// 3. Add the variant to `LlmProvider` enum in `config.rs`
/// 4. Wire it up in `LlmClient::from_config()` in `llm.rs`
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Non-streaming chat completion.
    async fn chat(&self, model: &str, messages: &[Message]) -> TaskmeshResult<serde_json::Value>;
}

/// Reads a response, mapping quota rejections to [`TaskmeshError::RateLimited`]
/// and other non-2xx statuses to [`TaskmeshError::Http`].
pub(crate) async fn read_json(
    provider: &str,
    resp: reqwest::Response,
) -> TaskmeshResult<serde_json::Value> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| TaskmeshError::Http(e.to_string()))?;

    if status == StatusCode::PAYMENT_REQUIRED || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TaskmeshError::RateLimited(format!(
            "{provider} API error {status}: {text}"
        )));
    }

    if !status.is_success() {
        let lower = text.to_lowercase();
        if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
            return Err(TaskmeshError::RateLimited(format!(
                "{provider} API error {status}: {text}"
            )));
        }
        return Err(TaskmeshError::Http(format!(
            "{provider} API error {status}: {text}"
        )));
    }

    // Some servers answer with plain text; keep it as a JSON string so the
    // normalizer can still recover it.
    Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
}
