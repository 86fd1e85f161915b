//! Response normalization at the model boundary.
//!
//! Providers expose the reply text under different accessor paths. Everything
//! that sniffs response shapes lives here so call sites only ever see a plain
//! string and an optional token count.

use serde_json::Value;

/// Extracts the plain text payload from a raw model response.
///
/// Recognised shapes, in order:
/// - `{"message": {"content": ..}}` (Ollama chat), or `message` holding a
///   string that itself is a JSON object
/// - `{"choices": [{"message": {"content": ..}}]}` / `choices[0].text`
/// - `{"content": "..."}` or `{"content": [{"type": "text", "text": ..}, ..]}`
/// - `{"response": ".."}` (Ollama generate)
/// - a bare JSON string
///
/// Anything else is rendered as compact JSON so no reply is ever lost.
pub fn response_text(response: &Value) -> String {
    extract(response).unwrap_or_else(|| match response {
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn extract(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(unwrap_json_string(s)),
        Value::Object(map) => {
            if let Some(message) = map.get("message") {
                if let Some(text) = extract_message(message) {
                    return Some(text);
                }
            }
            if let Some(choice) = map.get("choices").and_then(|c| c.get(0)) {
                if let Some(text) = choice.get("message").and_then(extract_message) {
                    return Some(text);
                }
                if let Some(text) = choice.get("text").and_then(Value::as_str) {
                    return Some(text.to_string());
                }
            }
            if let Some(content) = map.get("content") {
                if let Some(text) = content_text(content) {
                    return Some(text);
                }
            }
            map.get("response")
                .and_then(Value::as_str)
                .map(str::to_string)
        }
        _ => None,
    }
}

fn extract_message(message: &Value) -> Option<String> {
    match message {
        Value::String(s) => Some(unwrap_json_string(s)),
        Value::Object(_) => message.get("content").and_then(content_text),
        _ => None,
    }
}

fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Null => Some(String::new()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str).unwrap_or("text") == "text")
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            Some(parts.join("\n"))
        }
        _ => None,
    }
}

/// A string payload may itself be a serialized message object.
fn unwrap_json_string(s: &str) -> String {
    match serde_json::from_str::<Value>(s) {
        Ok(inner @ Value::Object(_)) => {
            extract(&inner).unwrap_or_else(|| s.to_string())
        }
        _ => s.to_string(),
    }
}

/// Reads the token usage a provider reported for one exchange, if any.
pub fn token_usage(response: &Value) -> Option<u64> {
    let eval = response.get("eval_count").and_then(Value::as_u64);
    let prompt_eval = response.get("prompt_eval_count").and_then(Value::as_u64);
    if eval.is_some() || prompt_eval.is_some() {
        return Some(eval.unwrap_or(0) + prompt_eval.unwrap_or(0));
    }

    let usage = response.get("usage")?;
    if let Some(total) = usage.get("total_tokens").and_then(Value::as_u64) {
        return Some(total);
    }
    let input = usage.get("input_tokens").and_then(Value::as_u64);
    let output = usage.get("output_tokens").and_then(Value::as_u64);
    if input.is_some() || output.is_some() {
        return Some(input.unwrap_or(0) + output.unwrap_or(0));
    }
    None
}

/// Whitespace word count, the fallback estimate when no usage is reported.
pub fn estimate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
