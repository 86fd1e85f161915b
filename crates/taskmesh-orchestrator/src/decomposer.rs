//! Task decomposition with layered parsing of model output.
//!
//! Each attempt asks the model for a JSON array of subtasks and runs the reply
//! through a small state machine:
//!
//! ```text
//! StrictJson ──fail──▶ LineExtract ──fail──▶ SentenceSplit ──fail──▶ (next attempt)
//! ```
//!
//! When every attempt fails the machine settles in `IdentityFallback` and the
//! original task is returned as the only subtask. Parse failures are never
//! surfaced to the caller; transport errors are.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use taskmesh_core::{is_rate_limited, Message, TaskmeshError, TaskmeshResult};
use taskmesh_llm::LlmClient;
use tracing::{error, info, warn};

/// Default number of model attempts before the identity fallback.
pub const DEFAULT_ATTEMPTS: u32 = 3;

const PLANNER_PROMPT: &str = "You are a project planner. Break the user's task into 2-6 \
    small, actionable subtasks. Respond with a JSON array of strings and nothing else, \
    for example [\"First subtask\", \"Second subtask\"].";

const STRICT_SUFFIX: &str = "\n\nYour previous reply was not a valid JSON array. \
    Reply with ONLY the JSON array: no prose, no markdown.";

/// Minimum fragment length kept by the sentence splitter.
const MIN_SENTENCE_CHARS: usize = 10;

/// Stages of the per-reply parsing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStage {
    StrictJson,
    LineExtract,
    SentenceSplit,
    IdentityFallback,
}

impl ParseStage {
    fn next(self) -> Self {
        match self {
            ParseStage::StrictJson => ParseStage::LineExtract,
            ParseStage::LineExtract => ParseStage::SentenceSplit,
            ParseStage::SentenceSplit | ParseStage::IdentityFallback => {
                ParseStage::IdentityFallback
            }
        }
    }
}

/// Subtasks recovered from one reply and the stage that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub stage: ParseStage,
    pub subtasks: Vec<String>,
}

/// Runs one reply through the chain. `None` means this attempt failed.
pub fn parse_reply(text: &str) -> Option<Extraction> {
    let mut stage = ParseStage::StrictJson;
    loop {
        let found = match stage {
            ParseStage::StrictJson => strict_json(text),
            ParseStage::LineExtract => line_extract(text),
            ParseStage::SentenceSplit => sentence_split(text),
            ParseStage::IdentityFallback => return None,
        };
        if let Some(subtasks) = found {
            return Some(Extraction { stage, subtasks });
        }
        stage = stage.next();
    }
}

/// A JSON array whose elements are all strings, with blank elements
/// dropped. An array with nothing left counts as a failure.
///
/// A single surrounding markdown code fence is tolerated.
fn strict_json(text: &str) -> Option<Vec<String>> {
    let body = strip_code_fence(text.trim());
    let items: Vec<String> = serde_json::from_str(body).ok()?;
    let items: Vec<String> = items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop an info string such as `json` on the opening fence.
    match inner.split_once('\n') {
        Some((info, body)) if !info.trim().contains(char::is_whitespace) => body.trim(),
        _ => inner.trim(),
    }
}

#[allow(clippy::expect_used)]
fn enumerator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+\.|[-*])\s+(.*)$").expect("valid enumerator regex"))
}

#[allow(clippy::expect_used)]
fn sentence_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("valid sentence regex"))
}

/// Lines that start with `1.`, `-` or `*`, with surrounding quotes stripped.
fn line_extract(text: &str) -> Option<Vec<String>> {
    let items: Vec<String> = text
        .lines()
        .filter_map(|line| enumerator_re().captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .trim()
                .to_string()
        })
        .filter(|item| !item.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Splits after `.`, `!` or `?` followed by whitespace. Only succeeds with
/// more than one fragment longer than [`MIN_SENTENCE_CHARS`].
fn sentence_split(text: &str) -> Option<Vec<String>> {
    let text = text.trim();
    let mut fragments = Vec::new();
    let mut start = 0;
    for m in sentence_end_re().find_iter(text) {
        // Punctuation is one ASCII byte; keep it with its sentence.
        fragments.push(&text[start..m.start() + 1]);
        start = m.end();
    }
    fragments.push(&text[start..]);

    let kept: Vec<String> = fragments
        .into_iter()
        .map(str::trim)
        .filter(|f| f.chars().count() > MIN_SENTENCE_CHARS)
        .map(str::to_string)
        .collect();
    (kept.len() > 1).then_some(kept)
}

/// Result of decomposing one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decomposition {
    pub subtasks: Vec<String>,
    pub stage: ParseStage,
    /// Model calls made, including the successful one.
    pub attempts: u32,
}

/// Turns one free-text task into an ordered, non-empty list of subtasks.
pub struct TaskDecomposer {
    llm: Arc<LlmClient>,
    max_attempts: u32,
}

impl TaskDecomposer {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self {
            llm,
            max_attempts: DEFAULT_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    fn messages_for(&self, task: &str, attempt: u32) -> Vec<Message> {
        let mut prompt = PLANNER_PROMPT.to_string();
        if attempt > 1 {
            prompt.push_str(STRICT_SUFFIX);
        }
        vec![Message::system(prompt), Message::user(task)]
    }

    /// Decomposes `task`.
    ///
    /// Parse failures degrade to the identity fallback. A rate-limit signal is
    /// returned as [`TaskmeshError::RateLimited`] without retrying; any other
    /// model error is returned unchanged. Only the empty string is rejected.
    pub async fn decompose(&self, task: &str) -> TaskmeshResult<Decomposition> {
        if task.is_empty() {
            return Err(TaskmeshError::Orchestrator(
                "cannot decompose an empty task".into(),
            ));
        }

        for attempt in 1..=self.max_attempts {
            let reply = match self.llm.chat(&self.messages_for(task, attempt)).await {
                Ok(reply) => reply,
                Err(e) if is_rate_limited(&e) => {
                    error!(attempt, error = %e, "Decomposition hit a rate limit");
                    return Err(match e {
                        TaskmeshError::RateLimited(_) => e,
                        other => TaskmeshError::RateLimited(other.to_string()),
                    });
                }
                Err(e) => return Err(e),
            };

            match parse_reply(&reply.text) {
                Some(Extraction { stage, subtasks }) => {
                    match stage {
                        ParseStage::StrictJson => {
                            info!(attempt, count = subtasks.len(), "Decomposed task");
                        }
                        ParseStage::LineExtract => {
                            warn!(attempt, count = subtasks.len(), "Reply was not JSON; extracted list items");
                        }
                        _ => {
                            warn!(
                                attempt,
                                count = subtasks.len(),
                                raw = %reply.text,
                                "Reply was not a list; split into sentences (low confidence)"
                            );
                        }
                    }
                    return Ok(Decomposition {
                        subtasks,
                        stage,
                        attempts: attempt,
                    });
                }
                None if attempt < self.max_attempts => {
                    warn!(attempt, max = self.max_attempts, "Could not parse subtasks, retrying with a stricter prompt");
                }
                None => {
                    error!(attempt, raw = %reply.text, "Could not parse subtasks on the final attempt");
                }
            }
        }

        error!(task = %task, "All decomposition attempts failed; using the task as a single subtask");
        Ok(Decomposition {
            subtasks: vec![task.to_string()],
            stage: ParseStage::IdentityFallback,
            attempts: self.max_attempts,
        })
    }
}
