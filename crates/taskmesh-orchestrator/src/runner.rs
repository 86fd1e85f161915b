use crate::bus::{Envelope, MANAGER};
use crate::types::{AgentState, IterationOutcome, OutboundMessage};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use taskmesh_core::{is_rate_limited, Message, TaskmeshError, TaskmeshResult};
use taskmesh_llm::LlmClient;
use tracing::{debug, info, warn};

const WORKER_PROMPT: &str = "You are a worker agent on a small team. Complete the subtask \
    you are given, iterating on your previous result when one is provided. When the \
    subtask is finished, say \"Task completed\". To message a teammate or the manager, \
    start your reply with @<name>: followed by the message.";

#[allow(clippy::expect_used)]
fn done_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bdone\b").expect("valid review regex"))
}

/// Coordinator review of one reply: approved when it says `task completed`
/// or contains the word `done`, ignoring case.
pub fn approves(reply: &str) -> bool {
    reply.to_lowercase().contains("task completed") || done_re().is_match(reply)
}

/// Parses a leading `@name: body` directive.
pub fn parse_directive(reply: &str) -> Option<OutboundMessage> {
    let rest = reply.trim_start().strip_prefix('@')?;
    let (recipient, body) = rest.split_once(':')?;
    let recipient = recipient.trim();
    if recipient.is_empty() || recipient.contains(char::is_whitespace) {
        return None;
    }
    Some(OutboundMessage {
        recipient: recipient.to_string(),
        body: body.trim().to_string(),
    })
}

/// Runs single iterations for an agent.
///
/// A runner reads an [`AgentState`] snapshot and returns an
/// [`IterationOutcome`]; it never touches shared state or the bus.
pub struct AgentRunner {
    llm: Arc<LlmClient>,
    system_prompt: String,
}

impl AgentRunner {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: WORKER_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Message list for one iteration: instruction, subtask, previous result,
    /// then every inbound message in delivery order.
    pub fn build_messages(&self, agent: &AgentState, inbox: &[Envelope]) -> Vec<Message> {
        let mut messages = vec![
            Message::system(self.system_prompt.as_str()),
            Message::user(agent.current_subtask().unwrap_or_default()),
        ];
        if let Some(previous) = &agent.previous_result {
            messages.push(Message::user(format!("Previous result: {previous}")));
        }
        for envelope in inbox {
            messages.push(Message::user(format!(
                "[Message from {}]: {}",
                envelope.sender, envelope.body
            )));
        }
        messages
    }

    /// Executes one iteration against the agent's current subtask.
    ///
    /// Timeouts and ordinary transport errors become a failed outcome so the
    /// run can continue. Rate limits and every other error are returned.
    pub async fn step(
        &self,
        agent: &AgentState,
        inbox: Vec<Envelope>,
    ) -> TaskmeshResult<IterationOutcome> {
        if !agent.has_remaining_work() {
            return Err(TaskmeshError::Orchestrator(format!(
                "{} has no remaining subtask",
                agent.name
            )));
        }

        let subtask = agent.cursor + 1;
        let iteration = agent.iteration + 1;
        let messages = self.build_messages(agent, &inbox);
        let prompt = serde_json::to_string(&messages)?;

        debug!(agent = %agent.name, subtask, iteration, inbox = inbox.len(), "Starting iteration");
        let started = Instant::now();
        let result = self.llm.chat(&messages).await;
        let duration = started.elapsed();

        let reply = match result {
            Ok(reply) => reply,
            Err(e) if is_rate_limited(&e) => return Err(e),
            Err(e) if e.is_recoverable() => {
                warn!(agent = %agent.name, subtask, iteration, error = %e, "Iteration failed");
                return Ok(IterationOutcome {
                    subtask,
                    iteration,
                    progress: format!("Error: {e}"),
                    summary: format!(
                        "Task {subtask} iteration {iteration} by {} failed: {e}",
                        agent.name
                    ),
                    tokens: 0,
                    approved: false,
                    reply: None,
                    outbound: vec![OutboundMessage {
                        recipient: MANAGER.to_string(),
                        body: format!("{} failed: {e}", agent.name),
                    }],
                    prompt,
                    duration,
                    error: Some(e.to_string()),
                });
            }
            Err(e) => return Err(e),
        };

        let tokens = reply.tokens_or_estimate();
        let text = reply.text;
        let approved = approves(&text);
        let summary = if approved {
            info!(agent = %agent.name, subtask, iteration, "Manager approved iteration");
            format!("Task {subtask} completed by {}: {text}", agent.name)
        } else {
            info!(agent = %agent.name, subtask, iteration, "Iteration needs further work");
            format!(
                "Task {subtask} iteration {iteration} by {} needs further work: {text}",
                agent.name
            )
        };
        let outbound = parse_directive(&text).into_iter().collect();

        Ok(IterationOutcome {
            subtask,
            iteration,
            progress: text.clone(),
            summary,
            tokens,
            approved,
            reply: Some(text),
            outbound,
            prompt,
            duration,
            error: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use taskmesh_llm::LlmBackend;

    struct Reply(TaskmeshResult<serde_json::Value>);

    #[async_trait]
    impl LlmBackend for Reply {
        async fn chat(&self, _: &str, _: &[Message]) -> TaskmeshResult<serde_json::Value> {
            match &self.0 {
                Ok(v) => Ok(v.clone()),
                Err(TaskmeshError::Timeout { millis }) => Err(TaskmeshError::Timeout { millis: *millis }),
                Err(TaskmeshError::RateLimited(m)) => Err(TaskmeshError::RateLimited(m.clone())),
                Err(e) => Err(TaskmeshError::Storage(e.to_string())),
            }
        }
    }

    fn runner(result: TaskmeshResult<serde_json::Value>) -> AgentRunner {
        AgentRunner::new(Arc::new(LlmClient::from_backend(Box::new(Reply(result)), "m")))
    }

    fn envelope(sender: &str, body: &str) -> Envelope {
        Envelope {
            sequence: 0,
            sender: sender.into(),
            recipient: "agent_1".into(),
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_review_markers() {
        assert!(approves("Task Completed: sorted"));
        assert!(approves("All DONE."));
        assert!(approves("done"));
        assert!(!approves("still working"));
        assert!(!approves("abandoned the approach"));
    }

    #[test]
    fn test_directive_parsing() {
        let msg = parse_directive("  @agent_2: please review my tests").unwrap();
        assert_eq!(msg.recipient, "agent_2");
        assert_eq!(msg.body, "please review my tests");
        assert!(parse_directive("@: empty").is_none());
        assert!(parse_directive("@two words: nope").is_none());
        assert!(parse_directive("no directive: here").is_none());
        assert!(parse_directive("@agent_2 without colon").is_none());
    }

    #[test]
    fn test_message_order() {
        let mut agent = AgentState::new("agent_1", vec!["sort".into()]);
        agent.previous_result = Some("draft".into());
        let inbox = vec![envelope("manager", "Project name: p"), envelope("agent_2", "hi")];
        let messages = runner(Ok(serde_json::json!("x"))).build_messages(&agent, &inbox);

        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[1], "sort");
        assert_eq!(contents[2], "Previous result: draft");
        assert_eq!(contents[3], "[Message from manager]: Project name: p");
        assert_eq!(contents[4], "[Message from agent_2]: hi");
    }

    #[tokio::test]
    async fn test_approved_step() {
        let agent = AgentState::new("agent_1", vec!["sort".into(), "test".into()]);
        let outcome = runner(Ok(serde_json::json!({"message": {"content": "Task completed: wrote sort"}})))
            .step(&agent, Vec::new())
            .await
            .unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.summary, "Task 1 completed by agent_1: Task completed: wrote sort");
        assert_eq!(outcome.tokens, 4);
        assert_eq!(outcome.progress, "Task completed: wrote sort");
    }

    #[tokio::test]
    async fn test_directive_step_routes_message() {
        let mut agent = AgentState::new("agent_1", vec!["sort".into()]);
        agent.iteration = 1;
        let outcome = runner(Ok(serde_json::json!("@agent_2: can you write tests?")))
            .step(&agent, Vec::new())
            .await
            .unwrap();
        assert!(!outcome.approved);
        assert_eq!(
            outcome.summary,
            "Task 1 iteration 2 by agent_1 needs further work: @agent_2: can you write tests?"
        );
        assert_eq!(outcome.outbound.len(), 1);
        assert_eq!(outcome.outbound[0].recipient, "agent_2");
    }

    #[tokio::test]
    async fn test_timeout_is_recovered() {
        let agent = AgentState::new("agent_1", vec!["sort".into()]);
        let outcome = runner(Err(TaskmeshError::Timeout { millis: 1_000 }))
            .step(&agent, Vec::new())
            .await
            .unwrap();
        assert!(!outcome.approved);
        assert_eq!(outcome.tokens, 0);
        assert!(outcome.reply.is_none());
        assert!(outcome.summary.contains("failed"));
        assert_eq!(outcome.outbound[0].recipient, MANAGER);
    }

    #[tokio::test]
    async fn test_rate_limit_propagates() {
        let agent = AgentState::new("agent_1", vec!["sort".into()]);
        let err = runner(Err(TaskmeshError::RateLimited("402".into())))
            .step(&agent, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskmeshError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_exhausted_agent_is_rejected() {
        let agent = AgentState::new("agent_1", Vec::new());
        assert!(runner(Ok(serde_json::json!("x")))
            .step(&agent, Vec::new())
            .await
            .is_err());
    }
}
