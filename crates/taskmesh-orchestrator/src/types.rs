use crate::bus::Envelope;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use taskmesh_store::IterationRecord;

/// Progress value of an agent that has not reported yet.
pub const NO_UPDATE: &str = "No update yet.";

/// When an agent joins the completion set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Once every assigned subtask has been approved.
    #[default]
    AllSubtasks,
    /// On the first approved iteration, even if subtasks remain.
    FirstSignal,
}

/// Per-agent state owned by the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub name: String,
    pub subtasks: Vec<String>,
    /// Index of the subtask currently being worked on.
    pub cursor: usize,
    /// Iterations already spent on the current subtask.
    pub iteration: u32,
    /// Last reply for the current subtask, fed back on the next iteration.
    pub previous_result: Option<String>,
    /// Latest status, overwritten every iteration.
    pub progress: String,
    /// Append-only outcome lines.
    pub summary_log: Vec<String>,
}

impl AgentState {
    pub fn new(name: impl Into<String>, subtasks: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subtasks,
            cursor: 0,
            iteration: 0,
            previous_result: None,
            progress: NO_UPDATE.to_string(),
            summary_log: Vec::new(),
        }
    }

    pub fn current_subtask(&self) -> Option<&str> {
        self.subtasks.get(self.cursor).map(String::as_str)
    }

    pub fn has_remaining_work(&self) -> bool {
        self.cursor < self.subtasks.len()
    }
}

/// A message an agent asked to send, delivered by the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient: String,
    pub body: String,
}

/// What one agent iteration produced. Runners return this; only the loop
/// applies it to [`RunState`].
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    /// 1-based position of the subtask worked on.
    pub subtask: usize,
    /// 1-based iteration number on that subtask.
    pub iteration: u32,
    pub progress: String,
    pub summary: String,
    pub tokens: u64,
    pub approved: bool,
    /// Normalized reply text, `None` when the call failed.
    pub reply: Option<String>,
    pub outbound: Vec<OutboundMessage>,
    /// Message list sent to the model, as JSON.
    pub prompt: String,
    pub duration: Duration,
    pub error: Option<String>,
}

impl IterationOutcome {
    pub fn to_record(&self) -> IterationRecord {
        IterationRecord {
            iteration: self.iteration,
            subtask: self.subtask,
            prompt: self.prompt.clone(),
            response: self.reply.clone().unwrap_or_default(),
            duration_secs: self.duration.as_secs_f64(),
            tokens: self.tokens,
            error: self.error.clone(),
        }
    }
}

/// Shared run state. Mutated only by the orchestration loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    /// Declared agent order.
    agents: Vec<AgentState>,
    completed: BTreeSet<String>,
    total_tokens: u64,
    rounds: u32,
}

impl RunState {
    /// Builds state for agents in declared order. Agents without subtasks are
    /// complete from the start.
    pub fn new(assignments: Vec<(String, Vec<String>)>) -> Self {
        let agents: Vec<AgentState> = assignments
            .into_iter()
            .map(|(name, subtasks)| AgentState::new(name, subtasks))
            .collect();
        let completed = agents
            .iter()
            .filter(|a| !a.has_remaining_work())
            .map(|a| a.name.clone())
            .collect();
        Self {
            agents,
            completed,
            total_tokens: 0,
            rounds: 0,
        }
    }

    pub fn agents(&self) -> &[AgentState] {
        &self.agents
    }

    pub fn agent(&self, name: &str) -> Option<&AgentState> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.completed.contains(name)
    }

    pub fn all_completed(&self) -> bool {
        self.agents.iter().all(|a| self.completed.contains(&a.name))
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Names of agents still scheduled, in declared order.
    pub fn active_agents(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|a| !self.completed.contains(&a.name))
            .map(|a| a.name.clone())
            .collect()
    }

    pub(crate) fn begin_round(&mut self) -> u32 {
        self.rounds += 1;
        self.rounds
    }

    /// Applies one outcome. Returns `true` if the agent just completed.
    pub(crate) fn apply(
        &mut self,
        name: &str,
        outcome: &IterationOutcome,
        policy: CompletionPolicy,
    ) -> bool {
        let Some(agent) = self.agents.iter_mut().find(|a| a.name == name) else {
            return false;
        };

        agent.progress.clone_from(&outcome.progress);
        agent.summary_log.push(outcome.summary.clone());
        self.total_tokens += outcome.tokens;

        if outcome.approved {
            agent.cursor += 1;
            agent.iteration = 0;
            agent.previous_result = None;
        } else {
            agent.iteration += 1;
            if outcome.reply.is_some() {
                agent.previous_result.clone_from(&outcome.reply);
            }
        }

        let done = match policy {
            CompletionPolicy::AllSubtasks => !agent.has_remaining_work(),
            CompletionPolicy::FirstSignal => outcome.approved || !agent.has_remaining_work(),
        };
        done && self.completed.insert(agent.name.clone())
    }

    /// Progress in declared order.
    pub fn progress(&self) -> Vec<(String, String)> {
        self.agents
            .iter()
            .map(|a| (a.name.clone(), a.progress.clone()))
            .collect()
    }

    pub fn progress_map(&self) -> HashMap<String, String> {
        self.progress().into_iter().collect()
    }

    /// Summary logs in declared order.
    pub fn summaries(&self) -> Vec<(String, Vec<String>)> {
        self.agents
            .iter()
            .map(|a| (a.name.clone(), a.summary_log.clone()))
            .collect()
    }

    /// Completed agents in declared order.
    pub fn completed(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|a| self.completed.contains(&a.name))
            .map(|a| a.name.clone())
            .collect()
    }

    pub fn into_output(self) -> LoopOutput {
        LoopOutput {
            progress: self.progress(),
            summaries: self.summaries(),
            completed: self.completed(),
            total_tokens: self.total_tokens,
            rounds: self.rounds,
        }
    }
}

/// Emitted after every round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u32,
    pub progress: Vec<(String, String)>,
    pub completed: Vec<String>,
    pub total_tokens: u64,
    /// Messages agents addressed to the coordinator during this round.
    pub manager_messages: Vec<Envelope>,
}

/// Final product of the orchestration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutput {
    pub progress: Vec<(String, String)>,
    pub summaries: Vec<(String, Vec<String>)>,
    pub completed: Vec<String>,
    pub total_tokens: u64,
    pub rounds: u32,
}

impl LoopOutput {
    pub fn summary_for(&self, name: &str) -> Option<&[String]> {
        self.summaries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, log)| log.as_slice())
    }

    pub fn progress_for(&self, name: &str) -> Option<&str> {
        self.progress
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn outcome(approved: bool, tokens: u64) -> IterationOutcome {
        IterationOutcome {
            subtask: 1,
            iteration: 1,
            progress: if approved { "done".into() } else { "working".into() },
            summary: "line".into(),
            tokens,
            approved,
            reply: Some("reply".into()),
            outbound: Vec::new(),
            prompt: "[]".into(),
            duration: Duration::ZERO,
            error: None,
        }
    }

    fn two_subtasks() -> RunState {
        RunState::new(vec![(
            "agent_1".into(),
            vec!["a".into(), "b".into()],
        )])
    }

    #[test]
    fn test_empty_assignment_starts_completed() {
        let state = RunState::new(vec![
            ("agent_1".into(), vec!["a".into()]),
            ("agent_2".into(), Vec::new()),
        ]);
        assert!(!state.is_completed("agent_1"));
        assert!(state.is_completed("agent_2"));
        assert_eq!(state.active_agents(), vec!["agent_1"]);
        assert_eq!(state.agent("agent_2").map(|a| a.progress.as_str()), Some(NO_UPDATE));
    }

    #[test]
    fn test_all_subtasks_policy() {
        let mut state = two_subtasks();
        assert!(!state.apply("agent_1", &outcome(false, 2), CompletionPolicy::AllSubtasks));
        let agent = state.agent("agent_1").unwrap();
        assert_eq!(agent.iteration, 1);
        assert_eq!(agent.previous_result.as_deref(), Some("reply"));

        assert!(!state.apply("agent_1", &outcome(true, 3), CompletionPolicy::AllSubtasks));
        let agent = state.agent("agent_1").unwrap();
        assert_eq!(agent.cursor, 1);
        assert_eq!(agent.iteration, 0);
        assert!(agent.previous_result.is_none());

        assert!(state.apply("agent_1", &outcome(true, 1), CompletionPolicy::AllSubtasks));
        assert!(state.all_completed());
        assert_eq!(state.total_tokens(), 6);
        assert_eq!(state.agent("agent_1").unwrap().summary_log.len(), 3);
    }

    #[test]
    fn test_first_signal_policy() {
        let mut state = two_subtasks();
        assert!(state.apply("agent_1", &outcome(true, 0), CompletionPolicy::FirstSignal));
        assert!(state.is_completed("agent_1"));
        assert_eq!(state.agent("agent_1").unwrap().cursor, 1);
    }

    #[test]
    fn test_completion_reported_once() {
        let mut state = RunState::new(vec![("agent_1".into(), vec!["a".into()])]);
        assert!(state.apply("agent_1", &outcome(true, 0), CompletionPolicy::FirstSignal));
        assert!(!state.apply("agent_1", &outcome(true, 0), CompletionPolicy::FirstSignal));
        assert_eq!(state.completed(), vec!["agent_1"]);
    }

    #[test]
    fn test_output_keeps_declared_order() {
        let state = RunState::new(vec![
            ("agent_2".into(), vec!["x".into()]),
            ("agent_10".into(), vec!["y".into()]),
        ]);
        let out = state.into_output();
        let names: Vec<&str> = out.progress.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["agent_2", "agent_10"]);
        assert_eq!(out.summary_for("agent_10"), Some(&[][..]));
    }
}
