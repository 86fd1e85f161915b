use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row identifier of a persisted run.
pub type RunId = i64;
/// Row identifier of a persisted agent.
pub type AgentId = i64;

/// One end-to-end orchestration attempt as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub task: String,
    pub subtasks: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Completion fields, written once by [`crate::RunStore::persist_run_summary`].
    pub completed_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub elapsed_secs: Option<f64>,
    pub total_tokens: Option<u64>,
}

impl RunRecord {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// A named worker and the subtasks it was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub run_id: RunId,
    pub name: String,
    pub subtasks: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One agent iteration against the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Iteration number within the current subtask, starting at 1.
    pub iteration: u32,
    /// Position of the subtask in the agent's list, starting at 1.
    pub subtask: usize,
    /// The message list sent to the model, serialized as JSON.
    pub prompt: String,
    pub response: String,
    pub duration_secs: f64,
    pub tokens: u64,
    /// Set when the iteration failed recoverably.
    pub error: Option<String>,
}

/// Final outcome of a run, one status line per agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// `(agent name, final status)` in declared agent order.
    pub agent_statuses: Vec<(String, String)>,
    pub total_tokens: u64,
    pub elapsed_secs: f64,
    pub completed_at: DateTime<Utc>,
}

impl RunSummary {
    /// `"<name>: <status>"` lines, the stored summary text.
    pub fn render(&self) -> String {
        self.agent_statuses
            .iter()
            .map(|(name, status)| format!("{name}: {status}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
