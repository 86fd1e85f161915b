use crate::record::{AgentId, AgentRecord, IterationRecord, RunId, RunRecord, RunSummary};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use taskmesh_core::{TaskmeshError, TaskmeshResult};

/// Encoding returned for an agent name that was never assigned anything.
pub const EMPTY_ASSIGNMENT: &str = "[]";

/// Record-oriented persistence for runs, agents and iterations.
///
/// Errors are never retried here; callers abort the run on any failure.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, task: &str, subtasks: &[String]) -> TaskmeshResult<RunId>;

    async fn create_agent(
        &self,
        run_id: RunId,
        name: &str,
        subtasks: &[String],
    ) -> TaskmeshResult<AgentId>;

    /// JSON-encoded subtask list of the most recent agent with this name,
    /// or [`EMPTY_ASSIGNMENT`] if there is none.
    async fn latest_assigned_subtasks(&self, name: &str) -> TaskmeshResult<String>;

    /// Writes the completion fields of a run. Fails if they were already set.
    async fn persist_run_summary(&self, run_id: RunId, summary: &RunSummary) -> TaskmeshResult<()>;

    async fn record_iteration(&self, agent_id: AgentId, record: &IterationRecord)
        -> TaskmeshResult<()>;

    /// Newest first.
    async fn list_runs(&self, limit: usize) -> TaskmeshResult<Vec<RunRecord>>;

    async fn get_run(&self, run_id: RunId) -> TaskmeshResult<Option<RunRecord>>;

    async fn list_agents(&self, run_id: RunId) -> TaskmeshResult<Vec<AgentRecord>>;

    async fn list_iterations(&self, agent_id: AgentId) -> TaskmeshResult<Vec<IterationRecord>>;
}

#[derive(Default)]
struct MemoryInner {
    runs: Vec<RunRecord>,
    agents: Vec<AgentRecord>,
    iterations: Vec<(AgentId, IterationRecord)>,
}

/// Process-local store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryRunStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, task: &str, subtasks: &[String]) -> TaskmeshResult<RunId> {
        let mut inner = self.inner.lock();
        let id = inner.runs.len() as RunId + 1;
        inner.runs.push(RunRecord {
            id,
            task: task.to_string(),
            subtasks: subtasks.to_vec(),
            created_at: Utc::now(),
            completed_at: None,
            summary: None,
            elapsed_secs: None,
            total_tokens: None,
        });
        Ok(id)
    }

    async fn create_agent(
        &self,
        run_id: RunId,
        name: &str,
        subtasks: &[String],
    ) -> TaskmeshResult<AgentId> {
        let mut inner = self.inner.lock();
        if !inner.runs.iter().any(|r| r.id == run_id) {
            return Err(TaskmeshError::Storage(format!("unknown run {run_id}")));
        }
        let id = inner.agents.len() as AgentId + 1;
        inner.agents.push(AgentRecord {
            id,
            run_id,
            name: name.to_string(),
            subtasks: subtasks.to_vec(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn latest_assigned_subtasks(&self, name: &str) -> TaskmeshResult<String> {
        let inner = self.inner.lock();
        match inner.agents.iter().rev().find(|a| a.name == name) {
            Some(agent) => Ok(serde_json::to_string(&agent.subtasks)?),
            None => Ok(EMPTY_ASSIGNMENT.to_string()),
        }
    }

    async fn persist_run_summary(&self, run_id: RunId, summary: &RunSummary) -> TaskmeshResult<()> {
        let mut inner = self.inner.lock();
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| TaskmeshError::Storage(format!("unknown run {run_id}")))?;
        if run.is_complete() {
            return Err(TaskmeshError::Storage(format!(
                "run {run_id} summary already persisted"
            )));
        }
        run.summary = Some(summary.render());
        run.elapsed_secs = Some(summary.elapsed_secs);
        run.total_tokens = Some(summary.total_tokens);
        run.completed_at = Some(summary.completed_at);
        Ok(())
    }

    async fn record_iteration(
        &self,
        agent_id: AgentId,
        record: &IterationRecord,
    ) -> TaskmeshResult<()> {
        let mut inner = self.inner.lock();
        if !inner.agents.iter().any(|a| a.id == agent_id) {
            return Err(TaskmeshError::Storage(format!("unknown agent {agent_id}")));
        }
        inner.iterations.push((agent_id, record.clone()));
        Ok(())
    }

    async fn list_runs(&self, limit: usize) -> TaskmeshResult<Vec<RunRecord>> {
        let inner = self.inner.lock();
        Ok(inner.runs.iter().rev().take(limit).cloned().collect())
    }

    async fn get_run(&self, run_id: RunId) -> TaskmeshResult<Option<RunRecord>> {
        let inner = self.inner.lock();
        Ok(inner.runs.iter().find(|r| r.id == run_id).cloned())
    }

    async fn list_agents(&self, run_id: RunId) -> TaskmeshResult<Vec<AgentRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .agents
            .iter()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn list_iterations(&self, agent_id: AgentId) -> TaskmeshResult<Vec<IterationRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .iterations
            .iter()
            .filter(|(id, _)| *id == agent_id)
            .map(|(_, rec)| rec.clone())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_assignment_defaults_to_empty_list() {
        let store = MemoryRunStore::new();
        assert_eq!(store.latest_assigned_subtasks("agent_9").await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_latest_assignment_picks_newest() {
        let store = MemoryRunStore::new();
        let run = store.create_run("t", &["a".into()]).await.unwrap();
        store.create_agent(run, "agent_1", &["a".into()]).await.unwrap();
        store.create_agent(run, "agent_1", &["b".into(), "c".into()]).await.unwrap();
        assert_eq!(
            store.latest_assigned_subtasks("agent_1").await.unwrap(),
            r#"["b","c"]"#
        );
    }

    #[tokio::test]
    async fn test_agent_for_unknown_run_rejected() {
        let store = MemoryRunStore::new();
        let err = store.create_agent(42, "agent_1", &[]).await.unwrap_err();
        assert!(matches!(err, TaskmeshError::Storage(_)));
    }
}
