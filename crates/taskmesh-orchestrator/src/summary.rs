use crate::types::NO_UPDATE;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use taskmesh_core::TaskmeshResult;
use taskmesh_store::{RunId, RunStore, RunSummary};
use tracing::info;

/// Computes the final run outcome and persists it.
pub struct RunSummarizer {
    store: Arc<dyn RunStore>,
}

impl RunSummarizer {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Builds the summary from its inputs, reading the clock once.
    pub fn summarize(
        started_at: DateTime<Utc>,
        total_tokens: u64,
        agent_names: &[String],
        progress: &HashMap<String, String>,
    ) -> RunSummary {
        let completed_at = Utc::now();
        let elapsed_secs = (completed_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let agent_statuses = agent_names
            .iter()
            .map(|name| {
                let status = progress
                    .get(name)
                    .filter(|p| !p.is_empty())
                    .map_or(NO_UPDATE, String::as_str);
                (name.clone(), status.to_string())
            })
            .collect();
        RunSummary {
            agent_statuses,
            total_tokens,
            elapsed_secs,
            completed_at,
        }
    }

    /// Summarizes and hands the result to storage. Storage errors are
    /// returned unchanged.
    pub async fn finish(
        &self,
        run_id: RunId,
        started_at: DateTime<Utc>,
        total_tokens: u64,
        agent_names: &[String],
        progress: &HashMap<String, String>,
    ) -> TaskmeshResult<RunSummary> {
        let summary = Self::summarize(started_at, total_tokens, agent_names, progress);
        self.store.persist_run_summary(run_id, &summary).await?;
        info!(
            run_id,
            tokens = summary.total_tokens,
            elapsed_secs = summary.elapsed_secs,
            "Run summary saved"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use taskmesh_store::MemoryRunStore;

    #[test]
    fn test_summarize_orders_and_defaults() {
        let names = vec!["agent_1".to_string(), "agent_2".to_string()];
        let progress = HashMap::from([("agent_1".to_string(), "Task completed".to_string())]);
        let started = Utc::now() - Duration::seconds(3);

        let summary = RunSummarizer::summarize(started, 17, &names, &progress);
        assert_eq!(summary.total_tokens, 17);
        assert!(summary.elapsed_secs >= 3.0);
        assert_eq!(
            summary.render(),
            "agent_1: Task completed\nagent_2: No update yet."
        );
    }

    #[tokio::test]
    async fn test_finish_persists_and_propagates() {
        let store = Arc::new(MemoryRunStore::new());
        let run = store.create_run("t", &[]).await.unwrap();
        let summarizer = RunSummarizer::new(store.clone());
        let names = vec!["agent_1".to_string()];

        summarizer
            .finish(run, Utc::now(), 5, &names, &HashMap::new())
            .await
            .unwrap();
        let stored = store.get_run(run).await.unwrap().unwrap();
        assert_eq!(stored.total_tokens, Some(5));

        // Completion fields are written once.
        assert!(summarizer
            .finish(run, Utc::now(), 5, &names, &HashMap::new())
            .await
            .is_err());
    }
}
