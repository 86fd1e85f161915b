//! SQLite-backed run store.
//!
//! Three tables mirror the run lifecycle:
//!
//! 1. **runs** - task text, decomposed subtasks, completion fields
//! 2. **agents** - one row per worker with its assigned subtasks
//! 3. **agent_iterations** - every model exchange an agent made
//!
//! Subtask lists are stored as JSON text. WAL mode is enabled for file
//! databases.

use crate::record::{AgentId, AgentRecord, IterationRecord, RunId, RunRecord, RunSummary};
use crate::store::{RunStore, EMPTY_ASSIGNMENT};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use taskmesh_core::{TaskmeshError, TaskmeshResult};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task TEXT NOT NULL,
    subtasks TEXT NOT NULL,
    summary TEXT,
    elapsed_secs REAL,
    total_tokens INTEGER,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    subtasks TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY(run_id) REFERENCES runs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_agents_name ON agents(name, id DESC);
CREATE INDEX IF NOT EXISTS idx_agents_run_id ON agents(run_id);

CREATE TABLE IF NOT EXISTS agent_iterations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id INTEGER NOT NULL,
    iteration INTEGER NOT NULL,
    subtask INTEGER NOT NULL,
    prompt TEXT NOT NULL,
    response TEXT NOT NULL,
    duration_secs REAL NOT NULL,
    tokens INTEGER NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,

    FOREIGN KEY(agent_id) REFERENCES agents(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_iterations_agent_id ON agent_iterations(agent_id);
"#;

fn storage(e: rusqlite::Error) -> TaskmeshError {
    TaskmeshError::Storage(e.to_string())
}

/// Run store over a single SQLite connection.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    /// Opens (or creates) the database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> TaskmeshResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage)?;
        debug!(path = %path.display(), "Opened run database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> TaskmeshResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> TaskmeshResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_list(raw: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_run_row(row: &Row) -> rusqlite::Result<RunRecord> {
    let subtasks: String = row.get("subtasks")?;
    let created_at: String = row.get("created_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let total_tokens: Option<i64> = row.get("total_tokens")?;
    Ok(RunRecord {
        id: row.get("id")?,
        task: row.get("task")?,
        subtasks: parse_list(&subtasks)?,
        created_at: parse_time(&created_at)?,
        completed_at: completed_at.as_deref().map(parse_time).transpose()?,
        summary: row.get("summary")?,
        elapsed_secs: row.get("elapsed_secs")?,
        total_tokens: total_tokens.map(|t| t as u64),
    })
}

fn map_agent_row(row: &Row) -> rusqlite::Result<AgentRecord> {
    let subtasks: String = row.get("subtasks")?;
    let created_at: String = row.get("created_at")?;
    Ok(AgentRecord {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        name: row.get("name")?,
        subtasks: parse_list(&subtasks)?,
        created_at: parse_time(&created_at)?,
    })
}

fn map_iteration_row(row: &Row) -> rusqlite::Result<IterationRecord> {
    let subtask: i64 = row.get("subtask")?;
    let tokens: i64 = row.get("tokens")?;
    Ok(IterationRecord {
        iteration: row.get("iteration")?,
        subtask: subtask as usize,
        prompt: row.get("prompt")?,
        response: row.get("response")?,
        duration_secs: row.get("duration_secs")?,
        tokens: tokens as u64,
        error: row.get("error")?,
    })
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(&self, task: &str, subtasks: &[String]) -> TaskmeshResult<RunId> {
        let encoded = serde_json::to_string(subtasks)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs (task, subtasks, created_at) VALUES (?1, ?2, ?3)",
            params![task, encoded, Utc::now().to_rfc3339()],
        )
        .map_err(storage)?;
        Ok(conn.last_insert_rowid())
    }

    async fn create_agent(
        &self,
        run_id: RunId,
        name: &str,
        subtasks: &[String],
    ) -> TaskmeshResult<AgentId> {
        let encoded = serde_json::to_string(subtasks)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agents (run_id, name, subtasks, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, name, encoded, Utc::now().to_rfc3339()],
        )
        .map_err(storage)?;
        Ok(conn.last_insert_rowid())
    }

    async fn latest_assigned_subtasks(&self, name: &str) -> TaskmeshResult<String> {
        let conn = self.conn.lock();
        let latest: Option<String> = conn
            .query_row(
                "SELECT subtasks FROM agents WHERE name = ?1 ORDER BY id DESC LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        Ok(latest.unwrap_or_else(|| EMPTY_ASSIGNMENT.to_string()))
    }

    async fn persist_run_summary(&self, run_id: RunId, summary: &RunSummary) -> TaskmeshResult<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE runs SET summary = ?1, elapsed_secs = ?2, total_tokens = ?3, completed_at = ?4
                 WHERE id = ?5 AND completed_at IS NULL",
                params![
                    summary.render(),
                    summary.elapsed_secs,
                    summary.total_tokens as i64,
                    summary.completed_at.to_rfc3339(),
                    run_id
                ],
            )
            .map_err(storage)?;
        if updated == 0 {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM runs WHERE id = ?1)",
                    params![run_id],
                    |row| row.get(0),
                )
                .map_err(storage)?;
            return Err(TaskmeshError::Storage(if exists {
                format!("run {run_id} summary already persisted")
            } else {
                format!("unknown run {run_id}")
            }));
        }
        Ok(())
    }

    async fn record_iteration(
        &self,
        agent_id: AgentId,
        record: &IterationRecord,
    ) -> TaskmeshResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agent_iterations
                (agent_id, iteration, subtask, prompt, response, duration_secs, tokens, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                agent_id,
                record.iteration,
                record.subtask as i64,
                record.prompt,
                record.response,
                record.duration_secs,
                record.tokens as i64,
                record.error
            ],
        )
        .map_err(storage)?;
        Ok(())
    }

    async fn list_runs(&self, limit: usize) -> TaskmeshResult<Vec<RunRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM runs ORDER BY id DESC LIMIT ?1")
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![limit as i64], map_run_row)
            .map_err(storage)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage)
    }

    async fn get_run(&self, run_id: RunId) -> TaskmeshResult<Option<RunRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM runs WHERE id = ?1",
            params![run_id],
            map_run_row,
        )
        .optional()
        .map_err(storage)
    }

    async fn list_agents(&self, run_id: RunId) -> TaskmeshResult<Vec<AgentRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM agents WHERE run_id = ?1 ORDER BY id")
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![run_id], map_agent_row)
            .map_err(storage)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage)
    }

    async fn list_iterations(&self, agent_id: AgentId) -> TaskmeshResult<Vec<IterationRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM agent_iterations WHERE agent_id = ?1 ORDER BY id")
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![agent_id], map_iteration_row)
            .map_err(storage)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn iteration(n: u32, response: &str) -> IterationRecord {
        IterationRecord {
            iteration: n,
            subtask: 1,
            prompt: "[]".into(),
            response: response.into(),
            duration_secs: 0.25,
            tokens: 3,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_run_round_trip() {
        let store = SqliteRunStore::open_in_memory().unwrap();
        let subtasks = vec!["Write sort".to_string(), "Write tests".to_string()];
        let id = store.create_run("Sort things", &subtasks).await.unwrap();

        let run = store.get_run(id).await.unwrap().unwrap();
        assert_eq!(run.task, "Sort things");
        assert_eq!(run.subtasks, subtasks);
        assert!(!run.is_complete());
        assert!(store.get_run(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summary_written_once() {
        let store = SqliteRunStore::open_in_memory().unwrap();
        let id = store.create_run("t", &[]).await.unwrap();
        let summary = RunSummary {
            agent_statuses: vec![("agent_1".into(), "done".into())],
            total_tokens: 12,
            elapsed_secs: 2.0,
            completed_at: Utc::now(),
        };
        store.persist_run_summary(id, &summary).await.unwrap();

        let run = store.get_run(id).await.unwrap().unwrap();
        assert_eq!(run.summary.as_deref(), Some("agent_1: done"));
        assert_eq!(run.total_tokens, Some(12));
        assert!(run.is_complete());

        let err = store.persist_run_summary(id, &summary).await.unwrap_err();
        assert!(err.to_string().contains("already persisted"));
        let err = store.persist_run_summary(99, &summary).await.unwrap_err();
        assert!(err.to_string().contains("unknown run"));
    }

    #[tokio::test]
    async fn test_iterations_in_order() {
        let store = SqliteRunStore::open_in_memory().unwrap();
        let run = store.create_run("t", &["a".into()]).await.unwrap();
        let agent = store.create_agent(run, "agent_1", &["a".into()]).await.unwrap();
        store.record_iteration(agent, &iteration(1, "first")).await.unwrap();
        store.record_iteration(agent, &iteration(2, "second")).await.unwrap();

        let rows = store.list_iterations(agent).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].response, "first");
        assert_eq!(rows[1].iteration, 2);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let store = SqliteRunStore::open_in_memory().unwrap();
        let err = store.create_agent(7, "agent_1", &[]).await.unwrap_err();
        assert!(matches!(err, TaskmeshError::Storage(_)));
    }
}
