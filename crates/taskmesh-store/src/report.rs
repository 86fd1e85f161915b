use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use taskmesh_core::{TaskmeshError, TaskmeshResult};
use tracing::debug;

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Everything a human-readable run report carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub project: String,
    pub task: String,
    pub completed_at: DateTime<Utc>,
    /// `(agent, final progress)` in declared agent order.
    pub progress: Vec<(String, String)>,
    /// `(agent, summary log)` in declared agent order.
    pub summaries: Vec<(String, Vec<String>)>,
    pub total_tokens: u64,
    pub elapsed_secs: f64,
}

impl RunReport {
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Project Report: {}\n", self.project);
        let _ = writeln!(out, "**Task:** {}\n", self.task);
        let _ = writeln!(
            out,
            "**Completed:** {}\n",
            self.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(
            out,
            "**Total tokens:** {} | **Elapsed:** {:.2}s\n",
            self.total_tokens, self.elapsed_secs
        );

        out.push_str("## Final Progress\n\n");
        for (agent, status) in &self.progress {
            let _ = writeln!(out, "- **{agent}:** {status}");
        }

        out.push_str("\n## Task Summaries\n");
        for (agent, entries) in &self.summaries {
            let _ = writeln!(out, "\n### {agent}\n");
            if entries.is_empty() {
                out.push_str("_No iterations recorded._\n");
            }
            for entry in entries {
                let _ = writeln!(out, "- {entry}");
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ReportSink trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Writes the final report and returns where it landed.
    async fn write_report(&self, report: &RunReport) -> TaskmeshResult<PathBuf>;

    /// Saves one iteration's raw output as `task<k>_iter<i>.<ext>`.
    async fn write_iteration(
        &self,
        project: &str,
        agent: &str,
        subtask: usize,
        iteration: u32,
        content: &str,
    ) -> TaskmeshResult<PathBuf>;
}

/// File extension for an artifact, chosen from its leading token.
pub fn artifact_extension(content: &str) -> &'static str {
    let head = content.trim_start();
    if head.starts_with("def ") || head.starts_with("import ") {
        "py"
    } else if head.starts_with("<html") || head.starts_with("<!DOCTYPE html") {
        "html"
    } else if head.starts_with("<?xml") {
        "xml"
    } else if head.starts_with("#include") {
        "cpp"
    } else {
        "txt"
    }
}

// ---------------------------------------------------------------------------
// MarkdownReportSink
// ---------------------------------------------------------------------------

/// Writes reports and artifacts under `root/<project>/`.
pub struct MarkdownReportSink {
    root: PathBuf,
}

impl MarkdownReportSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn project_dir(&self, project: &str) -> TaskmeshResult<PathBuf> {
        if project.is_empty() || project.contains(['/', '\\']) || project == ".." {
            return Err(TaskmeshError::Report(format!(
                "invalid project id: {project:?}"
            )));
        }
        Ok(self.root.join(project))
    }
}

#[async_trait]
impl ReportSink for MarkdownReportSink {
    async fn write_report(&self, report: &RunReport) -> TaskmeshResult<PathBuf> {
        let dir = self.project_dir(&report.project)?;
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join("report.md");
        tokio::fs::write(&path, report.to_markdown()).await?;
        debug!(path = %path.display(), "Report written");
        Ok(path)
    }

    async fn write_iteration(
        &self,
        project: &str,
        agent: &str,
        subtask: usize,
        iteration: u32,
        content: &str,
    ) -> TaskmeshResult<PathBuf> {
        let dir = self.project_dir(project)?.join(agent);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!(
            "task{subtask}_iter{iteration}.{}",
            artifact_extension(content)
        ));
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
