//! Storage and report collaborators for taskmesh.

pub mod record;
pub mod report;
pub mod sqlite;
pub mod store;

pub use record::{AgentId, AgentRecord, IterationRecord, RunId, RunRecord, RunSummary};
pub use report::{artifact_extension, MarkdownReportSink, ReportSink, RunReport};
pub use sqlite::SqliteRunStore;
pub use store::{MemoryRunStore, RunStore, EMPTY_ASSIGNMENT};
