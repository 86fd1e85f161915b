//! Model collaborator for taskmesh.
//!
//! Provider backends speak their own wire protocol and return the raw body;
//! [`normalize`] turns any of those bodies into plain text plus token usage,
//! and [`LlmClient`] wraps a backend with a per-call deadline.

pub mod backends;
pub mod config;
pub mod llm;
pub mod normalize;

pub use backends::LlmBackend;
pub use config::{LlmProvider, ModelConfig};
pub use llm::{LlmClient, LlmReply};
