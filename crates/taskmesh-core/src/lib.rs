//! Core types and error definitions for taskmesh.
//!
//! This crate provides the foundational types shared across all taskmesh crates:
//! the unified error enum and the role-tagged chat messages exchanged with the
//! model collaborator.
//!
//! # Main types
//!
//! - [`TaskmeshError`] - Unified error enum for all taskmesh subsystems.
//! - [`TaskmeshResult`] - Convenience alias for `Result<T, TaskmeshError>`.
//! - [`Role`] - Message role (system, user, assistant).
//! - [`Message`] - A single role-tagged message sent to the model.

/// Error enum and rate-limit classification.
pub mod error;
/// Chat message types.
pub mod message;

pub use error::{is_rate_limited, TaskmeshError, TaskmeshResult, RATE_LIMIT_MARKERS};
pub use message::{Message, Role};
