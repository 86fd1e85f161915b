//! Round-based multi-agent orchestration.
//!
//! A single task is decomposed into subtasks by the model, partitioned
//! round-robin across named agents, and driven through a bounded number of
//! review rounds until every agent completes or the rounds run out.
//!
//! # Main types
//!
//! - [`Orchestrator`] - Top-level pipeline: decompose, assign, iterate, summarize.
//! - [`TaskDecomposer`] - Model-backed decomposition with layered parsing fallbacks.
//! - [`OrchestrationLoop`] - Single writer of [`RunState`], drives rounds.
//! - [`AgentRunner`] - One agent iteration against the model.
//! - [`MessageBus`] - Point-to-point mailboxes between the manager and agents.
//! - [`RunSummarizer`] - Final outcome and persistence.

/// Round-robin subtask assignment.
pub mod assign;
/// Ordered point-to-point mailboxes.
pub mod bus;
/// Task decomposition and reply parsing.
pub mod decomposer;
/// Orchestration loop and top-level pipeline.
pub mod engine;
/// Project id generation.
pub mod naming;
/// Per-agent iteration and review.
pub mod runner;
/// Run summary computation.
pub mod summary;
/// Run state, outcomes and reports.
pub mod types;

pub use assign::{agent_names, assign};
pub use bus::{Envelope, MessageBus, MANAGER};
pub use decomposer::{parse_reply, Decomposition, Extraction, ParseStage, TaskDecomposer};
pub use engine::{
    IterationHook, OrchestrationLoop, Orchestrator, OrchestratorResult, OrchestratorSettings,
    PlanCallback, ProgressCallback, RunPlan, RunRequest,
};
pub use runner::{approves, parse_directive, AgentRunner};
pub use summary::RunSummarizer;
pub use types::{
    AgentState, CompletionPolicy, IterationOutcome, LoopOutput, OutboundMessage, RoundReport,
    RunState, NO_UPDATE,
};
