use crate::assign::{agent_names, assign};
use crate::bus::{MessageBus, MANAGER};
use crate::decomposer::{Decomposition, TaskDecomposer};
use crate::naming::project_id;
use crate::runner::AgentRunner;
use crate::summary::RunSummarizer;
use crate::types::{AgentState, CompletionPolicy, IterationOutcome, LoopOutput, RoundReport, RunState};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use taskmesh_core::{TaskmeshError, TaskmeshResult};
use taskmesh_llm::LlmClient;
use taskmesh_store::{AgentId, ReportSink, RunId, RunReport, RunStore, RunSummary};
use tracing::{debug, info, warn};

/// Callback invoked after every round.
pub type ProgressCallback = Arc<dyn Fn(&RoundReport) + Send + Sync>;

/// Callback invoked once the task is decomposed and assigned, before round 1.
pub type PlanCallback = Arc<dyn Fn(&RunPlan) + Send + Sync>;

/// Side effects attached to each applied iteration (persistence, artifacts).
///
/// Hook errors abort the run.
#[async_trait]
pub trait IterationHook: Send + Sync {
    async fn on_iteration(
        &self,
        agent: &AgentState,
        outcome: &IterationOutcome,
    ) -> TaskmeshResult<()>;
}

// ---------------------------------------------------------------------------
// OrchestrationLoop
// ---------------------------------------------------------------------------

/// Drives every agent through bounded, strictly sequential rounds.
///
/// The loop is the single writer of [`RunState`]: runners only read a
/// snapshot of their agent and return an outcome, which the loop applies and
/// whose outbound messages it delivers.
pub struct OrchestrationLoop {
    runner: AgentRunner,
    bus: MessageBus,
    policy: CompletionPolicy,
    hook: Option<Arc<dyn IterationHook>>,
    progress: Option<ProgressCallback>,
}

impl OrchestrationLoop {
    pub fn new(runner: AgentRunner) -> Self {
        Self {
            runner,
            bus: MessageBus::new(),
            policy: CompletionPolicy::default(),
            hook: None,
            progress: None,
        }
    }

    /// Use a bus that already carries messages (e.g. assignments).
    pub fn with_bus(mut self, bus: MessageBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn IterationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Runs up to `iterations` rounds over `assignments` (declared order).
    ///
    /// Stops early once every agent is in the completion set.
    pub async fn run(
        &mut self,
        assignments: Vec<(String, Vec<String>)>,
        iterations: u32,
    ) -> TaskmeshResult<LoopOutput> {
        let mut state = RunState::new(assignments);

        while state.rounds() < iterations && !state.all_completed() {
            let round = state.begin_round();
            info!(round, active = state.active_agents().len(), "Starting round");

            for name in state.active_agents() {
                let inbox = self.bus.receive(&name);
                let Some(agent) = state.agent(&name).cloned() else {
                    continue;
                };

                let outcome = self.runner.step(&agent, inbox).await?;

                for msg in &outcome.outbound {
                    let known = msg.recipient == MANAGER || state.agent(&msg.recipient).is_some();
                    if known {
                        self.bus.send(name.as_str(), msg.recipient.as_str(), msg.body.as_str());
                    } else {
                        // Nobody drains an unknown mailbox; hand it to the manager instead.
                        warn!(from = %name, to = %msg.recipient, "Message addressed to unknown recipient");
                        self.bus.send(
                            name.as_str(),
                            MANAGER,
                            format!("Undeliverable to {}: {}", msg.recipient, msg.body),
                        );
                    }
                }

                if let Some(hook) = &self.hook {
                    hook.on_iteration(&agent, &outcome).await?;
                }

                if state.apply(&name, &outcome, self.policy) {
                    info!(agent = %name, round, "Agent completed");
                }
                debug!(agent = %name, tokens = state.total_tokens(), "Iteration applied");
            }

            let manager_messages = self.bus.receive(MANAGER);
            for msg in &manager_messages {
                info!(from = %msg.sender, body = %msg.body, "Manager received message");
            }

            let report = RoundReport {
                round,
                progress: state.progress(),
                completed: state.completed(),
                total_tokens: state.total_tokens(),
                manager_messages,
            };
            info!(
                round,
                completed = report.completed.len(),
                tokens = report.total_tokens,
                "Round complete"
            );
            if let Some(cb) = &self.progress {
                cb(&report);
            }
        }

        Ok(state.into_output())
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Inputs of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub task: String,
    pub agents: usize,
    pub iterations: u32,
}

impl RunRequest {
    pub fn new(task: impl Into<String>, agents: usize, iterations: u32) -> Self {
        Self {
            task: task.into(),
            agents,
            iterations,
        }
    }

    fn validate(&self) -> TaskmeshResult<()> {
        if self.task.trim().is_empty() {
            return Err(TaskmeshError::Config("task must not be empty".into()));
        }
        if self.agents == 0 {
            return Err(TaskmeshError::Config("agent count must be at least 1".into()));
        }
        if self.iterations == 0 {
            return Err(TaskmeshError::Config(
                "iteration count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Tunables for the top-level pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub completion_policy: CompletionPolicy,
    pub write_iteration_artifacts: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            completion_policy: CompletionPolicy::default(),
            write_iteration_artifacts: true,
        }
    }
}

/// What a run is about to execute.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run_id: RunId,
    pub project: String,
    pub decomposition: Decomposition,
    /// Agent names with their subtasks, in declared order.
    pub assignments: Vec<(String, Vec<String>)>,
}

/// Result of a full orchestration pipeline.
#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    pub run_id: RunId,
    pub project: String,
    pub decomposition: Decomposition,
    pub output: LoopOutput,
    pub summary: RunSummary,
    pub report_path: PathBuf,
}

/// Persists iterations and, optionally, writes each reply as an artifact.
struct PersistIterations {
    store: Arc<dyn RunStore>,
    reports: Arc<dyn ReportSink>,
    agent_ids: HashMap<String, AgentId>,
    project: String,
    write_artifacts: bool,
}

#[async_trait]
impl IterationHook for PersistIterations {
    async fn on_iteration(
        &self,
        agent: &AgentState,
        outcome: &IterationOutcome,
    ) -> TaskmeshResult<()> {
        let agent_id = self.agent_ids.get(&agent.name).copied().ok_or_else(|| {
            TaskmeshError::Orchestrator(format!("no stored record for {}", agent.name))
        })?;
        self.store
            .record_iteration(agent_id, &outcome.to_record())
            .await?;

        if self.write_artifacts {
            let path = self
                .reports
                .write_iteration(
                    &self.project,
                    &agent.name,
                    outcome.subtask,
                    outcome.iteration,
                    outcome.reply.as_deref().unwrap_or_default(),
                )
                .await?;
            debug!(path = %path.display(), "Iteration saved");
        }
        Ok(())
    }
}

/// The multi-agent orchestrator.
/// Implements the decompose → assign → iterate → summarize pipeline.
pub struct Orchestrator {
    llm: Arc<LlmClient>,
    store: Arc<dyn RunStore>,
    reports: Arc<dyn ReportSink>,
    settings: OrchestratorSettings,
    progress: Option<ProgressCallback>,
    plan: Option<PlanCallback>,
}

impl Orchestrator {
    pub fn new(llm: Arc<LlmClient>, store: Arc<dyn RunStore>, reports: Arc<dyn ReportSink>) -> Self {
        Self {
            llm,
            store,
            reports,
            settings: OrchestratorSettings::default(),
            progress: None,
            plan: None,
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Register a callback for per-round progress reports.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RoundReport) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Register a callback that sees the subtasks and assignments before
    /// the first round.
    pub fn with_plan<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RunPlan) + Send + Sync + 'static,
    {
        self.plan = Some(Arc::new(callback));
        self
    }

    /// Run the full pipeline for one task.
    pub async fn run(&self, request: &RunRequest) -> TaskmeshResult<OrchestratorResult> {
        request.validate()?;
        let started_at = Utc::now();
        info!(task = %request.task, agents = request.agents, iterations = request.iterations, "Orchestrator: starting run");

        // Decompose
        let decomposition = TaskDecomposer::new(self.llm.clone())
            .decompose(&request.task)
            .await?;
        info!(
            count = decomposition.subtasks.len(),
            stage = ?decomposition.stage,
            subtasks = ?decomposition.subtasks,
            "Orchestrator: task decomposed"
        );

        let project = project_id(&request.task);
        let run_id = self
            .store
            .create_run(&request.task, &decomposition.subtasks)
            .await?;

        // Assign
        let names = agent_names(request.agents);
        let lists = assign(&decomposition.subtasks, request.agents);
        let mut agent_ids = HashMap::new();
        let mut assignments = Vec::with_capacity(names.len());
        let mut bus = MessageBus::new();

        for (name, subtasks) in names.iter().zip(lists) {
            let agent_id = self.store.create_agent(run_id, name, &subtasks).await?;
            agent_ids.insert(name.clone(), agent_id);

            // Workers load their assignment back from storage.
            let stored = self.store.latest_assigned_subtasks(name).await?;
            let subtasks: Vec<String> = serde_json::from_str(&stored).map_err(|e| {
                TaskmeshError::Storage(format!("bad assignment for {name}: {e}"))
            })?;

            bus.send(MANAGER, name.as_str(), format!("Project name: {project}"));
            bus.send(
                MANAGER,
                name.as_str(),
                format!(
                    "You are assigned the following subtasks: {}",
                    subtasks.join("; ")
                ),
            );
            info!(agent = %name, subtasks = ?subtasks, "Orchestrator: assigned");
            assignments.push((name.clone(), subtasks));
        }

        if let Some(cb) = &self.plan {
            cb(&RunPlan {
                run_id,
                project: project.clone(),
                decomposition: decomposition.clone(),
                assignments: assignments.clone(),
            });
        }

        // Iterate
        let hook = PersistIterations {
            store: self.store.clone(),
            reports: self.reports.clone(),
            agent_ids,
            project: project.clone(),
            write_artifacts: self.settings.write_iteration_artifacts,
        };
        let mut orchestration = OrchestrationLoop::new(AgentRunner::new(self.llm.clone()))
            .with_bus(bus)
            .with_policy(self.settings.completion_policy)
            .with_hook(Arc::new(hook));
        if let Some(cb) = &self.progress {
            orchestration = orchestration.with_progress(cb.clone());
        }
        let output = orchestration.run(assignments, request.iterations).await?;

        // Summarize
        let progress: HashMap<String, String> = output.progress.iter().cloned().collect();
        let summary = RunSummarizer::new(self.store.clone())
            .finish(run_id, started_at, output.total_tokens, &names, &progress)
            .await?;

        let report_path = self
            .reports
            .write_report(&RunReport {
                project: project.clone(),
                task: request.task.clone(),
                completed_at: summary.completed_at,
                progress: output.progress.clone(),
                summaries: output.summaries.clone(),
                total_tokens: output.total_tokens,
                elapsed_secs: summary.elapsed_secs,
            })
            .await?;

        info!(
            run_id,
            rounds = output.rounds,
            completed = output.completed.len(),
            tokens = output.total_tokens,
            report = %report_path.display(),
            "Orchestrator: run complete"
        );

        Ok(OrchestratorResult {
            run_id,
            project,
            decomposition,
            output,
            summary,
            report_path,
        })
    }
}
