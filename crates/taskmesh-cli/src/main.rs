mod config;
mod prompt;

use clap::{Parser, Subcommand};
use config::{LogFormat, TaskmeshConfig};
use std::path::PathBuf;
use std::sync::Arc;
use taskmesh_core::is_rate_limited;
use taskmesh_llm::LlmClient;
use taskmesh_orchestrator::{Orchestrator, RoundReport, RunPlan, RunRequest};
use taskmesh_store::{MarkdownReportSink, MemoryRunStore, RunStore, SqliteRunStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskmesh", about = "Taskmesh - round-based multi-agent task orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "taskmesh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose a task and run agents over it
    Run {
        /// Task text (prompted for when absent)
        #[arg(short, long)]
        task: Option<String>,
        /// Number of agents
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        agents: Option<u32>,
        /// Maximum number of rounds
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        iterations: Option<u32>,
        /// Keep run records in memory instead of the database
        #[arg(long)]
        ephemeral: bool,
    },
    /// List recent runs
    Runs {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

fn init_tracing(config: &TaskmeshConfig) {
    let level = config.logging.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_plan(plan: &RunPlan) {
    println!("\nProject: {}", plan.project);
    println!(
        "Subtasks ({:?}, {} attempt(s)):",
        plan.decomposition.stage, plan.decomposition.attempts
    );
    for (i, subtask) in plan.decomposition.subtasks.iter().enumerate() {
        println!("  {}. {subtask}", i + 1);
    }
    println!("Assignments:");
    for (name, subtasks) in &plan.assignments {
        if subtasks.is_empty() {
            println!("  {name}: (nothing assigned)");
        } else {
            println!("  {name}: {}", subtasks.join("; "));
        }
    }
}

fn print_round(report: &RoundReport) {
    println!("\n--- Progress report (round {}) ---", report.round);
    for (name, progress) in &report.progress {
        println!("{name}: {progress}");
    }
    for msg in &report.manager_messages {
        println!("[{} -> manager]: {}", msg.sender, msg.body);
    }
    if !report.completed.is_empty() {
        println!("Completed: {}", report.completed.join(", "));
    }
    println!("Tokens so far: {}", report.total_tokens);
}

async fn run_task(
    config: TaskmeshConfig,
    task: Option<String>,
    agents: Option<u32>,
    iterations: Option<u32>,
    ephemeral: bool,
) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();
    let task = match task {
        Some(task) => task,
        None => prompt::ask_text(&mut input, &mut output, "Enter the task")?,
    };
    let agents = match agents {
        Some(n) => n,
        None => prompt::ask_count(&mut input, &mut output, "Number of agents", 1)?,
    };
    let iterations = match iterations {
        Some(n) => n,
        None => prompt::ask_count(&mut input, &mut output, "Number of iterations", 1)?,
    };
    drop(input);

    let store: Arc<dyn RunStore> = if ephemeral {
        info!("Ephemeral run, records are kept in memory");
        Arc::new(MemoryRunStore::new())
    } else {
        Arc::new(SqliteRunStore::open(config.database_path())?)
    };
    let reports = Arc::new(MarkdownReportSink::new(config.output_dir()));
    let settings = config.settings();
    let llm = Arc::new(LlmClient::from_config(config.model));
    info!(model = llm.model(), "Model collaborator ready");

    let orchestrator = Orchestrator::new(llm, store, reports)
        .with_settings(settings)
        .with_plan(print_plan)
        .with_progress(print_round);

    let request = RunRequest::new(task, agents as usize, iterations);
    let result = match orchestrator.run(&request).await {
        Ok(result) => result,
        Err(e) if is_rate_limited(&e) => {
            eprintln!("Model rate limit reached, stopping: {e}");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    println!("\n=== Task summaries ===");
    println!("{}", result.summary.render());

    println!("\n=== Review of every iteration ===");
    for (name, log) in &result.output.summaries {
        println!("\n{name}:");
        for entry in log {
            println!("  - {entry}");
        }
    }

    println!(
        "\nRounds: {}  Tokens: {}  Elapsed: {:.1}s",
        result.output.rounds, result.summary.total_tokens, result.summary.elapsed_secs
    );
    println!("Run id: {}", result.run_id);
    println!("Report: {}", result.report_path.display());
    Ok(())
}

async fn list_runs(config: &TaskmeshConfig, limit: usize) -> anyhow::Result<()> {
    let store = SqliteRunStore::open(config.database_path())?;
    let runs = store.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded in {}", config.database_path().display());
        return Ok(());
    }
    for run in &runs {
        let status = match (run.elapsed_secs, run.total_tokens) {
            (Some(secs), Some(tokens)) => format!("done in {secs:.1}s, {tokens} tokens"),
            _ => "unfinished".to_string(),
        };
        println!(
            "#{} {} [{} subtask(s), {status}] {}",
            run.id,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.subtasks.len(),
            run.task
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = TaskmeshConfig::load(&cli.config)?;
    init_tracing(&config);
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Run {
            task,
            agents,
            iterations,
            ephemeral,
        } => run_task(config, task, agents, iterations, ephemeral).await,
        Commands::Runs { limit } => list_runs(&config, limit).await,
    }
}
