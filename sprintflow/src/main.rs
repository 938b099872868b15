//! Resumable multi-agent sprint workflow.
//!
//! Records live under `.sprintflow/runs/<run>/<node>/<iteration>.json`;
//! re-running an existing run id resumes it from those records.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};

use sprintflow::core::gating;
use sprintflow::core::types::{NodeId, RunId};
use sprintflow::engine::{Event, RunContext};
use sprintflow::exit_codes;
use sprintflow::io::agent::AgentActions;
use sprintflow::io::config::load_config;
use sprintflow::io::executor::CommandExecutor;
use sprintflow::io::init::{InitOptions, SprintflowPaths, init_project};
use sprintflow::logging;
use sprintflow::store::{FileStore, RunStore};
use sprintflow::workflow::{Settings, run_workflow};

#[derive(Parser)]
#[command(
    name = "sprintflow",
    version,
    about = "Resumable multi-agent sprint workflow"
)]
struct Cli {
    /// Project root containing `.sprintflow/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Log engine progress to stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.sprintflow/` with default config and output schemas.
    Init {
        /// Overwrite existing config and schemas (runs are kept).
        #[arg(short, long)]
        force: bool,
    },
    /// Run the workflow, or resume it when the run id already has records.
    Run {
        /// Defaults to `run-YYYYMMDD-HHMMSS`.
        #[arg(long)]
        run_id: Option<String>,
        /// Config file; defaults to `.sprintflow/config.toml`.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Summarize a run: sprint counter, completion flag and latest iteration per node.
    Status {
        #[arg(long)]
        run_id: String,
    },
    /// Print every record of one node as JSON lines.
    History {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        node: String,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let paths = SprintflowPaths::new(&cli.root);
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Run { run_id, config } => cmd_run(&paths, run_id, config.as_deref()),
        Command::Status { run_id } => cmd_status(&paths, &run_id),
        Command::History { run_id, node } => cmd_history(&paths, &run_id, &node),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("initialized {}", paths.state_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(paths: &SprintflowPaths, run_id: Option<String>, config: Option<&Path>) -> Result<i32> {
    let config_path = config.unwrap_or(paths.config_path.as_path());
    let cfg = load_config(config_path)?;
    let run = RunId::new(run_id.unwrap_or_else(default_run_id))?;
    let store = FileStore::new(&paths.runs_dir);
    let resuming = !store.nodes(&run)?.is_empty();
    let executor = Arc::new(CommandExecutor::new(cfg.agents.clone()));
    let actions = AgentActions::new(executor, paths.clone(), &cfg)?;

    println!(
        "{} {run} (max {} sprints, {} review passes)",
        if resuming { "resuming" } else { "starting" },
        cfg.max_sprints,
        cfg.review_max_iterations
    );
    let outcome = run_workflow(
        &run,
        &store,
        &actions,
        &Settings::from(&cfg),
        Some(&print_event),
    )?;

    println!(
        "{}: {} sprint(s) completed, project {}",
        outcome.run_id,
        outcome.sprints_completed,
        if outcome.project_complete {
            "complete"
        } else {
            "incomplete"
        }
    );
    if outcome.capped && !outcome.project_complete {
        return Ok(exit_codes::INCOMPLETE);
    }
    Ok(exit_codes::OK)
}

fn print_event(event: &Event<'_>) {
    match event {
        Event::StepStarted { node, iteration } => println!("start  {node}#{iteration}"),
        Event::StepWritten { node, iteration } => println!("wrote  {node}#{iteration}"),
        Event::StepSkipped { node, iteration } => println!("skip   {node}#{iteration}"),
        Event::StepRecovered { node, iteration } => println!("kept   {node}#{iteration}"),
        Event::StepFailed { node, error } => println!("failed {node}: {error}"),
        Event::FailureTolerated { error } => println!("continuing after: {error}"),
        Event::LoopPassStarted {
            node,
            activation,
            pass,
        } => println!("loop   {node} activation {activation} pass {}", pass + 1),
        Event::LoopFinished {
            node,
            passes,
            satisfied,
        } => println!(
            "done   {node} after {passes} pass(es){}",
            if *satisfied { "" } else { " (limit reached)" }
        ),
    }
}

fn cmd_status(paths: &SprintflowPaths, run_id: &str) -> Result<i32> {
    let run = RunId::new(run_id)?;
    let store = FileStore::new(&paths.runs_dir);
    let nodes = store.nodes(&run)?;
    if nodes.is_empty() {
        bail!("unknown run {run}: no records under {}", store.run_dir(&run).display());
    }

    let ctx = RunContext::new(run.clone(), &store);
    println!("run {run}");
    println!("sprints completed: {}", gating::sprints_completed(&ctx));
    println!(
        "project complete: {}",
        if gating::is_project_complete(&ctx) { "yes" } else { "no" }
    );
    for node in &nodes {
        let latest = store
            .read_latest(&run, node)?
            .with_context(|| format!("node {node} vanished while reading"))?;
        println!(
            "  {:<16} #{:<3} {}",
            node.as_str(),
            latest.key.iteration,
            latest.written_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_history(paths: &SprintflowPaths, run_id: &str, node: &str) -> Result<i32> {
    let run = RunId::new(run_id)?;
    let node = NodeId::new(node)?;
    let store = FileStore::new(&paths.runs_dir);
    let records = store.history(&run, &node)?;
    if records.is_empty() {
        bail!("no records for {node} in run {run}");
    }
    for record in records {
        println!(
            "{}",
            serde_json::to_string(&record).context("serialize record")?
        );
    }
    Ok(exit_codes::OK)
}

fn default_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S"))
}
