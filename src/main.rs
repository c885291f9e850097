mod config;
mod logging;
mod notify;
mod orchestrator;
mod queue;
mod resolver;
mod store;
mod tool;
mod workflow;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchestrator::{ExecutionRecord, ExecutionStatus};
use std::path::PathBuf;
use store::ExecutionStore;
use workflow::WorkflowRequest;

#[derive(Parser)]
#[command(name = "flowmux")]
#[command(about = "Workflow execution engine - sequential steps, async queueing, task orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow request file without running it
    Validate {
        /// Path to a workflow request JSON file
        file: PathBuf,
    },

    /// List executions
    Executions {
        /// Filter by team
        #[arg(long)]
        team: Option<String>,

        /// Filter by task
        #[arg(long)]
        task: Option<String>,

        /// Filter by workflow
        #[arg(long)]
        workflow: Option<String>,

        /// Filter by status (queued, running, completed, failed, timeout, cancelled)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one execution in full
    Execution {
        /// Execution id
        id: String,
    },

    /// List queued async steps for an execution
    Steps {
        /// Execution id
        execution_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.debug, cli.quiet, cli.log_file.clone())?;

    let config = config::FlowmuxConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let request: WorkflowRequest = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", file.display()))?;

            match workflow::validate_request(&request) {
                Ok(()) => {
                    println!("✓ Workflow request is valid");
                    println!("  {} steps", request.steps.len());
                    let async_count = request.steps.iter().filter(|s| s.is_async).count();
                    if async_count > 0 {
                        println!("  {} async", async_count);
                    }
                }
                Err(e) => {
                    eprintln!("✗ Workflow validation failed:\n{}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Executions {
            team,
            task,
            workflow,
            status,
        } => {
            let store = open_store(&config)?;
            let records = if let Some(team) = team {
                store.executions_for_team(&team)?
            } else if let Some(task) = task {
                store.executions_for_task(&task)?
            } else if let Some(workflow) = workflow {
                store.executions_for_workflow(&workflow)?
            } else if let Some(status) = status {
                let status = ExecutionStatus::parse(&status)
                    .with_context(|| format!("unknown status '{}'", status))?;
                store.executions_by_status(status)?
            } else {
                store.list_executions()?
            };

            if records.is_empty() {
                println!("(no executions)");
            }
            for record in records {
                print_summary(&record);
            }
        }

        Commands::Execution { id } => {
            let store = open_store(&config)?;
            match store.find_execution(&id)? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => {
                    eprintln!("execution {} not found", id);
                    std::process::exit(1);
                }
            }
        }

        Commands::Steps { execution_id } => {
            let store = open_store(&config)?;
            let entries = store.queued_steps_for_execution(&execution_id)?;
            if entries.is_empty() {
                println!("(no queued steps)");
            }
            for entry in entries {
                println!(
                    "step {} [{}] {} {} (queued {})",
                    entry.step_number,
                    entry.status.as_str(),
                    entry.step.target,
                    entry.step.action,
                    entry.queued_at.to_rfc3339(),
                );
            }
        }
    }

    Ok(())
}

fn open_store(config: &config::FlowmuxConfig) -> Result<ExecutionStore> {
    let path = match &config.store_path {
        Some(path) => path.clone(),
        None => ExecutionStore::default_path()?,
    };
    ExecutionStore::open(&path)
}

fn print_summary(record: &ExecutionRecord) {
    let subject = record
        .task_id
        .as_deref()
        .or(record.workflow_id.as_deref())
        .unwrap_or("-");
    let duration = record
        .duration_ms
        .map(|ms| format!("{}ms", ms))
        .unwrap_or_else(|| "-".into());
    println!(
        "{} [{}] {} {} scheduled={} duration={}",
        record.id,
        record.status.as_str(),
        record.kind.as_str(),
        subject,
        record.scheduled_at.to_rfc3339(),
        duration,
    );
}
