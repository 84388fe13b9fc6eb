//! Closed-loop task orchestrator CLI.
//!
//! Runs live under `<root>/.closedloop/runs/`; the model command and limits
//! come from `<root>/.closedloop/config.toml`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use closedloop::core::run::{RequestSnapshot, Run, RunStatus};
use closedloop::core::types::ChatMessage;
use closedloop::exit_codes;
use closedloop::io::config::{LoopConfig, config_path, load_config, write_config};
use closedloop::io::llm::CommandModel;
use closedloop::io::run_store::{FileBackend, RunNotFound, RunStore};
use closedloop::io::workspace::{LocalWorkspace, Workspace};
use closedloop::logging;
use closedloop::looping::{LoopStop, run_loop};
use closedloop::orchestrator::Orchestrator;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "closedloop",
    version,
    about = "Plan, act, observe: a closed-loop task orchestrator"
)]
struct Cli {
    /// Workspace root the run operates on.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `.closedloop/config.toml` if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Start a new run from a user message.
    Start {
        message: String,
        /// File the request is about; its content is sent along.
        #[arg(long)]
        file: Option<String>,
        #[arg(long)]
        chat_only: bool,
        /// Treat the request as a code edit regardless of wording.
        #[arg(long)]
        force_edit: bool,
        #[arg(long, default_value = "local")]
        provider: String,
        /// Plan and execute once instead of looping.
        #[arg(long)]
        step: bool,
    },
    /// Continue a run, optionally with a follow-up message.
    Continue {
        run_id: String,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        step: bool,
    },
    /// Show a run's status.
    Status {
        run_id: String,
        /// Print the full run record.
        #[arg(long)]
        json: bool,
    },
    /// Print a run's events as JSON lines.
    Events { run_id: String },
    Pause { run_id: String },
    Resume { run_id: String },
    Cancel { run_id: String },
    /// List runs, oldest first.
    List,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            let code = if err.downcast_ref::<RunNotFound>().is_some() {
                exit_codes::NOT_FOUND
            } else {
                exit_codes::INVALID
            };
            std::process::exit(code);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.root;
    let store = RunStore::new(FileBackend::for_workspace(&root));

    match cli.command {
        Command::Init { force } => {
            let path = config_path(&root);
            if force || !path.exists() {
                write_config(&path, &LoopConfig::default())?;
            }
            println!("{}", path.display());
            Ok(exit_codes::OK)
        }
        Command::Status { run_id, json } => {
            let run = store.get(&run_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print_summary(&run);
            }
            Ok(status_exit_code(run.status))
        }
        Command::Events { run_id } => {
            let run = store.get(&run_id)?;
            for event in &run.events {
                println!("{}", serde_json::to_string(event)?);
            }
            Ok(exit_codes::OK)
        }
        Command::List => {
            for run in store.list()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    run.run_id,
                    run.status,
                    run.intent.as_str(),
                    run.started_at
                );
            }
            Ok(exit_codes::OK)
        }
        Command::Start {
            message,
            file,
            chat_only,
            force_edit,
            provider,
            step,
        } => {
            let orchestrator = orchestrator(&root, store)?;
            let request = start_request(
                orchestrator.workspace(),
                message,
                file,
                chat_only,
                force_edit,
                provider,
            )?;
            let run = orchestrator.create_run(request)?;
            println!("{}", run.run_id);
            finish(&drive(&orchestrator, &run.run_id, None, step)?)
        }
        Command::Continue {
            run_id,
            message,
            step,
        } => {
            let orchestrator = orchestrator(&root, store)?;
            finish(&drive(&orchestrator, &run_id, message.as_deref(), step)?)
        }
        Command::Pause { run_id } => finish(&orchestrator(&root, store)?.pause_run(&run_id)?),
        Command::Resume { run_id } => finish(&orchestrator(&root, store)?.resume_run(&run_id)?),
        Command::Cancel { run_id } => finish(&orchestrator(&root, store)?.cancel_run(&run_id)?),
    }
}

fn finish(run: &Run) -> Result<i32> {
    print_summary(run);
    Ok(status_exit_code(run.status))
}

fn orchestrator(root: &Path, store: RunStore) -> Result<Orchestrator<CommandModel, LocalWorkspace>> {
    let config = load_config(&config_path(root))?;
    let model = CommandModel::new(config.model.clone());
    Ok(Orchestrator::new(
        store,
        model,
        LocalWorkspace::new(root),
        config,
    ))
}

/// Build the request; `--file` is read through the workspace's path confinement.
fn start_request<W: Workspace>(
    workspace: &W,
    message: String,
    file: Option<String>,
    chat_only: bool,
    force_edit: bool,
    provider: String,
) -> Result<RequestSnapshot> {
    let current_code = file
        .as_deref()
        .map(|path| workspace.read_file(path))
        .transpose()?;
    Ok(RequestSnapshot {
        provider,
        messages: vec![ChatMessage::user(message)],
        current_file: file.clone(),
        current_code,
        file_path: file,
        chat_only,
        force_code_edit: force_edit,
        ..RequestSnapshot::default()
    })
}

/// One `continue_run` with `--step`, otherwise the full loop.
fn drive(
    orchestrator: &Orchestrator<CommandModel, LocalWorkspace>,
    run_id: &str,
    followup: Option<&str>,
    step: bool,
) -> Result<Run> {
    let run = orchestrator.continue_run(run_id, followup)?;
    if step || run.status != RunStatus::Running {
        return Ok(run);
    }
    let outcome = run_loop(orchestrator, run_id, |run| {
        debug!(run_id = %run.run_id, iteration = run.iteration, status = %run.status, "step");
    })?;
    if let LoopStop::IterationLimit {
        iteration,
        max_iterations,
    } = outcome.stop
    {
        eprintln!(
            "stopped after {max_iterations} planning rounds (iteration {iteration}); use `continue` to go on"
        );
    }
    Ok(outcome.run)
}

fn print_summary(run: &Run) {
    println!("run {}: {} (iteration {})", run.run_id, run.status, run.iteration);
    if !run.pending_action_ids.is_empty() {
        println!("pending: {}", run.pending_action_ids.join(", "));
    }
    if let Some(content) = &run.result_content {
        println!("{content}");
    }
    for change in &run.result_changes {
        println!("changed {}", change.path);
    }
}

fn status_exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Completed | RunStatus::Running => exit_codes::OK,
        RunStatus::WaitingUser | RunStatus::Paused => exit_codes::WAITING,
        RunStatus::Failed | RunStatus::Blocked | RunStatus::Cancelled => exit_codes::HALTED,
    }
}
