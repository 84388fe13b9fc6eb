//! Multi-step driver for running a run until it settles.

use anyhow::Result;
use tracing::{debug, info};

use crate::core::run::{Run, RunStatus};
use crate::io::llm::LanguageModel;
use crate::io::workspace::Workspace;
use crate::orchestrator::Orchestrator;

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The run reached a terminal status.
    Settled(RunStatus),
    /// The run needs user input to go on.
    WaitingUser,
    Paused,
    /// This loop already planned `max_iterations` rounds.
    IterationLimit { iteration: u32, max_iterations: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub run_id: String,
    pub started_at_iter: u32,
    pub steps_executed: u32,
    pub stop: LoopStop,
    pub run: Run,
}

/// Call `continue_run` while the run is `running`.
///
/// Once `max_iterations` planning rounds have happened in this loop, the last
/// planned batch is still executed but no further round is planned.
pub fn run_loop<M, W, F>(
    orchestrator: &Orchestrator<M, W>,
    run_id: &str,
    mut on_step: F,
) -> Result<LoopOutcome>
where
    M: LanguageModel,
    W: Workspace,
    F: FnMut(&Run),
{
    let max_iterations = orchestrator.config().max_iterations;
    let mut run = orchestrator.get_run(run_id)?;
    let started_at_iter = run.iteration;
    let mut steps_executed = 0u32;

    loop {
        let stop = match run.status {
            status if status.is_terminal() => Some(LoopStop::Settled(status)),
            RunStatus::WaitingUser => Some(LoopStop::WaitingUser),
            RunStatus::Paused => Some(LoopStop::Paused),
            _ => None,
        };
        if let Some(stop) = stop {
            info!(run_id, stop = ?stop, steps_executed, "loop stopped");
            return Ok(LoopOutcome {
                run_id: run_id.to_string(),
                started_at_iter,
                steps_executed,
                stop,
                run,
            });
        }

        let planned = run.iteration.saturating_sub(started_at_iter);
        if planned >= max_iterations {
            if !run.pending_action_ids.is_empty() {
                run = orchestrator.execute_queued(run_id)?;
                steps_executed += 1;
                on_step(&run);
                if run.status != RunStatus::Running {
                    continue;
                }
            }
            info!(run_id, iteration = run.iteration, max_iterations, "iteration limit reached");
            return Ok(LoopOutcome {
                run_id: run_id.to_string(),
                started_at_iter,
                steps_executed,
                stop: LoopStop::IterationLimit {
                    iteration: run.iteration,
                    max_iterations,
                },
                run,
            });
        }

        let before = run.iteration;
        run = orchestrator.continue_run(run_id, None)?;
        steps_executed += 1;
        debug!(run_id, from = before, to = run.iteration, status = %run.status, "loop step");
        on_step(&run);
    }
}
