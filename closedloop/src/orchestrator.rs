//! Run lifecycle: planning -> actions -> planning.
//!
//! Every state change goes through [`RunStore`] mutators, and the record is
//! re-read before each decision so control flags set by `pause_run` or
//! `cancel_run` from another thread are seen at the next action boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::actions::{ActionExecutor, action_result_detail};
use crate::agents::planner::{PlanRequest, Planner};
use crate::core::intent::infer_intent;
use crate::core::run::{RequestSnapshot, Run, RunStatus};
use crate::core::topo::topological_order;
use crate::core::types::{
    ActionBatch, ActionSpec, ChatMessage, DecisionMode, EventKind, EventStatus, ExecutionEvent,
    FileChange, RecordStatus,
};
use crate::io::config::LoopConfig;
use crate::io::context::ContextBuilder;
use crate::io::llm::LanguageModel;
use crate::io::run_store::{RunResult, RunStore, set_status};
use crate::io::workspace::Workspace;

/// One serialization slot per run id for `start`/`continue_run`.
#[derive(Debug, Default)]
struct RunLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RunLocks {
    fn slot(&self, run_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| anyhow!("run lock table poisoned"))?;
        Ok(slots.entry(run_id.to_string()).or_default().clone())
    }
}

pub struct Orchestrator<M: LanguageModel, W: Workspace> {
    store: RunStore,
    model: M,
    workspace: W,
    config: LoopConfig,
    locks: RunLocks,
}

impl<M: LanguageModel, W: Workspace> Orchestrator<M, W> {
    pub fn new(store: RunStore, model: M, workspace: W, config: LoopConfig) -> Self {
        Self {
            store,
            model,
            workspace,
            config,
            locks: RunLocks::default(),
        }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        self.store.get(run_id)
    }

    /// Persist a new `running` run without planning.
    pub fn create_run(&self, request: RequestSnapshot) -> Result<Run> {
        let intent = infer_intent(&request);
        let run = self.store.create_run(request, intent)?;
        info!(run_id = %run.run_id, intent = ?intent, "run created");
        self.store.add_event(
            &run.run_id,
            ExecutionEvent::new(EventKind::System, "run", "run created")
                .detail(format!("intent={}", intent.as_str()))
                .status(EventStatus::Completed),
        )
    }

    /// Create a run and plan its first iteration.
    pub fn start(&self, request: RequestSnapshot) -> Result<Run> {
        let run = self.create_run(request)?;
        self.continue_run(&run.run_id, None)
    }

    /// Advance a run by one step: execute pending actions, or plan the next batch.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn continue_run(&self, run_id: &str, followup: Option<&str>) -> Result<Run> {
        let slot = self.locks.slot(run_id)?;
        let _serial = slot.lock().map_err(|_| anyhow!("run lock poisoned"))?;

        let run = self.store.get(run_id)?;
        if run.status.is_terminal() || run.status == RunStatus::Paused {
            return Ok(run);
        }
        if let Some(message) = followup.map(str::trim).filter(|m| !m.is_empty()) {
            self.store.add_followup(run_id, ChatMessage::user(message))?;
            self.store.add_event(
                run_id,
                ExecutionEvent::new(EventKind::System, "followup", "user follow-up")
                    .detail(message)
                    .status(EventStatus::Info),
            )?;
        }

        let has_pending = run.latest_batch.is_some() && !run.pending_action_ids.is_empty();
        if !has_pending {
            return self.plan_iteration(run_id);
        }

        let run = self.execute_pending(run_id)?;
        if run.status.is_terminal() || run.status == RunStatus::Paused {
            return Ok(run);
        }
        // An interrupted batch waits for the user even when nothing is left queued.
        if run.status == RunStatus::WaitingUser {
            return Ok(run);
        }
        self.plan_iteration(run_id)
    }

    /// Execute the queued actions of the latest batch without planning another.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn execute_queued(&self, run_id: &str) -> Result<Run> {
        let slot = self.locks.slot(run_id)?;
        let _serial = slot.lock().map_err(|_| anyhow!("run lock poisoned"))?;

        let run = self.store.get(run_id)?;
        if run.status.is_terminal()
            || run.status == RunStatus::Paused
            || run.pending_action_ids.is_empty()
        {
            return Ok(run);
        }
        self.execute_pending(run_id)
    }

    /// Request a pause at the next action boundary.
    pub fn pause_run(&self, run_id: &str) -> Result<Run> {
        let run = self.store.get(run_id)?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        let run = self.store.request_pause(run_id)?;
        info!(run_id, status = %run.status, "pause requested");
        self.store.add_event(
            run_id,
            ExecutionEvent::new(EventKind::System, "control", "pause requested")
                .detail("pausing after the current action")
                .status(EventStatus::Paused)
                .data("active_action_id", json!(run.active_action_id)),
        )
    }

    /// Clear the pause flag. Cancelled runs stay cancelled.
    pub fn resume_run(&self, run_id: &str) -> Result<Run> {
        let run = self.store.get(run_id)?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        self.store.clear_pause(run_id)?;
        info!(run_id, "run resumed");
        self.store.add_event(
            run_id,
            ExecutionEvent::new(EventKind::System, "control", "resumed")
                .detail("automatic execution resumed")
                .status(EventStatus::Running),
        )
    }

    /// Request cancellation. An idle run is cancelled at once.
    pub fn cancel_run(&self, run_id: &str) -> Result<Run> {
        let run = self.store.get(run_id)?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        let run = self.store.request_cancel(run_id)?;
        if run.active_action_id.is_none() {
            self.store.clear_pending_actions(run_id)?;
            self.store.mark_run_finished(run_id, RunStatus::Cancelled)?;
        }
        info!(run_id, "cancel requested");
        self.store.add_event(
            run_id,
            ExecutionEvent::new(EventKind::System, "control", "cancelled")
                .detail("execution cancelled")
                .status(EventStatus::Cancelled),
        )
    }

    /// Ask the planner for the next batch and queue it.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn plan_iteration(&self, run_id: &str) -> Result<Run> {
        let run = self.store.get(run_id)?;
        if run.cancel_requested {
            self.store.clear_pending_actions(run_id)?;
            return self.store.mark_run_finished(run_id, RunStatus::Cancelled);
        }
        if run.pause_requested {
            return self.store.update_status(run_id, RunStatus::Paused);
        }

        let iteration = run.iteration + 1;
        self.store.add_event(
            run_id,
            ExecutionEvent::new(
                EventKind::Planning,
                "planning",
                format!("iteration {iteration} planning"),
            )
            .detail("planning the next batch of actions")
            .status(EventStatus::Running)
            .iteration(iteration),
        )?;

        let request = effective_request(&run);
        let conversation = run.conversation();
        let original_query = run.latest_user_query();
        let context = ContextBuilder::new(&self.workspace, &self.config.context)
            .build(&request, &run.action_history);
        let outcome = Planner::new(&self.model, &self.config.planner).plan_next(&PlanRequest {
            request: &request,
            conversation: &conversation,
            iteration,
            original_query: &original_query,
            history: &run.action_history,
            context: &context,
        });
        let batch = outcome.batch;

        // Controls may have landed during the model call.
        let current = self.store.get(run_id)?;
        if current.status.is_terminal() {
            info!(run_id, iteration, status = %current.status, "run settled while planning, dropping batch");
            return Ok(current);
        }
        if current.cancel_requested {
            info!(run_id, iteration, "cancel requested while planning, dropping batch");
            self.store.clear_pending_actions(run_id)?;
            return self.store.mark_run_finished(run_id, RunStatus::Cancelled);
        }

        self.store.set_latest_batch(run_id, batch.clone())?;
        let mut planned = ExecutionEvent::new(
            EventKind::Planning,
            "planning",
            format!("iteration {iteration} planned"),
        )
        .detail(batch.summary.clone())
        .status(EventStatus::Completed)
        .iteration(iteration)
        .output(serde_json::to_value(&batch)?)
        .data("decision", serde_json::to_value(batch.decision.mode)?)
        .data("action_count", batch.actions.len());
        if let Some(llm) = &outcome.llm {
            planned = planned.metrics(serde_json::to_value(llm)?);
        }
        if let Some(reason) = &outcome.fallback_reason {
            planned = planned.data("fallback_reason", reason.as_str());
        }
        self.store.add_event(run_id, planned)?;
        for action in &batch.actions {
            self.store.add_event(run_id, queued_event(action, iteration))?;
        }

        match batch.decision.mode {
            DecisionMode::Blocked => {
                let content = decision_text(&batch, "task blocked");
                info!(run_id, reason = %content, "planner reported blocked");
                self.store.clear_pending_actions(run_id)?;
                self.store.mark_run_finished(run_id, RunStatus::Blocked)?;
                return self.store.mark_run_result(
                    run_id,
                    RunResult {
                        content,
                        ..RunResult::default()
                    },
                );
            }
            DecisionMode::Done if batch.actions.is_empty() => {
                let content = decision_text(&batch, "task completed");
                info!(run_id, "planner reported done");
                self.store.clear_pending_actions(run_id)?;
                self.store.mark_run_finished(run_id, RunStatus::Completed)?;
                let run = self.store.get(run_id)?;
                return self
                    .store
                    .mark_run_result(run_id, result_with_changes(content, run.result_changes));
            }
            _ => {}
        }

        let waiting = batch.decision.needs_user_trigger && !batch.actions.is_empty();
        self.store.update(run_id, |run| {
            let next = if run.pause_requested {
                RunStatus::Paused
            } else if waiting {
                RunStatus::WaitingUser
            } else {
                RunStatus::Running
            };
            set_status(run, next);
        })
    }

    /// Run the queued actions of the latest batch in dependency order.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn execute_pending(&self, run_id: &str) -> Result<Run> {
        let run = self.store.get(run_id)?;
        let Some(batch) = run.latest_batch.clone() else {
            return Ok(run);
        };
        let iteration = batch.iteration;
        let pending: Vec<ActionSpec> = batch
            .actions
            .iter()
            .filter(|action| run.pending_action_ids.contains(&action.id))
            .cloned()
            .collect();
        let order: Vec<ActionSpec> = topological_order(&pending)?
            .into_iter()
            .cloned()
            .collect();
        if run.status == RunStatus::WaitingUser {
            self.store.update_status(run_id, RunStatus::Running)?;
        }

        let request = effective_request(&run);
        let mut changes: Vec<FileChange> = run.result_changes.clone();
        let mut final_answer: Option<String> = None;

        for action in &order {
            let run = self.store.get(run_id)?;
            if !run.pending_action_ids.contains(&action.id) {
                continue;
            }
            if run.cancel_requested {
                self.store.clear_pending_actions(run_id)?;
                self.store.mark_run_finished(run_id, RunStatus::Cancelled)?;
                info!(run_id, action_id = %action.id, "cancelled at action boundary");
                return self.store.add_event(
                    run_id,
                    ExecutionEvent::new(EventKind::System, "finalize", "execution cancelled")
                        .detail("stopped at an action boundary")
                        .status(EventStatus::Cancelled)
                        .iteration(iteration),
                );
            }
            if run.pause_requested {
                self.store.update_status(run_id, RunStatus::Paused)?;
                info!(run_id, action_id = %action.id, "paused at action boundary");
                return self.store.add_event(
                    run_id,
                    ExecutionEvent::new(EventKind::System, "control", "execution paused")
                        .detail("paused at an action boundary; resume to continue")
                        .status(EventStatus::Paused)
                        .iteration(iteration),
                );
            }

            self.store.add_event(
                run_id,
                ExecutionEvent::new(
                    EventKind::Action,
                    action.action_type.as_str(),
                    action.title.clone(),
                )
                .detail(action.reason.clone())
                .status(EventStatus::Running)
                .iteration(iteration)
                .action_id(action.id.clone())
                .input(json!(action.input)),
            )?;
            self.store
                .set_active_action(run_id, Some(action.id.clone()))?;

            let outcome = ActionExecutor::new(&self.model, &self.workspace, &self.config.actions)
                .execute(&request, action, iteration, &run.action_history);
            let record = outcome.record.clone();
            self.store.add_action_record(run_id, outcome.record)?;
            self.store.add_event(
                run_id,
                ExecutionEvent::new(
                    EventKind::Action,
                    action.action_type.as_str(),
                    action.title.clone(),
                )
                .detail(action_result_detail(&record))
                .status(record.status.into())
                .iteration(iteration)
                .action_id(action.id.clone())
                .input(json!(record.input))
                .output(record.output.clone())
                .artifacts(record.artifacts.clone())
                .error(record.error.clone()),
            )?;
            changes.extend(outcome.file_changes);
            if outcome.final_answer.is_some() {
                final_answer = outcome.final_answer;
            }
            self.store.complete_action(run_id, &action.id)?;

            if outcome.blocked || record.status == RecordStatus::Failed {
                warn!(
                    run_id,
                    action_id = %action.id,
                    status = record.status.as_str(),
                    "batch interrupted"
                );
                self.store.update_status(run_id, RunStatus::WaitingUser)?;
                let detail = outcome
                    .assistant_message
                    .clone()
                    .or_else(|| record.error.clone())
                    .unwrap_or_else(|| "execution interrupted".to_string());
                let run = self.store.add_event(
                    run_id,
                    ExecutionEvent::new(
                        EventKind::System,
                        "iteration_summary",
                        format!("iteration {iteration} interrupted"),
                    )
                    .detail(detail)
                    .status(if outcome.blocked {
                        EventStatus::Blocked
                    } else {
                        EventStatus::Failed
                    })
                    .iteration(iteration)
                    .data("action_id", action.id.as_str()),
                )?;
                if changes.is_empty() {
                    return Ok(run);
                }
                let content = outcome
                    .assistant_message
                    .unwrap_or_else(|| "some actions in this iteration were applied".to_string());
                return self
                    .store
                    .mark_run_result(run_id, result_with_changes(content, changes));
            }
        }

        self.store.clear_pending_actions(run_id)?;
        let run = self.store.add_event(
            run_id,
            ExecutionEvent::new(
                EventKind::System,
                "iteration_summary",
                format!("iteration {iteration} executed"),
            )
            .detail(format!("executed {} actions", order.len()))
            .status(EventStatus::Completed)
            .iteration(iteration)
            .data("executed", order.len()),
        )?;

        if run.cancel_requested {
            info!(run_id, iteration, "cancel requested during the last action");
            self.store.mark_run_finished(run_id, RunStatus::Cancelled)?;
            if !changes.is_empty() {
                self.store.mark_run_result(
                    run_id,
                    result_with_changes("cancelled after files were updated".to_string(), changes),
                )?;
            }
            return self.store.add_event(
                run_id,
                ExecutionEvent::new(EventKind::System, "finalize", "execution cancelled")
                    .detail("cancel requested before the batch could finish")
                    .status(EventStatus::Cancelled)
                    .iteration(iteration),
            );
        }
        if batch.decision.mode == DecisionMode::Done || final_answer.is_some() {
            let content = final_answer.unwrap_or_else(|| batch.summary.clone());
            info!(run_id, iteration, "run completed");
            self.store.mark_run_finished(run_id, RunStatus::Completed)?;
            self.store
                .mark_run_result(run_id, result_with_changes(content.clone(), changes))?;
            return self.store.add_event(
                run_id,
                ExecutionEvent::new(EventKind::System, "finalize", "task completed")
                    .detail(content)
                    .status(EventStatus::Completed)
                    .iteration(iteration),
            );
        }
        if changes.len() > run.result_changes.len() {
            return self.store.mark_run_result(
                run_id,
                result_with_changes(
                    "actions for this iteration finished and files were updated".to_string(),
                    changes,
                ),
            );
        }
        Ok(run)
    }
}

/// The request as executed: snapshot fields with follow-ups appended to the messages.
fn effective_request(run: &Run) -> RequestSnapshot {
    let mut request = run.request_snapshot.clone();
    request.messages = run.conversation();
    request
}

fn queued_event(action: &ActionSpec, iteration: u32) -> ExecutionEvent {
    ExecutionEvent::new(
        EventKind::Action,
        action.action_type.as_str(),
        action.title.clone(),
    )
    .detail(action.reason.clone())
    .status(EventStatus::Queued)
    .iteration(iteration)
    .action_id(action.id.clone())
    .input(json!(action.input))
    .data("depends_on", json!(action.depends_on))
    .data("can_parallel", action.can_parallel)
}

fn decision_text(batch: &ActionBatch, default: &str) -> String {
    batch
        .decision
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Answer whose file fields point at the last change.
fn result_with_changes(content: String, changes: Vec<FileChange>) -> RunResult {
    let last = changes.last();
    RunResult {
        content,
        file_path: last.map(|change| change.path.clone()),
        file_content: last.map(|change| change.after_content.clone()),
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ActionType;
    use crate::test_support::{Harness, ScriptedReply, action, batch, request};
    use serde_json::json;

    #[test]
    fn create_run_records_intent_event() {
        let harness = Harness::new();
        let run = harness
            .orchestrator
            .create_run(request("fix the login bug"))
            .expect("create");
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.events.len(), 1);
        assert_eq!(run.events[0].detail, "intent=code_edit");
    }

    #[test]
    fn done_without_actions_completes_with_reason() {
        let harness = Harness::new();
        let mut plan = batch(DecisionMode::Done, Vec::new());
        plan.decision.reason = Some("nothing to change".to_string());
        harness.model().push(ScriptedReply::batch(&plan));
        let run = harness
            .orchestrator
            .start(request("is this fine?"))
            .expect("start");
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.result_content.as_deref(), Some("nothing to change"));
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn needs_user_trigger_waits_before_executing() {
        let harness = Harness::new();
        let mut plan = batch(
            DecisionMode::Continue,
            vec![action("a1", ActionType::SummarizeContext, json!({}))],
        );
        plan.decision.needs_user_trigger = true;
        harness.model().push(ScriptedReply::batch(&plan));
        let run = harness.orchestrator.start(request("summarize")).expect("start");
        assert_eq!(run.status, RunStatus::WaitingUser);
        assert_eq!(run.pending_action_ids, vec!["a1".to_string()]);
        assert!(run.action_history.is_empty());
        let queued = run
            .events
            .iter()
            .filter(|e| e.status == EventStatus::Queued)
            .count();
        assert_eq!(queued, 1);
    }

    #[test]
    fn failed_action_stops_batch_and_waits_for_user() {
        let harness = Harness::new();
        let plan = batch(
            DecisionMode::Continue,
            vec![
                action("a1", ActionType::UpdateFile, json!({"path": "a.py", "content": "x=1"})),
                action("a2", ActionType::DeleteFile, json!({"path": "missing.py"})),
                action("a3", ActionType::SummarizeContext, json!({})),
            ],
        );
        harness.model().push(ScriptedReply::batch(&plan));
        let run = harness.orchestrator.start(request("edit")).expect("start");
        let run = harness
            .orchestrator
            .continue_run(&run.run_id, None)
            .expect("continue");

        assert_eq!(run.status, RunStatus::WaitingUser);
        assert_eq!(run.action_history.len(), 2);
        assert_eq!(run.action_history[1].status, RecordStatus::Failed);
        assert_eq!(run.pending_action_ids, vec!["a3".to_string()]);
        assert_eq!(run.result_file_path.as_deref(), Some("a.py"));
        assert_eq!(run.result_changes.len(), 1);
    }

    #[test]
    fn cancel_idle_run_finishes_immediately_and_resume_is_noop() {
        let harness = Harness::new();
        let run = harness.orchestrator.create_run(request("hi")).expect("create");
        let run = harness.orchestrator.cancel_run(&run.run_id).expect("cancel");
        assert_eq!(run.status, RunStatus::Cancelled);
        let resumed = harness.orchestrator.resume_run(&run.run_id).expect("resume");
        assert_eq!(resumed.status, RunStatus::Cancelled);
        let continued = harness
            .orchestrator
            .continue_run(&run.run_id, Some("again"))
            .expect("continue");
        assert!(continued.followups.is_empty());
    }

    #[test]
    fn cancel_during_planning_drops_the_new_batch() {
        let harness = Harness::new();
        let run = harness.orchestrator.create_run(request("go")).expect("create");
        let store = harness.store().clone();
        let run_id = run.run_id.clone();
        let plan = batch(
            DecisionMode::Continue,
            vec![action("a1", ActionType::SummarizeContext, json!({}))],
        );
        harness.model().push(ScriptedReply::batch(&plan).then(move || {
            // Same effect as `cancel_run` on a run with no active action.
            store.request_cancel(&run_id).expect("request cancel");
            store.clear_pending_actions(&run_id).expect("clear");
            store
                .mark_run_finished(&run_id, RunStatus::Cancelled)
                .expect("finish");
        }));

        let run = harness
            .orchestrator
            .continue_run(&run.run_id, None)
            .expect("plan");
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.latest_batch.is_none());
        assert!(run.pending_action_ids.is_empty());
        assert_eq!(run.iteration, 0);
    }

    #[test]
    fn cancel_flag_set_during_planning_cancels_run() {
        let harness = Harness::new();
        let run = harness.orchestrator.create_run(request("go")).expect("create");
        let store = harness.store().clone();
        let run_id = run.run_id.clone();
        harness.model().push(
            ScriptedReply::batch(&batch(
                DecisionMode::Continue,
                vec![action("a1", ActionType::SummarizeContext, json!({}))],
            ))
            .then(move || {
                store.request_cancel(&run_id).expect("request cancel");
            }),
        );

        let run = harness
            .orchestrator
            .continue_run(&run.run_id, None)
            .expect("plan");
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.latest_batch.is_none());
        assert!(run.pending_action_ids.is_empty());
    }

    #[test]
    fn cancel_during_last_action_of_done_batch_wins() {
        let harness = Harness::new();
        let run = harness.orchestrator.create_run(request("check it")).expect("create");
        harness.model().push(ScriptedReply::batch(&batch(
            DecisionMode::Done,
            vec![action("a1", ActionType::ValidateResult, json!({}))],
        )));
        let store = harness.store().clone();
        let run_id = run.run_id.clone();
        harness.model().push(
            ScriptedReply::text(r#"{"satisfied": true, "reason": "fine"}"#).then(move || {
                store.request_cancel(&run_id).expect("request cancel");
            }),
        );

        harness
            .orchestrator
            .continue_run(&run.run_id, None)
            .expect("plan");
        let run = harness
            .orchestrator
            .continue_run(&run.run_id, None)
            .expect("execute");
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.action_history.len(), 1);
        assert!(run.result_content.is_none());
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn pause_then_resume_round_trips() {
        let harness = Harness::new();
        let mut plan = batch(
            DecisionMode::Continue,
            vec![action("a1", ActionType::SummarizeContext, json!({}))],
        );
        plan.decision.needs_user_trigger = true;
        harness.model().push(ScriptedReply::batch(&plan));
        let run = harness.orchestrator.start(request("go")).expect("start");

        let paused = harness.orchestrator.pause_run(&run.run_id).expect("pause");
        assert_eq!(paused.status, RunStatus::Paused);
        let still = harness
            .orchestrator
            .continue_run(&run.run_id, None)
            .expect("continue");
        assert_eq!(still.status, RunStatus::Paused);
        assert!(still.action_history.is_empty());

        let resumed = harness.orchestrator.resume_run(&run.run_id).expect("resume");
        assert_eq!(resumed.status, RunStatus::Running);
        assert!(!resumed.pause_requested);
    }

    #[test]
    fn followups_reach_the_planner() {
        let harness = Harness::new();
        let mut ask = batch(
            DecisionMode::AskUser,
            vec![action("a1", ActionType::AskUser, json!({"question": "which file?"}))],
        );
        ask.decision.needs_user_trigger = false;
        harness.model().push(ScriptedReply::batch(&ask));
        let run = harness.orchestrator.start(request("rename it")).expect("start");
        let run = harness
            .orchestrator
            .continue_run(&run.run_id, None)
            .expect("execute ask");
        assert_eq!(run.status, RunStatus::WaitingUser);
        assert!(run.pending_action_ids.is_empty());

        harness
            .model()
            .push(ScriptedReply::batch(&batch(DecisionMode::Done, Vec::new())));
        let run = harness
            .orchestrator
            .continue_run(&run.run_id, Some("src/lib.rs"))
            .expect("continue");
        assert_eq!(run.followups, vec![ChatMessage::user("src/lib.rs")]);
        assert_eq!(run.status, RunStatus::Completed);
        let calls = harness.model().calls();
        let planner_input = &calls.last().expect("planner call")[1].content;
        assert!(planner_input.contains("\"original_user_query\":\"src/lib.rs\""));
    }
}
