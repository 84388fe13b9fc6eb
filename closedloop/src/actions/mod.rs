//! Action executor.
//!
//! [`ActionExecutor::execute`] turns one [`ActionSpec`] into an
//! [`ActionOutcome`]. It never returns an error: anything that goes wrong
//! while dispatching becomes a `failed` record carrying the message.

mod command;
mod discovery;
pub mod input;
mod mutation;

use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::actions::command::CommandLimits;
use crate::actions::input::Action;
use crate::agents::validator::ResultValidator;
use crate::core::normalize::INJECTED_SCAN_LIMIT;
use crate::core::run::RequestSnapshot;
use crate::core::types::{
    ActionExecutionRecord, ActionSpec, ActionType, FileChange, RecordStatus, now_timestamp,
};
use crate::io::config::ActionsConfig;
use crate::io::llm::LanguageModel;
use crate::io::workspace::Workspace;

pub use mutation::{content_hash, unified_diff};

/// Number of failed action ids listed by `validate_result`.
const FAILED_ACTIONS_LISTED: usize = 10;

/// Planner-requested `limit`, defaulted and capped.
fn bounded(requested: Option<usize>, default: usize, cap: usize) -> usize {
    requested.map_or(default, |limit| limit.min(cap))
}

/// Scans may go up to the configured limit or the injected prerequisite scan's, whichever is larger.
fn scan_cap(cfg: &ActionsConfig) -> usize {
    cfg.scan_limit
        .max(usize::try_from(INJECTED_SCAN_LIMIT).unwrap_or(usize::MAX))
}

/// Result of executing one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub record: ActionExecutionRecord,
    pub file_changes: Vec<FileChange>,
    /// Text to surface to the user (questions, blockers, answers, failures).
    pub assistant_message: Option<String>,
    pub final_answer: Option<String>,
    /// The batch must stop after this action.
    pub blocked: bool,
}

/// What one dispatch produced before it is wrapped into a record.
#[derive(Debug, Default)]
struct Dispatched {
    output: Value,
    file_changes: Vec<FileChange>,
    assistant_message: Option<String>,
    final_answer: Option<String>,
    blocked: bool,
    /// Non-exceptional failure; the output is still recorded.
    failure: Option<String>,
}

impl Dispatched {
    fn output(output: Value) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    fn halt(output: Value, message: String) -> Self {
        Self {
            output,
            assistant_message: Some(message),
            blocked: true,
            ..Self::default()
        }
    }
}

pub struct ActionExecutor<'a, M: LanguageModel, W: Workspace> {
    model: &'a M,
    workspace: &'a W,
    config: &'a ActionsConfig,
}

impl<'a, M: LanguageModel, W: Workspace> ActionExecutor<'a, M, W> {
    pub fn new(model: &'a M, workspace: &'a W, config: &'a ActionsConfig) -> Self {
        Self {
            model,
            workspace,
            config,
        }
    }

    /// Execute `action` for `iteration`. `history` is the run's prior records.
    #[instrument(skip_all, fields(action_id = %action.id, action_type = %action.action_type, iteration = iteration))]
    pub fn execute(
        &self,
        request: &RequestSnapshot,
        action: &ActionSpec,
        iteration: u32,
        history: &[ActionExecutionRecord],
    ) -> ActionOutcome {
        let started_at = now_timestamp();
        let dispatched = Action::from_spec(action)
            .map_err(anyhow::Error::from)
            .and_then(|typed| self.dispatch(request, action, &typed, history));

        let record = |status, output, error| ActionExecutionRecord {
            iteration,
            action_id: action.id.clone(),
            action_type: action.action_type,
            status,
            title: action.title.clone(),
            reason: action.reason.clone(),
            input: action.input.clone(),
            output,
            artifacts: action.artifacts.clone(),
            error,
            started_at: started_at.clone(),
            ended_at: now_timestamp(),
        };

        match dispatched {
            Ok(done) => {
                let status = match (&done.failure, done.blocked) {
                    (Some(_), _) => RecordStatus::Failed,
                    (None, true)
                        if matches!(
                            action.action_type,
                            ActionType::AskUser | ActionType::RequestApproval
                        ) =>
                    {
                        RecordStatus::WaitingUser
                    }
                    (None, true) => RecordStatus::Blocked,
                    (None, false) => RecordStatus::Completed,
                };
                debug!(status = status.as_str(), "action finished");
                let assistant_message = match &done.failure {
                    Some(failure) => Some(failure_message(action, failure)),
                    None => done.assistant_message,
                };
                ActionOutcome {
                    record: record(status, done.output, done.failure),
                    file_changes: done.file_changes,
                    assistant_message,
                    final_answer: done.final_answer,
                    blocked: done.blocked,
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(err = %message, "action failed");
                ActionOutcome {
                    record: record(RecordStatus::Failed, json!({}), Some(message.clone())),
                    file_changes: Vec::new(),
                    assistant_message: Some(failure_message(action, &message)),
                    final_answer: None,
                    blocked: false,
                }
            }
        }
    }

    fn dispatch(
        &self,
        request: &RequestSnapshot,
        spec: &ActionSpec,
        action: &Action,
        history: &[ActionExecutionRecord],
    ) -> Result<Dispatched> {
        let cfg = self.config;
        let ws = self.workspace;
        let dispatched = match action {
            Action::ScanWorkspace { limit } => Dispatched::output(discovery::scan_workspace(
                ws,
                bounded(*limit, cfg.scan_limit, scan_cap(cfg)),
            )?),
            Action::ReadFiles { paths, max_chars } => Dispatched::output(discovery::read_files(
                ws,
                paths,
                cfg.read_max_files,
                max_chars.unwrap_or(cfg.read_max_chars),
            )),
            Action::SearchCode {
                query,
                paths,
                limit,
            } => Dispatched::output(discovery::search_code(
                ws,
                query,
                paths,
                bounded(*limit, cfg.search_limit, cfg.search_limit),
                cfg.search_line_chars,
            )?),
            Action::ExtractSymbols { paths } => Dispatched::output(discovery::extract_symbols(
                ws,
                paths,
                cfg.symbol_max_files,
            )),
            Action::AnalyzeDependencies { path } => Dispatched::output(
                discovery::analyze_dependencies(ws, path.as_deref(), cfg.dependency_limit),
            ),
            Action::SummarizeContext => {
                Dispatched::output(discovery::summarize_context(history, cfg.summarize_window))
            }
            Action::ProposeSubplan { steps } => {
                Dispatched::output(discovery::propose_subplan(steps))
            }
            Action::Command { command } => {
                let timeout_secs = if spec.timeout_sec == 0 {
                    cfg.default_timeout_secs
                } else {
                    spec.timeout_sec
                };
                let run = command::run_command(
                    ws,
                    command,
                    CommandLimits {
                        timeout: Duration::from_secs(timeout_secs),
                        stdout_chars: cfg.stdout_limit_chars,
                        stderr_chars: cfg.stderr_limit_chars,
                    },
                )?;
                Dispatched {
                    output: run.output,
                    failure: run.failure,
                    ..Dispatched::default()
                }
            }
            Action::Write {
                path,
                source,
                range,
            } => {
                let mutation = mutation::write_file(
                    self.model,
                    ws,
                    &request.provider,
                    path,
                    source,
                    *range,
                )?;
                Dispatched {
                    output: mutation.output,
                    file_changes: vec![mutation.change],
                    failure: mutation.failure,
                    ..Dispatched::default()
                }
            }
            Action::Delete { path } => Dispatched::output(mutation::delete_file(ws, path)?),
            Action::Move { from, to } => Dispatched::output(mutation::move_file(ws, from, to)?),
            Action::ValidateResult => Dispatched::output(self.validate_result(request, history)?),
            Action::AskUser { question } => {
                Dispatched::halt(json!({ "question": question }), question.clone())
            }
            Action::RequestApproval { prompt } => {
                Dispatched::halt(json!({ "approval_prompt": prompt }), prompt.clone())
            }
            Action::ReportBlocker { reason } => {
                Dispatched::halt(json!({ "reason": reason }), reason.clone())
            }
            Action::FinalAnswer { content } => Dispatched {
                output: json!({ "content": content }),
                assistant_message: Some(content.clone()),
                final_answer: Some(content.clone()),
                ..Dispatched::default()
            },
        };
        Ok(dispatched)
    }

    fn validate_result(
        &self,
        request: &RequestSnapshot,
        history: &[ActionExecutionRecord],
    ) -> Result<Value> {
        let failures: Vec<&ActionExecutionRecord> = history
            .iter()
            .filter(|record| matches!(record.status, RecordStatus::Failed | RecordStatus::Blocked))
            .collect();
        if !failures.is_empty() {
            let skip = failures.len().saturating_sub(FAILED_ACTIONS_LISTED);
            let listed: Vec<String> = failures[skip..]
                .iter()
                .map(|record| format!("{}:{}", record.action_id, record.action_type))
                .collect();
            return Ok(json!({
                "satisfied": false,
                "reason": "has_failed_actions",
                "failed_actions": listed,
            }));
        }

        let skip = history.len().saturating_sub(self.config.validation_window);
        let (verdict, llm) = ResultValidator::new(self.model).judge(
            &request.provider,
            request.latest_user_message(),
            &history[skip..],
        )?;
        Ok(json!({
            "satisfied": verdict.satisfied,
            "reason": verdict.reason,
            "_llm": llm,
        }))
    }
}

fn failure_message(action: &ActionSpec, error: &str) -> String {
    format!("action failed: {} ({error})", display_title(action))
}

fn display_title(action: &ActionSpec) -> &str {
    if action.title.trim().is_empty() {
        action.action_type.as_str()
    } else {
        action.title.as_str()
    }
}

/// One-line summary of an executed action for the run timeline.
pub fn action_result_detail(record: &ActionExecutionRecord) -> String {
    let output = &record.output;
    if let Some(error) = &record.error
        && record.status == RecordStatus::Failed
    {
        return format!("{} failed: {error}", record.action_type);
    }
    match record.action_type {
        ActionType::ScanWorkspace => format!(
            "scanned {} files in {} directories",
            output["file_count"].as_u64().unwrap_or(0),
            output["dir_count"].as_u64().unwrap_or(0)
        ),
        ActionType::ReadFiles => {
            let files = output["files"].as_array().map(Vec::as_slice).unwrap_or_default();
            let failed = files.iter().filter(|f| f.get("error").is_some()).count();
            format!("read {} files ({failed} unreadable)", files.len())
        }
        ActionType::SearchCode => match output["reason"].as_str() {
            Some(reason) => format!("search skipped: {reason}"),
            None => discovery::describe_search(output),
        },
        ActionType::ExtractSymbols => format!(
            "extracted {} symbols",
            output["symbols"].as_array().map_or(0, Vec::len)
        ),
        ActionType::AnalyzeDependencies => match output["reason"].as_str() {
            Some(reason) => format!("dependency analysis skipped: {reason}"),
            None => format!(
                "{} dependencies in {}",
                output["dependency_count"].as_u64().unwrap_or(0),
                output["path"].as_str().unwrap_or_default()
            ),
        },
        ActionType::SummarizeContext => format!(
            "summarized {} prior actions",
            output["history_count"].as_u64().unwrap_or(0)
        ),
        ActionType::ProposeSubplan => format!(
            "proposed {} steps",
            output["step_count"].as_u64().unwrap_or(0)
        ),
        ActionType::RunCommand | ActionType::RunTests | ActionType::RunLint | ActionType::RunBuild => {
            format!(
                "`{}` exited with {}",
                output["command"].as_str().unwrap_or_default(),
                output["exit_code"]
            )
        }
        ActionType::CreateFile | ActionType::UpdateFile | ActionType::ApplyPatch => format!(
            "wrote {} ({} -> {} chars)",
            output["path"].as_str().unwrap_or_default(),
            output["before_len"].as_u64().unwrap_or(0),
            output["after_len"].as_u64().unwrap_or(0)
        ),
        ActionType::DeleteFile => {
            format!("deleted {}", output["path"].as_str().unwrap_or_default())
        }
        ActionType::MoveFile => format!(
            "moved {} to {}",
            output["old_path"].as_str().unwrap_or_default(),
            output["new_path"].as_str().unwrap_or_default()
        ),
        ActionType::ValidateResult => format!(
            "satisfied={}: {}",
            output["satisfied"].as_bool().unwrap_or(false),
            output["reason"].as_str().unwrap_or_default()
        ),
        ActionType::AskUser => output["question"].as_str().unwrap_or_default().to_string(),
        ActionType::RequestApproval => {
            output["approval_prompt"].as_str().unwrap_or_default().to_string()
        }
        ActionType::FinalAnswer => "final answer ready".to_string(),
        ActionType::ReportBlocker => output["reason"].as_str().unwrap_or_default().to_string(),
        ActionType::Unsupported => record.status.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WriteResult;
    use crate::io::workspace::LocalWorkspace;
    use crate::test_support::{ScriptedModel, ScriptedReply, action, record};

    struct Fixture {
        _temp: tempfile::TempDir,
        workspace: LocalWorkspace,
        model: ScriptedModel,
        config: ActionsConfig,
    }

    fn fixture(replies: Vec<ScriptedReply>) -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = LocalWorkspace::new(temp.path());
        Fixture {
            _temp: temp,
            workspace,
            model: ScriptedModel::new(replies),
            config: ActionsConfig::default(),
        }
    }

    impl Fixture {
        fn run(&self, spec: &ActionSpec, history: &[ActionExecutionRecord]) -> ActionOutcome {
            let request = RequestSnapshot {
                provider: "local".to_string(),
                messages: vec![crate::core::types::ChatMessage::user("make it work")],
                ..RequestSnapshot::default()
            };
            ActionExecutor::new(&self.model, &self.workspace, &self.config)
                .execute(&request, spec, 1, history)
        }
    }

    #[test]
    fn planner_limits_are_capped_by_config() {
        let mut fx = fixture(Vec::new());
        fx.config.search_limit = 2;
        fx.config.scan_limit = 1;
        for idx in 0..5 {
            std::fs::write(
                fx.workspace.root().join(format!("f{idx}.txt")),
                "needle\nneedle\n",
            )
            .expect("write");
        }

        let search = fx.run(
            &action(
                "a1",
                ActionType::SearchCode,
                json!({"query": "needle", "limit": 100_000}),
            ),
            &[],
        );
        assert_eq!(search.record.status, RecordStatus::Completed);
        assert_eq!(search.record.output["matches"].as_array().map(Vec::len), Some(2));

        let scan = fx.run(
            &action("a2", ActionType::ScanWorkspace, json!({"limit": 100_000})),
            &[],
        );
        assert_eq!(scan.record.output["files"].as_array().map(Vec::len), Some(5));
        assert_eq!(bounded(Some(100_000), 1, scan_cap(&fx.config)), 300);
        assert_eq!(bounded(None, 7, 50), 7);
        assert_eq!(bounded(Some(3), 7, 50), 3);
    }

    #[test]
    fn ask_user_and_approval_wait_for_user_while_blocker_blocks() {
        let fx = fixture(Vec::new());
        let outcome = fx.run(
            &action("a1", ActionType::AskUser, json!({"question": "which file?"})),
            &[],
        );
        assert_eq!(outcome.record.status, RecordStatus::WaitingUser);
        assert!(outcome.blocked);
        assert_eq!(outcome.assistant_message.as_deref(), Some("which file?"));

        let outcome = fx.run(&action("a2", ActionType::RequestApproval, json!({})), &[]);
        assert_eq!(outcome.record.status, RecordStatus::WaitingUser);

        let outcome = fx.run(
            &action("a3", ActionType::ReportBlocker, json!({"reason": "no network"})),
            &[],
        );
        assert_eq!(outcome.record.status, RecordStatus::Blocked);
        assert_eq!(outcome.record.output, json!({"reason": "no network"}));
    }

    #[test]
    fn final_answer_carries_content() {
        let fx = fixture(Vec::new());
        let mut spec = action("a1", ActionType::FinalAnswer, json!({}));
        spec.response.insert("content".to_string(), json!("42"));
        let outcome = fx.run(&spec, &[]);
        assert_eq!(outcome.record.status, RecordStatus::Completed);
        assert_eq!(outcome.final_answer.as_deref(), Some("42"));
        assert!(!outcome.blocked);
    }

    #[test]
    fn contract_violations_become_failed_records() {
        let fx = fixture(Vec::new());
        let mut spec = action("a1", ActionType::DeleteFile, json!({}));
        spec.title = "remove it".to_string();
        let outcome = fx.run(&spec, &[]);
        assert_eq!(outcome.record.status, RecordStatus::Failed);
        assert_eq!(
            outcome.record.error.as_deref(),
            Some("delete_file: delete action missing path")
        );
        assert_eq!(outcome.record.output, json!({}));
        assert_eq!(
            outcome.assistant_message.as_deref(),
            Some("action failed: remove it (delete_file: delete action missing path)")
        );

        let outcome = fx.run(&action("a2", ActionType::Unsupported, json!({})), &[]);
        assert_eq!(outcome.record.status, RecordStatus::Failed);
        assert!(
            outcome
                .record
                .error
                .as_deref()
                .is_some_and(|e| e.contains("unsupported action type"))
        );
    }

    #[test]
    fn update_file_records_file_change() {
        let fx = fixture(Vec::new());
        let outcome = fx.run(
            &action("a1", ActionType::UpdateFile, json!({"path": "a.py", "content": "x=1"})),
            &[],
        );
        assert_eq!(outcome.record.status, RecordStatus::Completed);
        assert_eq!(outcome.file_changes.len(), 1);
        assert_eq!(outcome.file_changes[0].write_result, WriteResult::Written);
        assert_eq!(action_result_detail(&outcome.record), "wrote a.py (0 -> 3 chars)");
    }

    #[test]
    fn escaping_path_fails_the_action() {
        let fx = fixture(Vec::new());
        let outcome = fx.run(
            &action("a1", ActionType::CreateFile, json!({"path": "../evil", "content": "x"})),
            &[],
        );
        assert_eq!(outcome.record.status, RecordStatus::Failed);
        assert!(outcome.file_changes.is_empty());
    }

    #[test]
    fn validate_result_short_circuits_on_failures() {
        let fx = fixture(Vec::new());
        let history = vec![
            record("a1", ActionType::ReadFiles, RecordStatus::Completed),
            record("a2", ActionType::RunTests, RecordStatus::Failed),
        ];
        let outcome = fx.run(&action("a3", ActionType::ValidateResult, json!({})), &history);
        assert_eq!(outcome.record.status, RecordStatus::Completed);
        assert_eq!(
            outcome.record.output,
            json!({
                "satisfied": false,
                "reason": "has_failed_actions",
                "failed_actions": ["a2:run_tests"],
            })
        );
        assert!(fx.model.calls().is_empty());
    }

    #[test]
    fn validate_result_asks_model_over_window() {
        let fx = fixture(vec![ScriptedReply::text("Looks good to me.")]);
        let history = vec![record("a1", ActionType::UpdateFile, RecordStatus::Completed)];
        let outcome = fx.run(&action("a2", ActionType::ValidateResult, json!({})), &history);
        assert_eq!(outcome.record.output["satisfied"], json!(true));
        assert_eq!(outcome.record.output["reason"], json!("Looks good to me."));
        assert_eq!(outcome.record.output["_llm"]["provider"], json!("local"));
        assert!(fx.model.calls()[0][1].content.contains("make it work"));
    }

    #[test]
    fn model_errors_fail_validation_action() {
        let fx = fixture(vec![ScriptedReply::error("provider down")]);
        let outcome = fx.run(&action("a1", ActionType::ValidateResult, json!({})), &[]);
        assert_eq!(outcome.record.status, RecordStatus::Failed);
        assert!(
            outcome
                .record
                .error
                .as_deref()
                .is_some_and(|e| e.contains("provider down"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_keeps_output() {
        let fx = fixture(Vec::new());
        let outcome = fx.run(
            &action("a1", ActionType::RunTests, json!({"command": "exit 4"})),
            &[],
        );
        assert_eq!(outcome.record.status, RecordStatus::Failed);
        assert_eq!(outcome.record.output["exit_code"], json!(4));
        assert_eq!(outcome.record.error.as_deref(), Some("command exited with code 4"));
        assert_eq!(action_result_detail(&outcome.record), "run_tests failed: command exited with code 4");
    }

    #[test]
    fn detail_lines_summarize_outputs() {
        let mut scan = record("a1", ActionType::ScanWorkspace, RecordStatus::Completed);
        scan.output = json!({"file_count": 3, "dir_count": 1});
        assert_eq!(action_result_detail(&scan), "scanned 3 files in 1 directories");

        let mut search = record("a2", ActionType::SearchCode, RecordStatus::Completed);
        search.output = json!({"query": "foo", "matches": [
            {"path": "a.rs", "line": 1, "text": "foo"},
            {"path": "a.rs", "line": 4, "text": "foo"},
            {"path": "b.rs", "line": 2, "text": "foo"},
        ]});
        assert_eq!(
            action_result_detail(&search),
            "search `foo`: 3 matches in 2 files"
        );
    }
}
