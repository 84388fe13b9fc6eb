//! Shared wire types for planning and execution.
//!
//! These types define the stable JSON contracts between the planner, the
//! action executor, the run store, and callers. Field names and enum spellings
//! are part of the persisted record layout; renaming them breaks stored runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of work an action performs. Wire names are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ScanWorkspace,
    ReadFiles,
    SearchCode,
    ExtractSymbols,
    AnalyzeDependencies,
    SummarizeContext,
    ProposeSubplan,
    RunCommand,
    RunTests,
    RunLint,
    RunBuild,
    CreateFile,
    UpdateFile,
    DeleteFile,
    MoveFile,
    ApplyPatch,
    ValidateResult,
    AskUser,
    RequestApproval,
    FinalAnswer,
    ReportBlocker,
    /// Any type name the planner invents. Rejected at dispatch.
    #[serde(other)]
    Unsupported,
}

impl ActionType {
    /// Every supported action type, in wire order.
    pub const ALL: [ActionType; 21] = [
        ActionType::ScanWorkspace,
        ActionType::ReadFiles,
        ActionType::SearchCode,
        ActionType::ExtractSymbols,
        ActionType::AnalyzeDependencies,
        ActionType::SummarizeContext,
        ActionType::ProposeSubplan,
        ActionType::RunCommand,
        ActionType::RunTests,
        ActionType::RunLint,
        ActionType::RunBuild,
        ActionType::CreateFile,
        ActionType::UpdateFile,
        ActionType::DeleteFile,
        ActionType::MoveFile,
        ActionType::ApplyPatch,
        ActionType::ValidateResult,
        ActionType::AskUser,
        ActionType::RequestApproval,
        ActionType::FinalAnswer,
        ActionType::ReportBlocker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::ScanWorkspace => "scan_workspace",
            ActionType::ReadFiles => "read_files",
            ActionType::SearchCode => "search_code",
            ActionType::ExtractSymbols => "extract_symbols",
            ActionType::AnalyzeDependencies => "analyze_dependencies",
            ActionType::SummarizeContext => "summarize_context",
            ActionType::ProposeSubplan => "propose_subplan",
            ActionType::RunCommand => "run_command",
            ActionType::RunTests => "run_tests",
            ActionType::RunLint => "run_lint",
            ActionType::RunBuild => "run_build",
            ActionType::CreateFile => "create_file",
            ActionType::UpdateFile => "update_file",
            ActionType::DeleteFile => "delete_file",
            ActionType::MoveFile => "move_file",
            ActionType::ApplyPatch => "apply_patch",
            ActionType::ValidateResult => "validate_result",
            ActionType::AskUser => "ask_user",
            ActionType::RequestApproval => "request_approval",
            ActionType::FinalAnswer => "final_answer",
            ActionType::ReportBlocker => "report_blocker",
            ActionType::Unsupported => "unsupported",
        }
    }

    /// Read-only inspection that must run after a workspace scan.
    pub fn is_discovery(self) -> bool {
        matches!(
            self,
            ActionType::SearchCode
                | ActionType::ReadFiles
                | ActionType::ExtractSymbols
                | ActionType::AnalyzeDependencies
        )
    }

    pub fn is_command(self) -> bool {
        matches!(
            self,
            ActionType::RunCommand | ActionType::RunTests | ActionType::RunLint | ActionType::RunBuild
        )
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            ActionType::CreateFile | ActionType::UpdateFile | ActionType::ApplyPatch
        )
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator should do when an action fails.
///
/// Declared by the planner and persisted, but the orchestrator always stops
/// the batch and waits for the user regardless of the strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    Retry,
    #[default]
    Replan,
    AskUser,
    Abort,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailurePolicy {
    #[serde(default)]
    pub strategy: FailureStrategy,
    #[serde(default)]
    pub fallback_actions: Vec<ActionSpec>,
}

/// One unit of planned work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub response: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub can_parallel: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<FailurePolicy>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

fn default_priority() -> i32 {
    3
}

fn default_timeout_sec() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    1
}

impl ActionSpec {
    /// Build an action with default scheduling fields.
    pub fn new(id: impl Into<String>, action_type: ActionType, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_type,
            title: title.into(),
            reason: String::new(),
            input: Map::new(),
            response: Map::new(),
            depends_on: Vec::new(),
            can_parallel: false,
            priority: default_priority(),
            timeout_sec: default_timeout_sec(),
            max_retries: default_max_retries(),
            success_criteria: Vec::new(),
            on_failure: None,
            artifacts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    Continue,
    AskUser,
    Done,
    Blocked,
}

/// Planner verdict on how the run should proceed after this batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDecision {
    pub mode: DecisionMode,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "default_needs_user_trigger")]
    pub needs_user_trigger: bool,
    #[serde(default)]
    pub satisfaction_score: Option<f64>,
}

fn default_needs_user_trigger() -> bool {
    true
}

/// Planner output for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionBatch {
    #[serde(default = "default_batch_version")]
    pub version: String,
    #[serde(default)]
    pub iteration: u32,
    pub summary: String,
    pub decision: BatchDecision,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub next_questions: Vec<String>,
}

fn default_batch_version() -> String {
    "1.0".to_string()
}

impl ActionBatch {
    pub fn action(&self, id: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|action| action.id == id)
    }
}

/// Terminal status of one executed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Completed,
    Failed,
    Blocked,
    WaitingUser,
    Skipped,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
            RecordStatus::Blocked => "blocked",
            RecordStatus::WaitingUser => "waiting_user",
            RecordStatus::Skipped => "skipped",
        }
    }
}

/// Immutable result of executing one [`ActionSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecutionRecord {
    pub iteration: u32,
    pub action_id: String,
    pub action_type: ActionType,
    pub status: RecordStatus,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: String,
    pub ended_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteResult {
    Written,
    Failed,
}

/// Auditable outcome of one file mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub before_content: String,
    pub after_content: String,
    pub diff_unified: String,
    pub before_hash: String,
    pub after_hash: String,
    pub write_result: WriteResult,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A pasted code region the user attached to the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Planning,
    Action,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Info,
    Queued,
    Running,
    WaitingUser,
    Paused,
    Completed,
    Failed,
    Blocked,
    Skipped,
    Cancelled,
}

impl From<RecordStatus> for EventStatus {
    fn from(status: RecordStatus) -> Self {
        match status {
            RecordStatus::Completed => EventStatus::Completed,
            RecordStatus::Failed => EventStatus::Failed,
            RecordStatus::Blocked => EventStatus::Blocked,
            RecordStatus::WaitingUser => EventStatus::WaitingUser,
            RecordStatus::Skipped => EventStatus::Skipped,
        }
    }
}

/// Timeline entry for observability. Never consulted for control decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event_id: String,
    pub kind: EventKind,
    pub stage: String,
    pub title: String,
    #[serde(default)]
    pub detail: String,
    pub status: EventStatus,
    pub timestamp: String,
    #[serde(default)]
    pub iteration: Option<u32>,
    #[serde(default)]
    pub action_id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionEvent {
    pub fn new(kind: EventKind, stage: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            kind,
            stage: stage.into(),
            title: title.into(),
            detail: String::new(),
            status: EventStatus::Info,
            timestamp: now_timestamp(),
            iteration: None,
            action_id: None,
            data: Map::new(),
            input: None,
            output: None,
            metrics: None,
            artifacts: Vec::new(),
            error: None,
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn action_id(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    pub fn data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn metrics(mut self, metrics: Value) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}

/// RFC 3339 UTC timestamp used for every persisted time field.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
