//! Run record: the persisted unit of work for one user intent.

use serde::{Deserialize, Serialize};

use crate::core::types::{
    ActionBatch, ActionExecutionRecord, ChatMessage, CodeSnippet, ExecutionEvent, FileChange,
    RecordStatus, Role,
};

/// Run lifecycle status.
///
/// `completed`, `failed`, `blocked` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    WaitingUser,
    Paused,
    Completed,
    Failed,
    Blocked,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::WaitingUser => "waiting_user",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Blocked => "blocked",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Blocked | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Initial label for a run, inferred from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunIntent {
    CodeEdit,
    Qa,
}

impl RunIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            RunIntent::CodeEdit => "code_edit",
            RunIntent::Qa => "qa",
        }
    }
}

/// Immutable copy of the request that created a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSnapshot {
    pub provider: String,
    pub messages: Vec<ChatMessage>,
    pub current_file: Option<String>,
    pub current_code: Option<String>,
    pub file_path: Option<String>,
    pub range_start: Option<u32>,
    pub range_end: Option<u32>,
    pub snippets: Vec<CodeSnippet>,
    pub chat_only: bool,
    pub planning_mode: bool,
    pub force_code_edit: bool,
}

impl RequestSnapshot {
    /// Text of the most recent user message, or empty.
    pub fn latest_user_message(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or("")
    }

    /// Target file for the request: `current_file` wins over `file_path`.
    pub fn target_file(&self) -> Option<&str> {
        self.current_file
            .as_deref()
            .or(self.file_path.as_deref())
            .map(str::trim)
            .filter(|path| !path.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub intent: RunIntent,
    pub status: RunStatus,
    pub iteration: u32,
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
    pub request_snapshot: RequestSnapshot,
    /// User messages supplied on `continue`, in arrival order.
    #[serde(default)]
    pub followups: Vec<ChatMessage>,
    #[serde(default)]
    pub latest_batch: Option<ActionBatch>,
    #[serde(default)]
    pub pending_action_ids: Vec<String>,
    #[serde(default)]
    pub action_history: Vec<ActionExecutionRecord>,
    #[serde(default)]
    pub events: Vec<ExecutionEvent>,
    #[serde(default)]
    pub pause_requested: bool,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub active_action_id: Option<String>,
    #[serde(default)]
    pub result_content: Option<String>,
    #[serde(default)]
    pub result_file_path: Option<String>,
    #[serde(default)]
    pub result_file_content: Option<String>,
    #[serde(default)]
    pub result_changes: Vec<FileChange>,
}

impl Run {
    /// Full conversation as the planner sees it: snapshot messages then follow-ups.
    pub fn conversation(&self) -> Vec<ChatMessage> {
        self.request_snapshot
            .messages
            .iter()
            .chain(&self.followups)
            .cloned()
            .collect()
    }

    /// Latest user text across the snapshot and follow-ups.
    pub fn latest_user_query(&self) -> String {
        self.followups
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.clone())
            .unwrap_or_else(|| self.request_snapshot.latest_user_message().to_string())
    }

    pub fn has_failures(&self) -> bool {
        self.action_history.iter().any(|record| {
            matches!(record.status, RecordStatus::Failed | RecordStatus::Blocked)
        })
    }

    /// The externally visible answer for this run.
    pub fn reply(&self) -> RunReply {
        RunReply {
            run_id: self.run_id.clone(),
            status: self.status,
            content: self.result_content.clone().unwrap_or_default(),
            file_path: self.result_file_path.clone(),
            file_content: self.result_file_content.clone(),
            changes: self.result_changes.clone(),
        }
    }
}

/// What a caller sees when it queries a run for its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReply {
    pub run_id: String,
    pub status: RunStatus,
    pub content: String,
    pub file_path: Option<String>,
    pub file_content: Option<String>,
    pub changes: Vec<FileChange>,
}
