//! Context snapshot handed to the planner each iteration.
//!
//! The snapshot is a bounded digest: a sample of workspace paths, a preview
//! of the target file, snippet metadata, and a compacted tail of the action
//! history. Nothing here fails; unreadable inputs degrade to reason codes.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::run::RequestSnapshot;
use crate::core::text::{char_len, truncate_chars};
use crate::core::types::{ActionExecutionRecord, ActionType, RecordStatus};
use crate::io::config::ContextConfig;
use crate::io::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSnapshot {
    pub workspace: WorkspaceSummary,
    pub current_file: CurrentFileSummary,
    pub snippets: SnippetSummary,
    pub history: HistorySummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceSummary {
    pub root: String,
    pub file_count: usize,
    pub sample_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentFileSummary {
    pub file: Option<String>,
    pub chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnippetSummary {
    pub count: usize,
    pub paths: Vec<String>,
    pub chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub completed: usize,
    /// Failed and blocked records.
    pub failed: usize,
    pub action_type_count: BTreeMap<String, usize>,
    pub recent: Vec<RecentRecord>,
    pub has_write: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentRecord {
    pub iteration: u32,
    pub action_id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub status: RecordStatus,
    pub error: Option<String>,
    pub output: Value,
}

/// Builds [`ContextSnapshot`]s with the configured bounds.
pub struct ContextBuilder<'a, W: Workspace> {
    workspace: &'a W,
    config: &'a ContextConfig,
}

impl<'a, W: Workspace> ContextBuilder<'a, W> {
    pub fn new(workspace: &'a W, config: &'a ContextConfig) -> Self {
        Self { workspace, config }
    }

    pub fn build(
        &self,
        request: &RequestSnapshot,
        history: &[ActionExecutionRecord],
    ) -> ContextSnapshot {
        let snapshot = ContextSnapshot {
            workspace: self.workspace_summary(),
            current_file: self.current_file_summary(request),
            snippets: self.snippet_summary(request),
            history: self.history_summary(history),
        };
        debug!(
            files = snapshot.workspace.file_count,
            recent = snapshot.history.recent.len(),
            "context snapshot built"
        );
        snapshot
    }

    fn workspace_summary(&self) -> WorkspaceSummary {
        let root = self.workspace.root().display().to_string();
        match self.workspace.scan(self.config.sample_files) {
            Ok(scan) => WorkspaceSummary {
                root,
                file_count: scan.file_count,
                sample_files: scan.files,
                reason: None,
            },
            Err(err) => {
                warn!(err = %err, "workspace scan failed");
                WorkspaceSummary {
                    root,
                    file_count: 0,
                    sample_files: Vec::new(),
                    reason: Some("workspace_not_readable".to_string()),
                }
            }
        }
    }

    fn current_file_summary(&self, request: &RequestSnapshot) -> CurrentFileSummary {
        let Some(path) = request.target_file() else {
            return CurrentFileSummary {
                file: None,
                chars: 0,
                preview: None,
                reason: Some("no_target_file".to_string()),
            };
        };
        let pasted = request
            .current_code
            .as_deref()
            .filter(|_| request.current_file.as_deref().map(str::trim) == Some(path));
        let content = match pasted {
            Some(code) => Ok(code.to_string()),
            None => self.workspace.read_file(path),
        };
        match content {
            Ok(content) => CurrentFileSummary {
                file: Some(path.to_string()),
                chars: char_len(&content),
                preview: Some(truncate_chars(&content, self.config.preview_chars).to_string()),
                reason: None,
            },
            Err(err) => {
                debug!(path, err = %err, "target file not readable");
                CurrentFileSummary {
                    file: Some(path.to_string()),
                    chars: 0,
                    preview: None,
                    reason: Some("file_not_readable".to_string()),
                }
            }
        }
    }

    fn snippet_summary(&self, request: &RequestSnapshot) -> SnippetSummary {
        SnippetSummary {
            count: request.snippets.len(),
            paths: request
                .snippets
                .iter()
                .take(self.config.snippet_paths)
                .map(|snippet| snippet.file_path.clone())
                .collect(),
            chars: request
                .snippets
                .iter()
                .map(|snippet| char_len(&snippet.content))
                .sum(),
        }
    }

    fn history_summary(&self, history: &[ActionExecutionRecord]) -> HistorySummary {
        let mut completed = 0;
        let mut failed = 0;
        let mut action_type_count: BTreeMap<String, usize> = BTreeMap::new();
        for record in history {
            match record.status {
                RecordStatus::Completed => completed += 1,
                RecordStatus::Failed | RecordStatus::Blocked => failed += 1,
                RecordStatus::WaitingUser | RecordStatus::Skipped => {}
            }
            *action_type_count
                .entry(record.action_type.as_str().to_string())
                .or_default() += 1;
        }

        let skip = history.len().saturating_sub(self.config.recent_records);
        let recent = history[skip..]
            .iter()
            .map(|record| RecentRecord {
                iteration: record.iteration,
                action_id: record.action_id.clone(),
                action_type: record.action_type,
                status: record.status,
                error: record.error.clone(),
                output: self.compact_output(record),
            })
            .collect();

        HistorySummary {
            completed,
            failed,
            action_type_count,
            recent,
            has_write: history.iter().any(|r| r.action_type.is_write()),
        }
    }

    fn compact_output(&self, record: &ActionExecutionRecord) -> Value {
        let limit = self.config.output_chars;
        match &record.output {
            Value::Object(output) if record.action_type == ActionType::ReadFiles => {
                match output.get("files") {
                    Some(Value::Array(files)) => {
                        let files: Vec<Value> = files
                            .iter()
                            .take(self.config.read_files_per_record)
                            .filter_map(Value::as_object)
                            .map(|file| Value::Object(compact_read_file(file, limit)))
                            .collect();
                        let mut compact = Map::new();
                        compact.insert("files".to_string(), Value::Array(files));
                        Value::Object(compact)
                    }
                    _ => record.output.clone(),
                }
            }
            Value::String(text) if char_len(text) > limit => {
                Value::String(truncate_chars(text, limit).to_string())
            }
            other => other.clone(),
        }
    }
}

fn compact_read_file(file: &Map<String, Value>, limit: usize) -> Map<String, Value> {
    let mut copied = file.clone();
    if let Some(Value::String(content)) = file.get("content")
        && char_len(content) > limit
    {
        copied.insert(
            "content".to_string(),
            Value::String(truncate_chars(content, limit).to_string()),
        );
        copied.insert("content_truncated_by_context".to_string(), Value::Bool(true));
    }
    copied
}
