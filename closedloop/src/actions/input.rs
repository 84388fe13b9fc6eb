//! Typed action inputs.
//!
//! Planner input maps are loose JSON. [`Action::from_spec`] turns one into a
//! closed sum type so dispatch never has to look keys up again, and missing
//! required input surfaces as an [`InputError`].

use std::fmt;

use serde_json::{Map, Value};

use crate::core::types::{ActionSpec, ActionType};

const DEFAULT_QUESTION: &str = "More information is needed before continuing.";
const DEFAULT_APPROVAL: &str = "This action needs your confirmation before it runs.";
const DEFAULT_FINAL_ANSWER: &str = "Task completed.";
const DEFAULT_BLOCKER: &str = "Execution is blocked.";

/// Action input that violates the action's contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputError {
    pub action_type: ActionType,
    pub message: String,
}

impl InputError {
    fn new(action_type: ActionType, message: impl Into<String>) -> Self {
        Self {
            action_type,
            message: message.into(),
        }
    }
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.action_type, self.message)
    }
}

impl std::error::Error for InputError {}

/// Where a mutation's new content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteSource {
    Content(String),
    /// Natural-language change request handed to the file editor.
    Instruction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ScanWorkspace {
        limit: Option<usize>,
    },
    ReadFiles {
        paths: Vec<String>,
        max_chars: Option<usize>,
    },
    SearchCode {
        query: String,
        paths: Vec<String>,
        limit: Option<usize>,
    },
    ExtractSymbols {
        paths: Vec<String>,
    },
    AnalyzeDependencies {
        path: Option<String>,
    },
    SummarizeContext,
    ProposeSubplan {
        steps: Vec<Value>,
    },
    /// Any of the four command types; `command` may be empty.
    Command {
        command: String,
    },
    Write {
        path: String,
        source: WriteSource,
        range: Option<LineRange>,
    },
    Delete {
        path: String,
    },
    Move {
        from: String,
        to: String,
    },
    ValidateResult,
    AskUser {
        question: String,
    },
    RequestApproval {
        prompt: String,
    },
    FinalAnswer {
        content: String,
    },
    ReportBlocker {
        reason: String,
    },
}

impl Action {
    pub fn from_spec(spec: &ActionSpec) -> Result<Self, InputError> {
        let kind = spec.action_type;
        let input = &spec.input;
        let action = match kind {
            ActionType::ScanWorkspace => Action::ScanWorkspace {
                limit: count(kind, input, "limit")?,
            },
            ActionType::ReadFiles => {
                let raw = ["paths", "file_paths", "files", "targets"]
                    .iter()
                    .filter_map(|key| input.get(*key))
                    .find(|value| is_present(value));
                Action::ReadFiles {
                    paths: raw.map(path_list).unwrap_or_default(),
                    max_chars: count(kind, input, "max_chars")?,
                }
            }
            ActionType::SearchCode => Action::SearchCode {
                query: text(input, "query").unwrap_or_default(),
                paths: input.get("paths").map(path_list).unwrap_or_default(),
                limit: count(kind, input, "limit")?,
            },
            ActionType::ExtractSymbols => Action::ExtractSymbols {
                paths: input.get("paths").map(path_list).unwrap_or_default(),
            },
            ActionType::AnalyzeDependencies => Action::AnalyzeDependencies {
                path: text(input, "path"),
            },
            ActionType::SummarizeContext => Action::SummarizeContext,
            ActionType::ProposeSubplan => Action::ProposeSubplan {
                steps: match input.get("steps") {
                    Some(Value::Array(steps)) => steps.clone(),
                    _ => Vec::new(),
                },
            },
            ActionType::RunCommand
            | ActionType::RunTests
            | ActionType::RunLint
            | ActionType::RunBuild => Action::Command {
                command: text(input, "command").unwrap_or_default(),
            },
            ActionType::CreateFile | ActionType::UpdateFile | ActionType::ApplyPatch => {
                let path = text(input, "path")
                    .ok_or_else(|| InputError::new(kind, "write action missing path"))?;
                let source = match input.get("content").filter(|value| !value.is_null()) {
                    Some(Value::String(content)) => WriteSource::Content(content.clone()),
                    Some(other) => WriteSource::Content(other.to_string()),
                    None => {
                        let instruction = text(input, "instruction")
                            .or_else(|| text(input, "prompt"))
                            .or_else(|| non_empty(&spec.reason))
                            .ok_or_else(|| {
                                InputError::new(kind, "write action missing content or instruction")
                            })?;
                        WriteSource::Instruction(instruction)
                    }
                };
                Action::Write {
                    path,
                    source,
                    range: line_range(kind, input)?,
                }
            }
            ActionType::DeleteFile => Action::Delete {
                path: text(input, "path")
                    .ok_or_else(|| InputError::new(kind, "delete action missing path"))?,
            },
            ActionType::MoveFile => {
                match (text(input, "old_path"), text(input, "new_path")) {
                    (Some(from), Some(to)) => Action::Move { from, to },
                    _ => {
                        return Err(InputError::new(kind, "move action missing old_path/new_path"));
                    }
                }
            }
            ActionType::ValidateResult => Action::ValidateResult,
            ActionType::AskUser => Action::AskUser {
                question: text(input, "question").unwrap_or_else(|| DEFAULT_QUESTION.to_string()),
            },
            ActionType::RequestApproval => Action::RequestApproval {
                prompt: text(input, "prompt").unwrap_or_else(|| DEFAULT_APPROVAL.to_string()),
            },
            ActionType::FinalAnswer => Action::FinalAnswer {
                content: text(&spec.response, "content")
                    .unwrap_or_else(|| DEFAULT_FINAL_ANSWER.to_string()),
            },
            ActionType::ReportBlocker => Action::ReportBlocker {
                reason: text(input, "reason")
                    .or_else(|| non_empty(&spec.reason))
                    .unwrap_or_else(|| DEFAULT_BLOCKER.to_string()),
            },
            ActionType::Unsupported => {
                return Err(InputError::new(kind, "unsupported action type"));
            }
        };
        Ok(action)
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Trimmed, non-empty string field. Numbers are accepted as their text.
fn text(input: &Map<String, Value>, key: &str) -> Option<String> {
    match input.get(key)? {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A single path or a list of paths. Empty entries are dropped.
fn path_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(path) => non_empty(path).into_iter().collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(path) => non_empty(path),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Non-negative integer field; numeric strings are accepted.
fn count(
    kind: ActionType,
    input: &Map<String, Value>,
    key: &str,
) -> Result<Option<usize>, InputError> {
    let parsed = match input.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse::<usize>().ok(),
        Some(_) => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| InputError::new(kind, format!("{key} must be a non-negative integer")))
}

fn line_range(
    kind: ActionType,
    input: &Map<String, Value>,
) -> Result<Option<LineRange>, InputError> {
    let start = count(kind, input, "range_start")?;
    let end = count(kind, input, "range_end")?;
    let to_line = |n: usize| {
        u32::try_from(n).map_err(|_| InputError::new(kind, "line range out of bounds"))
    };
    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => Ok(Some(LineRange {
            start: to_line(start)?,
            end: to_line(end)?,
        })),
        _ => Err(InputError::new(
            kind,
            "range_start and range_end must be given together",
        )),
    }
}
