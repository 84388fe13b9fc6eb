//! Prompt templates for the planner, the file editor, and the validator.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::ActionType;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const FILE_EDIT_TEMPLATE: &str = include_str!("prompts/file_edit.md");
const VALIDATE_TEMPLATE: &str = include_str!("prompts/validate.md");

/// System prompt for single-file edits.
pub const FILE_EDIT_SYSTEM: &str =
    "You are a careful code editor. You change one file at a time and reply with JSON only.";

/// System prompt for result validation.
pub const VALIDATE_SYSTEM: &str =
    "You review agent work against the user's request and reply with JSON only.";

/// Line range passed to the file edit template.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PromptRange {
    pub start: u32,
    pub end: u32,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template should be valid");
        env.add_template("file_edit", FILE_EDIT_TEMPLATE)
            .expect("file_edit template should be valid");
        env.add_template("validate", VALIDATE_TEMPLATE)
            .expect("validate template should be valid");
        Self { env }
    }
}

/// Render the planner's system prompt.
pub fn render_planner(iteration: u32, chat_only: bool) -> Result<String> {
    let engine = PromptEngine::new();
    let available_actions: Vec<&str> = ActionType::ALL.iter().map(|a| a.as_str()).collect();
    let rendered = engine.env.get_template("planner")?.render(context! {
        iteration => iteration,
        chat_only => chat_only,
        available_actions => available_actions,
    })?;
    debug!(bytes = rendered.len(), "rendered planner prompt");
    Ok(rendered)
}

/// Render the user prompt for an instruction-only file mutation.
pub fn render_file_edit(
    path: &str,
    instruction: &str,
    current: &str,
    range: Option<PromptRange>,
) -> Result<String> {
    let engine = PromptEngine::new();
    let rendered = engine.env.get_template("file_edit")?.render(context! {
        path => path,
        instruction => instruction.trim(),
        current => current,
        range => range,
    })?;
    Ok(rendered)
}

/// Render the user prompt for `validate_result`.
pub fn render_validation(query: &str, history: &str) -> Result<String> {
    let engine = PromptEngine::new();
    let rendered = engine.env.get_template("validate")?.render(context! {
        query => query.trim(),
        history => history,
    })?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_prompt_lists_every_action_type() {
        let prompt = render_planner(3, false).expect("render");
        for action in ActionType::ALL {
            assert!(prompt.contains(&format!("- {}\n", action.as_str())), "{action}");
        }
        assert!(prompt.contains("\"iteration\": 3"));
        assert!(!prompt.contains("chat-only"));
    }

    #[test]
    fn planner_prompt_mentions_chat_only_mode() {
        let prompt = render_planner(1, true).expect("render");
        assert!(prompt.contains("chat-only"));
    }

    #[test]
    fn file_edit_prompt_includes_range_only_when_given() {
        let whole = render_file_edit("a.py", "add x", "", None).expect("render");
        assert!(whole.contains("`a.py`"));
        assert!(whole.contains("does not exist yet"));
        assert!(!whole.contains("<range>"));

        let ranged = render_file_edit(
            "a.py",
            "add x",
            "x = 0\n",
            Some(PromptRange { start: 1, end: 1 }),
        )
        .expect("render");
        assert!(ranged.contains("Only lines 1-1"));
        assert!(ranged.contains("x = 0"));
    }

    #[test]
    fn validation_prompt_embeds_query_and_history() {
        let prompt = render_validation(" fix it ", "[]").expect("render");
        assert!(prompt.contains("<query>\nfix it\n</query>"));
        assert!(prompt.contains("[]"));
    }
}
