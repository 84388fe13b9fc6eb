//! Single-file editor used by instruction-only mutations.

use anyhow::{Result, anyhow};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::payload::{extract_code_block, extract_json_object};
use crate::core::types::ChatMessage;
use crate::io::llm::{LanguageModel, LlmCall};
use crate::io::prompt::{FILE_EDIT_SYSTEM, PromptRange, render_file_edit};

#[derive(Debug, Clone, Copy)]
pub struct EditRequest<'a> {
    pub path: &'a str,
    pub instruction: &'a str,
    /// Current file content, empty when the file does not exist.
    pub current: &'a str,
    pub range: Option<PromptRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub content: String,
    pub llm: LlmCall,
}

pub struct FileEditor<'a, M: LanguageModel> {
    model: &'a M,
}

impl<'a, M: LanguageModel> FileEditor<'a, M> {
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }

    /// Ask the model for the new content of `request.path`.
    #[instrument(skip_all, fields(path = %request.path))]
    pub fn edit(&self, provider: &str, request: &EditRequest<'_>) -> Result<Edit> {
        let prompt = render_file_edit(
            request.path,
            request.instruction,
            request.current,
            request.range,
        )?;
        let messages = vec![ChatMessage::system(FILE_EDIT_SYSTEM), ChatMessage::user(prompt)];
        let completion = self.model.complete(provider, &messages)?;
        let llm = LlmCall::from_completion(provider, &completion);
        let content = extract_file_content(&completion.text, request.path)
            .ok_or_else(|| anyhow!("model reply for {} carried no file content", request.path))?;
        debug!(chars = content.chars().count(), "edit generated");
        Ok(Edit { content, llm })
    }
}

/// Pull the new content for `path` out of a model reply.
///
/// Accepts `{"file_content": ..}`, a `changes` list entry whose `file_path`
/// matches, or a bare fenced code block.
pub fn extract_file_content(text: &str, path: &str) -> Option<String> {
    if let Some(payload) = extract_json_object(text)
        && (payload.contains_key("file_content") || payload.contains_key("changes"))
    {
        if let Some(Value::String(content)) = payload.get("file_content") {
            return Some(content.clone());
        }
        return payload
            .get("changes")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|change| change.get("file_path").and_then(Value::as_str) == Some(path))
            .and_then(|change| change.get("file_content").and_then(Value::as_str))
            .map(str::to_string);
    }
    extract_code_block(text)
}
