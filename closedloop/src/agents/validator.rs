//! Best-effort check of executed work against the user's request.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::core::payload::extract_json_object;
use crate::core::text::truncate_chars;
use crate::core::types::{ActionExecutionRecord, ChatMessage};
use crate::io::llm::{LanguageModel, LlmCall};
use crate::io::prompt::{VALIDATE_SYSTEM, render_validation};

const REASON_LIMIT_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub satisfied: bool,
    pub reason: String,
}

pub struct ResultValidator<'a, M: LanguageModel> {
    model: &'a M,
}

impl<'a, M: LanguageModel> ResultValidator<'a, M> {
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }

    /// Judge `records` against `query`. The verdict never gates completion.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn judge(
        &self,
        provider: &str,
        query: &str,
        records: &[ActionExecutionRecord],
    ) -> Result<(Verdict, LlmCall)> {
        let history: Vec<String> = records
            .iter()
            .map(|record| format!("- {}: {}", record.action_type, record.status.as_str()))
            .collect();
        let prompt = render_validation(query, &history.join("\n"))?;
        let messages = vec![ChatMessage::system(VALIDATE_SYSTEM), ChatMessage::user(prompt)];
        let completion = self.model.complete(provider, &messages)?;
        let llm = LlmCall::from_completion(provider, &completion);
        Ok((parse_verdict(&completion.text), llm))
    }
}

/// Read a `{"satisfied", "reason"}` reply. Anything else counts as satisfied
/// with the reply text as the reason.
pub fn parse_verdict(text: &str) -> Verdict {
    if let Some(payload) = extract_json_object(text)
        && let Some(Value::Bool(satisfied)) = payload.get("satisfied")
    {
        let reason = payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Verdict {
            satisfied: *satisfied,
            reason: truncate_chars(reason, REASON_LIMIT_CHARS).to_string(),
        };
    }
    Verdict {
        satisfied: true,
        reason: truncate_chars(text.trim(), REASON_LIMIT_CHARS).to_string(),
    }
}
