//! Planner agent: asks the model for the next [`ActionBatch`].
//!
//! Planning never fails from the orchestrator's point of view. A model error,
//! unparseable output, a schema violation, or a dependency cycle all degrade to
//! [`fallback_batch`], which asks the user for guidance.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::normalize::{fallback_batch, normalize_batch};
use crate::core::payload::extract_json_object;
use crate::core::run::RequestSnapshot;
use crate::core::text::truncate_chars;
use crate::core::types::{ActionBatch, ActionExecutionRecord, ActionType, ChatMessage};
use crate::io::config::PlannerConfig;
use crate::io::context::ContextSnapshot;
use crate::io::llm::{LanguageModel, LlmCall};
use crate::io::prompt::render_planner;

const ACTION_BATCH_SCHEMA: &str = include_str!("../../schemas/action_batch.schema.json");

/// Everything the planner reads for one iteration.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub request: &'a RequestSnapshot,
    /// Snapshot messages followed by follow-ups.
    pub conversation: &'a [ChatMessage],
    pub iteration: u32,
    pub original_query: &'a str,
    pub history: &'a [ActionExecutionRecord],
    pub context: &'a ContextSnapshot,
}

/// A normalized batch plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub batch: ActionBatch,
    pub llm: Option<LlmCall>,
    /// Why the fallback batch was used, if it was.
    pub fallback_reason: Option<String>,
}

pub struct Planner<'a, M: LanguageModel> {
    model: &'a M,
    config: &'a PlannerConfig,
}

impl<'a, M: LanguageModel> Planner<'a, M> {
    pub fn new(model: &'a M, config: &'a PlannerConfig) -> Self {
        Self { model, config }
    }

    /// Produce the next normalized batch for `plan.iteration`.
    #[instrument(skip_all, fields(iteration = plan.iteration))]
    pub fn plan_next(&self, plan: &PlanRequest<'_>) -> PlanOutcome {
        let messages = match self.messages(plan) {
            Ok(messages) => messages,
            Err(err) => return fallback(plan.iteration, format!("planner input failed: {err:#}"), None),
        };

        let provider = plan.request.provider.as_str();
        let completion = match self.model.complete(provider, &messages) {
            Ok(completion) => completion,
            Err(err) => {
                return fallback(plan.iteration, format!("planner call failed: {err:#}"), None);
            }
        };
        let llm = LlmCall::from_completion(provider, &completion);
        debug!(elapsed_ms = llm.elapsed_ms, tokens = llm.tokens.total(), "planner replied");

        let batch = match parse_batch(&completion.text, plan.iteration) {
            Ok(batch) => batch,
            Err(err) => {
                return fallback(
                    plan.iteration,
                    format!("planner_parse_failed: {err:#}"),
                    Some(llm),
                );
            }
        };
        match normalize_batch(batch, plan.iteration, plan.history) {
            Ok(batch) => {
                info!(
                    mode = ?batch.decision.mode,
                    actions = batch.actions.len(),
                    "planned batch"
                );
                PlanOutcome {
                    batch,
                    llm: Some(llm),
                    fallback_reason: None,
                }
            }
            Err(cycle) => fallback(plan.iteration, cycle.to_string(), Some(llm)),
        }
    }

    fn messages(&self, plan: &PlanRequest<'_>) -> Result<Vec<ChatMessage>> {
        let system = render_planner(plan.iteration, plan.request.chat_only)?;
        let input = planner_input(plan, self.config);
        let user = serde_json::to_string(&input).context("serialize planner input")?;
        Ok(vec![ChatMessage::system(system), ChatMessage::user(user)])
    }
}

fn fallback(iteration: u32, reason: String, llm: Option<LlmCall>) -> PlanOutcome {
    warn!(iteration, reason = %reason, "using fallback batch");
    PlanOutcome {
        batch: fallback_batch(iteration, &reason),
        llm,
        fallback_reason: Some(reason),
    }
}

#[derive(Debug, Serialize)]
struct HistoryConfigInput {
    turns: usize,
    max_chars_per_message: usize,
    summary_enabled: bool,
    summary_max_chars: usize,
}

/// Build the JSON object sent as the planner's user message.
pub fn planner_input(plan: &PlanRequest<'_>, config: &PlannerConfig) -> Value {
    let turns = config.conversation_turns;
    let skip = plan.conversation.len().saturating_sub(turns);
    let (older, recent) = plan.conversation.split_at(skip);
    let conversation_history: Vec<Value> = recent
        .iter()
        .map(|message| {
            json!({
                "role": message.role,
                "content": truncate_chars(&message.content, config.max_chars_per_message),
            })
        })
        .collect();
    let conversation_summary = if config.summary_enabled {
        conversation_summary(older, config.summary_max_chars)
    } else {
        String::new()
    };

    let request = plan.request;
    let snippets: Vec<Value> = request
        .snippets
        .iter()
        .take(config.snippet_limit)
        .map(|snippet| {
            json!({
                "file_path": snippet.file_path,
                "start_line": snippet.start_line,
                "end_line": snippet.end_line,
            })
        })
        .collect();
    let prior_skip = plan.history.len().saturating_sub(config.prior_actions);
    let prior_actions: Vec<Value> = plan.history[prior_skip..]
        .iter()
        .map(|record| {
            json!({
                "iteration": record.iteration,
                "action_id": record.action_id,
                "action_type": record.action_type,
                "status": record.status,
                "title": record.title,
                "error": record.error,
                "output": record.output,
            })
        })
        .collect();
    let available_actions: Vec<&str> = ActionType::ALL.iter().map(|a| a.as_str()).collect();

    json!({
        "original_user_query": plan.original_query,
        "conversation_history": conversation_history,
        "conversation_omitted_count": older.len(),
        "conversation_summary": conversation_summary,
        "history_config": HistoryConfigInput {
            turns,
            max_chars_per_message: config.max_chars_per_message,
            summary_enabled: config.summary_enabled,
            summary_max_chars: config.summary_max_chars,
        },
        "iteration": plan.iteration,
        "runtime_constraints": {
            "chat_only": request.chat_only,
            "force_code_edit": request.force_code_edit,
            "range_start": request.range_start,
            "range_end": request.range_end,
        },
        "current_file": request.current_file,
        "snippets": snippets,
        "context_snapshot": plan.context,
        "prior_actions": prior_actions,
        "available_actions": available_actions,
    })
}

/// Fold turns that fell out of the history window into `role: text` lines.
///
/// A final partial line is kept only when more than 20 chars of it fit.
pub fn conversation_summary(messages: &[ChatMessage], max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total = 0usize;
    for message in messages {
        let content = message.content.replace('\n', " ");
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        let entry = format!("{}: {content}", message.role.as_str());
        let separator = usize::from(!parts.is_empty());
        let entry_len = entry.chars().count();
        if total + separator + entry_len > max_chars {
            let remain = max_chars.saturating_sub(total + separator);
            if remain > 20 {
                parts.push(truncate_chars(&entry, remain).to_string());
            }
            break;
        }
        total += separator + entry_len;
        parts.push(entry);
    }
    parts.join("\n")
}

/// Reduce model text to a schema-valid [`ActionBatch`] for `iteration`.
pub fn parse_batch(text: &str, iteration: u32) -> Result<ActionBatch> {
    let mut payload =
        extract_json_object(text).ok_or_else(|| anyhow!("no JSON object in planner output"))?;
    payload.insert("iteration".to_string(), json!(iteration));
    let payload = Value::Object(payload);
    validate_batch_schema(&payload)?;
    serde_json::from_value(payload).context("decode action batch")
}

/// Validate a batch document against the bundled JSON Schema (Draft 2020-12).
pub fn validate_batch_schema(instance: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(ACTION_BATCH_SCHEMA).context("parse action batch schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile action batch schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
