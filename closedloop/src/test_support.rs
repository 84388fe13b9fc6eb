//! Test-only fakes and builders for runs, batches, and model replies.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::run::RequestSnapshot;
use crate::core::types::{
    ActionBatch, ActionExecutionRecord, ActionSpec, ActionType, BatchDecision, ChatMessage,
    DecisionMode, RecordStatus, now_timestamp,
};
use crate::io::config::LoopConfig;
use crate::io::llm::{Completion, LanguageModel, TokenUsage};
use crate::io::run_store::RunStore;
use crate::io::workspace::LocalWorkspace;
use crate::orchestrator::Orchestrator;

type Hook = Box<dyn FnOnce() + Send>;

/// One scripted model reply, optionally with a hook run when it is consumed.
pub struct ScriptedReply {
    result: Result<String, String>,
    hook: Option<Hook>,
}

impl ScriptedReply {
    pub fn text(text: &str) -> Self {
        Self {
            result: Ok(text.to_string()),
            hook: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            hook: None,
        }
    }

    /// Reply with the JSON form of `batch`.
    pub fn batch(batch: &ActionBatch) -> Self {
        let text = serde_json::to_string_pretty(batch).unwrap_or_default();
        Self::text(&text)
    }

    /// Run `hook` at the moment the model hands out this reply.
    pub fn then(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }
}

/// Language model that replays a fixed script and records every call.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(reply);
    }

    /// Messages of every call so far, in order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, _provider: &str, messages: &[ChatMessage]) -> Result<Completion> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("calls lock poisoned"))?
            .push(messages.to_vec());
        let reply = self
            .replies
            .lock()
            .map_err(|_| anyhow!("replies lock poisoned"))?
            .pop_front();
        let Some(reply) = reply else {
            bail!("scripted model has no reply left");
        };
        if let Some(hook) = reply.hook {
            hook();
        }
        match reply.result {
            Ok(text) => Ok(Completion {
                usage: TokenUsage::estimate(messages, &text),
                text,
                latency: Duration::from_millis(1),
            }),
            Err(message) => Err(anyhow!(message)),
        }
    }
}

/// Build an action whose `input` is the given JSON object.
pub fn action(id: &str, action_type: ActionType, input: Value) -> ActionSpec {
    let mut spec = ActionSpec::new(id, action_type, format!("{id} title"));
    if let Value::Object(map) = input {
        spec.input = map;
    }
    spec
}

/// Build a batch that does not wait for the user.
pub fn batch(mode: DecisionMode, actions: Vec<ActionSpec>) -> ActionBatch {
    ActionBatch {
        version: "1.0".to_string(),
        iteration: 0,
        summary: "scripted plan".to_string(),
        decision: BatchDecision {
            mode,
            reason: None,
            needs_user_trigger: false,
            satisfaction_score: None,
        },
        actions,
        acceptance: Vec::new(),
        risks: Vec::new(),
        next_questions: Vec::new(),
    }
}

pub fn record(id: &str, action_type: ActionType, status: RecordStatus) -> ActionExecutionRecord {
    let now = now_timestamp();
    ActionExecutionRecord {
        iteration: 1,
        action_id: id.to_string(),
        action_type,
        status,
        title: format!("{id} title"),
        reason: String::new(),
        input: serde_json::Map::new(),
        output: Value::Object(serde_json::Map::new()),
        artifacts: Vec::new(),
        error: (status == RecordStatus::Failed).then(|| format!("{id} failed")),
        started_at: now.clone(),
        ended_at: now,
    }
}

/// Request with a single user message.
pub fn request(message: &str) -> RequestSnapshot {
    RequestSnapshot {
        provider: "test".to_string(),
        messages: vec![ChatMessage::user(message)],
        ..RequestSnapshot::default()
    }
}

/// Orchestrator over a scripted model, an in-memory store, and a temp workspace.
pub struct Harness {
    pub orchestrator: Orchestrator<ScriptedModel, LocalWorkspace>,
    root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    pub fn with_config(config: LoopConfig) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let orchestrator = Orchestrator::new(
            RunStore::in_memory(),
            ScriptedModel::default(),
            LocalWorkspace::new(root.path()),
            config,
        );
        Self { orchestrator, root }
    }

    pub fn model(&self) -> &ScriptedModel {
        self.orchestrator.model()
    }

    pub fn store(&self) -> &RunStore {
        self.orchestrator.store()
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
