//! Language-model collaborator.
//!
//! The orchestrator only needs "given messages, return text, token usage, and
//! latency". [`LanguageModel`] is that seam; [`CommandModel`] implements it by
//! piping a transcript through a configured command so any provider CLI can
//! be plugged in. Tests use the scripted model from `test_support`.

use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::types::ChatMessage;
use crate::io::config::ModelConfig;
use crate::io::process::{CaptureLimits, run_bounded};

/// Environment variable carrying the provider name to the model command.
pub const PROVIDER_ENV: &str = "CLOSEDLOOP_PROVIDER";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    /// True when the counts are a chars/4 estimate rather than provider-reported.
    pub estimated: bool,
}

impl TokenUsage {
    pub fn estimate(messages: &[ChatMessage], reply: &str) -> Self {
        let input_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        Self {
            input: estimate_tokens(input_chars),
            output: estimate_tokens(reply.chars().count()),
            estimated: true,
        }
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

fn estimate_tokens(chars: usize) -> u64 {
    ((chars / 4) as u64).max(1)
}

/// One model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub latency: Duration,
}

/// Metrics for one model call, attached to events and action outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmCall {
    pub provider: String,
    pub elapsed_ms: u64,
    pub tokens: TokenUsage,
}

impl LlmCall {
    pub fn from_completion(provider: &str, completion: &Completion) -> Self {
        Self {
            provider: provider.to_string(),
            elapsed_ms: u64::try_from(completion.latency.as_millis()).unwrap_or(u64::MAX),
            tokens: completion.usage,
        }
    }
}

/// Abstraction over language-model backends.
pub trait LanguageModel: Send + Sync {
    /// Send `messages` to `provider` and return the reply.
    fn complete(&self, provider: &str, messages: &[ChatMessage]) -> Result<Completion>;
}

/// Model backend that spawns the configured command per call.
///
/// The transcript is written to stdin as `<role>` blocks; the reply is the
/// command's stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    config: ModelConfig,
}

impl CommandModel {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl LanguageModel for CommandModel {
    #[instrument(skip_all, fields(provider = %provider, messages = messages.len()))]
    fn complete(&self, provider: &str, messages: &[ChatMessage]) -> Result<Completion> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("model.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).env(PROVIDER_ENV, provider);

        let transcript = render_transcript(messages);
        let timeout = Duration::from_secs(self.config.timeout_secs);
        info!(program = %program, "calling language model");
        let started = Instant::now();
        let output = run_bounded(
            cmd,
            Some(transcript.as_bytes()),
            timeout,
            CaptureLimits::bytes(self.config.output_limit_bytes),
        )
        .with_context(|| format!("run model command {program}"))?;
        let latency = started.elapsed();

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "model command timed out");
            return Err(anyhow!("model command timed out after {:?}", timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                output.stderr.trim()
            ));
        }

        let text = output.stdout;
        let usage = TokenUsage::estimate(messages, &text);
        debug!(elapsed_ms = latency.as_millis() as u64, tokens = usage.total(), "model replied");
        Ok(Completion {
            text,
            usage,
            latency,
        })
    }
}

/// Render messages as a plain-text transcript for command-line models.
pub fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut buf = String::new();
    for message in messages {
        let tag = message.role.as_str();
        buf.push_str(&format!("<{tag}>\n{}\n</{tag}>\n\n", message.content.trim_end()));
    }
    buf
}
