//! Orchestrator configuration stored under `.closedloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Directory under the workspace root that holds config and run records.
pub const STATE_DIR: &str = ".closedloop";

/// Location of the config file for a workspace.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("config.toml")
}

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values the planner contract was tuned for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Planning rounds `run_loop` performs before giving up.
    pub max_iterations: u32,
    pub context: ContextConfig,
    pub planner: PlannerConfig,
    pub actions: ActionsConfig,
    pub model: ModelConfig,
}

/// Bounds for the context snapshot handed to the planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    pub sample_files: usize,
    pub preview_chars: usize,
    pub snippet_paths: usize,
    pub recent_records: usize,
    /// Cap for any single string output echoed into the snapshot.
    pub output_chars: usize,
    pub read_files_per_record: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    pub conversation_turns: usize,
    pub max_chars_per_message: usize,
    pub summary_enabled: bool,
    pub summary_max_chars: usize,
    pub prior_actions: usize,
    pub snippet_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActionsConfig {
    pub scan_limit: usize,
    pub read_max_files: usize,
    pub read_max_chars: usize,
    pub search_limit: usize,
    pub search_line_chars: usize,
    pub symbol_max_files: usize,
    pub dependency_limit: usize,
    pub stdout_limit_chars: usize,
    pub stderr_limit_chars: usize,
    /// Used when an action declares `timeout_sec = 0`.
    pub default_timeout_secs: u64,
    pub validation_window: usize,
    pub summarize_window: usize,
}

/// Language-model command invoked by [`crate::io::llm::CommandModel`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Program and arguments, e.g. `["llm", "-m", "gpt-4o"]`.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            context: ContextConfig::default(),
            planner: PlannerConfig::default(),
            actions: ActionsConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sample_files: 120,
            preview_chars: 1200,
            snippet_paths: 30,
            recent_records: 20,
            output_chars: 20_000,
            read_files_per_record: 20,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            conversation_turns: 40,
            max_chars_per_message: 4000,
            summary_enabled: true,
            summary_max_chars: 1200,
            prior_actions: 40,
            snippet_limit: 50,
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            scan_limit: 200,
            read_max_files: 50,
            read_max_chars: 120_000,
            search_limit: 50,
            search_line_chars: 240,
            symbol_max_files: 50,
            dependency_limit: 80,
            stdout_limit_chars: 6000,
            stderr_limit_chars: 4000,
            default_timeout_secs: 120,
            validation_window: 8,
            summarize_window: 10,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 300,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.context.sample_files == 0 || self.context.recent_records == 0 {
            return Err(anyhow!(
                "context.sample_files and context.recent_records must be > 0"
            ));
        }
        if self.planner.conversation_turns == 0 || self.planner.max_chars_per_message == 0 {
            return Err(anyhow!(
                "planner.conversation_turns and planner.max_chars_per_message must be > 0"
            ));
        }
        if self.actions.default_timeout_secs == 0 {
            return Err(anyhow!("actions.default_timeout_secs must be > 0"));
        }
        if self.actions.stdout_limit_chars == 0 || self.actions.stderr_limit_chars == 0 {
            return Err(anyhow!("actions output limits must be > 0"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, LoopConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_path(temp.path());
        let mut cfg = LoopConfig::default();
        cfg.model.command = vec!["my-llm".to_string(), "--json".to_string()];
        cfg.actions.search_limit = 10;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 3\n[actions]\nscan_limit = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.actions.scan_limit, 5);
        assert_eq!(cfg.actions.search_limit, 50);
        assert_eq!(cfg.context, ContextConfig::default());
    }

    #[test]
    fn empty_model_command_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[model]\ncommand = []\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("model.command"));
    }
}
