//! Durable run records.
//!
//! A [`RunStore`] keeps one JSON document per run id in a pluggable
//! [`RunBackend`]. Every mutator is a read-modify-write of the whole record
//! performed under the store lock, so concurrent writers never lose each
//! other's updates and readers always see a fully persisted record.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::run::{RequestSnapshot, Run, RunIntent, RunStatus};
use crate::core::types::{
    ActionBatch, ActionExecutionRecord, ChatMessage, ExecutionEvent, FileChange, now_timestamp,
};
use crate::io::config::STATE_DIR;

/// Lookup of a run id that has no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunNotFound {
    pub run_id: String,
}

impl fmt::Display for RunNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run not found: {}", self.run_id)
    }
}

impl std::error::Error for RunNotFound {}

/// Storage for serialized run documents keyed by run id.
pub trait RunBackend: Send + Sync {
    /// Return the stored document, or `None` if the id is unknown.
    fn load(&self, run_id: &str) -> Result<Option<String>>;
    /// Replace the stored document for `run_id`.
    fn store(&self, run_id: &str, document: &str) -> Result<()>;
    /// Every stored run id.
    fn list(&self) -> Result<Vec<String>>;
}

/// Process-local backend used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    docs: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn docs(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.docs
            .lock()
            .map_err(|_| anyhow!("memory backend lock poisoned"))
    }
}

impl RunBackend for MemoryBackend {
    fn load(&self, run_id: &str) -> Result<Option<String>> {
        Ok(self.docs()?.get(run_id).cloned())
    }

    fn store(&self, run_id: &str, document: &str) -> Result<()> {
        self.docs()?
            .insert(run_id.to_string(), document.to_string());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.docs()?.keys().cloned().collect())
    }
}

/// One pretty-printed JSON file per run under `<root>/.closedloop/runs/`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Backend rooted at the standard location inside a workspace.
    pub fn for_workspace(root: &Path) -> Self {
        Self::new(root.join(STATE_DIR).join("runs"))
    }

    fn path_for(&self, run_id: &str) -> Option<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.dir.join(format!("{run_id}.json")))
    }
}

impl RunBackend for FileBackend {
    fn load(&self, run_id: &str) -> Result<Option<String>> {
        let Some(path) = self.path_for(run_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read run {}", path.display()))?;
        Ok(Some(contents))
    }

    fn store(&self, run_id: &str, document: &str) -> Result<()> {
        let path = self
            .path_for(run_id)
            .ok_or_else(|| anyhow!("invalid run id {run_id:?}"))?;
        write_atomic(&path, document)
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("list {}", self.dir.display()))?
        {
            let path = entry.context("read run dir entry")?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run {}", path.display()))?;
    Ok(())
}

/// Answer fields written by [`RunStore::mark_run_result`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    pub content: String,
    pub file_path: Option<String>,
    pub file_content: Option<String>,
    pub changes: Vec<FileChange>,
}

/// Single point of truth for run state.
///
/// Clones share the backend and the lock.
#[derive(Clone)]
pub struct RunStore {
    backend: Arc<dyn RunBackend>,
    lock: Arc<Mutex<()>>,
}

impl RunStore {
    pub fn new(backend: impl RunBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|_| anyhow!("run store lock poisoned"))
    }

    fn read(&self, run_id: &str) -> Result<Run> {
        let document = self.backend.load(run_id)?.ok_or_else(|| RunNotFound {
            run_id: run_id.to_string(),
        })?;
        serde_json::from_str(&document).with_context(|| format!("parse run {run_id}"))
    }

    fn write(&self, run: &Run) -> Result<()> {
        let mut document = serde_json::to_string_pretty(run).context("serialize run")?;
        document.push('\n');
        self.backend
            .store(&run.run_id, &document)
            .with_context(|| format!("persist run {}", run.run_id))
    }

    /// Create and persist a new `running` run.
    #[instrument(skip_all, fields(intent = ?intent))]
    pub fn create_run(&self, request: RequestSnapshot, intent: RunIntent) -> Result<Run> {
        let run = Run {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            intent,
            status: RunStatus::Running,
            iteration: 0,
            started_at: now_timestamp(),
            finished_at: None,
            request_snapshot: request,
            followups: Vec::new(),
            latest_batch: None,
            pending_action_ids: Vec::new(),
            action_history: Vec::new(),
            events: Vec::new(),
            pause_requested: false,
            cancel_requested: false,
            active_action_id: None,
            result_content: None,
            result_file_path: None,
            result_file_content: None,
            result_changes: Vec::new(),
        };
        let _guard = self.guard()?;
        self.write(&run)?;
        debug!(run_id = %run.run_id, "run created");
        Ok(run)
    }

    /// Overwrite the stored record wholesale.
    #[instrument(skip_all, fields(run_id = %run.run_id))]
    pub fn save(&self, run: &Run) -> Result<()> {
        let _guard = self.guard()?;
        self.write(run)
    }

    /// Fetch the latest persisted record. Fails with [`RunNotFound`] for unknown ids.
    pub fn get(&self, run_id: &str) -> Result<Run> {
        let _guard = self.guard()?;
        self.read(run_id)
    }

    /// Every stored run, oldest first.
    pub fn list(&self) -> Result<Vec<Run>> {
        let _guard = self.guard()?;
        let mut runs = Vec::new();
        for run_id in self.backend.list()? {
            runs.push(self.read(&run_id)?);
        }
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(runs)
    }

    /// Atomically load, mutate, and persist one run.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn update<F>(&self, run_id: &str, mutate: F) -> Result<Run>
    where
        F: FnOnce(&mut Run),
    {
        let _guard = self.guard()?;
        let mut run = self.read(run_id)?;
        mutate(&mut run);
        self.write(&run)?;
        Ok(run)
    }

    /// Record a new batch: bumps the iteration and queues every action id.
    pub fn set_latest_batch(&self, run_id: &str, batch: ActionBatch) -> Result<Run> {
        self.update(run_id, |run| {
            run.iteration = batch.iteration;
            run.pending_action_ids = batch.actions.iter().map(|a| a.id.clone()).collect();
            run.latest_batch = Some(batch);
        })
    }

    pub fn add_action_record(&self, run_id: &str, record: ActionExecutionRecord) -> Result<Run> {
        self.update(run_id, |run| run.action_history.push(record))
    }

    /// Set the run status. Transitions out of a terminal status are ignored.
    pub fn update_status(&self, run_id: &str, status: RunStatus) -> Result<Run> {
        self.update(run_id, |run| {
            set_status(run, status);
        })
    }

    pub fn set_active_action(&self, run_id: &str, action_id: Option<String>) -> Result<Run> {
        self.update(run_id, |run| run.active_action_id = action_id)
    }

    /// Drop `action_id` from the pending queue and clear the active action.
    pub fn complete_action(&self, run_id: &str, action_id: &str) -> Result<Run> {
        self.update(run_id, |run| {
            run.pending_action_ids.retain(|id| id != action_id);
            run.active_action_id = None;
        })
    }

    /// Set the sticky pause flag; a run waiting on the user pauses at once.
    pub fn request_pause(&self, run_id: &str) -> Result<Run> {
        self.update(run_id, |run| {
            if run.status.is_terminal() {
                return;
            }
            run.pause_requested = true;
            if run.status == RunStatus::WaitingUser {
                run.status = RunStatus::Paused;
            }
        })
    }

    /// Clear the pause flag; a paused run goes back to `running`.
    pub fn clear_pause(&self, run_id: &str) -> Result<Run> {
        self.update(run_id, |run| {
            run.pause_requested = false;
            if run.status == RunStatus::Paused {
                run.status = RunStatus::Running;
            }
        })
    }

    /// Set the sticky cancel flag; an idle run is cancelled at once.
    pub fn request_cancel(&self, run_id: &str) -> Result<Run> {
        self.update(run_id, |run| {
            if run.status.is_terminal() {
                return;
            }
            run.cancel_requested = true;
            if matches!(run.status, RunStatus::WaitingUser | RunStatus::Paused) {
                finish(run, RunStatus::Cancelled);
            }
        })
    }

    pub fn clear_pending_actions(&self, run_id: &str) -> Result<Run> {
        self.update(run_id, |run| {
            run.pending_action_ids.clear();
            run.active_action_id = None;
        })
    }

    /// Move the run to a terminal `status` and stamp `finished_at`.
    pub fn mark_run_finished(&self, run_id: &str, status: RunStatus) -> Result<Run> {
        self.update(run_id, |run| finish(run, status))
    }

    /// Replace the externally visible answer.
    pub fn mark_run_result(&self, run_id: &str, result: RunResult) -> Result<Run> {
        self.update(run_id, |run| {
            run.result_content = Some(result.content);
            run.result_file_path = result.file_path;
            run.result_file_content = result.file_content;
            run.result_changes = result.changes;
        })
    }

    pub fn add_event(&self, run_id: &str, event: ExecutionEvent) -> Result<Run> {
        self.update(run_id, |run| run.events.push(event))
    }

    pub fn add_followup(&self, run_id: &str, message: ChatMessage) -> Result<Run> {
        self.update(run_id, |run| run.followups.push(message))
    }
}

/// Apply `status` unless the run already reached a terminal status.
///
/// Returns whether the status was applied.
pub fn set_status(run: &mut Run, status: RunStatus) -> bool {
    if run.status.is_terminal() && run.status != status {
        warn!(
            run_id = %run.run_id,
            from = %run.status,
            to = %status,
            "ignoring transition out of terminal status"
        );
        return false;
    }
    run.status = status;
    true
}

fn finish(run: &mut Run, status: RunStatus) {
    if set_status(run, status) && run.finished_at.is_none() {
        run.finished_at = Some(now_timestamp());
    }
    run.active_action_id = None;
}
