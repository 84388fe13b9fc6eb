//! Batch normalization applied to every planner result.
//!
//! Normalization repairs what a model commonly gets wrong (missing ids,
//! `continue` with nothing to do) and enforces the ordering policy that
//! discovery never runs before the workspace has been scanned.

use std::collections::HashSet;

use serde_json::json;

use crate::core::topo::{DependencyCycle, topological_order};
use crate::core::types::{
    ActionBatch, ActionExecutionRecord, ActionSpec, ActionType, BatchDecision, DecisionMode,
    RecordStatus,
};

/// Criteria assigned to actions the planner left without any.
pub const DEFAULT_SUCCESS_CRITERION: &str = "action completes and produces valid output";

/// File limit given to an injected workspace scan.
pub const INJECTED_SCAN_LIMIT: u64 = 300;

/// Normalize a parsed batch for `iteration`.
///
/// Returns [`DependencyCycle`] when the repaired batch cannot be ordered.
pub fn normalize_batch(
    mut batch: ActionBatch,
    iteration: u32,
    history: &[ActionExecutionRecord],
) -> Result<ActionBatch, DependencyCycle> {
    batch.iteration = iteration;

    if batch.actions.is_empty() && batch.decision.mode == DecisionMode::Continue {
        batch.decision.mode = DecisionMode::AskUser;
        if batch.decision.reason.as_deref().is_none_or(str::is_empty) {
            batch.decision.reason = Some("planner returned empty actions".to_string());
        }
        batch.decision.needs_user_trigger = false;
    }

    let mut taken: HashSet<String> = batch
        .actions
        .iter()
        .map(|action| action.id.clone())
        .filter(|id| !id.is_empty())
        .collect();
    let mut seen: HashSet<String> = HashSet::new();
    for (idx, action) in batch.actions.iter_mut().enumerate() {
        if action.id.is_empty() || seen.contains(&action.id) {
            action.id = free_id(&taken, idx + 1);
            taken.insert(action.id.clone());
        }
        seen.insert(action.id.clone());

        if action.action_type == ActionType::FinalAnswer {
            batch.decision.mode = DecisionMode::Done;
            action.can_parallel = false;
        }
        if action.success_criteria.is_empty() {
            action.success_criteria = vec![DEFAULT_SUCCESS_CRITERION.to_string()];
        }
    }

    ensure_scan_before_discovery(&mut batch.actions, history);
    topological_order(&batch.actions)?;
    Ok(batch)
}

/// Make every discovery action wait for a workspace scan.
///
/// When the run has never completed a scan and the batch has none, one is
/// prepended. Any scan in the batch then becomes a dependency of every
/// discovery action, which also serializes them.
pub fn ensure_scan_before_discovery(
    actions: &mut Vec<ActionSpec>,
    history: &[ActionExecutionRecord],
) {
    if !actions
        .iter()
        .any(|action| action.action_type.is_discovery())
    {
        return;
    }

    let scanned_before = history.iter().any(|record| {
        record.action_type == ActionType::ScanWorkspace && record.status == RecordStatus::Completed
    });
    let mut scan_id = actions
        .iter()
        .find(|action| action.action_type == ActionType::ScanWorkspace)
        .map(|action| action.id.clone());

    if !scanned_before && scan_id.is_none() {
        let taken: HashSet<String> = actions.iter().map(|action| action.id.clone()).collect();
        let id = free_id(&taken, 1);
        actions.insert(0, injected_scan(&id));
        scan_id = Some(id);
    }

    let Some(scan_id) = scan_id else {
        return;
    };
    for action in actions.iter_mut() {
        if action.id == scan_id || !action.action_type.is_discovery() {
            continue;
        }
        if !action.depends_on.contains(&scan_id) {
            action.depends_on.push(scan_id.clone());
            action.can_parallel = false;
        }
    }
}

fn injected_scan(id: &str) -> ActionSpec {
    let mut scan = ActionSpec::new(id, ActionType::ScanWorkspace, "Scan workspace structure");
    scan.reason =
        "index the workspace before searching or reading so nothing is missed".to_string();
    scan.input.insert("limit".to_string(), json!(INJECTED_SCAN_LIMIT));
    scan.success_criteria = vec!["workspace file list and file count returned".to_string()];
    scan
}

/// First `a{n}` id with `n >= start` that is not already taken.
fn free_id(taken: &HashSet<String>, start: usize) -> String {
    let mut n = start;
    loop {
        let candidate = format!("a{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Deterministic batch used whenever planning cannot produce a usable one.
pub fn fallback_batch(iteration: u32, reason: &str) -> ActionBatch {
    let mut ask = ActionSpec::new("a1", ActionType::AskUser, "Ask for more information");
    ask.reason = reason.to_string();
    ask.input.insert(
        "question".to_string(),
        json!("Please give the target file, the expected result, or the commands I may run."),
    );
    ask.success_criteria = vec!["user supplied the missing information".to_string()];

    ActionBatch {
        version: "1.0".to_string(),
        iteration,
        summary: "Could not plan the next step reliably; waiting for more information".to_string(),
        decision: BatchDecision {
            mode: DecisionMode::AskUser,
            reason: Some(reason.to_string()),
            needs_user_trigger: false,
            satisfaction_score: Some(0.0),
        },
        actions: vec![ask],
        acceptance: Vec::new(),
        risks: Vec::new(),
        next_questions: vec!["Which file or feature should I focus on?".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::now_timestamp;
    use serde_json::{Map, Value};

    fn batch(mode: DecisionMode, actions: Vec<ActionSpec>) -> ActionBatch {
        ActionBatch {
            version: "1.0".to_string(),
            iteration: 0,
            summary: "plan".to_string(),
            decision: BatchDecision {
                mode,
                reason: None,
                needs_user_trigger: true,
                satisfaction_score: None,
            },
            actions,
            acceptance: Vec::new(),
            risks: Vec::new(),
            next_questions: Vec::new(),
        }
    }

    fn action(id: &str, action_type: ActionType) -> ActionSpec {
        ActionSpec::new(id, action_type, id)
    }

    fn scan_record(status: RecordStatus) -> ActionExecutionRecord {
        ActionExecutionRecord {
            iteration: 1,
            action_id: "a1".to_string(),
            action_type: ActionType::ScanWorkspace,
            status,
            title: "scan".to_string(),
            reason: String::new(),
            input: Map::new(),
            output: Value::Null,
            artifacts: Vec::new(),
            error: None,
            started_at: now_timestamp(),
            ended_at: now_timestamp(),
        }
    }

    #[test]
    fn empty_continue_becomes_ask_user() {
        let normalized = normalize_batch(batch(DecisionMode::Continue, Vec::new()), 4, &[])
            .expect("normalize");
        assert_eq!(normalized.iteration, 4);
        assert_eq!(normalized.decision.mode, DecisionMode::AskUser);
        assert_eq!(
            normalized.decision.reason.as_deref(),
            Some("planner returned empty actions")
        );
        assert!(!normalized.decision.needs_user_trigger);
    }

    #[test]
    fn empty_done_is_left_alone() {
        let normalized =
            normalize_batch(batch(DecisionMode::Done, Vec::new()), 1, &[]).expect("normalize");
        assert_eq!(normalized.decision.mode, DecisionMode::Done);
    }

    #[test]
    fn missing_and_duplicate_ids_get_unique_synthetic_ids() {
        let actions = vec![
            action("", ActionType::RunTests),
            action("a3", ActionType::RunLint),
            action("a3", ActionType::RunBuild),
        ];
        let normalized =
            normalize_batch(batch(DecisionMode::Continue, actions), 1, &[]).expect("normalize");
        let ids: Vec<&str> = normalized.actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a3", "a4"]);
    }

    #[test]
    fn final_answer_forces_done_and_serial() {
        let mut answer = action("a1", ActionType::FinalAnswer);
        answer.can_parallel = true;
        let normalized = normalize_batch(batch(DecisionMode::Continue, vec![answer]), 1, &[])
            .expect("normalize");
        assert_eq!(normalized.decision.mode, DecisionMode::Done);
        assert!(!normalized.actions[0].can_parallel);
    }

    #[test]
    fn empty_success_criteria_get_default() {
        let normalized = normalize_batch(
            batch(DecisionMode::Continue, vec![action("a1", ActionType::RunTests)]),
            1,
            &[],
        )
        .expect("normalize");
        assert_eq!(
            normalized.actions[0].success_criteria,
            vec![DEFAULT_SUCCESS_CRITERION.to_string()]
        );
    }

    #[test]
    fn scan_is_injected_before_discovery_in_fresh_run() {
        let mut search = action("a1", ActionType::SearchCode);
        search.can_parallel = true;
        let mut read = action("a2", ActionType::ReadFiles);
        read.can_parallel = true;
        let normalized = normalize_batch(batch(DecisionMode::Continue, vec![search, read]), 1, &[])
            .expect("normalize");

        let scan = &normalized.actions[0];
        assert_eq!(scan.action_type, ActionType::ScanWorkspace);
        assert_eq!(scan.id, "a3");
        assert_eq!(scan.input.get("limit"), Some(&json!(300)));
        for discovery in &normalized.actions[1..] {
            assert_eq!(discovery.depends_on, vec!["a3".to_string()]);
            assert!(!discovery.can_parallel);
        }
    }

    #[test]
    fn existing_scan_in_batch_becomes_dependency() {
        let actions = vec![
            action("read", ActionType::ReadFiles),
            action("scan", ActionType::ScanWorkspace),
        ];
        let normalized =
            normalize_batch(batch(DecisionMode::Continue, actions), 1, &[]).expect("normalize");
        assert_eq!(normalized.actions.len(), 2);
        assert_eq!(normalized.actions[0].depends_on, vec!["scan".to_string()]);
    }

    #[test]
    fn completed_scan_in_history_skips_injection() {
        let history = vec![scan_record(RecordStatus::Completed)];
        let normalized = normalize_batch(
            batch(DecisionMode::Continue, vec![action("a1", ActionType::ReadFiles)]),
            2,
            &history,
        )
        .expect("normalize");
        assert_eq!(normalized.actions.len(), 1);
        assert!(normalized.actions[0].depends_on.is_empty());
    }

    #[test]
    fn failed_scan_in_history_still_injects() {
        let history = vec![scan_record(RecordStatus::Failed)];
        let normalized = normalize_batch(
            batch(DecisionMode::Continue, vec![action("a1", ActionType::ReadFiles)]),
            2,
            &history,
        )
        .expect("normalize");
        assert_eq!(normalized.actions[0].action_type, ActionType::ScanWorkspace);
    }

    #[test]
    fn non_discovery_batches_are_not_touched() {
        let normalized = normalize_batch(
            batch(DecisionMode::Continue, vec![action("a1", ActionType::RunTests)]),
            1,
            &[],
        )
        .expect("normalize");
        assert_eq!(normalized.actions.len(), 1);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut first = action("a1", ActionType::RunTests);
        first.depends_on = vec!["a2".to_string()];
        let mut second = action("a2", ActionType::RunLint);
        second.depends_on = vec!["a1".to_string()];
        let err = normalize_batch(batch(DecisionMode::Continue, vec![first, second]), 1, &[])
            .unwrap_err();
        assert_eq!(err.ids, vec!["a1", "a2", "a1"]);
    }

    #[test]
    fn fallback_batch_asks_user() {
        let fallback = fallback_batch(3, "model output unreadable");
        assert_eq!(fallback.iteration, 3);
        assert_eq!(fallback.decision.mode, DecisionMode::AskUser);
        assert!(!fallback.decision.needs_user_trigger);
        assert_eq!(fallback.actions.len(), 1);
        assert_eq!(fallback.actions[0].action_type, ActionType::AskUser);
        assert!(fallback.actions[0].input.contains_key("question"));
    }
}
