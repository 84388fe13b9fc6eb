//! Dependency ordering for a batch of actions.

use std::collections::HashMap;
use std::fmt;

use crate::core::types::ActionSpec;

/// A `depends_on` cycle found while ordering a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCycle {
    /// Action ids along the cycle, starting and ending at the same id.
    pub ids: Vec<String>,
}

impl fmt::Display for DependencyCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dependency cycle: {}", self.ids.join(" -> "))
    }
}

impl std::error::Error for DependencyCycle {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Order `actions` so every action comes after the actions it depends on.
///
/// Roots are visited in batch order and dependencies in declaration order, so
/// the result is deterministic. Ids in `depends_on` that are not in the batch
/// are ignored.
pub fn topological_order(actions: &[ActionSpec]) -> Result<Vec<&ActionSpec>, DependencyCycle> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(actions.len());
    for (idx, action) in actions.iter().enumerate() {
        index.entry(action.id.as_str()).or_insert(idx);
    }
    let edges: Vec<Vec<usize>> = actions
        .iter()
        .map(|action| {
            action
                .depends_on
                .iter()
                .filter_map(|dep| index.get(dep.as_str()).copied())
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; actions.len()];
    let mut ordered = Vec::with_capacity(actions.len());
    // (node, next edge to follow)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..actions.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::InProgress;
        stack.push((root, 0));

        while let Some((node, cursor)) = stack.last_mut() {
            let node = *node;
            if let Some(&dep) = edges[node].get(*cursor) {
                *cursor += 1;
                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::InProgress;
                        stack.push((dep, 0));
                    }
                    Mark::InProgress => {
                        return Err(cycle_through(actions, &stack, dep));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                ordered.push(&actions[node]);
                stack.pop();
            }
        }
    }

    Ok(ordered)
}

fn cycle_through(actions: &[ActionSpec], stack: &[(usize, usize)], dep: usize) -> DependencyCycle {
    let start = stack
        .iter()
        .position(|(node, _)| *node == dep)
        .unwrap_or(0);
    let mut ids: Vec<String> = stack[start..]
        .iter()
        .map(|(node, _)| actions[*node].id.clone())
        .collect();
    ids.push(actions[dep].id.clone());
    DependencyCycle { ids }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ActionType;

    fn action(id: &str, deps: &[&str]) -> ActionSpec {
        let mut spec = ActionSpec::new(id, ActionType::ReadFiles, id);
        spec.depends_on = deps.iter().map(|dep| dep.to_string()).collect();
        spec
    }

    fn ids(ordered: &[&ActionSpec]) -> Vec<String> {
        ordered.iter().map(|action| action.id.clone()).collect()
    }

    #[test]
    fn independent_actions_keep_batch_order() {
        let actions = vec![action("a1", &[]), action("a2", &[]), action("a3", &[])];
        let ordered = topological_order(&actions).expect("order");
        assert_eq!(ids(&ordered), vec!["a1", "a2", "a3"]);
    }

    #[test]
    fn dependencies_come_first() {
        let actions = vec![
            action("write", &["read", "scan"]),
            action("read", &["scan"]),
            action("scan", &[]),
        ];
        let ordered = topological_order(&actions).expect("order");
        assert_eq!(ids(&ordered), vec!["scan", "read", "write"]);
    }

    #[test]
    fn every_action_follows_its_dependencies() {
        let actions = vec![
            action("e", &["d", "b"]),
            action("d", &["c"]),
            action("c", &["a"]),
            action("b", &["a"]),
            action("a", &[]),
            action("f", &[]),
        ];
        let ordered = topological_order(&actions).expect("order");
        let position: HashMap<&str, usize> = ordered
            .iter()
            .enumerate()
            .map(|(pos, action)| (action.id.as_str(), pos))
            .collect();
        assert_eq!(ordered.len(), actions.len());
        for action in &actions {
            for dep in &action.depends_on {
                assert!(position[dep.as_str()] < position[action.id.as_str()]);
            }
        }
    }

    #[test]
    fn dangling_dependencies_are_ignored() {
        let actions = vec![action("a1", &["missing"]), action("a2", &["a1"])];
        let ordered = topological_order(&actions).expect("order");
        assert_eq!(ids(&ordered), vec!["a1", "a2"]);
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let actions = vec![
            action("a1", &["a2"]),
            action("a2", &["a3"]),
            action("a3", &["a1"]),
        ];
        let err = topological_order(&actions).unwrap_err();
        assert_eq!(err.ids, vec!["a1", "a2", "a3", "a1"]);
        assert_eq!(err.to_string(), "dependency cycle: a1 -> a2 -> a3 -> a1");
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let actions = vec![action("a1", &["a1"])];
        let err = topological_order(&actions).unwrap_err();
        assert_eq!(err.ids, vec!["a1", "a1"]);
    }
}
