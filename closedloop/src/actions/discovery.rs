//! Read-only inspection actions.
//!
//! Every function here caps what it returns, and bad input degrades to a
//! `reason` code instead of an error.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde_json::{Value, json};
use tracing::debug;

use crate::core::path::is_ignored_path;
use crate::core::text::{char_len, clip, truncate_chars};
use crate::core::types::ActionExecutionRecord;
use crate::io::workspace::Workspace;

static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:pub(?:\([^)]*\))?|export|default|async|abstract|public|private|protected|static)\s+)*(def|class|function|fn|struct|enum|trait|interface)\s+([A-Za-z_]\w*)",
    )
    .expect("symbol regex is valid")
});

static DEPENDENCY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"^\s*import\s+.*?\s+from\s+["'](.+?)["']"#,
        r#"^\s*import\s+["'](.+?)["']"#,
        r"^\s*from\s+([A-Za-z0-9_\.]+)\s+import\s+",
        r"^\s*import\s+([A-Za-z0-9_\.]+)",
        r#"require\(\s*["'](.+?)["']\s*\)"#,
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([A-Za-z0-9_:]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("dependency regex is valid"))
    .collect()
});

pub(super) fn scan_workspace<W: Workspace>(workspace: &W, limit: usize) -> Result<Value> {
    let scan = workspace.scan(limit)?;
    debug!(files = scan.file_count, dirs = scan.dir_count, "workspace scanned");
    Ok(json!({
        "root": workspace.root().display().to_string(),
        "files": scan.files,
        "file_count": scan.file_count,
        "dir_count": scan.dir_count,
    }))
}

pub(super) fn read_files<W: Workspace>(
    workspace: &W,
    paths: &[String],
    max_files: usize,
    max_chars: usize,
) -> Value {
    let files: Vec<Value> = paths
        .iter()
        .take(max_files)
        .map(|path| match workspace.read_file(path) {
            Ok(content) => {
                let (text, truncated) = clip(&content, max_chars);
                json!({
                    "path": path,
                    "chars": char_len(&content),
                    "returned_chars": char_len(&text),
                    "content": text,
                    "content_truncated": truncated,
                })
            }
            Err(err) => json!({ "path": path, "error": format!("{err:#}") }),
        })
        .collect();
    json!({ "files": files })
}

pub(super) fn search_code<W: Workspace>(
    workspace: &W,
    query: &str,
    paths: &[String],
    limit: usize,
    line_chars: usize,
) -> Result<Value> {
    if query.is_empty() {
        return Ok(json!({ "query": "", "matches": [], "reason": "empty_query" }));
    }
    let pattern = RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
        .context("build search pattern")?;

    let candidates = if paths.is_empty() {
        workspace.scan(usize::MAX)?.files
    } else {
        paths.to_vec()
    };

    let mut matches = Vec::new();
    'files: for path in candidates.iter().filter(|path| !is_ignored_path(path)) {
        let Ok(text) = workspace.read_file(path) else {
            continue;
        };
        for (idx, line) in text.lines().enumerate() {
            if !pattern.is_match(line) {
                continue;
            }
            matches.push(json!({
                "path": path,
                "line": idx + 1,
                "text": truncate_chars(line, line_chars),
            }));
            if matches.len() >= limit {
                break 'files;
            }
        }
    }
    Ok(json!({ "query": query, "matches": matches }))
}

pub(super) fn extract_symbols<W: Workspace>(
    workspace: &W,
    paths: &[String],
    max_files: usize,
) -> Value {
    if paths.is_empty() {
        return json!({ "symbols": [], "reason": "no_paths" });
    }
    let mut symbols = Vec::new();
    for path in paths.iter().take(max_files) {
        let Ok(text) = workspace.read_file(path) else {
            continue;
        };
        for (idx, line) in text.lines().enumerate() {
            if let Some(caps) = SYMBOL_RE.captures(line) {
                symbols.push(json!({
                    "path": path,
                    "line": idx + 1,
                    "kind": &caps[1],
                    "name": &caps[2],
                }));
            }
        }
    }
    json!({ "symbols": symbols })
}

pub(super) fn analyze_dependencies<W: Workspace>(
    workspace: &W,
    path: Option<&str>,
    limit: usize,
) -> Value {
    let Some(path) = path else {
        return json!({ "path": null, "dependencies": [], "reason": "no_target_file" });
    };
    let Ok(source) = workspace.read_file(path) else {
        return json!({ "path": path, "dependencies": [], "reason": "read_failed" });
    };
    let dependencies: Vec<&str> = source
        .lines()
        .filter_map(|line| {
            DEPENDENCY_RES
                .iter()
                .find_map(|re| re.captures(line))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
        })
        .collect();
    json!({
        "path": path,
        "dependency_count": dependencies.len(),
        "dependencies": dependencies.iter().take(limit).collect::<Vec<_>>(),
    })
}

pub(super) fn summarize_context(history: &[ActionExecutionRecord], window: usize) -> Value {
    let skip = history.len().saturating_sub(window);
    let last: Vec<Value> = history[skip..]
        .iter()
        .map(|record| {
            json!({
                "id": record.action_id,
                "type": record.action_type,
                "status": record.status,
                "error": record.error,
            })
        })
        .collect();
    json!({ "history_count": history.len(), "last_actions": last })
}

pub(super) fn propose_subplan(steps: &[Value]) -> Value {
    json!({ "steps": steps, "step_count": steps.len() })
}

/// One-line human summary of a discovery output, used in event details.
pub(super) fn describe_search(output: &Value) -> String {
    let query = output["query"].as_str().unwrap_or_default();
    let matches = output["matches"].as_array().map(Vec::as_slice).unwrap_or_default();
    let files: BTreeSet<&str> = matches
        .iter()
        .filter_map(|m| m["path"].as_str())
        .collect();
    format!(
        "search `{query}`: {} matches in {} files",
        matches.len(),
        files.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ActionType, RecordStatus};
    use crate::io::workspace::LocalWorkspace;
    use crate::test_support::record;
    use std::fs;

    fn workspace() -> (tempfile::TempDir, LocalWorkspace) {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::create_dir_all(temp.path().join("node_modules/pkg")).expect("mkdir");
        fs::write(
            temp.path().join("src/app.py"),
            "import os\nfrom util import helper\n\nclass App:\n    def run(self):\n        return helper()\n",
        )
        .expect("write");
        fs::write(
            temp.path().join("src/lib.rs"),
            "use std::fs;\npub struct Store;\npub(crate) fn open() {}\n",
        )
        .expect("write");
        fs::write(temp.path().join("node_modules/pkg/index.js"), "helper()\n").expect("write");
        let workspace = LocalWorkspace::new(temp.path());
        (temp, workspace)
    }

    #[test]
    fn scan_reports_root_and_counts() {
        let (_temp, workspace) = workspace();
        let output = scan_workspace(&workspace, 1).expect("scan");
        assert_eq!(output["file_count"], json!(2));
        assert_eq!(output["files"].as_array().map(Vec::len), Some(1));
        assert_eq!(output["dir_count"], json!(1));
    }

    #[test]
    fn read_files_truncates_and_reports_errors_inline() {
        let (_temp, workspace) = workspace();
        let paths = vec!["src/lib.rs".to_string(), "missing.rs".to_string()];
        let output = read_files(&workspace, &paths, 50, 5);
        let files = output["files"].as_array().expect("files");
        assert_eq!(files[0]["content"], json!("use s"));
        assert_eq!(files[0]["content_truncated"], json!(true));
        assert_eq!(files[0]["returned_chars"], json!(5));
        assert!(files[1]["error"].as_str().is_some());

        let output = read_files(&workspace, &paths, 1, 100);
        assert_eq!(output["files"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn search_is_case_insensitive_literal_and_skips_vendor_dirs() {
        let (_temp, workspace) = workspace();
        let output = search_code(&workspace, "HELPER(", &[], 50, 240).expect("search");
        let matches = output["matches"].as_array().expect("matches");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["path"], json!("src/app.py"));
        assert_eq!(matches[0]["line"], json!(6));
        assert_eq!(describe_search(&output), "search `HELPER(`: 1 matches in 1 files");

        let output = search_code(&workspace, "", &[], 50, 240).expect("search");
        assert_eq!(output["reason"], json!("empty_query"));

        let output = search_code(&workspace, "e", &[], 2, 240).expect("search");
        assert_eq!(output["matches"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn symbols_cover_python_and_rust() {
        let (_temp, workspace) = workspace();
        let output = extract_symbols(
            &workspace,
            &["src/app.py".to_string(), "src/lib.rs".to_string()],
            50,
        );
        let names: Vec<&str> = output["symbols"]
            .as_array()
            .expect("symbols")
            .iter()
            .filter_map(|s| s["name"].as_str())
            .collect();
        assert_eq!(names, vec!["App", "run", "Store", "open"]);
        assert_eq!(extract_symbols(&workspace, &[], 50)["reason"], json!("no_paths"));
    }

    #[test]
    fn dependencies_report_reason_codes() {
        let (_temp, workspace) = workspace();
        let output = analyze_dependencies(&workspace, Some("src/app.py"), 1);
        assert_eq!(output["dependency_count"], json!(2));
        assert_eq!(output["dependencies"], json!(["os"]));

        let output = analyze_dependencies(&workspace, Some("src/lib.rs"), 80);
        assert_eq!(output["dependencies"], json!(["std::fs"]));

        assert_eq!(
            analyze_dependencies(&workspace, None, 80)["reason"],
            json!("no_target_file")
        );
        assert_eq!(
            analyze_dependencies(&workspace, Some("nope.py"), 80)["reason"],
            json!("read_failed")
        );
    }

    #[test]
    fn summarize_keeps_last_window() {
        let history: Vec<ActionExecutionRecord> = (1..=4)
            .map(|n| record(&format!("a{n}"), ActionType::ReadFiles, RecordStatus::Completed))
            .collect();
        let output = summarize_context(&history, 2);
        assert_eq!(output["history_count"], json!(4));
        assert_eq!(output["last_actions"][0]["id"], json!("a3"));
        assert_eq!(output["last_actions"][1]["type"], json!("read_files"));
    }

    #[test]
    fn subplan_echoes_steps() {
        let output = propose_subplan(&[json!("one"), json!("two")]);
        assert_eq!(output["step_count"], json!(2));
    }
}
