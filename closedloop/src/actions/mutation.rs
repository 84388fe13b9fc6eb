//! File mutations with an audit trail.
//!
//! Every write produces a [`FileChange`] carrying both contents, their SHA-256
//! digests and a unified diff, whether or not the write itself succeeded.

use anyhow::Result;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use similar::TextDiff;
use tracing::{info, instrument, warn};

use crate::actions::input::{LineRange, WriteSource};
use crate::agents::editor::{EditRequest, FileEditor};
use crate::core::text::char_len;
use crate::core::types::{FileChange, WriteResult};
use crate::io::llm::{LanguageModel, LlmCall};
use crate::io::prompt::PromptRange;
use crate::io::workspace::{InvalidRange, Workspace};

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Mutation {
    pub output: Value,
    pub change: FileChange,
    pub failure: Option<String>,
}

/// Lowercase hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Unified diff with `a/<path>` and `b/<path>` headers.
pub fn unified_diff(path: &str, before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

#[instrument(skip_all, fields(path = %path))]
pub(super) fn write_file<M: LanguageModel, W: Workspace>(
    model: &M,
    workspace: &W,
    provider: &str,
    path: &str,
    source: &WriteSource,
    range: Option<LineRange>,
) -> Result<Mutation> {
    let before = if workspace.exists(path)? {
        workspace.read_file(path)?
    } else {
        String::new()
    };

    let mut llm: Option<LlmCall> = None;
    let content = match source {
        WriteSource::Content(content) => content.clone(),
        WriteSource::Instruction(instruction) => {
            let edit = FileEditor::new(model).edit(
                provider,
                &EditRequest {
                    path,
                    instruction,
                    current: &before,
                    range: range.map(|r| PromptRange {
                        start: r.start,
                        end: r.end,
                    }),
                },
            )?;
            llm = Some(edit.llm);
            edit.content
        }
    };

    let written = match range {
        Some(range) => workspace.write_file_range(path, &content, range.start, range.end),
        None => workspace.write_file(path, &content).map(|()| content.clone()),
    };
    let (after, write_error) = match written {
        Ok(after) => (after, None),
        // Nothing was written; the range itself was invalid.
        Err(err) if err.downcast_ref::<InvalidRange>().is_some() => return Err(err),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "write failed");
            (content, Some(format!("{err:#}")))
        }
    };

    let change = FileChange {
        path: path.to_string(),
        diff_unified: unified_diff(path, &before, &after),
        before_hash: content_hash(&before),
        after_hash: content_hash(&after),
        write_result: if write_error.is_some() {
            WriteResult::Failed
        } else {
            WriteResult::Written
        },
        error: write_error.clone(),
        before_content: before,
        after_content: after,
    };
    let mut output = json!({
        "path": path,
        "before_len": char_len(&change.before_content),
        "after_len": char_len(&change.after_content),
    });
    if let Some(llm) = llm {
        output["_llm"] = serde_json::to_value(llm)?;
    }
    if write_error.is_none() {
        info!(
            before_hash = %change.before_hash,
            after_hash = %change.after_hash,
            "file written"
        );
    }
    Ok(Mutation {
        output,
        failure: write_error.map(|err| format!("write failed: {err}")),
        change,
    })
}

pub(super) fn delete_file<W: Workspace>(workspace: &W, path: &str) -> Result<Value> {
    workspace.delete_file(path)?;
    Ok(json!({ "path": path, "deleted": true }))
}

pub(super) fn move_file<W: Workspace>(workspace: &W, from: &str, to: &str) -> Result<Value> {
    workspace.move_file(from, to)?;
    Ok(json!({ "old_path": from, "new_path": to, "moved": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workspace::LocalWorkspace;
    use crate::test_support::{ScriptedModel, ScriptedReply};
    use std::fs;

    #[test]
    fn literal_write_to_missing_file_records_full_audit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = LocalWorkspace::new(temp.path());
        let model = ScriptedModel::new(Vec::new());
        let mutation = write_file(
            &model,
            &workspace,
            "local",
            "a.py",
            &WriteSource::Content("x=1".to_string()),
            None,
        )
        .expect("write");

        let change = &mutation.change;
        assert_eq!(change.before_content, "");
        assert_eq!(change.after_content, "x=1");
        assert_eq!(change.write_result, WriteResult::Written);
        assert!(change.diff_unified.contains("--- a/a.py"));
        assert!(change.diff_unified.contains("+x=1"));
        assert_eq!(change.before_hash, content_hash(""));
        assert_ne!(change.before_hash, change.after_hash);
        assert_eq!(mutation.output, json!({"path": "a.py", "before_len": 0, "after_len": 3}));
        assert_eq!(fs::read_to_string(temp.path().join("a.py")).expect("read"), "x=1");
        assert!(model.calls().is_empty());
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn ranged_write_replaces_only_those_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.py"), "one\ntwo\nthree\n").expect("write");
        let workspace = LocalWorkspace::new(temp.path());
        let model = ScriptedModel::new(Vec::new());
        let mutation = write_file(
            &model,
            &workspace,
            "local",
            "a.py",
            &WriteSource::Content("TWO\n".to_string()),
            Some(LineRange { start: 2, end: 2 }),
        )
        .expect("write");
        assert_eq!(mutation.change.after_content, "one\nTWO\nthree\n");
        assert!(mutation.change.diff_unified.contains("-two"));

        let err = write_file(
            &model,
            &workspace,
            "local",
            "a.py",
            &WriteSource::Content("x\n".to_string()),
            Some(LineRange { start: 3, end: 9 }),
        )
        .unwrap_err();
        assert!(err.downcast_ref::<InvalidRange>().is_some());
    }

    #[test]
    fn instruction_write_asks_editor_and_reports_llm() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = LocalWorkspace::new(temp.path());
        let model = ScriptedModel::new(vec![ScriptedReply::text(
            r#"{"file_path": "hello.py", "file_content": "print('hi')\n"}"#,
        )]);
        let mutation = write_file(
            &model,
            &workspace,
            "local",
            "hello.py",
            &WriteSource::Instruction("print a greeting".to_string()),
            None,
        )
        .expect("write");
        assert_eq!(mutation.change.after_content, "print('hi')\n");
        assert_eq!(mutation.output["_llm"]["provider"], json!("local"));
    }

    #[test]
    fn failed_write_yields_failed_change() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("blocker"), "file, not a dir").expect("write");
        let workspace = LocalWorkspace::new(temp.path());
        let model = ScriptedModel::new(Vec::new());
        let mutation = write_file(
            &model,
            &workspace,
            "local",
            "blocker/a.py",
            &WriteSource::Content("x".to_string()),
            None,
        )
        .expect("write outcome");
        assert_eq!(mutation.change.write_result, WriteResult::Failed);
        assert!(mutation.change.error.is_some());
        assert!(mutation.failure.is_some_and(|f| f.starts_with("write failed")));
    }

    #[test]
    fn delete_and_move_delegate_to_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), "a").expect("write");
        let workspace = LocalWorkspace::new(temp.path());
        let output = move_file(&workspace, "a.txt", "b/a.txt").expect("move");
        assert_eq!(output["moved"], json!(true));
        assert!(temp.path().join("b/a.txt").is_file());
        delete_file(&workspace, "b/a.txt").expect("delete");
        assert!(!temp.path().join("b/a.txt").exists());
        assert!(delete_file(&workspace, "b/a.txt").is_err());
    }
}
