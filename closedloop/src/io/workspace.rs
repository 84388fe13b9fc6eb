//! File collaborator: every read and write of the workspace goes through here.
//!
//! Paths handed in by actions are relative to the workspace root. Absolute
//! paths and `..` components are rejected with [`PathEscape`] before any I/O.

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;
use walkdir::WalkDir;

use crate::core::path::{is_ignored_dir, is_ignored_file, relative_display};

/// A path that would leave the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEscape {
    pub path: String,
}

impl fmt::Display for PathEscape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path escapes workspace root: {}", self.path)
    }
}

impl std::error::Error for PathEscape {}

/// A line range that cannot be applied to the file it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRange {
    pub start: u32,
    pub end: u32,
    pub message: String,
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid range {}-{}: {}", self.start, self.end, self.message)
    }
}

impl std::error::Error for InvalidRange {}

/// Result of walking the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceScan {
    /// Relative paths, walk order, at most the requested limit.
    pub files: Vec<String>,
    /// Every non-ignored file, including those past the limit.
    pub file_count: usize,
    pub dir_count: usize,
}

/// Sandboxed file operations relative to a workspace root.
pub trait Workspace: Send + Sync {
    fn root(&self) -> &Path;

    /// Map a relative path onto the workspace, rejecting escapes.
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        resolve_under(self.root(), relative)
    }

    fn exists(&self, relative: &str) -> Result<bool> {
        Ok(self.resolve(relative)?.is_file())
    }

    fn read_file(&self, relative: &str) -> Result<String>;

    fn write_file(&self, relative: &str, content: &str) -> Result<()>;

    fn delete_file(&self, relative: &str) -> Result<()>;

    fn move_file(&self, from: &str, to: &str) -> Result<()>;

    /// Walk the workspace, keeping at most `limit` paths.
    fn scan(&self, limit: usize) -> Result<WorkspaceScan> {
        scan_dir(self.root(), limit)
    }

    /// Replace lines `start..=end` (1-based) of a file with `replacement`.
    ///
    /// An empty or missing file only accepts `1-1`, which replaces the whole
    /// content. Returns the new content.
    fn write_file_range(
        &self,
        relative: &str,
        replacement: &str,
        start: u32,
        end: u32,
    ) -> Result<String> {
        let current = if self.exists(relative)? {
            self.read_file(relative)?
        } else {
            String::new()
        };
        let updated = replace_line_range(&current, replacement, start, end)?;
        self.write_file(relative, &updated)?;
        Ok(updated)
    }
}

/// [`Workspace`] over a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Workspace for LocalWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read_file(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        fs::read_to_string(&path).with_context(|| format!("read {relative}"))
    }

    fn write_file(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {relative}"))?;
        debug!(path = relative, bytes = content.len(), "file written");
        Ok(())
    }

    fn delete_file(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if path.is_dir() {
            fs::remove_dir_all(&path).with_context(|| format!("delete {relative}"))?;
        } else if path.is_file() {
            fs::remove_file(&path).with_context(|| format!("delete {relative}"))?;
        } else {
            return Err(anyhow!("not found: {relative}"));
        }
        debug!(path = relative, "path deleted");
        Ok(())
    }

    fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if !source.exists() {
            return Err(anyhow!("not found: {from}"));
        }
        if target.exists() {
            return Err(anyhow!("target already exists: {to}"));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::rename(&source, &target).with_context(|| format!("move {from} to {to}"))?;
        debug!(from, to, "path moved");
        Ok(())
    }
}

/// Join `relative` onto `root`, refusing absolute paths and parent components.
pub fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf> {
    let trimmed = relative.trim();
    let escape = || PathEscape {
        path: relative.to_string(),
    };
    if trimmed.is_empty() {
        return Err(anyhow!("empty path"));
    }
    let mut resolved = root.to_path_buf();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(escape().into());
            }
        }
    }
    if resolved == root {
        return Err(anyhow!("path names the workspace root: {relative}"));
    }
    Ok(resolved)
}

/// Splice `replacement` over lines `start..=end` of `current`, keeping line endings.
pub fn replace_line_range(
    current: &str,
    replacement: &str,
    start: u32,
    end: u32,
) -> Result<String, InvalidRange> {
    let invalid = |message: String| InvalidRange {
        start,
        end,
        message,
    };
    if start < 1 || end < start {
        return Err(invalid(
            "range must satisfy 1 <= range_start <= range_end".to_string(),
        ));
    }
    let lines: Vec<&str> = current.split_inclusive('\n').collect();
    if lines.is_empty() {
        if start != 1 || end != 1 {
            return Err(invalid("only 1-1 is allowed for an empty file".to_string()));
        }
        return Ok(replacement.to_string());
    }
    let total = lines.len();
    let (start, end) = (start as usize, end as usize);
    if end > total {
        return Err(invalid(format!(
            "file has {total} lines, but range_end={end}"
        )));
    }
    let mut updated = String::with_capacity(current.len() + replacement.len());
    updated.extend(lines[..start - 1].iter().copied());
    updated.push_str(replacement);
    updated.extend(lines[end..].iter().copied());
    Ok(updated)
}

/// Walk `root` skipping ignored directories and binary files.
pub fn scan_dir(root: &Path, limit: usize) -> Result<WorkspaceScan> {
    let mut scan = WorkspaceScan::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !is_ignored_dir(&entry.file_name().to_string_lossy())
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.depth() == 0 {
            continue;
        }
        if entry.file_type().is_dir() {
            scan.dir_count += 1;
            continue;
        }
        if !entry.file_type().is_file() || is_ignored_file(&entry.file_name().to_string_lossy()) {
            continue;
        }
        scan.file_count += 1;
        if scan.files.len() < limit {
            scan.files.push(relative_display(root, entry.path()));
        }
    }
    Ok(scan)
}
