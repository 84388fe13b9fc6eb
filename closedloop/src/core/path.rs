//! Ignore rules for workspace walks.

use std::path::Path;

/// Directory names never descended into.
pub const IGNORED_DIRS: [&str; 8] = [
    ".git",
    "node_modules",
    "dist",
    "build",
    "__pycache__",
    ".idea",
    "target",
    ".closedloop",
];

/// File suffixes treated as binary or generated.
pub const IGNORED_SUFFIXES: [&str; 9] = [
    ".png", ".jpg", ".jpeg", ".gif", ".ico", ".pdf", ".lock", ".mp4", ".zip",
];

pub fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIRS.contains(&name)
}

pub fn is_ignored_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IGNORED_SUFFIXES
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

/// Whether a relative `a/b/c` path falls under an ignored directory or suffix.
pub fn is_ignored_path(relative: &str) -> bool {
    let mut parts = relative.split(['/', '\\']).filter(|part| !part.is_empty()).peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            return is_ignored_file(part);
        }
        if is_ignored_dir(part) {
            return true;
        }
    }
    false
}

/// Render `path` relative to `root` with `/` separators.
pub fn relative_display(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_and_state_dirs_are_ignored() {
        assert!(is_ignored_dir("node_modules"));
        assert!(is_ignored_dir(".closedloop"));
        assert!(!is_ignored_dir("src"));
    }

    #[test]
    fn binary_suffixes_are_ignored_case_insensitively() {
        assert!(is_ignored_file("logo.PNG"));
        assert!(is_ignored_file("Cargo.lock"));
        assert!(!is_ignored_file("main.rs"));
    }

    #[test]
    fn nested_paths_inherit_ignored_dirs() {
        assert!(is_ignored_path("web/node_modules/react/index.js"));
        assert!(is_ignored_path("assets/logo.png"));
        assert!(!is_ignored_path("src/build.rs"));
        assert!(!is_ignored_path(""));
    }

    #[test]
    fn relative_display_uses_forward_slashes() {
        let root = Path::new("/work");
        assert_eq!(
            relative_display(root, &root.join("src").join("lib.rs")),
            "src/lib.rs"
        );
    }
}
