//! Expand a markdown checklist into packed file contents.
//!
//! A checklist item `- [label](path-or-glob)` becomes one `#### [label](path)`
//! heading plus a fenced block per matching file. Everything else passes
//! through verbatim.

use std::fs;
use std::path::{Component, Path};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Placeholder body for an item that could not be read.
pub const READ_ERROR: &str = "ERROR: Could not read file";

static CHECKLIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s+(?:\[[ xX]\]\s+)?\[([^\]]*)\]\(([^)\s]+)\)\s*$")
        .expect("checklist regex")
});

/// A checklist item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistItem {
    pub label: String,
    pub path: String,
}

/// Parse one checklist line.
pub fn checklist_item(line: &str) -> Option<ChecklistItem> {
    let caps = CHECKLIST_RE.captures(line)?;
    Some(ChecklistItem {
        label: caps[1].trim().to_string(),
        path: caps[2].to_string(),
    })
}

/// Result of packing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packed {
    pub text: String,
    /// Checklist lines whose files were injected.
    pub injected: Vec<String>,
    /// Checklist lines that could not be resolved or read.
    pub errors: Vec<String>,
}

/// Expand every checklist line of `input` relative to `root`.
pub fn pack(input: &str, root: &Path, ignore: &[String]) -> Result<Packed> {
    let mut packed = Packed::default();
    let mut out: Vec<String> = Vec::new();

    for line in input.lines() {
        let Some(item) = checklist_item(line) else {
            out.push(line.to_string());
            continue;
        };
        // Command references (`@bash`) are prose, not files.
        if item.path.starts_with('@') {
            out.push(line.to_string());
            continue;
        }

        let files = if is_glob(&item.path) {
            matching_files(root, &item.path, ignore)?
        } else {
            vec![item.path.clone()]
        };
        if files.is_empty() {
            warn!(pattern = %item.path, "checklist pattern matched nothing");
            packed.errors.push(line.to_string());
            push_block(&mut out, &item.label, &item.path, READ_ERROR);
            continue;
        }

        let mut failed = false;
        for file in &files {
            let label = if item.label.is_empty() || files.len() > 1 {
                file_name(file)
            } else {
                item.label.clone()
            };
            match read_project_file(root, file) {
                Ok(contents) => push_block(&mut out, &label, file, &contents),
                Err(err) => {
                    debug!(path = %file, err = %err, "cannot read packed file");
                    failed = true;
                    push_block(&mut out, &label, file, READ_ERROR);
                }
            }
        }
        if failed {
            packed.errors.push(line.to_string());
        } else {
            packed.injected.push(line.to_string());
        }
    }

    packed.text = out.join("\n");
    if input.ends_with('\n') {
        packed.text.push('\n');
    }
    Ok(packed)
}

fn push_block(out: &mut Vec<String>, label: &str, path: &str, contents: &str) {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let fence = fence_for(contents);
    out.push(format!("#### [{label}]({path})"));
    out.push(format!("{fence}{ext}"));
    out.push(contents.strip_suffix('\n').unwrap_or(contents).to_string());
    out.push(fence);
}

/// A backtick fence longer than any run inside `contents`.
pub fn fence_for(contents: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for ch in contents.chars() {
        if ch == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

fn read_project_file(root: &Path, rel: &str) -> Result<String> {
    if !is_inside(rel) {
        anyhow::bail!("path escapes the project: {rel}");
    }
    let path = root.join(rel);
    fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
}

pub fn is_glob(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// True for relative paths without `..` components.
pub fn is_inside(rel: &str) -> bool {
    let path = Path::new(rel);
    !rel.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Project files (relative, `/`-separated, sorted) matching `pattern`.
///
/// Directories named in `ignore` are never descended into.
pub fn matching_files(root: &Path, pattern: &str, ignore: &[String]) -> Result<Vec<String>> {
    let pattern = Pattern::new(pattern.trim_start_matches("./"))
        .with_context(|| format!("invalid glob '{pattern}'"))?;
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let matches = walk_files(root, root, ignore)?
        .into_iter()
        .filter(|rel| pattern.matches_with(rel, options) || matches_globstar(&pattern, rel, options))
        .collect();
    Ok(matches)
}

/// `dir/**/*.rs` should also match `dir/x.rs`.
fn matches_globstar(pattern: &Pattern, rel: &str, options: MatchOptions) -> bool {
    let raw = pattern.as_str();
    if !raw.contains("**/") {
        return false;
    }
    Pattern::new(&raw.replacen("**/", "", 1))
        .map(|p| p.matches_with(rel, options))
        .unwrap_or(false)
}

/// Every file below `dir`, relative to `root`, sorted.
pub fn walk_files(root: &Path, dir: &Path, ignore: &[String]) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir).sort_by_file_name().into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry
                .file_name()
                .to_str()
                .is_some_and(|name| ignore.iter().any(|ignored| ignored == name))
    });
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(rel) = rel.to_str() else {
            continue;
        };
        files.push(rel.replace('\\', "/"));
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ignore() -> Vec<String> {
        vec![".git".to_string(), "node_modules".to_string()]
    }

    fn project() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("src/nested")).expect("mkdir");
        fs::create_dir_all(root.join("node_modules/dep")).expect("mkdir");
        fs::write(root.join("src/a.js"), "export const a = 1\n").expect("write");
        fs::write(root.join("src/b.js"), "export const b = 2\n").expect("write");
        fs::write(root.join("src/nested/c.js"), "c\n").expect("write");
        fs::write(root.join("node_modules/dep/index.js"), "dep\n").expect("write");
        fs::write(root.join("README.md"), "# Readme\n").expect("write");
        temp
    }

    #[test]
    fn expands_single_file_with_extension_fence() {
        let temp = project();
        let packed = pack("Fix this:\n- [Main](src/a.js)\n", temp.path(), &ignore()).expect("pack");
        assert_eq!(
            packed.text,
            "Fix this:\n#### [Main](src/a.js)\n```js\nexport const a = 1\n```\n"
        );
        assert_eq!(packed.injected, vec!["- [Main](src/a.js)"]);
        assert!(packed.errors.is_empty());
    }

    #[test]
    fn glob_expands_sorted_and_skips_ignored() {
        let temp = project();
        let packed = pack("- [](**/*.js)", temp.path(), &ignore()).expect("pack");
        let headings: Vec<&str> = packed
            .text
            .lines()
            .filter(|l| l.starts_with("####"))
            .collect();
        assert_eq!(
            headings,
            vec![
                "#### [a.js](src/a.js)",
                "#### [b.js](src/b.js)",
                "#### [c.js](src/nested/c.js)",
            ]
        );
    }

    #[test]
    fn unreadable_items_are_reported_not_fatal() {
        let temp = project();
        let packed = pack("- [](missing.txt)\n- [](src/none/*.rs)", temp.path(), &ignore())
            .expect("pack");
        assert_eq!(packed.errors.len(), 2);
        assert!(packed.text.contains(READ_ERROR));
        assert!(packed.injected.is_empty());
    }

    #[test]
    fn fence_outgrows_inner_backticks() {
        assert_eq!(fence_for("plain"), "```");
        assert_eq!(fence_for("```rust\n```"), "````");
    }

    #[test]
    fn rejects_escaping_paths() {
        assert!(is_inside("src/a.js"));
        assert!(!is_inside("../secret"));
        assert!(!is_inside("/etc/passwd"));
        assert!(!is_inside(""));
    }

    #[test]
    fn recognizes_checklist_lines() {
        let item = checklist_item("  - [x] [Label](dir/file.rs)").expect("item");
        assert_eq!(item.label, "Label");
        assert_eq!(item.path, "dir/file.rs");
        assert!(checklist_item("just prose [a](b) here").is_none());
    }
}
