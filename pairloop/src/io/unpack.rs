//! Turn a model answer into file writes and command runs.
//!
//! An answer block is a `#### [label](path)` heading followed by a fenced
//! code block. Paths starting with `@` name an [`UnpackCommand`].

use std::fs;
use std::iter;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::core::progress::format_count;
use crate::io::commands::{CommandContext, Lines, UnpackCommand, unknown_command_lines};
use crate::io::pack::is_inside;

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#{3,4}\s+\[([^\]]*)\]\(([^)\s]+)\)\s*$").expect("heading regex")
});
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(`{3,})[^`]*$").expect("fence regex"));

/// One file or command block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub label: String,
    pub path: String,
    pub content: String,
    /// 1-based line of the heading.
    pub line: usize,
}

impl FileBlock {
    pub fn is_command(&self) -> bool {
        self.path.starts_with('@')
    }
}

/// A heading that could not be turned into a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub line: usize,
    pub content: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAnswer {
    pub blocks: Vec<FileBlock>,
    pub failures: Vec<ParseFailure>,
}

impl ParsedAnswer {
    pub fn files(&self) -> impl Iterator<Item = &FileBlock> {
        self.blocks.iter().filter(|b| !b.is_command())
    }

    pub fn commands(&self) -> impl Iterator<Item = &FileBlock> {
        self.blocks.iter().filter(|b| b.is_command())
    }
}

/// Split an answer into blocks. Prose between blocks is ignored.
pub fn parse_answer(text: &str) -> ParsedAnswer {
    let lines: Vec<&str> = text.lines().collect();
    let mut parsed = ParsedAnswer::default();
    let mut idx = 0;

    while idx < lines.len() {
        let Some(caps) = HEADING_RE.captures(lines[idx]) else {
            idx += 1;
            continue;
        };
        let heading = idx;
        let mut open = heading + 1;
        while open < lines.len() && lines[open].trim().is_empty() {
            open += 1;
        }
        let fence = lines
            .get(open)
            .and_then(|line| FENCE_RE.captures(line))
            .map(|c| c[1].len());
        let Some(fence_len) = fence else {
            parsed.failures.push(ParseFailure {
                line: heading + 1,
                content: lines[heading].to_string(),
                error: "missing code block after file heading".to_string(),
            });
            idx = heading + 1;
            continue;
        };

        let close = (open + 1..lines.len()).find(|&i| is_closing_fence(lines[i], fence_len));
        let Some(close) = close else {
            parsed.failures.push(ParseFailure {
                line: heading + 1,
                content: lines[heading].to_string(),
                error: "unterminated code block".to_string(),
            });
            break;
        };

        let body = &lines[open + 1..close];
        let mut content = body.join("\n");
        if !body.is_empty() {
            content.push('\n');
        }
        parsed.blocks.push(FileBlock {
            label: caps[1].trim().to_string(),
            path: caps[2].to_string(),
            content,
            line: heading + 1,
        });
        idx = close + 1;
    }

    debug!(
        blocks = parsed.blocks.len(),
        failures = parsed.failures.len(),
        "parsed answer"
    );
    parsed
}

fn is_closing_fence(line: &str, fence_len: usize) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= fence_len && trimmed.bytes().all(|b| b == b'`')
}

#[derive(Debug, Clone, Copy)]
pub struct UnpackOptions<'a> {
    pub root: &'a Path,
    /// Describe what would happen without touching the filesystem.
    pub dry_run: bool,
    pub ignore: &'a [String],
    pub bash_timeout: Duration,
}

/// Apply a parsed answer, yielding one human-readable line per effect.
///
/// Nothing happens until the iterator is driven.
pub fn unpack<'a>(parsed: &'a ParsedAnswer, options: UnpackOptions<'a>) -> Lines<'a> {
    let header = iter::once(if options.dry_run {
        "Extracting files (dry run, nothing is written)".to_string()
    } else {
        "Extracting files".to_string()
    });
    let blocks = parsed
        .blocks
        .iter()
        .flat_map(move |block| unpack_block(parsed, block, options));
    let failures = iter::once_with(move || failure_lines(&parsed.failures)).flatten();
    Box::new(header.chain(blocks).chain(failures))
}

fn unpack_block<'a>(parsed: &'a ParsedAnswer, block: &'a FileBlock, options: UnpackOptions<'a>) -> Lines<'a> {
    let Some(name) = block.path.strip_prefix('@') else {
        return Box::new(iter::once_with(move || write_file(block, options)));
    };
    match UnpackCommand::from_name(name) {
        Some(command) => command.run(CommandContext {
            root: options.root,
            dry_run: options.dry_run,
            ignore: options.ignore,
            bash_timeout: options.bash_timeout,
            block,
            parsed,
        }),
        None => Box::new(unknown_command_lines(name).into_iter()),
    }
}

fn write_file(block: &FileBlock, options: UnpackOptions<'_>) -> String {
    let rel = block.path.as_str();
    if !is_inside(rel) {
        return format!("! Error: refusing to write outside the project: {rel}");
    }
    if block.content.trim().is_empty() {
        return format!("- {rel} - empty content, use @rm to remove a file");
    }
    let size = format_count(block.content.len() as u64);
    let suffix = if block.label.is_empty() || rel.contains(block.label.as_str()) {
        String::new()
    } else {
        format!(" - {}", block.label)
    };
    if options.dry_run {
        return format!("• {rel} ({size} bytes){suffix}");
    }

    let path = options.root.join(rel);
    if let Some(parent) = path.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        return format!("! Error: create {}: {err}", parent.display());
    }
    match fs::write(&path, &block.content) {
        Ok(()) => format!("+ {rel} ({size} bytes){suffix}"),
        Err(err) => format!("! Error: write {rel}: {err}"),
    }
}

/// Failures grouped by error, in first-seen order.
fn failure_lines(failures: &[ParseFailure]) -> Vec<String> {
    let mut groups: Vec<(&str, Vec<&ParseFailure>)> = Vec::new();
    for failure in failures {
        match groups.iter_mut().find(|(error, _)| *error == failure.error) {
            Some((_, items)) => items.push(failure),
            None => groups.push((failure.error.as_str(), vec![failure])),
        }
    }
    let mut lines = Vec::new();
    for (error, items) in groups {
        lines.push(format!("! Error: {error}"));
        let width = items
            .iter()
            .map(|f| f.line.to_string().len())
            .max()
            .unwrap_or(1);
        for item in items {
            lines.push(format!("  # {:>width$} > {}", item.line, item.content));
        }
    }
    lines
}
