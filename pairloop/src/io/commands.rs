//! Commands a model can embed in its answer as `#### [label](@name)` blocks.
//!
//! The set is closed: [`UnpackCommand::from_name`] is the whole registry.

use std::collections::BTreeSet;
use std::fs;
use std::iter;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use crate::io::pack::{checklist_item, is_glob, is_inside, matching_files, walk_files};
use crate::io::process::{ProcessLimits, run_bounded};
use crate::io::unpack::{FileBlock, ParsedAnswer};

const BASH_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Everything a command may look at while it runs.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub root: &'a Path,
    pub dry_run: bool,
    pub ignore: &'a [String],
    pub bash_timeout: Duration,
    /// The block that invoked the command.
    pub block: &'a FileBlock,
    pub parsed: &'a ParsedAnswer,
}

impl<'a> CommandContext<'a> {
    fn lines(self) -> impl Iterator<Item = &'a str> {
        self.block
            .content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }
}

pub type Lines<'a> = Box<dyn Iterator<Item = String> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackCommand {
    Bash,
    Get,
    List,
    Remove,
    Summary,
    Validate,
}

impl UnpackCommand {
    pub const ALL: [Self; 6] = [
        Self::Bash,
        Self::Get,
        Self::List,
        Self::Remove,
        Self::Summary,
        Self::Validate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Get => "get",
            Self::List => "ls",
            Self::Remove => "rm",
            Self::Summary => "summary",
            Self::Validate => "validate",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Self::Bash => "Run the block with bash in the project root",
            Self::Get => "Request project files for the next prompt, one file or pattern per line",
            Self::List => "List project files, one directory or pattern per line",
            Self::Remove => "Remove project files, one path per line",
            Self::Summary => "Short summary of what this answer changes",
            Self::Validate => {
                "Validate the answer by listing every file and command it is expected to contain"
            }
        }
    }

    pub fn example(self) -> &'static str {
        match self {
            Self::Bash => "```bash\npnpm install\n```",
            Self::Get => "```\nsrc/index.js\ntypes/**\npackage.json\n```",
            Self::List => "```\ntypes\nsrc/**/*.test.js\n```",
            Self::Remove => "```\nsrc/obsolete.js\n```",
            Self::Summary => "```\nFixed the date parser and added tests.\n```",
            Self::Validate => "```markdown\n- [](src/index.js)\n- [Setting up the project](@bash)\n```",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.name() == name)
    }

    /// Lines describing what the command did. Nothing runs until iterated.
    pub fn run<'a>(self, ctx: CommandContext<'a>) -> Lines<'a> {
        match self {
            Self::Bash => Box::new(iter::once_with(move || run_bash(ctx)).flatten()),
            Self::Get => Box::new(ctx.lines().map(|line| format!("- []({line})"))),
            Self::List => Box::new(ctx_or_root(ctx).flat_map(move |target| list(ctx, target))),
            Self::Remove => Box::new(ctx.lines().map(move |path| remove(ctx, path))),
            Self::Summary => Box::new(ctx.lines().map(str::to_string)),
            Self::Validate => Box::new(iter::once_with(move || validate(ctx)).flatten()),
        }
    }
}

/// Lines for a command name outside the registry.
pub fn unknown_command_lines(name: &str) -> Vec<String> {
    let mut lines = vec![
        format!("! Unknown command: @{name}"),
        "! Available commands:".to_string(),
    ];
    lines.extend(
        UnpackCommand::ALL
            .iter()
            .map(|cmd| format!(" - {} - {}", cmd.name(), cmd.help())),
    );
    lines
}

fn ctx_or_root<'a>(ctx: CommandContext<'a>) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    if ctx.lines().next().is_none() {
        Box::new(iter::once("."))
    } else {
        Box::new(ctx.lines())
    }
}

fn run_bash(ctx: CommandContext<'_>) -> Vec<String> {
    let script = ctx.block.content.as_str();
    if ctx.dry_run {
        let mut lines = vec!["• @bash (dry run)".to_string()];
        lines.extend(script.lines().map(|line| format!("  $ {line}")));
        return lines;
    }

    debug!(root = %ctx.root.display(), "running @bash block");
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(script).current_dir(ctx.root);
    let limits = ProcessLimits {
        timeout: ctx.bash_timeout,
        output_limit_bytes: BASH_OUTPUT_LIMIT_BYTES,
    };
    let output = match run_bounded(cmd, limits) {
        Ok(output) => output,
        Err(err) => return vec![format!("! Error: bash: {err:#}")],
    };

    let mut lines = vec!["@bash".to_string()];
    lines.extend(output.stdout_text().lines().map(|line| format!("  {line}")));
    lines.extend(output.stderr_text().lines().map(|line| format!("  ! {line}")));
    if output.timed_out {
        warn!(timeout_secs = ctx.bash_timeout.as_secs(), "@bash block timed out");
        lines.push(format!("  ! timed out after {:?}", ctx.bash_timeout));
    } else {
        match output.exit_code() {
            Some(code) => lines.push(format!("  exit {code}")),
            None => lines.push("  ! killed by signal".to_string()),
        }
    }
    lines
}

fn list(ctx: CommandContext<'_>, target: &str) -> Vec<String> {
    if target != "." && !is_inside(target) {
        return vec![format!("! Error: refusing to list outside the project: {target}")];
    }
    let dir = ctx.root.join(target);
    let found = if dir.is_dir() {
        walk_files(ctx.root, &dir, ctx.ignore)
    } else if is_glob(target) {
        matching_files(ctx.root, target, ctx.ignore)
    } else if dir.is_file() {
        Ok(vec![target.to_string()])
    } else {
        Ok(Vec::new())
    };
    match found {
        Ok(files) if files.is_empty() => vec![format!("! No files match: {target}")],
        Ok(files) => files.into_iter().map(|f| format!("- {f}")).collect(),
        Err(err) => vec![format!("! Error: ls {target}: {err:#}")],
    }
}

fn remove(ctx: CommandContext<'_>, rel: &str) -> String {
    if !is_inside(rel) {
        return format!("! Error: refusing to remove outside the project: {rel}");
    }
    let path = ctx.root.join(rel);
    if !path.exists() {
        return format!("! Not found: {rel}");
    }
    if path.is_dir() {
        return format!("! Error: {rel} is a directory");
    }
    if ctx.dry_run {
        return format!("• rm {rel}");
    }
    match fs::remove_file(&path) {
        Ok(()) => format!("- removed {rel}"),
        Err(err) => format!("! Error: remove {rel}: {err}"),
    }
}

fn validate(ctx: CommandContext<'_>) -> Vec<String> {
    let requested: Vec<String> = ctx
        .lines()
        .filter_map(checklist_item)
        .map(|item| item.path)
        .collect();
    let produced: Vec<String> = ctx
        .parsed
        .blocks
        .iter()
        .map(|block| block.path.clone())
        .filter(|path| path != "@validate")
        .collect();

    let requested_set: BTreeSet<&String> = requested.iter().collect();
    let produced_set: BTreeSet<&String> = produced.iter().collect();
    if requested_set == produced_set {
        return vec![" + Expected validation of files 100% valid".to_string()];
    }

    let mark = |present: bool| if present { "+" } else { "-" };
    let mut lines = vec![" - ! Validation of response files failed".to_string()];
    if !requested.is_empty() {
        lines.push("   Files to validate:".to_string());
        lines.extend(
            requested
                .iter()
                .map(|path| format!("    {} {path}", mark(produced_set.contains(path)))),
        );
    }
    if !produced.is_empty() {
        lines.push("   Files parsed from the answer:".to_string());
        lines.extend(
            produced
                .iter()
                .map(|path| format!("    {} {path}", mark(requested_set.contains(path)))),
        );
    }
    lines
}
