//! Rendered prompts: the session's system message and the test report fed
//! back to the model after a failing step.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::test_output::{TestKind, TestRecord, TestRunSummary};
use crate::io::commands::UnpackCommand;
use crate::io::pack::fence_for;
use crate::io::paths::PairloopPaths;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const REPORT_TEMPLATE: &str = include_str!("prompts/report.md");

/// Record kinds reported back to the model, in report order.
pub const REPORTED_KINDS: [TestKind; 4] = [
    TestKind::Fail,
    TestKind::Cancelled,
    TestKind::TypeError,
    TestKind::Todo,
];

static TEMPLATES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.add_template("system", SYSTEM_TEMPLATE)
        .expect("system template should be valid");
    env.add_template("report", REPORT_TEMPLATE)
        .expect("report template should be valid");
    env
});

#[derive(Debug, Serialize)]
struct CommandContext {
    name: &'static str,
    help: &'static str,
    example: &'static str,
}

/// The built-in system prompt, without project overrides.
pub fn render_system_template() -> Result<String> {
    let commands: Vec<CommandContext> = UnpackCommand::ALL
        .into_iter()
        .map(|cmd| CommandContext {
            name: cmd.name(),
            help: cmd.help(),
            example: cmd.example(),
        })
        .collect();
    let names = UnpackCommand::ALL
        .iter()
        .map(|cmd| format!("@{}", cmd.name()))
        .collect::<Vec<_>>()
        .join(", ");
    let rendered = TEMPLATES
        .get_template("system")?
        .render(context! { commands => commands, names => names })?;
    Ok(rendered)
}

/// System message for a new session: the template, then `.pairloop/system.md`
/// and `.pairloop/agent.md` when they exist, separated by blank lines.
pub fn system_prompt(paths: &PairloopPaths) -> Result<String> {
    let mut parts = vec![render_system_template()?];
    for path in [&paths.system_override_path, &paths.agent_override_path] {
        if let Some(text) = read_override(path)? {
            debug!(path = %path.display(), "appending system override");
            parts.push(text);
        }
    }
    Ok(parts.join("\n\n"))
}

fn read_override(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

#[derive(Debug, Serialize)]
struct CountItem {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct ReportSection {
    title: &'static str,
    records: Vec<ReportRecord>,
}

#[derive(Debug, Serialize)]
struct ReportRecord {
    location: String,
    fence: String,
    lang: &'static str,
    body: String,
}

impl ReportRecord {
    fn from_record(record: &TestRecord) -> Self {
        let doc = record
            .doc
            .as_ref()
            .and_then(|doc| serde_yaml::to_string(doc).ok());
        let (lang, body) = match doc {
            Some(yaml) => ("yaml", yaml.trim_end().to_string()),
            None => ("", record_text(record)),
        };
        Self {
            location: record.location_label(),
            fence: fence_for(&body),
            lang,
            body,
        }
    }
}

fn record_text(record: &TestRecord) -> String {
    let head = match record.kind {
        TestKind::TypeError => format!("TS{}: {}", record.number, record.description),
        _ => format!("{} - {}", record.number, record.description),
    };
    match record.detail.as_deref() {
        Some(detail) => format!("{head}\n{detail}"),
        None => head,
    }
}

/// Markdown report of a test run, used as the next user prompt.
///
/// `note` is free text the user typed at a gate.
pub fn render_report(summary: &TestRunSummary, note: Option<&str>) -> Result<String> {
    let counts: Vec<CountItem> = summary
        .counts()
        .lines()
        .into_iter()
        .map(|(key, value)| CountItem { key, value })
        .collect();
    let sections: Vec<ReportSection> = REPORTED_KINDS
        .into_iter()
        .map(|kind| ReportSection {
            title: kind.as_str(),
            records: summary.records_of(kind).map(ReportRecord::from_record).collect(),
        })
        .filter(|section| !section.records.is_empty())
        .collect();
    let rendered = TEMPLATES.get_template("report")?.render(context! {
        counts => counts,
        sections => sections,
        note => note.map(str::trim).filter(|s| !s.is_empty()),
    })?;
    Ok(rendered)
}
