//! Parser for raw test-runner output.
//!
//! Understands TAP-style result lines (`ok N - text` / `not ok N - text`) with
//! their indented YAML annotation blocks, TypeScript compiler diagnostics
//! (`file(line,col): error TSxxxx: message`), and the summary marker lines the
//! node test runner prints (`# pass 10`, `ℹ fail 0`, ...).
//!
//! The parser is pure: paths in annotations are resolved against a caller
//! supplied base directory without touching the filesystem.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::error::ParserInconsistency;

static NOT_OK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^not ok (\d+) - (.*)$").expect("not-ok regex is valid"));
static OK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ok (\d+) - (.*)$").expect("ok regex is valid"));
static TS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)\((\d+),(\d+)\): error TS(\d+): (.*)$").expect("ts regex is valid")
});
/// Directives only count at the very end of a result line.
const TODO_DIRECTIVE: &str = "# TODO";
const SKIP_DIRECTIVE: &str = "# SKIP";

const MARKER_PREFIXES: [&str; 2] = ["# ", "ℹ "];
const TIMEOUT_FAILURE: &str = "testTimeoutFailure";

/// Classification of a single parsed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestKind {
    Pass,
    Fail,
    Cancelled,
    Skip,
    Todo,
    TypeError,
}

impl TestKind {
    pub const ALL: [TestKind; 6] = [
        TestKind::Pass,
        TestKind::Fail,
        TestKind::Cancelled,
        TestKind::Skip,
        TestKind::Todo,
        TestKind::TypeError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Cancelled => "cancelled",
            Self::Skip => "skip",
            Self::Todo => "todo",
            Self::TypeError => "type-error",
        }
    }

    pub fn counter(self) -> Counter {
        match self {
            Self::Pass => Counter::Pass,
            Self::Fail => Counter::Fail,
            Self::Cancelled => Counter::Cancelled,
            Self::Skip => Counter::Skip,
            Self::Todo => Counter::Todo,
            Self::TypeError => Counter::TypeError,
        }
    }
}

/// Named integer counters. Duration is tracked separately as a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Counter {
    Tests,
    Suites,
    Pass,
    Fail,
    Cancelled,
    Skip,
    Todo,
    TypeError,
}

impl Counter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tests => "tests",
            Self::Suites => "suites",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Cancelled => "cancelled",
            Self::Skip => "skip",
            Self::Todo => "todo",
            Self::TypeError => "type-error",
        }
    }

    /// Counter announced by a marker line name (`skipped` counts as skip).
    fn from_marker(name: &str) -> Option<Self> {
        match name {
            "tests" => Some(Self::Tests),
            "suites" => Some(Self::Suites),
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            "cancelled" => Some(Self::Cancelled),
            "skipped" => Some(Self::Skip),
            "todo" => Some(Self::Todo),
            _ => None,
        }
    }
}

/// A set of counters where "absent" and "zero" are different things.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestCounts {
    counters: BTreeMap<Counter, u64>,
    duration_ms: Option<f64>,
}

impl TestCounts {
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }

    pub fn contains(&self, counter: Counter) -> bool {
        self.counters.contains_key(&counter)
    }

    pub fn add(&mut self, counter: Counter, n: u64) {
        *self.counters.entry(counter).or_insert(0) += n;
    }

    pub fn set(&mut self, counter: Counter, n: u64) {
        self.counters.insert(counter, n);
    }

    pub fn add_duration(&mut self, ms: f64) {
        *self.duration_ms.get_or_insert(0.0) += ms;
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.duration_ms
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.duration_ms.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Counter, u64)> + '_ {
        self.counters.iter().map(|(k, v)| (*k, *v))
    }

    /// `key: value` pairs in stable order, duration last.
    pub fn lines(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_string()))
            .collect();
        if let Some(ms) = self.duration_ms {
            out.push(("duration_ms".to_string(), format!("{ms}")));
        }
        out
    }

    fn round_duration(&mut self) {
        if let Some(ms) = self.duration_ms.as_mut() {
            *ms = (*ms * 1e3).round() / 1e3;
        }
    }
}

/// One result line (or compiler diagnostic) with its annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRecord {
    pub kind: TestKind,
    /// TAP sequence number, or the `TS` code for type errors.
    pub number: u32,
    pub description: String,
    /// Leading spaces of the result line.
    pub indent: usize,
    pub file: Option<String>,
    /// 1-based (line, column).
    pub position: Option<(u32, u32)>,
    /// Parsed YAML annotation block.
    pub doc: Option<Value>,
    /// Unparsed detail lines (diagnostic continuation, or a YAML block that failed to parse).
    pub detail: Option<String>,
}

impl TestRecord {
    /// `file:line:col` label used in reports.
    pub fn location_label(&self) -> String {
        let (line, col) = self.position.unwrap_or((0, 0));
        format!("{}:{line}:{col}", self.file.as_deref().unwrap_or("?"))
    }

    fn doc_str(&self, key: &str) -> Option<&str> {
        self.doc.as_ref()?.get(key)?.as_str()
    }

    fn doc_f64(&self, key: &str) -> Option<f64> {
        self.doc.as_ref()?.get(key)?.as_f64()
    }
}

/// Everything recovered from one test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestRunSummary {
    pub records: Vec<TestRecord>,
    /// Counters announced by marker lines.
    pub markers: TestCounts,
    /// Counters derived from the records alone.
    pub guess: TestCounts,
    /// Distinct `TS` diagnostic codes.
    pub type_codes: BTreeSet<u32>,
}

impl TestRunSummary {
    /// Effective counters.
    ///
    /// Record-derived counts win for every kind their source produced:
    /// result lines for the test kinds, diagnostics for type errors. Marker
    /// lines supply the rest (tests, suites, duration) and stand alone when
    /// the output contained no result lines at all.
    pub fn counts(&self) -> TestCounts {
        let mut counts = self.markers.clone();
        for kind in TestKind::ALL.into_iter().filter(|kind| self.records_decide(*kind)) {
            let counter = kind.counter();
            let n = self.guess.get(counter);
            if n > 0 || counts.contains(counter) {
                counts.set(counter, n);
            }
        }
        if counts.duration_ms.is_none() {
            counts.duration_ms = self.guess.duration_ms;
        }
        counts
    }

    /// Whether parsed records, not marker lines, count `kind`.
    fn records_decide(&self, kind: TestKind) -> bool {
        let from_diagnostics = |record: &TestRecord| record.kind == TestKind::TypeError;
        if kind == TestKind::TypeError {
            self.records.iter().any(from_diagnostics)
        } else {
            !self.records.iter().all(from_diagnostics)
        }
    }

    pub fn count(&self, kind: TestKind) -> u64 {
        self.counts().get(kind.counter())
    }

    pub fn records_of(&self, kind: TestKind) -> impl Iterator<Item = &TestRecord> + '_ {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    /// True when nothing failed, was cancelled, or failed to type-check.
    pub fn is_clean(&self) -> bool {
        [TestKind::Fail, TestKind::Cancelled, TestKind::TypeError]
            .into_iter()
            .all(|kind| self.count(kind) == 0)
    }

    /// Kinds whose marker counters disagree with the parsed records.
    pub fn inconsistencies(&self) -> Vec<ParserInconsistency> {
        TestKind::ALL
            .into_iter()
            .filter(|kind| self.records_decide(*kind))
            .map(TestKind::counter)
            .filter(|counter| self.markers.contains(*counter))
            .filter(|counter| self.markers.get(*counter) != self.guess.get(*counter))
            .map(|counter| ParserInconsistency {
                counter: counter.as_str().to_string(),
                markers: self.markers.get(counter),
                records: self.guess.get(counter),
            })
            .collect()
    }
}

/// Parse combined test-runner output.
///
/// `stdout` lines are scanned before `stderr` lines. `base` is the directory
/// annotation `location` paths are made relative to.
pub fn parse_test_output(stdout: &str, stderr: &str, base: &Path) -> TestRunSummary {
    let lines: Vec<&str> = stdout
        .split('\n')
        .chain(stderr.split('\n'))
        .map(|line| line.trim_end_matches('\r'))
        .collect();

    let mut summary = TestRunSummary::default();
    let mut i = 0;
    while i < lines.len() {
        let raw = lines[i];
        let row = raw.trim();
        let spaces = indent_of(raw).unwrap_or(0);

        if let Some((failed, caps)) = NOT_OK_RE
            .captures(row)
            .map(|c| (true, c))
            .or_else(|| OK_RE.captures(row).map(|c| (false, c)))
        {
            let (block, next) = collect_block(&lines, i, spaces);
            let number = caps[1].parse().unwrap_or(0);
            let description = caps[2].trim().to_string();
            summary
                .records
                .push(tap_record(failed, number, description, spaces, &block, base));
            i = next;
            continue;
        }

        if let Some(caps) = TS_RE.captures(row) {
            let (block, next) = collect_block(&lines, i, spaces);
            let continuation = trim_blank_tail(&block).join("\n");
            summary.records.push(TestRecord {
                kind: TestKind::TypeError,
                number: caps[4].parse().unwrap_or(0),
                description: caps[5].trim().to_string(),
                indent: spaces,
                file: Some(caps[1].trim().to_string()),
                position: Some((caps[2].parse().unwrap_or(0), caps[3].parse().unwrap_or(0))),
                doc: None,
                detail: (!continuation.is_empty()).then_some(continuation),
            });
            i = next;
            continue;
        }

        apply_marker(row, &mut summary.markers);
        i += 1;
    }

    for record in &summary.records {
        summary.guess.add(record.kind.counter(), 1);
        if record.kind == TestKind::TypeError {
            summary.type_codes.insert(record.number);
        }
        if let Some(ms) = record.doc_f64("duration_ms") {
            summary.guess.add_duration(ms);
        }
    }
    summary.markers.round_duration();
    summary.guess.round_duration();

    debug!(
        records = summary.records.len(),
        type_codes = summary.type_codes.len(),
        "parsed test output"
    );
    summary
}

/// Count of leading spaces, or `None` for a blank line.
fn indent_of(line: &str) -> Option<usize> {
    if line.trim().is_empty() {
        return None;
    }
    Some(line.len() - line.trim_start_matches(' ').len())
}

/// Lines after `start` up to the first non-blank line indented at most `indent`.
fn collect_block<'a>(lines: &[&'a str], start: usize, indent: usize) -> (Vec<&'a str>, usize) {
    let mut j = start + 1;
    while j < lines.len() {
        if let Some(s) = indent_of(lines[j])
            && s <= indent
        {
            break;
        }
        j += 1;
    }
    (lines[start + 1..j].to_vec(), j)
}

fn trim_blank_tail<'a>(block: &[&'a str]) -> Vec<&'a str> {
    let end = block
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(0, |idx| idx + 1);
    block[..end].to_vec()
}

fn tap_record(
    failed: bool,
    number: u32,
    description: String,
    indent: usize,
    block: &[&str],
    base: &Path,
) -> TestRecord {
    let (doc, detail) = parse_yaml_block(block);
    let mut record = TestRecord {
        kind: TestKind::Pass,
        number,
        description,
        indent,
        file: None,
        position: None,
        doc,
        detail,
    };

    let description = record.description.trim_end();
    record.kind = if description.ends_with(TODO_DIRECTIVE) {
        TestKind::Todo
    } else if description.ends_with(SKIP_DIRECTIVE) {
        TestKind::Skip
    } else if record.doc_str("failureType") == Some(TIMEOUT_FAILURE) {
        TestKind::Cancelled
    } else if failed {
        TestKind::Fail
    } else {
        TestKind::Pass
    };

    if let Some(location) = record.doc_str("location").map(str::to_string) {
        let (file, position) = split_location(&location);
        record.file = Some(relative_to(base, &file));
        record.position = Some(position);
    }
    record
}

/// Extract and parse the `---` ... `...` YAML block following a result line.
fn parse_yaml_block(block: &[&str]) -> (Option<Value>, Option<String>) {
    let Some(open) = block.iter().position(|line| !line.trim().is_empty()) else {
        return (None, None);
    };
    if block[open].trim() != "---" {
        let raw = trim_blank_tail(&block[open..]).join("\n");
        return (None, (!raw.is_empty()).then_some(raw));
    }
    let shift = indent_of(block[open]).unwrap_or(0);
    let body: Vec<&str> = block[open + 1..]
        .iter()
        .take_while(|line| line.trim() != "...")
        .map(|line| dedent(line, shift))
        .collect();
    let text = body.join("\n");
    match serde_yaml::from_str::<Value>(&text) {
        Ok(Value::Null) => (None, None),
        Ok(doc) => (Some(doc), None),
        Err(err) => {
            warn!(err = %err, "unparseable yaml annotation block");
            (None, Some(text))
        }
    }
}

fn dedent(line: &str, shift: usize) -> &str {
    let leading = line.len() - line.trim_start_matches(' ').len();
    &line[leading.min(shift)..]
}

/// Split `file:line:col` from the right so drive letters and colons in paths survive.
fn split_location(location: &str) -> (String, (u32, u32)) {
    let parts: Vec<&str> = location.rsplitn(3, ':').collect();
    match parts.as_slice() {
        [col, line, file] => match (line.parse(), col.parse()) {
            (Ok(line), Ok(col)) => (file.to_string(), (line, col)),
            (_, Ok(line)) => (format!("{file}:{line}"), (line, 0)),
            _ => (location.to_string(), (0, 0)),
        },
        [line, file] => match line.parse() {
            Ok(line) => (file.to_string(), (line, 0)),
            Err(_) => (location.to_string(), (0, 0)),
        },
        _ => (location.to_string(), (0, 0)),
    }
}

fn relative_to(base: &Path, file: &str) -> String {
    let path = PathBuf::from(file.trim_start_matches("file://"));
    let resolved = if path.is_absolute() {
        path
    } else {
        base.join(path)
    };
    resolved
        .strip_prefix(base)
        .unwrap_or(resolved.as_path())
        .to_string_lossy()
        .replace('\\', "/")
}

fn apply_marker(row: &str, counts: &mut TestCounts) {
    let Some(rest) = MARKER_PREFIXES
        .iter()
        .find_map(|prefix| row.strip_prefix(prefix))
    else {
        return;
    };
    let Some((name, value)) = rest.split_once(' ') else {
        return;
    };
    let value = value.trim();
    if name == "duration_ms" {
        if let Ok(ms) = value.parse::<f64>() {
            counts.add_duration(ms);
        }
        return;
    }
    if let Some(counter) = Counter::from_marker(name)
        && let Ok(n) = value.parse::<u64>()
    {
        counts.add(counter, n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_RUN: &str = "TAP version 13
# Subtest: parseOutput
    # Subtest: should produce OK
    ok 1 - should produce OK
      ---
      duration_ms: 0.5
      type: 'test'
      ...
    # Subtest: should produce FAIL
    not ok 2 - should produce FAIL
      ---
      duration_ms: 1.25
      location: '/work/proj/src/node.test.js:15:2'
      failureType: 'testCodeFailure'
      error: |-
        Expected values to be strictly equal:

        1 !== 2
      code: 'ERR_ASSERTION'
      ...
    # Subtest: waits forever
    not ok 3 - waits forever
      ---
      duration_ms: 999.0
      location: '/work/proj/src/node.test.js:30:2'
      failureType: 'testTimeoutFailure'
      code: 'ERR_TEST_FAILURE'
      ...
    # Subtest: later
    ok 4 - later # TODO
      ---
      duration_ms: 0.1
      ...
    # Subtest: never
    ok 5 - never # SKIP
      ---
      duration_ms: 0.0
      ...
    1..5
not ok 1 - parseOutput
  ---
  duration_ms: 1001.0
  type: 'suite'
  location: '/work/proj/src/node.test.js:10:1'
  failureType: 'subtestsFailed'
  ...
1..1
# tests 5
# suites 1
# pass 1
# fail 2
# cancelled 1
# skipped 1
# todo 1
# duration_ms 1003.4567
";

    fn parse(stdout: &str) -> TestRunSummary {
        parse_test_output(stdout, "", Path::new("/work/proj"))
    }

    #[test]
    fn parses_nested_node_run() {
        let summary = parse(NODE_RUN);
        let kinds: Vec<TestKind> = summary.records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TestKind::Pass,
                TestKind::Fail,
                TestKind::Cancelled,
                TestKind::Todo,
                TestKind::Skip,
                TestKind::Fail,
            ]
        );

        let failed = &summary.records[1];
        assert_eq!(failed.file.as_deref(), Some("src/node.test.js"));
        assert_eq!(failed.position, Some((15, 2)));
        assert_eq!(failed.doc_str("code"), Some("ERR_ASSERTION"));
        assert_eq!(failed.indent, 4);
        assert_eq!(failed.location_label(), "src/node.test.js:15:2");

        let counts = summary.counts();
        assert_eq!(counts.get(Counter::Tests), 5);
        assert_eq!(counts.get(Counter::Suites), 1);
        assert_eq!(counts.duration_ms(), Some(1003.457));
        assert_eq!(summary.count(TestKind::Fail), 2);
        assert!(!summary.is_clean());
    }

    #[test]
    fn counts_match_records_for_every_kind() {
        let summary = parse(NODE_RUN);
        for kind in TestKind::ALL {
            let records = summary.records_of(kind).count() as u64;
            assert_eq!(summary.count(kind), records, "kind {kind:?}");
        }
    }

    /// The failing suite line counts as a failure next to its failing leaf,
    /// matching the runner's own `# fail 2`.
    #[test]
    fn consistent_fixture_has_no_inconsistencies() {
        let summary = parse(NODE_RUN);
        assert_eq!(summary.inconsistencies(), Vec::new());
    }

    #[test]
    fn mismatched_markers_are_reported() {
        let summary = parse("ok 1 - a\nok 2 - b\n# pass 3\n");
        let issues = summary.inconsistencies();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].counter, "pass");
        assert_eq!(issues[0].markers, 3);
        assert_eq!(issues[0].records, 2);
        // Records stay authoritative.
        assert_eq!(summary.count(TestKind::Pass), 2);
    }

    /// A module-not-found failure has no matching `ok` and ends at the next
    /// top-level line.
    #[test]
    fn single_failure_with_yaml_block() {
        let output = "not ok 1 - suite
  ---
  duration_ms: 12.5
  location: 'src/app.test.js:1:1'
  failureType: 'testCodeFailure'
  error: \"Cannot find module 'missing'\"
  code: 'ERR_MODULE_NOT_FOUND'
  ...
1..1
";
        let summary = parse(output);
        assert_eq!(summary.records.len(), 1);
        let record = &summary.records[0];
        assert_eq!(record.kind, TestKind::Fail);
        assert_eq!(record.doc_str("code"), Some("ERR_MODULE_NOT_FOUND"));
        assert_eq!(record.file.as_deref(), Some("src/app.test.js"));
        assert_eq!(summary.guess.duration_ms(), Some(12.5));
    }

    #[test]
    fn markers_alone_produce_counts() {
        let summary = parse("# pass 10\n# fail 0\n");
        let counts = summary.counts();
        assert_eq!(counts.get(Counter::Pass), 10);
        assert!(counts.contains(Counter::Fail));
        assert_eq!(counts.get(Counter::Fail), 0);
        assert!(summary.records.is_empty());
        assert!(summary.is_clean());
    }

    #[test]
    fn info_markers_and_repeated_runs_accumulate() {
        let summary = parse("ℹ pass 1\nℹ duration_ms 0.25\n# pass 18\n# duration_ms 1.5\n");
        let counts = summary.counts();
        assert_eq!(counts.get(Counter::Pass), 19);
        assert_eq!(counts.duration_ms(), Some(1.75));
    }

    #[test]
    fn type_errors_capture_continuation_lines() {
        let stderr = "src/strategies/fastest.js(75,11): error TS2345: Argument of type 'string'
    is not assignable to parameter of type 'number'.
src/index.js(3,1): error TS2304: Cannot find name 'x'.
src/other.js(9,4): error TS2304: Cannot find name 'y'.
";
        let summary = parse_test_output("", stderr, Path::new("/work/proj"));
        assert_eq!(summary.records.len(), 3);
        let first = &summary.records[0];
        assert_eq!(first.kind, TestKind::TypeError);
        assert_eq!(first.number, 2345);
        assert_eq!(first.file.as_deref(), Some("src/strategies/fastest.js"));
        assert_eq!(first.position, Some((75, 11)));
        assert_eq!(
            first.detail.as_deref(),
            Some("    is not assignable to parameter of type 'number'.")
        );
        assert_eq!(summary.count(TestKind::TypeError), 3);
        assert_eq!(summary.type_codes, BTreeSet::from([2304, 2345]));
        assert!(!summary.is_clean());
    }

    #[test]
    fn blank_lines_do_not_end_annotation_blocks() {
        let output = "not ok 1 - flaky
  ---
  error: 'first'

  code: 'ERR_X'
  ...
# fail 1
";
        let summary = parse(output);
        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.records[0].doc_str("code"), Some("ERR_X"));
        assert_eq!(summary.markers.get(Counter::Fail), 1);
    }

    #[test]
    fn result_without_annotation_has_default_position() {
        let summary = parse("ok 1 - plain\nnot ok 2 - bare\n");
        assert_eq!(summary.records.len(), 2);
        assert_eq!(summary.records[1].kind, TestKind::Fail);
        assert_eq!(summary.records[1].position, None);
        assert_eq!(summary.records[1].location_label(), "?:0:0");
    }

    /// Only a trailing `# TODO` or `# SKIP` is a directive; the same text
    /// inside a test name leaves the verdict alone.
    #[test]
    fn directives_only_count_at_the_end_of_the_line() {
        let summary = parse(
            "not ok 1 - strips # skip markers from names\n\
             not ok 2 - keeps # SKIP in the middle of a name\n\
             ok 3 - lowercase # skip is not a directive\n\
             ok 4 - pending # TODO\n",
        );
        let kinds: Vec<TestKind> = summary.records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![TestKind::Fail, TestKind::Fail, TestKind::Pass, TestKind::Todo]
        );
        assert_eq!(summary.count(TestKind::Fail), 2);
        assert_eq!(summary.count(TestKind::Skip), 0);
        assert!(!summary.is_clean());
    }

    /// Runner markers without result lines keep their counts when the type
    /// checker adds diagnostics to the same run.
    #[test]
    fn diagnostics_do_not_override_runner_markers() {
        let summary = parse_test_output(
            "ℹ tests 10\nℹ pass 10\nℹ fail 0\n",
            "src/index.js(3,1): error TS2304: Cannot find name 'x'.\n",
            Path::new("/work/proj"),
        );
        let counts = summary.counts();
        assert_eq!(counts.get(Counter::Pass), 10);
        assert_eq!(counts.get(Counter::Fail), 0);
        assert_eq!(summary.count(TestKind::TypeError), 1);
        assert_eq!(summary.inconsistencies(), Vec::new());
        assert!(!summary.is_clean());
    }

    #[test]
    fn splits_locations_from_the_right() {
        assert_eq!(
            split_location("C:/proj/a.js:3:7"),
            ("C:/proj/a.js".to_string(), (3, 7))
        );
        assert_eq!(split_location("a.js:3"), ("a.js".to_string(), (3, 0)));
        assert_eq!(split_location("weird"), ("weird".to_string(), (0, 0)));
    }
}
