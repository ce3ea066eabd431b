//! Per-phase time, token and cost accounting for one model response.
//!
//! Everything here is a pure function of a [`Timeline`], the reported
//! [`Usage`] and the model's [`Pricing`]; the console only renders the rows.

use std::fmt;
use std::time::Duration;

use crate::core::types::{Pricing, Usage};

/// Offsets measured from the moment a request was sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeline {
    pub first_event: Option<Duration>,
    pub first_reasoning: Option<Duration>,
    pub first_answer: Option<Duration>,
    pub finished: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Read,
    Reason,
    Answer,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Reason => "reason",
            Self::Answer => "answer",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseRow {
    pub phase: Phase,
    pub elapsed: Duration,
    pub tokens: u64,
    pub cost: f64,
}

impl PhaseRow {
    /// Throughput, `0.0` for phases that took no measurable time.
    pub fn tokens_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.tokens as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub step: u32,
    pub rows: Vec<PhaseRow>,
    pub step_cost: f64,
    /// Cost of every earlier response in the chat plus this one.
    pub chat_cost: f64,
    pub elapsed: Duration,
    pub tokens: u64,
}

/// Split one response into read/reason/answer phases.
///
/// The reason row only appears when the model actually reasoned.
pub fn account(
    step: u32,
    usage: &Usage,
    timeline: &Timeline,
    pricing: &Pricing,
    previous_chat_cost: f64,
) -> ProgressReport {
    let read_end = timeline.first_event.unwrap_or(timeline.finished);
    let mut rows = vec![PhaseRow {
        phase: Phase::Read,
        elapsed: read_end,
        tokens: usage.input_tokens,
        cost: usage.input_tokens as f64 * pricing.prompt,
    }];

    let answer_start = timeline.first_answer.unwrap_or(timeline.finished);
    if timeline.first_reasoning.is_some() || usage.reasoning_tokens > 0 {
        let start = timeline.first_reasoning.unwrap_or(answer_start);
        rows.push(PhaseRow {
            phase: Phase::Reason,
            elapsed: answer_start.saturating_sub(start),
            tokens: usage.reasoning_tokens,
            cost: usage.reasoning_tokens as f64 * pricing.completion,
        });
    }

    rows.push(PhaseRow {
        phase: Phase::Answer,
        elapsed: timeline.finished.saturating_sub(answer_start),
        tokens: usage.output_tokens,
        cost: usage.output_tokens as f64 * pricing.completion,
    });

    let step_cost = pricing.cost(usage);
    ProgressReport {
        step,
        rows,
        step_cost,
        chat_cost: previous_chat_cost + step_cost,
        elapsed: timeline.finished,
        tokens: usage.total_tokens(),
    }
}

/// `MM:SS.s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let tenths = elapsed.as_millis() / 100;
    let minutes = tenths / 600;
    let seconds = (tenths % 600) / 10;
    format!("{minutes:02}:{seconds:02}.{}", tenths % 10)
}

pub fn format_cost(cost: f64) -> String {
    format!("${cost:.6}")
}

/// Thousands separated with commas.
pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

impl ProgressReport {
    /// One line per phase plus a chat total.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                format!(
                    "step {} | {:<6} | {} | {} | {} T | {:.0} T/s",
                    self.step,
                    row.phase.as_str(),
                    format_elapsed(row.elapsed),
                    format_cost(row.cost),
                    format_count(row.tokens),
                    row.tokens_per_sec(),
                )
            })
            .collect();
        lines.push(format!(
            "chat   | {} | {} | {} T | step {}",
            format_elapsed(self.elapsed),
            format_cost(self.chat_cost),
            format_count(self.tokens),
            format_cost(self.step_cost),
        ));
        lines
    }

    /// Compact single-line form.
    pub fn tiny(&self) -> String {
        format!(
            "step {} | {} | {} | {} T | chat {}",
            self.step,
            format_elapsed(self.elapsed),
            format_cost(self.step_cost),
            format_count(self.tokens),
            format_cost(self.chat_cost),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn pricing() -> Pricing {
        Pricing {
            prompt: 0.000_001,
            completion: 0.000_002,
            ..Pricing::default()
        }
    }

    #[test]
    fn phases_partition_the_response() {
        let timeline = Timeline {
            first_event: Some(ms(500)),
            first_reasoning: Some(ms(500)),
            first_answer: Some(ms(2_500)),
            finished: ms(4_500),
        };
        let report = account(3, &Usage::new(1_000, 200, 400), &timeline, &pricing(), 0.5);

        let phases: Vec<_> = report.rows.iter().map(|r| r.phase).collect();
        assert_eq!(phases, vec![Phase::Read, Phase::Reason, Phase::Answer]);
        assert_eq!(report.rows[1].elapsed, ms(2_000));
        assert_eq!(report.rows[2].elapsed, ms(2_000));
        assert!((report.rows[2].tokens_per_sec() - 200.0).abs() < 1e-9);

        let summed: f64 = report.rows.iter().map(|r| r.cost).sum();
        assert!((summed - report.step_cost).abs() < 1e-12);
        assert!((report.chat_cost - (0.5 + report.step_cost)).abs() < 1e-12);
        assert_eq!(report.tokens, 1_600);
    }

    #[test]
    fn reason_row_is_omitted_without_reasoning() {
        let timeline = Timeline {
            first_event: Some(ms(100)),
            first_reasoning: None,
            first_answer: Some(ms(100)),
            finished: ms(1_100),
        };
        let report = account(1, &Usage::new(10, 0, 50), &timeline, &pricing(), 0.0);
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[1].phase, Phase::Answer);
        assert_eq!(report.rows[1].elapsed, ms(1_000));
    }

    #[test]
    fn zero_elapsed_has_zero_throughput() {
        let report = account(1, &Usage::new(5, 0, 5), &Timeline::default(), &pricing(), 0.0);
        assert!(report.rows.iter().all(|r| r.tokens_per_sec() == 0.0));
    }

    #[test]
    fn formats_match_console_units() {
        assert_eq!(format_elapsed(ms(83_450)), "01:23.4");
        assert_eq!(format_cost(0.0012), "$0.001200");
        assert_eq!(format_count(1_234_567), "1,234,567");
        assert_eq!(format_count(999), "999");
    }

    #[test]
    fn tiny_mode_is_one_line() {
        let report = account(2, &Usage::new(10, 0, 10), &Timeline::default(), &pricing(), 0.0);
        assert!(!report.tiny().contains('\n'));
        assert_eq!(report.lines().len(), report.rows.len() + 1);
    }
}
