//! Console and JSON reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use timebox_core::{CaseOutcome, Reporter, SetSummary, Tally};

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Line-per-case console output
    #[default]
    Human,
    /// JSON document written after the run
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}

/// Streams results as each case finishes.
///
/// `Reporter` callbacks cannot fail, so the first write error is kept and
/// returned by [`finish`](Self::finish).
pub struct TextReporter<W: Write> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> TextReporter<W> {
    /// Report to `out`.
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    fn emit(&mut self, line: std::fmt::Arguments<'_>) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.out.write_fmt(line).and_then(|_| self.out.flush()) {
            self.error = Some(e);
        }
    }

    /// Surface the first write error, if any.
    pub fn finish(self) -> io::Result<W> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.out),
        }
    }
}

impl<W: Write> Reporter for TextReporter<W> {
    fn set_started(&mut self, description: &str) {
        self.emit(format_args!("\n{description}\n"));
    }

    fn case_finished(&mut self, index: usize, outcome: &CaseOutcome, verbose: bool) {
        self.emit(format_args!(
            "Test {:>2}:  {}\n",
            index + 1,
            outcome.status(verbose)
        ));
    }

    fn set_finished(&mut self, _description: &str, tally: &Tally, total: usize) {
        self.emit(format_args!(
            "\nTests completed\n  {:>2}/{:>2} passed ({} low efficiency)\n  {:>2}/{:>2} failed ({} timeout)\n\n",
            tally.passed, total, tally.low_efficiency, tally.failed, total, tally.timed_out
        ));
    }
}

/// Complete machine-readable run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run finished
    pub timestamp: DateTime<Utc>,
    /// Whether time limits were enforced
    pub check_time_limit: bool,
    /// Combined totals of the sets that ran
    pub totals: Tally,
    /// Module score
    pub score: f64,
    /// Every registered set, including ones filtered out (all `NotPerformed`)
    pub sets: Vec<SetSummary>,
}

/// Serialize a report as pretty JSON.
pub fn generate_json_report(report: &RunReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}
