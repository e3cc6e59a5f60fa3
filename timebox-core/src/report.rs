//! Reporting hooks and run summaries.

use crate::{CaseOutcome, FaultKind, SpeedFactor, Tally};
use serde::{Deserialize, Serialize};

/// Receives progress while a set runs. All methods default to no-ops.
pub trait Reporter {
    /// A set is about to run.
    fn set_started(&mut self, _description: &str) {}

    /// Case `index` (zero-based) was classified.
    fn case_finished(&mut self, _index: usize, _outcome: &CaseOutcome, _verbose: bool) {}

    /// The set finished; `total` is its case count.
    fn set_finished(&mut self, _description: &str, _tally: &Tally, _total: usize) {}
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Snapshot of one case after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSummary {
    /// Zero-based index within the set
    pub index: usize,
    /// Case description
    pub description: String,
    /// Declared limit in time units
    pub time_limit: f64,
    /// Declared expected fault
    pub expected_fault: Option<FaultKind>,
    /// Outcome of the last run
    pub outcome: CaseOutcome,
}

/// Snapshot of one set after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSummary {
    /// Name within the module
    pub name: String,
    /// Set description
    pub description: String,
    /// Calibrated seconds per time unit
    pub speed_factor: SpeedFactor,
    /// Totals of the last run
    pub tally: Tally,
    /// Per-case snapshots in declaration order
    pub cases: Vec<CaseSummary>,
}
