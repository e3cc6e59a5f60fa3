//! Machine Speed Calibration
//!
//! Converts abstract time units into seconds for the current machine by
//! timing a reference workload.
//!
//! The workload runs twice: once to absorb warm-up costs (page faults, cold
//! caches, lazy statics) and once measured. Rust has no collector to force
//! between the two runs, so nothing is quiesced; residual noise from other
//! processes is a known limitation.

use crate::{EngineError, Fault, FaultKind};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Input of the default reference workload.
pub const REFERENCE_INPUT: u32 = 37;

/// A calibration workload. Must be deterministic and CPU-bound.
pub type Workload = Arc<dyn Fn() -> Result<(), Fault> + Send + Sync>;

/// Seconds per abstract time unit on this machine.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeedFactor(f64);

impl SpeedFactor {
    /// One second per unit; used where nothing is timed locally.
    pub const UNIT: SpeedFactor = SpeedFactor(1.0);

    /// Wrap a measured value. `None` unless finite and positive.
    pub fn new(seconds_per_unit: f64) -> Option<Self> {
        (seconds_per_unit.is_finite() && seconds_per_unit > 0.0).then_some(Self(seconds_per_unit))
    }

    /// Raw seconds-per-unit value.
    pub fn seconds_per_unit(self) -> f64 {
        self.0
    }

    /// Convert a declared limit in units to seconds.
    pub fn to_seconds(self, units: f64) -> f64 {
        units * self.0
    }

    /// Convert a measured duration back to units.
    pub fn to_units(self, elapsed: Duration) -> f64 {
        elapsed.as_secs_f64() / self.0
    }
}

/// Naive doubly-recursive Fibonacci; the default reference computation.
pub fn fibonacci(n: u32) -> f64 {
    if n >= 2 {
        fibonacci(n - 1) + fibonacci(n - 2)
    } else {
        n as f64
    }
}

fn reference_workload() -> Result<(), Fault> {
    std::hint::black_box(fibonacci(std::hint::black_box(REFERENCE_INPUT)));
    Ok(())
}

fn run_workload(workload: &(dyn Fn() -> Result<(), Fault> + Send + Sync)) -> Result<(), EngineError> {
    catch_unwind(AssertUnwindSafe(workload))
        .unwrap_or_else(|payload| Err(Fault::from_panic(payload)))
        .map_err(EngineError::Calibration)
}

/// Measure the speed factor with `workload`, or the Fibonacci reference
/// workload when `None`.
///
/// Inside a worker process nothing is measured and [`SpeedFactor::UNIT`] is
/// returned: workers never enforce deadlines themselves.
pub fn calculate_speed_factor(workload: Option<&Workload>) -> Result<SpeedFactor, EngineError> {
    if crate::worker::is_worker_process() {
        return Ok(SpeedFactor::UNIT);
    }

    let custom = workload.is_some();
    let workload: &(dyn Fn() -> Result<(), Fault> + Send + Sync) = match workload {
        Some(w) => w.as_ref(),
        None => &reference_workload,
    };

    run_workload(workload)?;
    let start = Instant::now();
    run_workload(workload)?;
    let elapsed = start.elapsed();

    let factor = SpeedFactor::new(elapsed.as_secs_f64()).ok_or_else(|| {
        EngineError::Calibration(Fault::new(
            FaultKind::InvalidOperation,
            "reference workload completed in zero time",
        ))
    })?;
    debug!(
        seconds_per_unit = factor.seconds_per_unit(),
        custom,
        "calibrated speed factor"
    );
    Ok(factor)
}
