#![warn(missing_docs)]
//! # Timebox
//!
//! Time-bounded test execution with hardware-independent time limits.
//!
//! - **Calibrated limits**: cases declare limits in abstract time units; each
//!   test set measures a reference workload to convert them to seconds
//! - **Forced cancellation**: by default every case runs in a fresh worker
//!   process that is killed when it misses its deadline
//! - **Stack budgets**: actions run on a dedicated thread with a configurable
//!   stack, so deep recursion cannot take down the harness
//! - **Closed result taxonomy**: outcomes are classified into [`ResultCode`]s
//!   and tallied per set
//!
//! ## Quick Start
//!
//! ```ignore
//! use timebox::prelude::*;
//!
//! struct Squares { expected: u64, seen: Recorder<u64> }
//!
//! impl TestCase<fn(u64) -> u64> for Squares {
//!     fn time_limit(&self) -> f64 { 1.0 }
//!     fn description(&self) -> &str { "square of 12" }
//!     fn perform(&self, square: &fn(u64) -> u64) -> Result<(), Fault> {
//!         self.seen.record(square(12));
//!         Ok(())
//!     }
//!     fn verify(&self, _: &()) -> Verdict {
//!         match self.seen.take() {
//!             Some(v) if v == self.expected => Verdict::success("OK"),
//!             _ => Verdict::wrong_result("mismatch"),
//!         }
//!     }
//! }
//!
//! fn build() -> Result<TestModule, EngineError> {
//!     let square: fn(u64) -> u64 = |x| x * x;
//!     let set = TestSet::builder("Squares", square)
//!         .build()?
//!         .with_case(Squares { expected: 144, seen: Recorder::new() });
//!     Ok(TestModule::new().with_set("squares", set))
//! }
//!
//! fn main() {
//!     if let Err(e) = timebox::run(build) {
//!         eprintln!("Error: {e}");
//!         std::process::exit(1);
//!     }
//! }
//! ```

pub use timebox_core::{
    Action, CaseOutcome, CaseRunner, CaseSummary, Completion, DEFAULT_STACK_MIB, EngineError,
    Fault, FaultKind, NullReporter, RawOutcome, Recorder, Reporter, ResultCode, RunOptions,
    RunRequest, SetSummary, SpeedFactor, Suite, Tally, TestCase, TestModule, TestSet,
    TestSetBuilder, ThreadRunner, Verdict, calculate_speed_factor, fibonacci,
};

pub use timebox_cli::{IsolationMode, OutputFormat, ProcessRunner, TextReporter, TimeboxConfig};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        EngineError, Fault, FaultKind, Recorder, ResultCode, TestCase, TestModule, TestSet,
        Verdict,
    };
}

/// Run the Timebox CLI harness.
///
/// Call this from your test binary's `main()` with a closure that builds the
/// test module:
/// ```ignore
/// fn main() {
///     timebox::run(build_module).unwrap();
/// }
/// ```
pub use timebox_cli::run;
