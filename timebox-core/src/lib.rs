#![warn(missing_docs)]
//! Timebox Core - Time-Bounded Test Execution
//!
//! This crate runs test cases under wall-clock deadlines derived from
//! abstract time units:
//! - Speed calibration converting units to seconds on this machine
//! - Bounded execution on a dedicated thread with its own stack budget
//! - Classification of raw outcomes into [`ResultCode`]s with running totals
//! - Test sets, the test module registry and the isolated worker loop

pub mod bounded;
mod calibrate;
mod case;
mod classify;
mod error;
mod fault;
mod module;
mod outcome;
mod report;
mod runner;
mod set;
mod worker;

pub use bounded::{Action, DEFAULT_STACK_MIB, RunRequest, UNBOUNDED_LIMIT_SECS};
pub use calibrate::{REFERENCE_INPUT, SpeedFactor, Workload, calculate_speed_factor, fibonacci};
pub use case::{Recorder, TestCase};
pub use classify::{Tally, classify, validate_verdict};
pub use error::EngineError;
pub use fault::{Fault, FaultKind};
pub use module::{Suite, TestModule};
pub use outcome::{CaseOutcome, Completion, RawOutcome, ResultCode, Verdict};
pub use report::{CaseSummary, NullReporter, Reporter, SetSummary};
pub use runner::{CaseJob, CaseRunner, ThreadRunner, run_verifier};
pub use set::{RunOptions, TestSet, TestSetBuilder};
pub use worker::{WorkerMain, WorkerTarget, enter_worker_mode, is_worker_process};
