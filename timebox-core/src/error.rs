//! Engine errors.
//!
//! Everything here is fatal to a run. Ordinary test failures are never
//! errors; they are result codes on the case outcome.

use crate::{Fault, ResultCode};
use timebox_ipc::FrameError;
use thiserror::Error;

/// Fatal engine error: a contract breach, an uncontrolled worker failure or
/// an infrastructure failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A time limit (after scaling) that is not a positive number
    #[error("non-positive time limit {0} is incorrect")]
    InvalidTimeLimit(f64),

    /// A verifier returned a code reserved for the engine
    #[error("test engine error: invalid result code {0:?} returned by verifier")]
    InvalidResultCode(ResultCode),

    /// A result code discriminant outside the enumeration
    #[error("test engine error: unknown result code {0}")]
    UnknownResultCode(u8),

    /// A verifier returned an empty or whitespace-only message
    #[error("test engine error: invalid result message")]
    BlankMessage,

    /// A fault escaped the action while time limit checking was disabled and
    /// the fault was not the expected one
    #[error("uncontrolled failure in test action: {0}")]
    Uncontrolled(Fault),

    /// The worker died while time limit checking was disabled
    #[error("uncontrolled worker termination: {0}")]
    UncontrolledTermination(String),

    /// The calibration workload failed
    #[error("speed factor calibration failed: {0}")]
    Calibration(Fault),

    /// A worker thread or process could not be started
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker broke the protocol or reported an internal failure
    #[error("worker error: {0}")]
    Worker(String),

    /// Supervisor/worker pipe failure
    #[error("IPC error: {0}")]
    Ipc(#[from] FrameError),

    /// No test set registered under this name
    #[error("unknown test set: {0}")]
    UnknownSet(String),

    /// Case index out of range for the set
    #[error("test set {set:?} has no case {index}")]
    UnknownCase {
        /// Set name
        set: String,
        /// Requested index
        index: usize,
    },
}
