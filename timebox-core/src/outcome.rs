//! Result codes, verifier verdicts and raw execution outcomes.

use crate::{EngineError, Fault};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Closed, ordered taxonomy of case results.
///
/// Only [`Success`](ResultCode::Success), [`LowEfficiency`](ResultCode::LowEfficiency)
/// and [`WrongResult`](ResultCode::WrongResult) may come from a verifier; the
/// others are assigned by the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum ResultCode {
    /// The case has not run in the current cycle
    #[default]
    NotPerformed = 0,
    /// Verifier accepted the result
    Success = 1,
    /// The expected fault was raised
    ExpectedExceptionThrown = 2,
    /// Verifier accepted the result but flagged it as inefficient
    LowEfficiency = 3,
    /// The action exceeded its deadline
    Timeout = 4,
    /// A fault was expected but the action returned normally
    ExceptionNotThrown = 5,
    /// A fault other than the expected one was raised
    IncorrectExceptionThrown = 6,
    /// A fault was raised where none was expected
    UnexpectedExceptionThrown = 7,
    /// The isolated worker died without reporting
    UnexpectedProgramTermination = 8,
    /// Verifier rejected the result
    WrongResult = 9,
}

impl ResultCode {
    /// All codes in order.
    pub const ALL: [ResultCode; 10] = [
        ResultCode::NotPerformed,
        ResultCode::Success,
        ResultCode::ExpectedExceptionThrown,
        ResultCode::LowEfficiency,
        ResultCode::Timeout,
        ResultCode::ExceptionNotThrown,
        ResultCode::IncorrectExceptionThrown,
        ResultCode::UnexpectedExceptionThrown,
        ResultCode::UnexpectedProgramTermination,
        ResultCode::WrongResult,
    ];

    /// Whether a verifier may return this code directly.
    pub fn is_verdict(self) -> bool {
        matches!(
            self,
            ResultCode::Success | ResultCode::LowEfficiency | ResultCode::WrongResult
        )
    }

    /// Whether the case counts towards the passed total.
    pub fn is_pass(self) -> bool {
        matches!(
            self,
            ResultCode::Success | ResultCode::ExpectedExceptionThrown | ResultCode::LowEfficiency
        )
    }

    /// Short status tag printed in non-verbose mode.
    pub fn tag(self) -> &'static str {
        match self {
            ResultCode::NotPerformed => "not performed",
            ResultCode::Success => "OK",
            ResultCode::ExpectedExceptionThrown => "OK, expected exception thrown",
            ResultCode::LowEfficiency => "low efficiency",
            ResultCode::Timeout => "timeout",
            ResultCode::ExceptionNotThrown => "error, expected exception not thrown",
            ResultCode::IncorrectExceptionThrown => "incorrect exception",
            ResultCode::UnexpectedExceptionThrown => "unexpected exception",
            ResultCode::UnexpectedProgramTermination => "unexpected program termination",
            ResultCode::WrongResult => "wrong result",
        }
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ResultCode::ALL
            .get(value as usize)
            .copied()
            .ok_or(EngineError::UnknownResultCode(value))
    }
}

/// What a verifier returns: a code and a non-blank message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Result code; must satisfy [`ResultCode::is_verdict`]
    pub code: ResultCode,
    /// Explanation shown in verbose output
    pub message: String,
}

impl Verdict {
    /// Build a verdict with an arbitrary code (validated by the engine).
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Accepted result.
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ResultCode::Success, message)
    }

    /// Accepted, but slower or costlier than required.
    pub fn low_efficiency(message: impl Into<String>) -> Self {
        Self::new(ResultCode::LowEfficiency, message)
    }

    /// Rejected result.
    pub fn wrong_result(message: impl Into<String>) -> Self {
        Self::new(ResultCode::WrongResult, message)
    }
}

/// How a bounded execution ended. The variants are mutually exclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Action returned normally before the deadline
    Finished,
    /// Action raised a fault that the capture policy accepted
    Raised(Fault),
    /// Deadline expired and the action was cancelled
    TimedOut,
    /// The isolated worker died without reporting
    Terminated(String),
}

/// Raw result of one bounded execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutcome {
    /// Wall time spent in the action (until cancellation on timeout)
    pub elapsed: Duration,
    /// How the execution ended
    pub completion: Completion,
}

impl RawOutcome {
    /// Whether the deadline cancelled the action.
    pub fn timed_out(&self) -> bool {
        matches!(self.completion, Completion::TimedOut)
    }

    /// The captured fault, if any.
    pub fn fault(&self) -> Option<&Fault> {
        match &self.completion {
            Completion::Raised(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Per-case outcome fields, rewritten on every run of the owning set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseOutcome {
    /// The deadline cancelled the action
    pub timeout: bool,
    /// Captured fault, if any
    pub fault: Option<Fault>,
    /// Time spent in the action, in abstract time units
    pub performance_time: f64,
    /// Classification
    pub code: ResultCode,
    /// Classification message
    pub message: String,
}

impl CaseOutcome {
    /// Status text: the full message when verbose, the short tag otherwise.
    pub fn status(&self, verbose: bool) -> &str {
        if verbose { &self.message } else { self.code.tag() }
    }
}
