//! Outcome Classification
//!
//! Turns a raw execution outcome plus the case's declared expectations into a
//! result code and message. Precedence, first match wins:
//!
//! 1. fault raised, none expected → `UnexpectedExceptionThrown`
//! 2. fault raised, different kind expected → `IncorrectExceptionThrown`
//! 3. fault raised, expected kind → `ExpectedExceptionThrown`
//! 4. worker terminated → `UnexpectedProgramTermination`
//! 5. no fault, one expected → `ExceptionNotThrown`
//! 6. timed out → `Timeout`
//! 7. otherwise the verifier decides (`Success`, `LowEfficiency`, `WrongResult`)

use crate::{Completion, EngineError, FaultKind, ResultCode, Verdict};
use serde::{Deserialize, Serialize};

/// Running totals for one run of a test set.
///
/// `passed + failed` equals the number of classified cases; `low_efficiency`
/// is a subset of `passed` and `timed_out` a subset of `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Cases that passed
    pub passed: usize,
    /// Cases that failed
    pub failed: usize,
    /// Failed cases that exceeded their deadline
    pub timed_out: usize,
    /// Passed cases flagged as inefficient
    pub low_efficiency: usize,
}

impl Tally {
    /// Count one classified case.
    pub fn record(&mut self, code: ResultCode) {
        match code {
            ResultCode::NotPerformed => {}
            ResultCode::LowEfficiency => {
                self.passed += 1;
                self.low_efficiency += 1;
            }
            ResultCode::Timeout => {
                self.failed += 1;
                self.timed_out += 1;
            }
            code if code.is_pass() => self.passed += 1,
            _ => self.failed += 1,
        }
    }

    /// Number of classified cases.
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    /// Add another tally into this one.
    pub fn absorb(&mut self, other: &Tally) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.low_efficiency += other.low_efficiency;
    }
}

/// Reject verdicts the engine must never accept from a verifier.
pub fn validate_verdict(verdict: Verdict) -> Result<Verdict, EngineError> {
    if !verdict.code.is_verdict() {
        return Err(EngineError::InvalidResultCode(verdict.code));
    }
    if verdict.message.trim().is_empty() {
        return Err(EngineError::BlankMessage);
    }
    Ok(verdict)
}

/// Classify one execution.
///
/// `verify` is only invoked when the action finished cleanly and nothing was
/// expected; its verdict is validated before being returned.
pub fn classify<V>(
    completion: &Completion,
    expected: Option<&FaultKind>,
    time_limit_units: f64,
    verify: V,
) -> Result<Verdict, EngineError>
where
    V: FnOnce() -> Result<Verdict, EngineError>,
{
    if let Completion::Raised(fault) = completion {
        return Ok(match expected {
            None => Verdict::new(ResultCode::UnexpectedExceptionThrown, fault.message.clone()),
            Some(kind) if *kind != fault.kind => {
                Verdict::new(ResultCode::IncorrectExceptionThrown, fault.message.clone())
            }
            Some(kind) => Verdict::new(
                ResultCode::ExpectedExceptionThrown,
                format!("OK, expected exception {kind} thrown"),
            ),
        });
    }

    if let Completion::Terminated(reason) = completion {
        return Ok(Verdict::new(
            ResultCode::UnexpectedProgramTermination,
            format!("worker terminated unexpectedly ({reason})"),
        ));
    }

    if let Some(kind) = expected {
        return Ok(Verdict::new(
            ResultCode::ExceptionNotThrown,
            format!("error, expected exception {kind} not thrown"),
        ));
    }

    if matches!(completion, Completion::TimedOut) {
        return Ok(Verdict::new(
            ResultCode::Timeout,
            format!("computation interrupted (time limit {time_limit_units} time units exceeded)"),
        ));
    }

    validate_verdict(verify()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fault;

    fn never_verify() -> Result<Verdict, EngineError> {
        panic!("verifier must not run for this outcome")
    }

    fn raised(kind: FaultKind) -> Completion {
        Completion::Raised(Fault::new(kind, "raised in action"))
    }

    #[test]
    fn test_fault_without_expectation_is_unexpected() {
        let verdict = classify(&raised(FaultKind::Panic), None, 1.0, never_verify).unwrap();
        assert_eq!(verdict.code, ResultCode::UnexpectedExceptionThrown);
        assert_eq!(verdict.message, "raised in action");
    }

    #[test]
    fn test_fault_of_other_kind_is_incorrect() {
        let verdict = classify(
            &raised(FaultKind::Overflow),
            Some(&FaultKind::DivideByZero),
            1.0,
            never_verify,
        )
        .unwrap();
        assert_eq!(verdict.code, ResultCode::IncorrectExceptionThrown);
    }

    #[test]
    fn test_expected_fault_passes() {
        let verdict = classify(
            &raised(FaultKind::DivideByZero),
            Some(&FaultKind::DivideByZero),
            1.0,
            never_verify,
        )
        .unwrap();
        assert_eq!(verdict.code, ResultCode::ExpectedExceptionThrown);
        assert!(verdict.message.starts_with("OK"));
    }

    #[test]
    fn test_missing_expected_fault_beats_timeout() {
        let verdict = classify(
            &Completion::TimedOut,
            Some(&FaultKind::DivideByZero),
            1.0,
            never_verify,
        )
        .unwrap();
        assert_eq!(verdict.code, ResultCode::ExceptionNotThrown);
    }

    #[test]
    fn test_timeout_message_names_limit() {
        let verdict = classify(&Completion::TimedOut, None, 2.5, never_verify).unwrap();
        assert_eq!(verdict.code, ResultCode::Timeout);
        assert_eq!(
            verdict.message,
            "computation interrupted (time limit 2.5 time units exceeded)"
        );
    }

    #[test]
    fn test_termination_is_classified() {
        let verdict = classify(
            &Completion::Terminated("signal: 11 (SIGSEGV)".to_string()),
            Some(&FaultKind::Panic),
            1.0,
            never_verify,
        )
        .unwrap();
        assert_eq!(verdict.code, ResultCode::UnexpectedProgramTermination);
    }

    #[test]
    fn test_verifier_decides_clean_finish() {
        let verdict = classify(&Completion::Finished, None, 1.0, || {
            Ok(Verdict::wrong_result("mismatch"))
        })
        .unwrap();
        assert_eq!(verdict, Verdict::wrong_result("mismatch"));
    }

    #[test]
    fn test_engine_codes_from_verifier_are_rejected() {
        for code in ResultCode::ALL.into_iter().filter(|c| !c.is_verdict()) {
            let result = classify(&Completion::Finished, None, 1.0, || {
                Ok(Verdict::new(code, "claims something"))
            });
            assert!(matches!(result, Err(EngineError::InvalidResultCode(c)) if c == code));
        }
    }

    #[test]
    fn test_blank_verifier_message_is_rejected() {
        for message in ["", "   ", "\t\n"] {
            let result = classify(&Completion::Finished, None, 1.0, || {
                Ok(Verdict::success(message))
            });
            assert!(matches!(result, Err(EngineError::BlankMessage)));
        }
    }

    #[test]
    fn test_tally_invariants() {
        let mut tally = Tally::default();
        for code in [
            ResultCode::Success,
            ResultCode::LowEfficiency,
            ResultCode::ExpectedExceptionThrown,
            ResultCode::Timeout,
            ResultCode::WrongResult,
            ResultCode::UnexpectedProgramTermination,
        ] {
            tally.record(code);
        }
        assert_eq!(tally.passed, 3);
        assert_eq!(tally.low_efficiency, 1);
        assert_eq!(tally.failed, 3);
        assert_eq!(tally.timed_out, 1);
        assert_eq!(tally.total(), 6);
    }
}
