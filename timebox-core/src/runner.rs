//! Case runners: where a case's action and verifier actually execute.

use crate::bounded::{self, Action, RunRequest};
use crate::{EngineError, Fault, RawOutcome, Verdict};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// One action to run under a deadline.
pub struct CaseJob<'a> {
    /// Name of the owning set within its module
    pub set: &'a str,
    /// Case index within the set
    pub index: usize,
    /// Limits and capture policy
    pub request: &'a RunRequest,
    /// The action, for runners that execute in this process
    pub action: Action,
}

/// Executes cases one at a time.
///
/// The orchestrator calls `perform`, then `verify` only when the verifier is
/// needed, then always `release`.
pub trait CaseRunner {
    /// Run the job's action under its deadline.
    fn perform(&mut self, job: CaseJob<'_>) -> Result<RawOutcome, EngineError>;

    /// Run the verifier of the case performed last. `local` runs it in this
    /// process.
    fn verify(
        &mut self,
        set: &str,
        index: usize,
        local: &dyn Fn() -> Verdict,
    ) -> Result<Verdict, EngineError>;

    /// Drop whatever the last case left behind.
    fn release(&mut self) {}
}

impl<R: CaseRunner + ?Sized> CaseRunner for Box<R> {
    fn perform(&mut self, job: CaseJob<'_>) -> Result<RawOutcome, EngineError> {
        (**self).perform(job)
    }

    fn verify(
        &mut self,
        set: &str,
        index: usize,
        local: &dyn Fn() -> Verdict,
    ) -> Result<Verdict, EngineError> {
        (**self).verify(set, index, local)
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Runs actions on a dedicated thread of the current process.
///
/// Timed-out actions are abandoned rather than killed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRunner;

impl CaseRunner for ThreadRunner {
    fn perform(&mut self, job: CaseJob<'_>) -> Result<RawOutcome, EngineError> {
        bounded::run(job.request, job.action)
    }

    fn verify(
        &mut self,
        _set: &str,
        _index: usize,
        local: &dyn Fn() -> Verdict,
    ) -> Result<Verdict, EngineError> {
        run_verifier(local)
    }
}

/// Run a verifier, turning a panic into an engine error.
pub fn run_verifier<T>(verify: impl FnOnce() -> T) -> Result<T, EngineError> {
    catch_unwind(AssertUnwindSafe(verify)).map_err(|payload| {
        EngineError::Worker(format!("verifier panicked: {}", Fault::from_panic(payload)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Completion, ResultCode};

    fn request() -> RunRequest {
        RunRequest {
            time_limit_secs: 1.0,
            enforce_limit: true,
            expected: None,
            stack_mib: 1,
        }
    }

    #[test]
    fn test_thread_runner_performs_and_verifies() {
        let mut runner = ThreadRunner;
        let request = request();
        let raw = runner
            .perform(CaseJob {
                set: "any",
                index: 0,
                request: &request,
                action: Box::new(|| Ok(())),
            })
            .unwrap();
        assert_eq!(raw.completion, Completion::Finished);

        let verdict = runner.verify("any", 0, &|| Verdict::success("OK")).unwrap();
        assert_eq!(verdict.code, ResultCode::Success);
    }

    #[test]
    fn test_panicking_verifier_is_an_engine_error() {
        let err = ThreadRunner
            .verify("any", 0, &|| panic!("verifier bug"))
            .unwrap_err();
        assert!(err.to_string().contains("verifier bug"), "{err}");
    }
}
