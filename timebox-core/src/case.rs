//! Test case capability set.

use crate::{Fault, FaultKind, Verdict};
use std::sync::Mutex;

/// A single time-limited test case.
///
/// `P` is the prototype handed to the action (the system under test), `S`
/// the settings handed to the verifier. The action and the verifier run at
/// different times and possibly on different threads, so a case records what
/// it observed in interior-mutable state (see [`Recorder`]).
pub trait TestCase<P, S = ()>: Send + Sync + 'static {
    /// Time limit in abstract units; must be positive.
    fn time_limit(&self) -> f64;

    /// Fault kind the action is expected to raise.
    fn expected_fault(&self) -> Option<FaultKind> {
        None
    }

    /// One-line description.
    fn description(&self) -> &str;

    /// Exercise the system under test. Runs under the deadline.
    fn perform(&self, prototype: &P) -> Result<(), Fault>;

    /// Judge what `perform` recorded. Not deadline-bound.
    ///
    /// Must return `Success`, `LowEfficiency` or `WrongResult` with a
    /// non-blank message; anything else aborts the run.
    fn verify(&self, settings: &S) -> Verdict;
}

/// Slot for passing an observation from `perform` to `verify`.
#[derive(Debug)]
pub struct Recorder<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Recorder<T> {
    /// Empty recorder.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Store an observation, replacing any earlier one.
    pub fn record(&self, value: T) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
    }

    /// Remove and return the observation.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Inspect the observation without removing it.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        f(guard.as_ref())
    }

    /// Forget any observation.
    pub fn clear(&self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_replaces_and_takes() {
        let recorder = Recorder::new();
        assert!(recorder.with(|v| v.is_none()));
        recorder.record(3);
        recorder.record(5);
        assert_eq!(recorder.with(|v| v.copied()), Some(5));
        assert_eq!(recorder.take(), Some(5));
        assert_eq!(recorder.take(), None);
    }

    #[test]
    fn test_clear_forgets_observation() {
        let recorder = Recorder::new();
        recorder.record(vec![1, 2, 3]);
        recorder.clear();
        assert_eq!(recorder.take(), None);
    }

    #[test]
    fn test_recorder_survives_poisoning() {
        let recorder = std::sync::Arc::new(Recorder::new());
        let shared = std::sync::Arc::clone(&recorder);
        let _ = std::thread::spawn(move || {
            shared.with(|_| panic!("poison"));
        })
        .join();
        recorder.record("after");
        assert_eq!(recorder.take(), Some("after"));
    }
}
