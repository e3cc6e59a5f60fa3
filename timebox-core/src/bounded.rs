//! Bounded Execution
//!
//! Runs one action on a dedicated thread with a caller-chosen stack size and
//! waits for it up to an absolute deadline.
//!
//! ## Capture policy
//!
//! A fault escaping the action is captured into the outcome only when time
//! limit checking is enabled or the fault kind equals the expected kind.
//! Anything else surfaces as [`EngineError::Uncontrolled`], which aborts the
//! whole run.
//!
//! ## Cancellation
//!
//! A thread cannot be torn down from outside, so [`run`] abandons (detaches)
//! an action thread that misses its deadline; the thread keeps running until
//! the action returns. Non-cooperative cancellation requires the process
//! supervisor, which kills the worker process instead.

use crate::{Completion, EngineError, Fault, FaultKind, RawOutcome};
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Limits above this many seconds are treated as unbounded.
pub const UNBOUNDED_LIMIT_SECS: f64 = 86_400.0;

/// Default stack budget for the action thread, in MiB.
pub const DEFAULT_STACK_MIB: usize = 1;

const MIB: usize = 1024 * 1024;

/// A test action: runs the behaviour under test, may raise a fault.
pub type Action = Box<dyn FnOnce() -> Result<(), Fault> + Send + 'static>;

/// Parameters of one bounded execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Deadline in seconds (already scaled by the speed factor)
    pub time_limit_secs: f64,
    /// Enforce the deadline and capture every fault
    pub enforce_limit: bool,
    /// Fault kind the case expects
    pub expected: Option<FaultKind>,
    /// Stack budget for the action thread, in MiB
    pub stack_mib: usize,
}

impl RunRequest {
    /// Reject non-positive (or NaN) limits.
    pub fn validate(&self) -> Result<(), EngineError> {
        // Written so that NaN fails as well.
        if !(self.time_limit_secs > 0.0) {
            return Err(EngineError::InvalidTimeLimit(self.time_limit_secs));
        }
        Ok(())
    }

    /// Deadline to wait for, or `None` to wait indefinitely.
    pub fn deadline(&self) -> Option<Duration> {
        if !self.enforce_limit || self.time_limit_secs > UNBOUNDED_LIMIT_SECS {
            return None;
        }
        Some(Duration::from_millis((self.time_limit_secs * 1000.0).ceil() as u64))
    }

    /// Whether `fault` is captured into the outcome.
    pub fn captures(&self, fault: &Fault) -> bool {
        self.enforce_limit || self.expected.as_ref() == Some(&fault.kind)
    }

    /// Apply the capture policy to what the action reported.
    pub fn settle(&self, report: ActionReport) -> Result<RawOutcome, EngineError> {
        let completion = match report.result {
            Ok(()) => Completion::Finished,
            Err(fault) if self.captures(&fault) => Completion::Raised(fault),
            Err(fault) => return Err(EngineError::Uncontrolled(fault)),
        };
        Ok(RawOutcome {
            elapsed: report.elapsed,
            completion,
        })
    }

    /// Apply the capture policy to a worker that died without reporting.
    pub fn settle_termination(
        &self,
        elapsed: Duration,
        reason: String,
    ) -> Result<RawOutcome, EngineError> {
        if !self.enforce_limit {
            return Err(EngineError::UncontrolledTermination(reason));
        }
        Ok(RawOutcome {
            elapsed,
            completion: Completion::Terminated(reason),
        })
    }
}

/// What the action thread reports when the action returns or unwinds.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    /// Time spent inside the action
    pub elapsed: Duration,
    /// Normal return or the raised fault
    pub result: Result<(), Fault>,
}

/// Result of waiting on an [`ActionThread`].
#[derive(Debug)]
pub enum Waited {
    /// The action finished and reported
    Reported(ActionReport),
    /// The deadline expired first; the thread was detached
    TimedOut,
    /// The thread went away without reporting
    Vanished,
}

/// A running action on its own thread.
pub struct ActionThread {
    handle: JoinHandle<()>,
    receiver: Receiver<ActionReport>,
}

impl ActionThread {
    /// Start `action` on a thread with a `stack_mib` MiB stack.
    pub fn spawn(stack_mib: usize, action: Action) -> Result<Self, EngineError> {
        let stack_bytes = stack_mib.max(1).checked_mul(MIB).ok_or_else(|| {
            EngineError::Spawn(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("stack budget of {stack_mib} MiB does not fit in memory"),
            ))
        })?;
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("timebox-action".to_string())
            .stack_size(stack_bytes)
            .spawn(move || {
                let start = Instant::now();
                let result = catch_unwind(AssertUnwindSafe(action))
                    .unwrap_or_else(|payload| Err(Fault::from_panic(payload)));
                let elapsed = start.elapsed();
                // Receiver is gone when the waiter gave up on us.
                let _ = sender.send(ActionReport { elapsed, result });
            })?;
        Ok(Self { handle, receiver })
    }

    /// Wait for the action with no deadline.
    pub fn wait(self) -> Waited {
        match self.receiver.recv() {
            Ok(report) => {
                let _ = self.handle.join();
                Waited::Reported(report)
            }
            Err(_) => Waited::Vanished,
        }
    }

    /// Wait for the action for at most `deadline`.
    pub fn wait_timeout(self, deadline: Duration) -> Waited {
        match self.receiver.recv_timeout(deadline) {
            Ok(report) => {
                let _ = self.handle.join();
                Waited::Reported(report)
            }
            // Dropping the handle detaches the thread.
            Err(RecvTimeoutError::Timeout) => Waited::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Waited::Vanished,
        }
    }
}

/// Run `action` in-process under the limits of `request`.
///
/// On timeout the action thread is abandoned, not killed (see module docs).
pub fn run(request: &RunRequest, action: Action) -> Result<RawOutcome, EngineError> {
    request.validate()?;
    let deadline = request.deadline();
    debug!(?deadline, stack_mib = request.stack_mib, "running action on thread");

    let start = Instant::now();
    let thread = ActionThread::spawn(request.stack_mib, action)?;
    let waited = match deadline {
        Some(deadline) => thread.wait_timeout(deadline),
        None => thread.wait(),
    };

    match waited {
        Waited::Reported(report) => request.settle(report),
        Waited::TimedOut => {
            let elapsed = start.elapsed();
            warn!(?elapsed, "action exceeded its deadline; abandoning thread");
            Ok(RawOutcome {
                elapsed,
                completion: Completion::TimedOut,
            })
        }
        Waited::Vanished => request.settle_termination(
            start.elapsed(),
            "action thread exited without reporting".to_string(),
        ),
    }
}
