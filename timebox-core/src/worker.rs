//! Worker Process Entry Point
//!
//! The worker side of process isolation. The harness binary re-executes
//! itself with the worker flag, rebuilds its test module, and then serves one
//! case for the supervisor: `Perform` runs the action on a dedicated thread
//! with the requested stack, `Verify` runs the verifier afterwards in the same
//! process, `Shutdown` ends the loop. The supervisor enforces the deadline by
//! killing this process.
//!
//! On Unix the pipes are inherited as fds named by `TIMEBOX_IPC_FD`; elsewhere
//! stdin/stdout are used.

use crate::bounded::{Action, ActionThread, Waited};
use crate::runner::run_verifier;
use crate::{EngineError, Verdict};
use std::sync::atomic::{AtomicBool, Ordering};
use timebox_ipc::{
    FrameError, FrameReader, FrameWriter, IPC_FD_ENV, PROTOCOL_VERSION, SupervisorCommand,
    WorkerCapabilities, WorkerMessage,
};
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

static WORKER_PROCESS: AtomicBool = AtomicBool::new(false);

/// Mark this process as an isolated worker. Call before building test sets.
pub fn enter_worker_mode() {
    WORKER_PROCESS.store(true, Ordering::Relaxed);
}

/// Whether [`enter_worker_mode`] was called.
pub fn is_worker_process() -> bool {
    WORKER_PROCESS.load(Ordering::Relaxed)
}

/// What a worker can look cases up in.
pub trait WorkerTarget {
    /// Number of test sets, advertised in the handshake.
    fn set_count(&self) -> usize;

    /// Action of case `index` in set `set`.
    fn action(&self, set: &str, index: usize) -> Result<Action, EngineError>;

    /// Run the verifier of case `index` in set `set`.
    fn verify(&self, set: &str, index: usize) -> Result<Verdict, EngineError>;
}

enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        if let Some((r, w)) = val.split_once(',') {
            if let (Ok(read_fd), Ok(write_fd)) = (r.parse::<i32>(), w.parse::<i32>()) {
                return IpcTransport::Fds { read_fd, write_fd };
            }
        }
        warn!(value = %val, "invalid {IPC_FD_ENV} (expected <read_fd>,<write_fd>), falling back to stdio");
    }
    IpcTransport::Stdio
}

/// Worker main loop
pub struct WorkerMain {
    reader: FrameReader<Box<dyn std::io::Read>>,
    writer: FrameWriter<Box<dyn std::io::Write>>,
}

impl WorkerMain {
    /// Connect to the supervisor over the inherited fds, or stdin/stdout.
    pub fn new() -> Self {
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                // SAFETY: the supervisor dup2'd both pipe ends onto these fds
                // before exec and nothing else in this process owns them.
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self::with_streams(Box::new(read_file), Box::new(write_file))
            }
            IpcTransport::Stdio => {
                Self::with_streams(Box::new(std::io::stdin()), Box::new(std::io::stdout()))
            }
        }
    }

    /// Serve over arbitrary streams.
    pub fn with_streams(read: Box<dyn std::io::Read>, write: Box<dyn std::io::Write>) -> Self {
        Self {
            reader: FrameReader::new(read),
            writer: FrameWriter::new(write),
        }
    }

    /// Handshake, then serve commands until `Shutdown` or end of stream.
    pub fn run(&mut self, target: &dyn WorkerTarget) -> Result<(), EngineError> {
        self.writer.write(&WorkerMessage::Hello(WorkerCapabilities {
            protocol_version: PROTOCOL_VERSION,
            set_count: target.set_count() as u32,
            ..WorkerCapabilities::default()
        }))?;

        loop {
            let command: SupervisorCommand = match self.reader.read() {
                Ok(command) => command,
                Err(FrameError::EndOfStream) => break,
                Err(e) => return Err(e.into()),
            };

            match command {
                SupervisorCommand::Perform {
                    set,
                    case,
                    stack_mib,
                } => self.perform(target, &set, case as usize, stack_mib as usize)?,
                SupervisorCommand::Verify { set, case } => {
                    self.verify(target, &set, case as usize)?
                }
                SupervisorCommand::Shutdown => break,
            }
        }

        Ok(())
    }

    fn perform(
        &mut self,
        target: &dyn WorkerTarget,
        set: &str,
        index: usize,
        stack_mib: usize,
    ) -> Result<(), EngineError> {
        debug!(set, index, stack_mib, "performing case");
        let action = match target.action(set, index) {
            Ok(action) => action,
            Err(e) => return self.fail(e),
        };

        let message = match ActionThread::spawn(stack_mib, action)?.wait() {
            Waited::Reported(report) => {
                let elapsed_nanos = report.elapsed.as_nanos() as u64;
                match report.result {
                    Ok(()) => WorkerMessage::Performed { elapsed_nanos },
                    Err(fault) => WorkerMessage::Raised {
                        kind: fault.kind.tag().to_string(),
                        message: fault.message,
                        elapsed_nanos,
                    },
                }
            }
            Waited::TimedOut | Waited::Vanished => WorkerMessage::Failure {
                message: "action thread exited without reporting".to_string(),
            },
        };
        self.writer.write(&message)?;
        Ok(())
    }

    fn verify(
        &mut self,
        target: &dyn WorkerTarget,
        set: &str,
        index: usize,
    ) -> Result<(), EngineError> {
        debug!(set, index, "verifying case");
        let verdict = match run_verifier(|| target.verify(set, index)) {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) | Err(e) => return self.fail(e),
        };
        self.writer.write(&WorkerMessage::Verdict {
            code: verdict.code as u8,
            message: verdict.message,
        })?;
        Ok(())
    }

    fn fail(&mut self, error: EngineError) -> Result<(), EngineError> {
        warn!(%error, "worker cannot serve command");
        self.writer.write(&WorkerMessage::Failure {
            message: error.to_string(),
        })?;
        Ok(())
    }
}

impl Default for WorkerMain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Fault, FaultKind, ResultCode};
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    struct OneCase;

    impl WorkerTarget for OneCase {
        fn set_count(&self) -> usize {
            1
        }

        fn action(&self, set: &str, index: usize) -> Result<Action, EngineError> {
            match (set, index) {
                ("s", 0) => Ok(Box::new(|| Ok(()))),
                ("s", 1) => Ok(Box::new(|| {
                    Err(Fault::new(FaultKind::Overflow, "attempt to add with overflow"))
                })),
                ("s", index) => Err(EngineError::UnknownCase {
                    set: set.to_string(),
                    index,
                }),
                _ => Err(EngineError::UnknownSet(set.to_string())),
            }
        }

        fn verify(&self, _: &str, _: usize) -> Result<Verdict, EngineError> {
            Ok(Verdict::wrong_result("mismatch"))
        }
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn serve(commands: &[SupervisorCommand]) -> Vec<WorkerMessage> {
        let mut input = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut input);
            for command in commands {
                writer.write(command).unwrap();
            }
        }
        let output = Shared::default();
        WorkerMain::with_streams(Box::new(Cursor::new(input)), Box::new(output.clone()))
            .run(&OneCase)
            .unwrap();

        let bytes = output.0.lock().unwrap().clone();
        let mut reader = FrameReader::new(Cursor::new(bytes));
        let mut messages = Vec::new();
        while let Ok(message) = reader.read::<WorkerMessage>() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_perform_then_verify() {
        let messages = serve(&[
            SupervisorCommand::Perform {
                set: "s".into(),
                case: 0,
                stack_mib: 1,
            },
            SupervisorCommand::Verify {
                set: "s".into(),
                case: 0,
            },
            SupervisorCommand::Shutdown,
        ]);

        assert_eq!(messages.len(), 3);
        assert!(matches!(&messages[0], WorkerMessage::Hello(caps) if caps.set_count == 1));
        assert!(matches!(messages[1], WorkerMessage::Performed { .. }));
        assert!(matches!(
            &messages[2],
            WorkerMessage::Verdict { code, message }
                if *code == ResultCode::WrongResult as u8 && message == "mismatch"
        ));
    }

    #[test]
    fn test_raised_fault_carries_tag() {
        let messages = serve(&[SupervisorCommand::Perform {
            set: "s".into(),
            case: 1,
            stack_mib: 1,
        }]);

        match &messages[1] {
            WorkerMessage::Raised { kind, message, .. } => {
                assert_eq!(FaultKind::from_tag(kind), FaultKind::Overflow);
                assert_eq!(message, "attempt to add with overflow");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_unknown_case_is_reported() {
        let messages = serve(&[SupervisorCommand::Perform {
            set: "s".into(),
            case: 7,
            stack_mib: 1,
        }]);

        assert!(matches!(
            &messages[1],
            WorkerMessage::Failure { message } if message.contains("no case 7")
        ));
    }
}
