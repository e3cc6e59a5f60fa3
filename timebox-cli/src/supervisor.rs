//! Supervisor Process
//!
//! Spawns one worker process per case, forwards commands over IPC and
//! enforces deadlines by killing the worker.

use std::env;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use timebox_core::bounded::ActionReport;
use timebox_core::{
    CaseJob, CaseRunner, Completion, EngineError, Fault, FaultKind, RawOutcome, ResultCode,
    Verdict,
};
use timebox_ipc::{
    FrameError, FrameReader, FrameWriter, IPC_FD_ENV, PROTOCOL_VERSION, SupervisorCommand,
    WORKER_FLAG, WorkerCapabilities, WorkerMessage,
};
use tracing::{debug, warn};

/// Upper bound on a single poll, so a dead worker is noticed promptly.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Result of polling for data
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: RawFd, timeout: Duration) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let timeout_ms = timeout.as_millis().clamp(1, i32::MAX as u128) as i32;
    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Even if the pipe is closing there may be a final frame to read.
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a pipe pair, returning (read_fd, write_fd).
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // Close-on-exec by default; the child clears it on the two fds it keeps.
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// What [`WorkerHandle::receive`] observed.
#[derive(Debug)]
pub enum Received {
    /// A complete message
    Message(WorkerMessage),
    /// The deadline passed with no message; the worker is still running
    DeadlineExpired,
    /// The worker exited; carries its exit status
    Exited(String),
}

/// Worker process handle
pub struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    capabilities: Option<WorkerCapabilities>,
    msg_read_fd: RawFd,
}

impl WorkerHandle {
    /// Spawn `binary` as a worker using fd 3/4 for IPC and wait for its
    /// handshake for at most `startup_timeout`.
    pub fn spawn(binary: &Path, startup_timeout: Duration) -> Result<Self, EngineError> {
        // cmd_pipe: supervisor writes commands → worker reads from fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg_pipe: worker writes messages from fd 4 → supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(e.into());
            }
        };

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // In the child: dup cmd_read→3, msg_write→4, close originals.
        unsafe {
            command.pre_exec(move || {
                if cmd_read != 3 {
                    libc::dup2(cmd_read, 3);
                    libc::close(cmd_read);
                }
                let flags = libc::fcntl(3, libc::F_GETFD);
                libc::fcntl(3, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                if msg_write != 4 {
                    libc::dup2(msg_write, 4);
                    libc::close(msg_write);
                }
                let flags = libc::fcntl(4, libc::F_GETFD);
                libc::fcntl(4, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                libc::close(cmd_write);
                libc::close(msg_read);

                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(e.into());
            }
        };

        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        let mut handle = Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            capabilities: None,
            msg_read_fd: msg_read,
        };
        debug!(pid = handle.child.id(), "spawned worker");

        handle.wait_for_hello(startup_timeout)?;
        Ok(handle)
    }

    /// Wait for Hello message from worker and validate protocol version
    fn wait_for_hello(&mut self, timeout: Duration) -> Result<(), EngineError> {
        match self.receive(Some(timeout))? {
            Received::Message(WorkerMessage::Hello(caps)) => {
                if caps.protocol_version != PROTOCOL_VERSION {
                    return Err(EngineError::Worker(format!(
                        "protocol mismatch: expected version {PROTOCOL_VERSION}, got {}",
                        caps.protocol_version
                    )));
                }
                self.capabilities = Some(caps);
                Ok(())
            }
            Received::Message(other) => Err(EngineError::Worker(format!(
                "expected Hello, got {other:?}"
            ))),
            Received::DeadlineExpired => {
                self.kill();
                Err(EngineError::Worker(format!(
                    "worker did not report in within {timeout:?}"
                )))
            }
            Received::Exited(status) => Err(EngineError::Worker(format!(
                "worker exited during startup ({status})"
            ))),
        }
    }

    /// Worker capabilities from the handshake
    pub fn capabilities(&self) -> Option<&WorkerCapabilities> {
        self.capabilities.as_ref()
    }

    /// Send a command
    pub fn send(&mut self, command: &SupervisorCommand) -> Result<(), EngineError> {
        self.writer.write(command)?;
        Ok(())
    }

    /// Wait for the next message, for at most `deadline` (forever if `None`).
    pub fn receive(&mut self, deadline: Option<Duration>) -> Result<Received, EngineError> {
        let start = Instant::now();

        loop {
            // Buffered bytes may already hold the next frame.
            if !self.reader.has_buffered_data() {
                let slice = match deadline {
                    Some(deadline) => {
                        let remaining = deadline.saturating_sub(start.elapsed());
                        if remaining.is_zero() {
                            return Ok(Received::DeadlineExpired);
                        }
                        remaining.min(POLL_SLICE)
                    }
                    None => POLL_SLICE,
                };

                match wait_for_data(self.msg_read_fd, slice) {
                    PollResult::DataAvailable => {}
                    PollResult::Timeout => {
                        if let Some(status) = self.exit_status() {
                            return Ok(Received::Exited(status));
                        }
                        continue;
                    }
                    PollResult::PipeClosed => return Ok(Received::Exited(self.reap())),
                    PollResult::Error(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                        continue;
                    }
                    PollResult::Error(e) => return Err(EngineError::Spawn(e)),
                }
            }

            return match self.reader.read::<WorkerMessage>() {
                Ok(message) => Ok(Received::Message(message)),
                Err(FrameError::EndOfStream) => Ok(Received::Exited(self.reap())),
                Err(e) => {
                    if let Some(status) = self.exit_status() {
                        return Ok(Received::Exited(status));
                    }
                    Err(e.into())
                }
            };
        }
    }

    fn exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("unknown status: {e}")),
        }
    }

    fn reap(&mut self) -> String {
        match self.child.wait() {
            Ok(status) => status.to_string(),
            Err(e) => format!("unknown status: {e}"),
        }
    }

    /// Check if worker process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the worker with SIGKILL and reap it.
    pub fn kill(&mut self) {
        if self.is_alive() {
            if let Err(e) = self.child.kill() {
                warn!(pid = self.child.id(), "failed to kill worker: {e}");
            }
        }
        let _ = self.child.wait();
    }

    /// Ask a live worker to exit and reap it.
    pub fn shutdown(mut self) -> Result<(), EngineError> {
        if self.is_alive() {
            self.send(&SupervisorCommand::Shutdown)?;
        }
        let _ = self.child.wait();
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Runs every case in a fresh worker process.
///
/// The worker rebuilds the test module, runs the action on a thread with the
/// requested stack and, when asked, the verifier. Deadlines are enforced here:
/// a worker that misses one is killed.
pub struct ProcessRunner {
    binary: PathBuf,
    startup_timeout: Duration,
    worker: Option<WorkerHandle>,
}

impl ProcessRunner {
    /// Re-execute the current binary as the worker.
    pub fn new(startup_timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self::with_binary(env::current_exe()?, startup_timeout))
    }

    /// Use `binary` as the worker executable.
    pub fn with_binary(binary: impl Into<PathBuf>, startup_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            startup_timeout,
            worker: None,
        }
    }
}

impl CaseRunner for ProcessRunner {
    fn perform(&mut self, job: CaseJob<'_>) -> Result<RawOutcome, EngineError> {
        self.release();
        let request = job.request;
        request.validate()?;
        let deadline = request.deadline();
        let case = u32::try_from(job.index)
            .map_err(|_| EngineError::Worker(format!("case index {} out of range", job.index)))?;
        let stack_mib = u32::try_from(request.stack_mib).map_err(|_| {
            EngineError::Worker(format!(
                "stack budget of {} MiB cannot be sent to a worker",
                request.stack_mib
            ))
        })?;

        let mut worker = WorkerHandle::spawn(&self.binary, self.startup_timeout)?;
        debug!(
            set = job.set,
            index = job.index,
            pid = ?worker.capabilities().map(|caps| caps.pid),
            "worker ready"
        );
        worker.send(&SupervisorCommand::Perform {
            set: job.set.to_string(),
            case,
            stack_mib,
        })?;
        let start = Instant::now();
        let received = worker.receive(deadline)?;

        let report = |elapsed_nanos: u64, result| ActionReport {
            elapsed: Duration::from_nanos(elapsed_nanos),
            result,
        };
        let outcome = match received {
            Received::Message(WorkerMessage::Performed { elapsed_nanos }) => {
                request.settle(report(elapsed_nanos, Ok(())))
            }
            Received::Message(WorkerMessage::Raised {
                kind,
                message,
                elapsed_nanos,
            }) => {
                let fault = Fault::new(FaultKind::from_tag(&kind), message);
                request.settle(report(elapsed_nanos, Err(fault)))
            }
            Received::Message(WorkerMessage::Failure { message }) => {
                Err(EngineError::Worker(message))
            }
            Received::Message(other) => Err(EngineError::Worker(format!(
                "unexpected message while performing: {other:?}"
            ))),
            Received::DeadlineExpired => {
                let elapsed = start.elapsed();
                warn!(set = job.set, index = job.index, ?elapsed, "deadline expired; killing worker");
                worker.kill();
                Ok(RawOutcome {
                    elapsed,
                    completion: Completion::TimedOut,
                })
            }
            Received::Exited(status) => {
                warn!(set = job.set, index = job.index, %status, "worker died during action");
                request.settle_termination(start.elapsed(), status)
            }
        };

        self.worker = Some(worker);
        outcome
    }

    fn verify(
        &mut self,
        set: &str,
        index: usize,
        _local: &dyn Fn() -> Verdict,
    ) -> Result<Verdict, EngineError> {
        let worker = self
            .worker
            .as_mut()
            .ok_or_else(|| EngineError::Worker("no worker holds the performed case".to_string()))?;
        worker.send(&SupervisorCommand::Verify {
            set: set.to_string(),
            case: index as u32,
        })?;

        match worker.receive(None)? {
            Received::Message(WorkerMessage::Verdict { code, message }) => {
                Ok(Verdict::new(ResultCode::try_from(code)?, message))
            }
            Received::Message(WorkerMessage::Failure { message }) => {
                Err(EngineError::Worker(message))
            }
            Received::Message(other) => Err(EngineError::Worker(format!(
                "unexpected message while verifying: {other:?}"
            ))),
            Received::Exited(status) => Err(EngineError::Worker(format!(
                "worker died during verification ({status})"
            ))),
            Received::DeadlineExpired => Err(EngineError::Worker(
                "verification has no deadline".to_string(),
            )),
        }
    }

    fn release(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.shutdown() {
                debug!("worker shutdown: {e}");
            }
        }
    }
}
