#![warn(missing_docs)]
//! Timebox IPC Protocol
//!
//! Wire protocol between the supervisor and an isolated worker process.
//! Frames are length-prefixed rkyv archives validated on read.

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use messages::{SupervisorCommand, WorkerCapabilities, WorkerMessage};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the inherited `<read_fd>,<write_fd>` pair
pub const IPC_FD_ENV: &str = "TIMEBOX_IPC_FD";

/// Hidden command-line flag that turns a harness binary into a worker
pub const WORKER_FLAG: &str = "--timebox-worker";
