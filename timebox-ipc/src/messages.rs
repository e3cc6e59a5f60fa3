//! IPC Message Types
//!
//! The supervisor drives one worker through a single case: `Perform`, then
//! (only when the action finished cleanly) `Verify`, then `Shutdown`.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// OS process id of the worker
    pub pid: u32,
    /// Number of test sets the worker rebuilt at startup
    pub set_count: u32,
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            set_count: 0,
        }
    }
}

/// Messages sent from Worker to Supervisor
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake, sent once the test module is built
    Hello(WorkerCapabilities),

    /// The action returned normally
    Performed {
        /// Time spent inside the action
        elapsed_nanos: u64,
    },

    /// The action raised a fault (returned `Err` or panicked)
    Raised {
        /// Fault kind tag
        kind: String,
        /// Fault message
        message: String,
        /// Time spent inside the action until the fault
        elapsed_nanos: u64,
    },

    /// Verifier output, forwarded unvalidated
    Verdict {
        /// Result code discriminant
        code: u8,
        /// Verifier message
        message: String,
    },

    /// The worker could not serve the command (unknown set or case)
    Failure {
        /// Human-readable error message
        message: String,
    },
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Run a case's action on a fresh thread
    Perform {
        /// Test set name within the module
        set: String,
        /// Case index within the set
        case: u32,
        /// Stack budget for the action thread, in MiB
        stack_mib: u32,
    },

    /// Run the verifier of the case performed last
    Verify {
        /// Test set name within the module
        set: String,
        /// Case index within the set
        case: u32,
    },

    /// Request graceful shutdown
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_capabilities_default() {
        let caps = WorkerCapabilities::default();
        assert_eq!(caps.protocol_version, crate::PROTOCOL_VERSION);
        assert_eq!(caps.pid, std::process::id());
    }
}
