/// Boxed error returned by the collaborators of a process (e.g., memory I/O).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The target has terminated.
    #[error("process {pid} has exited with status {status}")]
    ProcessExited {
        /// ID of the exited process.
        pid: u64,

        /// Exit status of the process.
        status: i32,
    },

    /// The debugger has released control of the target.
    #[error("process {pid} has been detached")]
    ProcessDetached {
        /// ID of the detached process.
        pid: u64,
    },

    /// Target memory could not be read or written.
    #[error("cannot access memory at {addr:#x}")]
    MemoryAccess {
        /// Address of the failed access.
        addr: u64,

        /// Underlying error of the memory backend.
        #[source]
        source: BoxError,
    },

    /// A breakpoint is already installed at the given address.
    #[error("breakpoint already installed at {0:#x}")]
    BreakpointExists(u64),

    /// The bytes of a new breakpoint intersect those of an installed one.
    #[error("breakpoint at {addr:#x} overlaps the breakpoint at {existing:#x}")]
    OverlappingBreakpoint {
        /// Address of the rejected breakpoint.
        addr: u64,

        /// Address of the installed breakpoint.
        existing: u64,
    },

    /// An execution direction could not be parsed.
    #[error("invalid execution direction {0:?}")]
    InvalidDirection(String),

    /// No breakpoint is installed at the given address.
    #[error("no breakpoint installed at {0:#x}")]
    NoBreakpoint(u64),

    /// The bytes given to restore a breakpoint are not the ones it replaced.
    #[error("original data mismatch for breakpoint at {0:#x}")]
    OriginalDataMismatch(u64),

    /// A breakpoint instruction must contain at least one byte.
    #[error("empty breakpoint instruction at {0:#x}")]
    EmptyBreakpointInstruction(u64),

    /// A restart position could not be parsed.
    #[error("invalid position {0:?}")]
    InvalidPosition(String),

    /// No checkpoint exists with the given ID.
    #[error("checkpoint {0} not found")]
    UnknownCheckpoint(u64),

    /// An event number is beyond the end of the recording.
    #[error("event {event} out of range (recording has {count} events)")]
    EventOutOfRange {
        /// Requested event number.
        event: u64,

        /// Number of events in the recording.
        count: u64,
    },

    /// The operation is not supported by this kind of target.
    #[error("{0} is not supported by this target")]
    Unsupported(&'static str),

    /// No thread exists with the given ID.
    #[error("thread {0} not found")]
    UnknownThread(u64),

    /// The target has no thread to operate on.
    #[error("process has no current thread")]
    NoCurrentThread,

    /// Stepping out of a function did not complete in time.
    #[error("still in {function} after {steps} single-steps")]
    StepOutLimit {
        /// Function the thread was stepping out of.
        function: String,

        /// Number of executed single-steps.
        steps: usize,
    },

    /// The entry point of the target could not be determined.
    #[error("entry point not found")]
    NoEntryPoint,

    /// Error reported by the process backend.
    #[error(transparent)]
    Backend(BoxError),
}

impl Error {
    /// Wraps an error of a process backend.
    pub fn backend(e: impl Into<BoxError>) -> Self {
        Self::Backend(e.into())
    }

    /// Returns the kind of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ProcessExited { .. } => ErrorKind::ProcessExited,
            Self::ProcessDetached { .. } => ErrorKind::ProcessDetached,
            Self::MemoryAccess { .. }
            | Self::BreakpointExists(_)
            | Self::OverlappingBreakpoint { .. }
            | Self::NoBreakpoint(_)
            | Self::OriginalDataMismatch(_)
            | Self::EmptyBreakpointInstruction(_) => ErrorKind::MemoryAccess,
            Self::InvalidPosition(_)
            | Self::InvalidDirection(_)
            | Self::UnknownCheckpoint(_)
            | Self::EventOutOfRange { .. } => ErrorKind::InvalidPosition,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::UnknownThread(_)
            | Self::NoCurrentThread
            | Self::StepOutLimit { .. }
            | Self::NoEntryPoint
            | Self::Backend(_) => ErrorKind::Other,
        }
    }

    /// Returns whether the process can no longer be manipulated.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProcessExited | ErrorKind::ProcessDetached
        )
    }
}

/// Kind of an [Error].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The target has terminated.
    ProcessExited,

    /// The debugger has released control of the target.
    ProcessDetached,

    /// A breakpoint targets an invalid or unwritable address, or the restore
    /// of its original bytes is inconsistent.
    MemoryAccess,

    /// A restart position is malformed or out of range, or an execution
    /// direction is malformed.
    InvalidPosition,

    /// The operation makes no sense for this kind of target.
    Unsupported,

    /// Any other failure.
    Other,
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
