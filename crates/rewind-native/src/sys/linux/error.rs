use nix::sys::wait::WaitStatus;

/// Error type of the Linux process backend.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Standard I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// File open/read error.
    #[error("{0}: {1}")]
    File(std::path::PathBuf, std::io::Error),

    /// Error when a traced thread reports an unexpected status.
    #[error("bad child wait status: {0:?}")]
    BadChildWait(WaitStatus),

    /// OS error.
    #[error("os error: {0}")]
    Os(#[from] nix::Error),

    /// Error when a memory operation transferred fewer bytes than requested.
    #[error("memory read/write {0} bytes instead of {1}")]
    PartialMemOp(usize, usize),

    /// Error when the process to attach to has no thread left.
    #[error("process {0} has no thread")]
    NoThread(u64),
}

/// Result type of the Linux process backend.
pub type Result<T> = core::result::Result<T, Error>;
