use std::path::PathBuf;

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// File open/read error.
    #[error("{0}: {1}")]
    File(PathBuf, std::io::Error),

    /// ELF parsing error.
    #[error(transparent)]
    Elf(#[from] goblin::error::Error),

    /// Error when the machine of an ELF file is not supported.
    #[error("elf.e_machine={0:#x} not supported")]
    ElfPlatform(u16),

    /// Error when a file given as a core dump is not one.
    #[error("elf.e_type={0:#x} is not a core dump")]
    NotACore(u16),

    /// Error when a segment or note lies outside of its file.
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// Error when a core dump describes no thread.
    #[error("missing NT_PRSTATUS")]
    MissingPrstatus,

    /// Error when reading memory which is not part of a core dump.
    #[error("memory at {addr:#x} ({len} bytes) is not part of the core dump")]
    UnmappedCoreMemory {
        /// Address of the read.
        addr: u64,

        /// Length of the read.
        len: usize,
    },

    /// Internal process backend error.
    #[error(transparent)]
    Sys(#[from] crate::sys::Error),
}

impl From<scroll::Error> for Error {
    fn from(e: scroll::Error) -> Self {
        Self::Elf(e.into())
    }
}

impl From<Error> for rewind_proc::Error {
    fn from(e: Error) -> Self {
        Self::backend(e)
    }
}

impl From<crate::sys::Error> for rewind_proc::Error {
    fn from(e: crate::sys::Error) -> Self {
        Self::backend(Error::Sys(e))
    }
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
