/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error when reading memory which is not part of the recording.
    #[error("memory at {addr:#x} ({len} bytes) was not recorded")]
    UnrecordedMemory {
        /// Address of the read.
        addr: u64,

        /// Length of the read.
        len: usize,
    },

    /// Error when a recorded event writes memory outside of every recorded
    /// region.
    #[error("event {event} writes unrecorded memory at {addr:#x}")]
    WriteOutsideRegions {
        /// Index of the event.
        event: u64,

        /// Address of the write.
        addr: u64,
    },

    /// Error when two recorded memory regions overlap.
    #[error("memory region at {0:#x} overlaps another region")]
    OverlappingRegions(u64),

    /// Error when a recorded memory region wraps around the address space.
    #[error("memory region at {0:#x} wraps around the address space")]
    RegionOverflow(u64),

    /// Error when a position is beyond the end of the recording.
    #[error("position {pos} is beyond the end of the recording ({count} events)")]
    PositionOutOfRange {
        /// Requested position.
        pos: u64,

        /// Number of events in the recording.
        count: u64,
    },
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
