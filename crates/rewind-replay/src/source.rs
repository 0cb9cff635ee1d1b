use std::path::Path;

use rewind_proc::FunctionLookup;

/// Trait for implementing the storage of a recorded trace.
///
/// A recording is a sequence of events, each one being the execution of a
/// single instruction by a single thread. Positions within a recording are
/// indices of events: position `p` is the state of the target right before
/// event `p` executes, so position `0` is the beginning of the recording and
/// position [event_count](Self::event_count) is its end.
pub trait TraceSource: FunctionLookup {
    /// Returns the process ID of the recorded target.
    fn pid(&self) -> u64;

    /// Returns the path of the executable of the recorded target.
    fn exe_path(&self) -> &Path;

    /// Returns the directory the trace is stored in.
    fn tracedir(&self) -> &Path;

    /// Returns the entry point address of the recorded target.
    fn entry_point(&self) -> u64;

    /// Returns the number of events of the recording.
    fn event_count(&self) -> u64;

    /// Returns the event at the given index.
    fn event(&self, index: u64) -> Option<&Event>;

    /// Reads the memory of the recorded target as it was at position `pos`.
    fn read_memory(&self, pos: u64, addr: u64, buf: &mut [u8]) -> crate::Result<()>;

    /// Returns the exit status of the recorded target.
    fn exit_status(&self) -> i32;
}

/// Execution of an instruction by a thread of the recorded target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// ID of the thread executing the instruction.
    pub thread_id: u64,

    /// Address of the executed instruction.
    pub instr_addr: u64,

    /// Memory written by the instruction.
    pub writes: Vec<MemoryWrite>,
}

impl Event {
    /// Creates an event with no memory write.
    pub const fn new(thread_id: u64, instr_addr: u64) -> Self {
        Self {
            thread_id,
            instr_addr,
            writes: Vec::new(),
        }
    }

    /// Adds a memory write to the event.
    pub fn with_write(mut self, addr: u64, data: impl Into<Vec<u8>>) -> Self {
        self.writes.push(MemoryWrite {
            addr,
            data: data.into(),
        });
        self
    }
}

/// Memory write performed by an [Event].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryWrite {
    /// Address of the write.
    pub addr: u64,

    /// Written bytes.
    pub data: Vec<u8>,
}

impl MemoryWrite {
    /// Copies the bytes of this write which overlap `[addr, addr + buf.len())`
    /// into `buf`.
    pub(crate) fn apply(&self, addr: u64, buf: &mut [u8]) {
        let start = self.addr.max(addr);
        let end = (self.addr + self.data.len() as u64).min(addr + buf.len() as u64);

        if start >= end {
            return;
        }

        let dst = (start - addr) as usize..(end - addr) as usize;
        let src = (start - self.addr) as usize..(end - self.addr) as usize;

        buf[dst].copy_from_slice(&self.data[src]);
    }
}
