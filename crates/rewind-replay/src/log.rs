use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use rewind_proc::FunctionLookup;

use crate::{Error, Event, TraceSource};

/// Recording held in memory.
///
/// It is usually created by calling [TraceLog::builder].
#[derive(Debug)]
pub struct TraceLog {
    pid: u64,
    exe_path: PathBuf,
    tracedir: PathBuf,
    entry_point: u64,

    /// Memory of the target at the beginning of the recording, indexed by
    /// start address.
    regions: BTreeMap<u64, Vec<u8>>,

    /// Address ranges of the functions of the target.
    functions: Vec<(Range<u64>, String)>,

    events: Vec<Event>,
    exit_status: i32,
}

impl TraceLog {
    /// Creates a builder for a recording of the process `pid`, running the
    /// executable `exe_path`.
    pub fn builder(
        pid: u64,
        exe_path: impl Into<PathBuf>,
        tracedir: impl Into<PathBuf>,
    ) -> Builder {
        Builder {
            pid,
            exe_path: exe_path.into(),
            tracedir: tracedir.into(),
            entry_point: 0,
            regions: Vec::new(),
            functions: Vec::new(),
            events: Vec::new(),
            exit_status: 0,
        }
    }

    /// Returns the recorded region containing `[addr, addr + len)`.
    fn region(&self, addr: u64, len: usize) -> Option<(u64, &[u8])> {
        let (&start, bytes) = self.regions.range(..=addr).next_back()?;

        let end = start + bytes.len() as u64;
        (addr.checked_add(len as u64)? <= end).then_some((start, bytes.as_slice()))
    }
}

impl TraceSource for TraceLog {
    fn pid(&self) -> u64 {
        self.pid
    }

    fn exe_path(&self) -> &Path {
        &self.exe_path
    }

    fn tracedir(&self) -> &Path {
        &self.tracedir
    }

    fn entry_point(&self) -> u64 {
        self.entry_point
    }

    fn event_count(&self) -> u64 {
        self.events.len() as u64
    }

    fn event(&self, index: u64) -> Option<&Event> {
        self.events.get(usize::try_from(index).ok()?)
    }

    fn read_memory(&self, pos: u64, addr: u64, buf: &mut [u8]) -> crate::Result<()> {
        let count = self.event_count();

        if pos > count {
            return Err(Error::PositionOutOfRange { pos, count });
        }

        let (start, bytes) = self
            .region(addr, buf.len())
            .ok_or(Error::UnrecordedMemory {
                addr,
                len: buf.len(),
            })?;

        let offset = (addr - start) as usize;
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);

        for event in &self.events[..pos as usize] {
            for write in &event.writes {
                write.apply(addr, buf);
            }
        }

        Ok(())
    }

    fn exit_status(&self) -> i32 {
        self.exit_status
    }
}

impl FunctionLookup for TraceLog {
    fn function_at(&self, addr: u64) -> Option<&str> {
        self.functions
            .iter()
            .find(|(range, _)| range.contains(&addr))
            .map(|(_, name)| name.as_str())
    }
}

/// Builder for [TraceLog].
#[derive(Debug)]
pub struct Builder {
    pid: u64,
    exe_path: PathBuf,
    tracedir: PathBuf,
    entry_point: u64,
    regions: Vec<(u64, Vec<u8>)>,
    functions: Vec<(Range<u64>, String)>,
    events: Vec<Event>,
    exit_status: i32,
}

impl Builder {
    /// Specifies the entry point address of the recorded target.
    pub const fn entry_point(mut self, addr: u64) -> Self {
        self.entry_point = addr;
        self
    }

    /// Specifies the content of a memory region at the beginning of the
    /// recording.
    pub fn region(mut self, addr: u64, bytes: impl Into<Vec<u8>>) -> Self {
        self.regions.push((addr, bytes.into()));
        self
    }

    /// Specifies the address range of a function.
    pub fn function(mut self, name: impl Into<String>, range: Range<u64>) -> Self {
        self.functions.push((range, name.into()));
        self
    }

    /// Appends an event to the recording.
    pub fn event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    /// Appends events to the recording.
    pub fn events(mut self, events: impl IntoIterator<Item = Event>) -> Self {
        self.events.extend(events);
        self
    }

    /// Specifies the exit status of the recorded target.
    pub const fn exit_status(mut self, status: i32) -> Self {
        self.exit_status = status;
        self
    }

    /// Builds the recording.
    ///
    /// Fails if memory regions overlap, or if an event writes outside of the
    /// recorded memory.
    pub fn build(self) -> crate::Result<TraceLog> {
        let mut regions = BTreeMap::new();

        for (addr, bytes) in self.regions {
            if regions.insert(addr, bytes).is_some() {
                return Err(Error::OverlappingRegions(addr));
            }
        }

        let mut prev_end = 0;
        for (&addr, bytes) in &regions {
            if addr < prev_end {
                return Err(Error::OverlappingRegions(addr));
            }
            prev_end = addr
                .checked_add(bytes.len() as u64)
                .ok_or(Error::RegionOverflow(addr))?;
        }

        let log = TraceLog {
            pid: self.pid,
            exe_path: self.exe_path,
            tracedir: self.tracedir,
            entry_point: self.entry_point,
            regions,
            functions: self.functions,
            events: self.events,
            exit_status: self.exit_status,
        };

        for (i, event) in log.events.iter().enumerate() {
            for write in &event.writes {
                if log.region(write.addr, write.data.len()).is_none() {
                    return Err(Error::WriteOutsideRegions {
                        event: i as u64,
                        addr: write.addr,
                    });
                }
            }
        }

        tracing::debug!(
            pid = log.pid,
            events = log.events.len(),
            regions = log.regions.len(),
            "recording loaded"
        );

        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use rewind_proc::FunctionLookup;

    use super::TraceLog;
    use crate::{Error, Event, TraceSource};

    fn log() -> TraceLog {
        TraceLog::builder(1, "/bin/true", "/tmp/trace")
            .region(0x1000, [0u8; 16])
            .region(0x2000, *b"hello")
            .function("main", 0x1000..0x1008)
            .event(Event::new(1, 0x1000).with_write(0x2000, *b"J"))
            .event(Event::new(1, 0x1004).with_write(0x2003, *b"LO"))
            .event(Event::new(1, 0x1008))
            .build()
            .unwrap()
    }

    #[test]
    fn memory_at_position() {
        let log = log();
        let mut buf = [0u8; 5];

        log.read_memory(0, 0x2000, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        log.read_memory(1, 0x2000, &mut buf).unwrap();
        assert_eq!(&buf, b"Jello");

        log.read_memory(3, 0x2000, &mut buf).unwrap();
        assert_eq!(&buf, b"JelLO");

        // partial overlap with a write
        let mut buf = [0u8; 2];
        log.read_memory(3, 0x2002, &mut buf).unwrap();
        assert_eq!(&buf, b"lL");
    }

    #[test]
    fn unrecorded_memory() {
        let log = log();

        let mut buf = [0u8; 8];
        let err = log.read_memory(0, 0x2000, &mut buf).unwrap_err();
        assert!(matches!(err, Error::UnrecordedMemory { addr: 0x2000, len: 8 }));

        let err = log.read_memory(4, 0x1000, &mut buf).unwrap_err();
        assert!(matches!(err, Error::PositionOutOfRange { pos: 4, count: 3 }));
    }

    #[test]
    fn invalid_recordings() {
        let err = TraceLog::builder(1, "/bin/true", "/tmp/trace")
            .region(0x1000, [0u8; 16])
            .region(0x1008, [0u8; 16])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::OverlappingRegions(0x1008)));

        let err = TraceLog::builder(1, "/bin/true", "/tmp/trace")
            .region(u64::MAX - 3, [0u8; 16])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::RegionOverflow(0xffff_ffff_ffff_fffc)));

        let err = TraceLog::builder(1, "/bin/true", "/tmp/trace")
            .region(0x1000, [0u8; 16])
            .event(Event::new(1, 0x1000))
            .event(Event::new(1, 0x1004).with_write(0x100f, [1u8, 2]))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::WriteOutsideRegions { event: 1, addr: 0x100f }));
    }

    #[test]
    fn function_lookup() {
        let log = log();

        assert_eq!(log.function_at(0x1004), Some("main"));
        assert_eq!(log.function_at(0x1008), None);
    }
}
