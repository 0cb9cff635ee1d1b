use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::{Error, MemoryIo};

/// Breakpoints installed within the address space of a target.
///
/// Each breakpoint is keyed by its address, and remembers the bytes which
/// were overwritten by the trap instruction, so that they can be restored
/// **exactly** when the breakpoint is cleared.
///
/// # Note
///
/// The store mutates the target's memory, so it must only be used while the
/// target is stopped.
#[derive(Debug, Default)]
pub struct BreakpointStore {
    bks: BTreeMap<u64, InstalledBreakpoint>,
}

/// A breakpoint installed by the [BreakpointStore].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstalledBreakpoint {
    /// Bytes found at the breakpoint address before it was installed.
    pub original: Vec<u8>,

    /// Trap instruction written at the breakpoint address.
    pub instr: Vec<u8>,

    /// Whether the original bytes are temporarily back in memory.
    suspended: bool,
}

impl InstalledBreakpoint {
    /// Returns whether the breakpoint is temporarily lifted (e.g., while a
    /// thread steps over it).
    pub const fn is_suspended(&self) -> bool {
        self.suspended
    }
}

impl BreakpointStore {
    /// Creates an empty breakpoint store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a breakpoint at `addr` by writing the trap instruction `instr`.
    ///
    /// On success, the bytes previously found at `addr` are returned. The
    /// caller needs them to [remove](Self::remove) the breakpoint later on.
    ///
    /// Installing a breakpoint twice at the same address, or over the bytes
    /// of another breakpoint, fails, so that the true original bytes are never
    /// lost.
    pub fn install<M: MemoryIo + ?Sized>(
        &mut self,
        mem: &mut M,
        addr: u64,
        instr: &[u8],
    ) -> crate::Result<Vec<u8>> {
        if instr.is_empty() {
            return Err(Error::EmptyBreakpointInstruction(addr));
        }

        if let Some(existing) = self.overlapping(addr, instr.len()) {
            return Err(if existing == addr {
                Error::BreakpointExists(addr)
            } else {
                Error::OverlappingBreakpoint { addr, existing }
            });
        }

        let Entry::Vacant(entry) = self.bks.entry(addr) else {
            return Err(Error::BreakpointExists(addr));
        };

        let mut original = vec![0u8; instr.len()];

        mem.read_memory(addr, &mut original)
            .map_err(|source| Error::MemoryAccess { addr, source })?;

        if let Err(source) = mem.write_memory(addr, instr) {
            // the write may have been partial
            if let Err(e) = mem.write_memory(addr, &original) {
                tracing::error!(
                    error = %e,
                    addr = format_args!("{addr:#x}"),
                    "restore after failed install"
                );
            }

            return Err(Error::MemoryAccess { addr, source });
        }

        tracing::debug!(addr = format_args!("{addr:#x}"), "breakpoint installed");

        entry.insert(InstalledBreakpoint {
            original: original.clone(),
            instr: instr.to_vec(),
            suspended: false,
        });

        Ok(original)
    }

    /// Removes the breakpoint at `addr`, writing back `original`.
    ///
    /// `original` must be the data returned by [install](Self::install). If
    /// writing the data back fails, the breakpoint is kept.
    pub fn remove<M: MemoryIo + ?Sized>(
        &mut self,
        mem: &mut M,
        addr: u64,
        original: &[u8],
    ) -> crate::Result<()> {
        let Entry::Occupied(entry) = self.bks.entry(addr) else {
            return Err(Error::NoBreakpoint(addr));
        };

        if entry.get().original != original {
            return Err(Error::OriginalDataMismatch(addr));
        }

        mem.write_memory(addr, original)
            .map_err(|source| Error::MemoryAccess { addr, source })?;

        entry.remove();

        tracing::debug!(addr = format_args!("{addr:#x}"), "breakpoint removed");

        Ok(())
    }

    /// Temporarily writes back the original bytes of the breakpoint at `addr`.
    ///
    /// This is typically needed for a thread to step over the breakpoint.
    /// Returns whether a breakpoint was suspended.
    pub fn suspend<M: MemoryIo + ?Sized>(&mut self, mem: &mut M, addr: u64) -> crate::Result<bool> {
        let Some(bk) = self.bks.get_mut(&addr).filter(|bk| !bk.suspended) else {
            return Ok(false);
        };

        mem.write_memory(addr, &bk.original)
            .map_err(|source| Error::MemoryAccess { addr, source })?;

        bk.suspended = true;

        Ok(true)
    }

    /// Writes the trap instruction of a [suspended](Self::suspend) breakpoint
    /// back into memory.
    pub fn reinstate<M: MemoryIo + ?Sized>(&mut self, mem: &mut M, addr: u64) -> crate::Result<()> {
        let Some(bk) = self.bks.get_mut(&addr).filter(|bk| bk.suspended) else {
            return Ok(());
        };

        mem.write_memory(addr, &bk.instr)
            .map_err(|source| Error::MemoryAccess { addr, source })?;

        bk.suspended = false;

        Ok(())
    }

    /// Restores the original bytes of every breakpoint and empties the store.
    ///
    /// Every breakpoint is attempted, and the first error is returned.
    pub fn clear_all<M: MemoryIo + ?Sized>(&mut self, mem: &mut M) -> crate::Result<()> {
        let mut res = Ok(());

        for (addr, bk) in std::mem::take(&mut self.bks) {
            if bk.suspended {
                continue;
            }

            if let Err(source) = mem.write_memory(addr, &bk.original) {
                tracing::error!(
                    error = %source,
                    addr = format_args!("{addr:#x}"),
                    "restore breakpoint"
                );

                if res.is_ok() {
                    res = Err(Error::MemoryAccess { addr, source });
                }
            }
        }

        res
    }

    /// Returns the breakpoint installed at `addr`, if any.
    pub fn get(&self, addr: u64) -> Option<&InstalledBreakpoint> {
        self.bks.get(&addr)
    }

    /// Returns whether a breakpoint is installed at `addr`.
    pub fn contains(&self, addr: u64) -> bool {
        self.bks.contains_key(&addr)
    }

    /// Returns the addresses of all installed breakpoints, in ascending order.
    pub fn addresses(&self) -> Vec<u64> {
        self.bks.keys().copied().collect()
    }

    /// Returns the address of an installed breakpoint whose bytes intersect
    /// `[addr, addr + len)`.
    fn overlapping(&self, addr: u64, len: usize) -> Option<u64> {
        let end = addr.saturating_add(len as u64);

        // installed breakpoints never overlap each other, so only the last
        // one starting before `end` can reach `addr`
        let (&start, bk) = self.bks.range(..end).next_back()?;

        (start.saturating_add(bk.instr.len() as u64) > addr).then_some(start)
    }

    /// Returns the number of installed breakpoints.
    pub fn len(&self) -> usize {
        self.bks.len()
    }

    /// Returns whether no breakpoint is installed.
    pub fn is_empty(&self) -> bool {
        self.bks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::BreakpointStore;
    use crate::{BoxError, ErrorKind, MemoryIo};

    /// Sparse memory, where only the given pages are mapped.
    struct FakeMemory {
        bytes: BTreeMap<u64, u8>,
        read_only: bool,
    }

    impl FakeMemory {
        fn new(base: u64, data: &[u8]) -> Self {
            let bytes = data
                .iter()
                .enumerate()
                .map(|(i, b)| (base + i as u64, *b))
                .collect();

            Self {
                bytes,
                read_only: false,
            }
        }

        fn snapshot(&self) -> Vec<u8> {
            self.bytes.values().copied().collect()
        }
    }

    impl MemoryIo for FakeMemory {
        fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<(), BoxError> {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = *self
                    .bytes
                    .get(&(addr + i as u64))
                    .ok_or("unmapped address")?;
            }
            Ok(())
        }

        fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), BoxError> {
            if self.read_only {
                return Err("read-only memory".into());
            }

            for (i, b) in data.iter().enumerate() {
                let byte = self
                    .bytes
                    .get_mut(&(addr + i as u64))
                    .ok_or("unmapped address")?;
                *byte = *b;
            }
            Ok(())
        }
    }

    #[test]
    fn install_then_remove_restores_memory() {
        let mut mem = FakeMemory::new(0x1000, &[0x55, 0x48, 0x89, 0xe5, 0x90]);
        let before = mem.snapshot();

        let mut store = BreakpointStore::new();

        for instr in [&[0xcc][..], &[0x00, 0x00, 0x20, 0xd4][..]] {
            for addr in 0x1000..0x1002 {
                let original = store.install(&mut mem, addr, instr).unwrap();
                assert_ne!(mem.snapshot(), before);

                store.remove(&mut mem, addr, &original).unwrap();
                assert_eq!(mem.snapshot(), before);
                assert!(store.is_empty());
            }
        }
    }

    #[test]
    fn double_install_keeps_original_bytes() {
        let mut mem = FakeMemory::new(0x1000, &[0x55, 0x48]);
        let mut store = BreakpointStore::new();

        let original = store.install(&mut mem, 0x1000, &[0xcc]).unwrap();
        assert_eq!(original, [0x55]);

        let err = store.install(&mut mem, 0x1000, &[0xcc]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryAccess);

        assert_eq!(store.get(0x1000).unwrap().original, [0x55]);

        store.remove(&mut mem, 0x1000, &original).unwrap();
        assert_eq!(mem.snapshot(), [0x55, 0x48]);
    }

    #[test]
    fn overlapping_install_keeps_original_bytes() {
        let mut mem = FakeMemory::new(0x1000, &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
        let mut store = BreakpointStore::new();

        let brk = [0x00, 0x00, 0x20, 0xd4];
        let original = store.install(&mut mem, 0x1002, &brk).unwrap();

        let err = store.install(&mut mem, 0x1000, &brk).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::OverlappingBreakpoint {
                addr: 0x1000,
                existing: 0x1002
            }
        ));
        assert_eq!(err.kind(), ErrorKind::MemoryAccess);

        let err = store.install(&mut mem, 0x1005, &[0xcc]).unwrap_err();
        assert!(matches!(err, crate::Error::OverlappingBreakpoint { .. }));

        // adjacent bytes are free
        let other = store.install(&mut mem, 0x1006, &[0xcc, 0xcc]).unwrap();
        assert_eq!(other, [0x77, 0x88]);
        store.install(&mut mem, 0x1001, &[0xcc]).unwrap();

        assert_eq!(store.addresses(), [0x1001, 0x1002, 0x1006]);

        store.remove(&mut mem, 0x1002, &original).unwrap();
        store.remove(&mut mem, 0x1006, &other).unwrap();
        store.remove(&mut mem, 0x1001, &[0x22]).unwrap();
        assert_eq!(
            mem.snapshot(),
            [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
        );
    }

    #[test]
    fn install_out_of_mapped_memory() {
        let mut mem = FakeMemory::new(0x1000, &[0x90; 4]);
        let mut store = BreakpointStore::new();

        let err = store.install(&mut mem, 0x2000, &[0xcc]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryAccess);

        // straddles the end of the mapping
        let err = store.install(&mut mem, 0x1002, &[0xcc; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryAccess);

        assert!(store.is_empty());
        assert_eq!(mem.snapshot(), [0x90; 4]);
    }

    #[test]
    fn install_into_read_only_memory() {
        let mut mem = FakeMemory::new(0x1000, &[0x90; 4]);
        mem.read_only = true;

        let mut store = BreakpointStore::new();

        let err = store.install(&mut mem, 0x1000, &[0xcc]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryAccess);
        assert!(!store.contains(0x1000));
    }

    #[test]
    fn remove_requires_matching_breakpoint() {
        let mut mem = FakeMemory::new(0x1000, &[0x55, 0x48]);
        let mut store = BreakpointStore::new();

        let err = store.remove(&mut mem, 0x1000, &[0x55]).unwrap_err();
        assert!(matches!(err, crate::Error::NoBreakpoint(0x1000)));

        store.install(&mut mem, 0x1000, &[0xcc]).unwrap();

        let err = store.remove(&mut mem, 0x1000, &[0x90]).unwrap_err();
        assert!(matches!(err, crate::Error::OriginalDataMismatch(0x1000)));
        assert!(store.contains(0x1000));
        assert_eq!(mem.snapshot(), [0xcc, 0x48]);
    }

    #[test]
    fn failed_restore_keeps_breakpoint() {
        let mut mem = FakeMemory::new(0x1000, &[0x55]);
        let mut store = BreakpointStore::new();

        let original = store.install(&mut mem, 0x1000, &[0xcc]).unwrap();

        mem.read_only = true;
        let err = store.remove(&mut mem, 0x1000, &original).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryAccess);
        assert!(store.contains(0x1000));

        mem.read_only = false;
        store.remove(&mut mem, 0x1000, &original).unwrap();
        assert_eq!(mem.snapshot(), [0x55]);
    }

    #[test]
    fn suspend_and_reinstate() {
        let mut mem = FakeMemory::new(0x1000, &[0x55, 0x48]);
        let mut store = BreakpointStore::new();

        store.install(&mut mem, 0x1000, &[0xcc]).unwrap();

        assert!(store.suspend(&mut mem, 0x1000).unwrap());
        assert!(!store.suspend(&mut mem, 0x1000).unwrap());
        assert!(!store.suspend(&mut mem, 0x1001).unwrap());
        assert!(store.get(0x1000).unwrap().is_suspended());
        assert_eq!(mem.snapshot(), [0x55, 0x48]);

        store.reinstate(&mut mem, 0x1000).unwrap();
        assert_eq!(mem.snapshot(), [0xcc, 0x48]);

        store.clear_all(&mut mem).unwrap();
        assert!(store.is_empty());
        assert_eq!(mem.snapshot(), [0x55, 0x48]);
    }
}
