use crate::BoxError;

/// Trait providing byte-level access to the address space of a target.
///
/// This is the collaborator the [BreakpointStore](crate::BreakpointStore)
/// relies on to install and restore breakpoints.
pub trait MemoryIo {
    /// Reads `buf.len()` bytes at the given virtual address.
    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<(), BoxError>;

    /// Writes `data` at the given virtual address.
    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), BoxError>;
}

impl<M: MemoryIo + ?Sized> MemoryIo for &mut M {
    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<(), BoxError> {
        (**self).read_memory(addr, buf)
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), BoxError> {
        (**self).write_memory(addr, data)
    }
}
