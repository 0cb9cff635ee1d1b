use nix::errno::Errno;
use nix::libc::{iovec, process_vm_readv};
use nix::sys::ptrace;
use nix::unistd::Pid;
use rewind_proc::{BoxError, MemoryIo};

/// Address space of a traced process.
#[derive(Clone, Copy, Debug)]
pub struct ProcessMemory {
    pid: u64,
}

impl ProcessMemory {
    /// Accesses the memory of the process with the given ID.
    pub const fn new(pid: u64) -> Self {
        Self { pid }
    }
}

impl MemoryIo for ProcessMemory {
    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<(), BoxError> {
        Ok(read_process_memory(self.pid, addr, buf)?)
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), BoxError> {
        Ok(write_process_memory(self.pid, addr, data)?)
    }
}

/// Reads memory from the process with the given ID.
pub fn read_process_memory(process_id: u64, addr: u64, buf: &mut [u8]) -> crate::sys::Result<()> {
    if buf.is_empty() {
        return Ok(());
    }

    let local_iov = iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    let remote_iov = iovec {
        iov_base: addr as *mut _,
        iov_len: buf.len(),
    };

    let len = unsafe {
        Errno::result(process_vm_readv(
            process_id as i32,
            &local_iov as *const _,
            1,
            &remote_iov as *const _,
            1,
            0,
        ))
        .inspect_err(
            |e| tracing::error!(error = %e, addr = format_args!("{addr:#x}"), "process_vm_readv"),
        )
        .map(|len| len as usize)?
    };

    if len != buf.len() {
        Err(crate::sys::Error::PartialMemOp(len, buf.len()))
    } else {
        Ok(())
    }
}

/// Writes memory into the process with the given ID.
///
/// Memory is written word by word with `PTRACE_POKEDATA`, so read-only pages
/// (e.g., code) can be written as well.
pub fn write_process_memory(process_id: u64, addr: u64, buf: &[u8]) -> crate::sys::Result<()> {
    let pid = Pid::from_raw(process_id as i32);

    let mut data_to_write = buf.chunks_exact(std::mem::size_of::<u64>());

    let mut write_addr = addr;

    for chunk in &mut data_to_write {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let data = i64::from_le_bytes(word);

        ptrace::write(pid, write_addr as *mut _, data)
            .inspect_err(|e| {
                tracing::error!(
                    error = %e,
                    addr = format_args!("{write_addr:#x}"),
                    "ptrace(PTRACE_POKEDATA)"
                )
            })?;

        write_addr += chunk.len() as u64;
    }

    let remainder = data_to_write.remainder();

    if !remainder.is_empty() {
        let mut old_data = ptrace::read(pid, write_addr as *mut _)
            .inspect_err(|e| {
                tracing::error!(
                    error = %e,
                    addr = format_args!("{write_addr:#x}"),
                    "ptrace(PTRACE_PEEKDATA)"
                )
            })?
            .to_le_bytes();

        for (old, new) in old_data.iter_mut().zip(remainder) {
            *old = *new;
        }

        let new_data = i64::from_le_bytes(old_data);

        ptrace::write(pid, write_addr as *mut _, new_data)
            .inspect_err(|e| {
                tracing::error!(
                    error = %e,
                    addr = format_args!("{write_addr:#x}"),
                    "ptrace(PTRACE_POKEDATA)"
                )
            })?;
    }

    Ok(())
}
