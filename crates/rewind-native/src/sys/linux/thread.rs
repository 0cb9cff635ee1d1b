use std::ffi::c_void;
use std::mem;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::libc;
use nix::sys::ptrace::regset::NT_PRSTATUS;
use nix::sys::ptrace::{self, RegisterSet};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

/// Resumes a stopped thread, delivering `signal` to it.
pub fn resume_thread(
    thread_id: u64,
    single_step: bool,
    signal: Option<Signal>,
) -> crate::sys::Result<()> {
    let pid = Pid::from_raw(thread_id as i32);

    if single_step {
        ptrace::step(pid, signal)?;
    } else {
        ptrace::cont(pid, signal)?;
    }

    Ok(())
}

/// Sends a signal to a single thread of a process.
pub fn signal_thread(process_id: u64, thread_id: u64, signal: Signal) -> crate::sys::Result<()> {
    unsafe {
        Errno::result(libc::syscall(
            libc::SYS_tgkill,
            process_id as libc::pid_t,
            thread_id as libc::pid_t,
            signal as libc::c_int,
        ))
        .inspect_err(|e| tracing::error!(error = %e, tid = thread_id, "tgkill"))?
    };

    Ok(())
}

/// Returns the IDs of the threads of a process.
pub fn list_threads(process_id: u64) -> crate::sys::Result<Vec<u64>> {
    let path: PathBuf = format!("/proc/{process_id}/task").into();

    let entries = std::fs::read_dir(&path).map_err(|e| crate::sys::Error::File(path.clone(), e))?;

    let mut thread_ids = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| crate::sys::Error::File(path.clone(), e))?;

        if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            thread_ids.push(tid);
        }
    }

    thread_ids.sort_unstable();

    Ok(thread_ids)
}

/// Returns the instruction address of a stopped thread.
pub fn get_instr_addr(thread_id: u64) -> crate::sys::Result<u64> {
    get_thread_registers(thread_id).map(|regs| regs.instr_addr())
}

/// Sets the instruction address of a stopped thread.
pub fn set_instr_addr(thread_id: u64, addr: u64) -> crate::sys::Result<()> {
    let mut regs = get_thread_registers(thread_id)?;
    regs.set_instr_addr(addr);
    regs.assign_to_thread(thread_id)
}

fn get_thread_registers(thread_id: u64) -> crate::sys::Result<Registers> {
    let mut data = mem::MaybeUninit::<libc::user_regs_struct>::uninit();

    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr().cast(),
        iov_len: mem::size_of::<libc::user_regs_struct>(),
    };

    unsafe {
        Errno::result(libc::ptrace(
            ptrace::Request::PTRACE_GETREGSET as u32,
            thread_id as i32,
            NT_PRSTATUS::VALUE as i32,
            &mut iov as *mut libc::iovec,
        ))
        .map(|_| 0)?
    };

    if iov.iov_len != mem::size_of::<libc::user_regs_struct>() {
        return Err(crate::sys::Error::PartialMemOp(
            iov.iov_len,
            mem::size_of::<libc::user_regs_struct>(),
        ));
    }

    Ok(Registers(unsafe { data.assume_init() }))
}

/// General purpose registers of a 64-bit thread.
struct Registers(libc::user_regs_struct);

impl Registers {
    fn instr_addr(&self) -> u64 {
        #[cfg(target_arch = "x86_64")]
        {
            self.0.rip
        }
        #[cfg(target_arch = "aarch64")]
        {
            self.0.pc
        }
    }

    fn set_instr_addr(&mut self, addr: u64) {
        #[cfg(target_arch = "x86_64")]
        {
            self.0.rip = addr;
        }
        #[cfg(target_arch = "aarch64")]
        {
            self.0.pc = addr;
        }
    }

    fn assign_to_thread(&self, thread_id: u64) -> crate::sys::Result<()> {
        let mut iov = libc::iovec {
            iov_base: &self.0 as *const libc::user_regs_struct as *mut c_void,
            iov_len: mem::size_of::<libc::user_regs_struct>(),
        };

        unsafe {
            Errno::result(libc::ptrace(
                ptrace::Request::PTRACE_SETREGSET as u32,
                thread_id as i32,
                NT_PRSTATUS::VALUE as i32,
                &mut iov as *mut libc::iovec,
            ))
            .map(|_| 0)?
        };

        Ok(())
    }
}
