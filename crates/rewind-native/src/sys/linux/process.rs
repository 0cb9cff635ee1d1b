use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use rewind_proc::{BoxError, Interrupt};

/// OS-specific process handle.
pub struct TracedProcessHandle {
    pidfd: OwnedFd,
    pid: Pid,
    kill_on_drop: bool,
}

impl TracedProcessHandle {
    /// Opens a handle to the process with the given ID.
    pub fn open(pid: Pid, kill_on_drop: bool) -> crate::sys::Result<Self> {
        let fd = unsafe {
            Errno::result(nix::libc::syscall(nix::libc::SYS_pidfd_open, pid.as_raw(), 0))
                .inspect_err(|e| tracing::error!(error = %e, pid = pid.as_raw(), "pidfd_open"))?
        };

        let pidfd = unsafe { OwnedFd::from_raw_fd(fd as i32) };

        Ok(Self {
            pidfd,
            pid,
            kill_on_drop,
        })
    }

    /// Returns the process ID of the process associated with this handle.
    pub const fn id(&self) -> Pid {
        self.pid
    }

    /// Returns the process ID of the process associated with this handle.
    pub const fn raw_id(&self) -> u64 {
        self.pid.as_raw() as u64
    }

    /// Specifies whether the process is killed when this handle is dropped.
    pub fn set_kill_on_drop(&mut self, kill_on_drop: bool) {
        self.kill_on_drop = kill_on_drop;
    }

    /// Sends `SIGKILL` to the process.
    pub fn kill(&self) -> crate::sys::Result<()> {
        let res = unsafe {
            Errno::result(nix::libc::syscall(
                nix::libc::SYS_pidfd_send_signal,
                self.pidfd.as_raw_fd(),
                Signal::SIGKILL,
                Option::<()>::None,
                0,
            ))
        };

        match res {
            Ok(_) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, pidfd = self.pidfd.as_raw_fd(), "pidfd_send_signal");
                Err(e.into())
            }
        }
    }
}

impl Drop for TracedProcessHandle {
    fn drop(&mut self) {
        if self.kill_on_drop && self.kill().is_ok() {
            tracing::debug!(pid = self.pid.as_raw(), "process killed");
        }
    }
}

/// Interrupts a running traced process by sending it `SIGSTOP`.
///
/// The tracer observes the signal-delivery stop of one of its threads.
#[derive(Clone, Copy, Debug)]
pub struct StopSignalInterrupter {
    pid: Pid,
}

impl StopSignalInterrupter {
    /// Creates the interrupter of the process with the given ID.
    pub const fn new(pid: Pid) -> Self {
        Self { pid }
    }
}

impl Interrupt for StopSignalInterrupter {
    fn interrupt(&self) -> Result<(), BoxError> {
        signal::kill(self.pid, Signal::SIGSTOP).inspect_err(|e| {
            tracing::error!(error = %e, pid = self.pid.as_raw(), "kill(SIGSTOP)")
        })?;

        Ok(())
    }
}
