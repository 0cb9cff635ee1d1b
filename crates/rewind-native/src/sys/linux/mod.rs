mod error;
pub mod mem;
mod process;
pub mod thread;

use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

pub use self::error::{Error, Result};
pub use self::process::{StopSignalInterrupter, TracedProcessHandle};

/// Spawns a new child process, stopped right after `exec`.
///
/// # Note
///
/// The process is spawned in debug-mode, so every later `ptrace` request
/// must come from the calling thread.
pub fn spawn_debuggee(command: &mut Command) -> crate::sys::Result<TracedProcessHandle> {
    // On Linux, if a `pre_exec` closure is specified, `rust-std` will
    // spawn the process with `fork`+`exec`, otherwise `posix_spawn` is used.
    unsafe {
        command.pre_exec(|| ptrace::traceme().map_err(|e| io::Error::from_raw_os_error(e as i32)))
    };

    let child = command.spawn()?;
    let pid = Pid::from_raw(child.id() as i32);

    let handle = TracedProcessHandle::open(pid, true)?;

    wait_for_thread_ready(pid)?;

    tracing::debug!(pid = pid.as_raw(), "debuggee spawned");

    Ok(handle)
}

/// Attaches to every thread of a running process.
///
/// Returns the process handle and the IDs of the attached threads.
pub fn attach_debuggee(process_id: u64) -> crate::sys::Result<(TracedProcessHandle, Vec<u64>)> {
    let pid = Pid::from_raw(process_id as i32);
    let handle = TracedProcessHandle::open(pid, false)?;

    let thread_ids = self::thread::list_threads(process_id)?;

    if thread_ids.is_empty() {
        return Err(Error::NoThread(process_id));
    }

    for &tid in &thread_ids {
        let tid = Pid::from_raw(tid as i32);

        ptrace::attach(tid)?;

        match waitpid(tid, Some(WaitPidFlag::__WALL))? {
            WaitStatus::Stopped(_, Signal::SIGSTOP) => (),
            status => return Err(Error::BadChildWait(status)),
        }

        ptrace::setoptions(tid, trace_options())?;
    }

    tracing::debug!(pid = process_id, threads = thread_ids.len(), "debuggee attached");

    Ok((handle, thread_ids))
}

/// Returns the path of the executable of a process.
pub fn exe_path(process_id: u64) -> crate::sys::Result<PathBuf> {
    let path: PathBuf = format!("/proc/{process_id}/exe").into();

    std::fs::read_link(&path).map_err(|e| Error::File(path, e))
}

/// Reads the auxiliary vector of a process.
pub fn read_auxv(process_id: u64) -> crate::sys::Result<Vec<u8>> {
    let path: PathBuf = format!("/proc/{process_id}/auxv").into();

    std::fs::read(&path).map_err(|e| Error::File(path, e))
}

fn trace_options() -> ptrace::Options {
    ptrace::Options::PTRACE_O_TRACECLONE | ptrace::Options::PTRACE_O_TRACEEXIT
}

fn wait_for_thread_ready(pid: Pid) -> crate::sys::Result<()> {
    let status = waitpid(pid, None)?;

    if !matches!(status, WaitStatus::Stopped(_, Signal::SIGTRAP)) {
        return Err(Error::BadChildWait(status));
    }

    ptrace::setoptions(pid, trace_options())?;

    Ok(())
}
