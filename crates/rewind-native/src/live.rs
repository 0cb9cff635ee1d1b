use std::path::PathBuf;
use std::process::Command;

use nix::libc::{PTRACE_EVENT_CLONE, PTRACE_EVENT_EXIT};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use rewind_proc::exec::StepOut;
use rewind_proc::{
    BreakpointStore, CommonProcess, Error, ExecutionConfig, ExecutionController, FunctionLookup,
    Info, ManualStopHandle, Process, ProcessManipulation, RecordingManipulation, Thread,
    ThreadInfo, ThreadRegistry,
};
use tokio::sync::oneshot;

use crate::ElfSymbols;
use crate::sys::mem::ProcessMemory;
use crate::sys::thread as sys_thread;
use crate::sys::{StopSignalInterrupter, TracedProcessHandle};

/// Thread of a live process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveThread {
    id: u64,
    instr_addr: u64,
    pending_signal: Option<Signal>,
}

impl LiveThread {
    const fn new(id: u64) -> Self {
        Self {
            id,
            instr_addr: 0,
            pending_signal: None,
        }
    }

    /// Returns the instruction address of the thread, as of its last stop.
    pub const fn instr_addr(&self) -> u64 {
        self.instr_addr
    }
}

impl Thread for LiveThread {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Process running on the host, debugged with `ptrace`.
///
/// # Note
///
/// `ptrace` requests are only accepted from the thread which spawned or
/// attached to the process, so a `LiveProcess` must stay on that thread.
pub struct LiveProcess {
    common: CommonProcess,
    handle: TracedProcessHandle,
    config: ExecutionConfig,
    exec: ExecutionController,
    threads: ThreadRegistry<LiveThread>,
    breakpoints: BreakpointStore,
    symbols: ElfSymbols,
    entry_point: Option<u64>,
}

/// Outcome of a wait status observed while the process runs.
enum Stop {
    /// A thread stopped, and the process must stop.
    Thread(u64),

    /// The process keeps running.
    Continue,
}

impl LiveProcess {
    /// Spawns `command` as a traced process, stopped at its first instruction.
    ///
    /// The process is killed when the returned value is dropped, unless it
    /// was [detached](ProcessManipulation::detach) without being killed.
    pub fn spawn(mut command: Command, config: ExecutionConfig) -> crate::Result<Self> {
        let handle = crate::sys::spawn_debuggee(&mut command)?;
        let pid = handle.raw_id();

        Self::init(handle, vec![pid], config)
    }

    /// Attaches to every thread of the running process `pid`.
    pub fn attach(pid: u64, config: ExecutionConfig) -> crate::Result<Self> {
        let (handle, thread_ids) = crate::sys::attach_debuggee(pid)?;

        Self::init(handle, thread_ids, config)
    }

    fn init(
        handle: TracedProcessHandle,
        thread_ids: Vec<u64>,
        config: ExecutionConfig,
    ) -> crate::Result<Self> {
        let pid = handle.raw_id();
        let exe_path = crate::sys::exe_path(pid)?;

        let entry_point = match read_entry_point(pid, &exe_path) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "cannot determine entry point");
                None
            }
        };

        let symbols = ElfSymbols::open(&exe_path, entry_point).unwrap_or_else(|e| {
            tracing::warn!(error = %e, path = %exe_path.display(), "cannot load symbols");
            ElfSymbols::default()
        });

        let exec = ExecutionController::new(pid)
            .with_interrupter(StopSignalInterrupter::new(handle.id()));

        let mut process = Self {
            common: CommonProcess::new(exe_path),
            handle,
            config,
            exec,
            threads: ThreadRegistry::new(),
            breakpoints: BreakpointStore::new(),
            symbols,
            entry_point,
        };

        for tid in thread_ids {
            process.threads.insert(LiveThread::new(tid));
        }

        process.refresh_threads();

        tracing::info!(pid, threads = process.threads.len(), "process ready");

        Ok(process)
    }

    /// Returns the function symbols of the executable.
    pub const fn symbols(&self) -> &ElfSymbols {
        &self.symbols
    }

    /// Reads the memory of the process.
    pub fn read_memory(&self, addr: u64, buf: &mut [u8]) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;

        crate::sys::mem::read_process_memory(self.handle.raw_id(), addr, buf).map_err(|e| {
            Error::MemoryAccess {
                addr,
                source: e.into(),
            }
        })
    }

    fn memory(&self) -> ProcessMemory {
        ProcessMemory::new(self.handle.raw_id())
    }

    /// Updates the instruction address of every stopped thread.
    fn refresh_threads(&mut self) {
        for tid in self.threads.ids() {
            match sys_thread::get_instr_addr(tid) {
                Ok(instr_addr) => {
                    if let Some(thread) = self.threads.find_mut(tid) {
                        thread.instr_addr = instr_addr;
                    }
                }
                // e.g., the thread is exiting
                Err(e) => tracing::debug!(tid, error = %e, "cannot read instruction address"),
            }
        }
    }

    /// Returns the address of the breakpoint a thread trapped on, given its
    /// instruction address after the trap.
    fn trapped_breakpoint(&self, instr_addr: u64) -> Option<u64> {
        if cfg!(target_arch = "x86_64") {
            // the trap instruction has been executed
            self.breakpoints.addresses().into_iter().find(|&addr| {
                self.breakpoints
                    .get(addr)
                    .is_some_and(|bk| addr + bk.instr.len() as u64 == instr_addr)
            })
        } else {
            self.breakpoints.contains(instr_addr).then_some(instr_addr)
        }
    }

    fn resume_all(&mut self) -> rewind_proc::Result<LiveThread> {
        if self.exec.manual_stop_pending() {
            tracing::debug!("manual stop requested before resuming");
            return self.stopped_thread(self.threads.current_id().ok_or(Error::NoCurrentThread)?);
        }

        // threads sitting on a breakpoint first execute the original instruction
        for tid in self.threads.ids() {
            let instr_addr = self.threads.find(tid).map_or(0, |t| t.instr_addr);

            if self.breakpoints.contains(instr_addr) {
                tracing::debug!(
                    tid,
                    addr = format_args!("{instr_addr:#x}"),
                    "stepping over breakpoint"
                );
                self.step_thread(tid)?;
            }
        }

        if self.exec.manual_stop_pending() {
            return self.stopped_thread(self.threads.current_id().ok_or(Error::NoCurrentThread)?);
        }

        for thread in self.threads.list() {
            sys_thread::resume_thread(thread.id, false, thread.pending_signal)?;
        }

        for tid in self.threads.ids() {
            if let Some(thread) = self.threads.find_mut(tid) {
                thread.pending_signal = None;
            }
        }

        loop {
            let status = wait_traced()
                .map_err(crate::sys::Error::from)?;

            if let Stop::Thread(tid) = self.handle_wait_status(status)? {
                return self.stopped_thread(tid);
            }
        }
    }

    fn handle_wait_status(&mut self, status: WaitStatus) -> rewind_proc::Result<Stop> {
        let main_pid = self.handle.id();

        match status {
            WaitStatus::Stopped(pid, Signal::SIGTRAP) => {
                let tid = pid.as_raw() as u64;
                let instr_addr = sys_thread::get_instr_addr(tid)?;

                if let Some(addr) = self.trapped_breakpoint(instr_addr) {
                    tracing::debug!(tid, addr = format_args!("{addr:#x}"), "breakpoint hit");

                    sys_thread::set_instr_addr(tid, addr)?;
                    self.stop_other_threads(tid)?;

                    return Ok(Stop::Thread(tid));
                }

                tracing::debug!(tid, addr = format_args!("{instr_addr:#x}"), "spurious trap");
                sys_thread::resume_thread(tid, false, None)?;
            }
            WaitStatus::Stopped(pid, Signal::SIGSTOP) => {
                let tid = pid.as_raw() as u64;

                if self.exec.manual_stop_pending() {
                    tracing::debug!(tid, "manual stop");

                    self.stop_other_threads(tid)?;

                    return Ok(Stop::Thread(tid));
                }

                // stale stop request, or the initial stop of a new thread
                sys_thread::resume_thread(tid, false, None)?;
            }
            WaitStatus::Stopped(pid, signal) => {
                tracing::debug!(tid = pid.as_raw(), %signal, "forwarding signal");
                sys_thread::resume_thread(pid.as_raw() as u64, false, Some(signal))?;
            }
            WaitStatus::PtraceEvent(pid, Signal::SIGTRAP, PTRACE_EVENT_CLONE) => {
                let new_tid = self.register_new_thread(pid)?;

                sys_thread::resume_thread(new_tid, false, None)?;
                sys_thread::resume_thread(pid.as_raw() as u64, false, None)?;
            }
            WaitStatus::PtraceEvent(pid, Signal::SIGTRAP, PTRACE_EVENT_EXIT) => {
                tracing::debug!(tid = pid.as_raw(), "thread exiting");
                sys_thread::resume_thread(pid.as_raw() as u64, false, None)?;
            }
            WaitStatus::Exited(pid, status) if pid == main_pid => {
                return Err(self.exited(status));
            }
            WaitStatus::Signaled(pid, signal, _) if pid == main_pid => {
                tracing::debug!(%signal, "process killed by signal");
                return Err(self.exited(128 + signal as i32));
            }
            WaitStatus::Exited(pid, _) | WaitStatus::Signaled(pid, _, _) => {
                tracing::debug!(tid = pid.as_raw(), "thread exited");
                self.threads.remove(pid.as_raw() as u64);
            }
            _ => tracing::debug!(?status, "ignored wait status"),
        }

        Ok(Stop::Continue)
    }

    fn register_new_thread(&mut self, parent: Pid) -> rewind_proc::Result<u64> {
        let new_pid = ptrace::getevent(parent)
            .map(|id| Pid::from_raw(id as i32))
            .map_err(crate::sys::Error::from)?;

        // the new thread starts with a SIGSTOP
        match waitpid(new_pid, Some(WaitPidFlag::__WALL)).map_err(crate::sys::Error::from)? {
            WaitStatus::Stopped(_, Signal::SIGSTOP) => (),
            status => return Err(crate::sys::Error::BadChildWait(status).into()),
        }

        let tid = new_pid.as_raw() as u64;
        self.threads.insert(LiveThread::new(tid));

        tracing::debug!(parent = parent.as_raw(), tid, "thread created");

        Ok(tid)
    }

    /// Stops every running thread but `trapped_tid`.
    fn stop_other_threads(&mut self, trapped_tid: u64) -> rewind_proc::Result<()> {
        let pid = self.handle.raw_id();

        for tid in self.threads.ids() {
            if tid == trapped_tid {
                continue;
            }

            if let Err(e) = sys_thread::signal_thread(pid, tid, Signal::SIGSTOP) {
                tracing::debug!(tid, error = %e, "cannot stop thread");
                continue;
            }

            loop {
                let status = waitpid(Pid::from_raw(tid as i32), Some(WaitPidFlag::__WALL))
                    .map_err(crate::sys::Error::from)?;

                match status {
                    WaitStatus::Stopped(_, Signal::SIGSTOP) | WaitStatus::PtraceEvent(..) => break,
                    WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                        // hit a breakpoint concurrently: the trap is replayed on resume
                        let instr_addr = sys_thread::get_instr_addr(tid)?;

                        if let Some(addr) = self.trapped_breakpoint(instr_addr) {
                            sys_thread::set_instr_addr(tid, addr)?;
                        }

                        break;
                    }
                    WaitStatus::Stopped(_, signal) => {
                        if let Some(thread) = self.threads.find_mut(tid) {
                            thread.pending_signal = Some(signal);
                        }
                        break;
                    }
                    WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                        self.threads.remove(tid);
                        break;
                    }
                    _ => (),
                }
            }
        }

        Ok(())
    }

    /// Makes `tid` the current thread, and returns it.
    fn stopped_thread(&mut self, tid: u64) -> rewind_proc::Result<LiveThread> {
        self.refresh_threads();
        self.threads.set_current(tid)?;

        self.threads.current().cloned().ok_or(Error::NoCurrentThread)
    }

    /// Executes a single instruction on `tid`, with any breakpoint at its
    /// address lifted.
    fn step_thread(&mut self, tid: u64) -> rewind_proc::Result<u64> {
        let instr_addr = sys_thread::get_instr_addr(tid)?;

        let mut mem = self.memory();
        let suspended = self.breakpoints.suspend(&mut mem, instr_addr)?;

        let res = self.single_step(tid);

        if suspended && !matches!(res, Err(Error::ProcessExited { .. })) {
            self.breakpoints.reinstate(&mut mem, instr_addr)?;
        }

        let new_addr = res?;

        if let Some(thread) = self.threads.find_mut(tid) {
            thread.instr_addr = new_addr;
        }

        Ok(new_addr)
    }

    fn single_step(&mut self, tid: u64) -> rewind_proc::Result<u64> {
        let signal = self.threads.find_mut(tid).and_then(|t| t.pending_signal.take());

        sys_thread::resume_thread(tid, true, signal)?;

        loop {
            let status = waitpid(Pid::from_raw(tid as i32), Some(WaitPidFlag::__WALL))
                .map_err(crate::sys::Error::from)?;

            match status {
                WaitStatus::Stopped(_, Signal::SIGTRAP) => break,
                WaitStatus::Stopped(_, Signal::SIGSTOP) => {
                    sys_thread::resume_thread(tid, true, None)?;
                }
                WaitStatus::Stopped(_, signal) => {
                    sys_thread::resume_thread(tid, true, Some(signal))?;
                }
                WaitStatus::PtraceEvent(pid, Signal::SIGTRAP, PTRACE_EVENT_CLONE) => {
                    self.register_new_thread(pid)?;
                    sys_thread::resume_thread(tid, true, None)?;
                }
                WaitStatus::PtraceEvent(..) => {
                    sys_thread::resume_thread(tid, true, None)?;
                }
                WaitStatus::Exited(pid, status) if pid == self.handle.id() => {
                    return Err(self.exited(status));
                }
                WaitStatus::Signaled(pid, signal, _) if pid == self.handle.id() => {
                    return Err(self.exited(128 + signal as i32));
                }
                WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                    self.threads.remove(tid);
                    return Err(Error::UnknownThread(tid));
                }
                _ => (),
            }
        }

        Ok(sys_thread::get_instr_addr(tid)?)
    }

    fn step_out(&mut self, thread_id: u64, from: &str, to: &str) -> rewind_proc::Result<()> {
        if self.threads.find(thread_id).is_none() {
            return Err(Error::UnknownThread(thread_id));
        }

        let mut step_out = StepOut::new(from, to, self.config.step_out_limit);

        loop {
            let instr_addr = self.step_thread(thread_id)?;

            if !step_out.keep_stepping(self.symbols.function_at(instr_addr))? {
                return Ok(());
            }
        }
    }

    fn exited(&self, status: i32) -> Error {
        Error::ProcessExited {
            pid: self.handle.raw_id(),
            status,
        }
    }

    fn kill(&mut self) -> rewind_proc::Result<()> {
        self.handle.kill()?;

        // reap every thread
        loop {
            match wait_traced() {
                Ok(WaitStatus::Exited(pid, _) | WaitStatus::Signaled(pid, _, _))
                    if pid == self.handle.id() =>
                {
                    break;
                }
                Ok(_) => (),
                Err(_) => break,
            }
        }

        self.handle.set_kill_on_drop(false);

        tracing::info!(pid = self.handle.raw_id(), "process killed");

        Ok(())
    }

    fn release(&mut self) -> rewind_proc::Result<()> {
        let mut mem = self.memory();
        self.breakpoints.clear_all(&mut mem)?;

        for thread in self.threads.list() {
            let tid = Pid::from_raw(thread.id as i32);

            if let Err(e) = ptrace::detach(tid, thread.pending_signal) {
                tracing::warn!(tid = thread.id, error = %e, "ptrace(PTRACE_DETACH)");
            }
        }

        self.handle.set_kill_on_drop(false);

        Ok(())
    }
}

/// Waits for any thread traced by the calling thread to change state.
fn wait_traced() -> nix::Result<WaitStatus> {
    waitpid(None, Some(WaitPidFlag::__WALL | WaitPidFlag::__WNOTHREAD))
}

/// Returns the runtime entry point of a process.
fn read_entry_point(pid: u64, exe_path: &std::path::Path) -> crate::Result<Option<u64>> {
    let exe = std::fs::read(exe_path).map_err(|e| crate::Error::File(PathBuf::from(exe_path), e))?;
    let header = goblin::elf::Elf::parse_header(&exe)?;
    let elf_ctx = goblin::container::Ctx::new(header.container()?, header.endianness()?);

    let auxv = crate::sys::read_auxv(pid)?;

    crate::auxv::find(&auxv, elf_ctx, crate::auxv::AT_ENTRY)
}

impl ThreadInfo for LiveProcess {
    type Thread = LiveThread;

    fn find_thread(&self, thread_id: u64) -> Option<&LiveThread> {
        self.threads.find(thread_id)
    }

    fn thread_list(&self) -> Vec<&LiveThread> {
        self.threads.list()
    }

    fn current_thread(&self) -> Option<&LiveThread> {
        self.threads.current()
    }
}

impl Info for LiveProcess {
    fn pid(&self) -> u64 {
        self.handle.raw_id()
    }

    fn resume_notify(&mut self, tx: oneshot::Sender<()>) {
        self.exec.set_resume_notify(tx);
    }

    fn valid(&self) -> rewind_proc::Result<()> {
        self.exec.check_valid()
    }

    fn entry_point(&self) -> rewind_proc::Result<u64> {
        self.entry_point.ok_or(Error::NoEntryPoint)
    }

    fn common(&self) -> &CommonProcess {
        &self.common
    }
}

impl ProcessManipulation for LiveProcess {
    #[tracing::instrument(skip(self), fields(pid = self.handle.raw_id()))]
    fn resume(&mut self) -> rewind_proc::Result<LiveThread> {
        self.exec.begin_resume()?;

        let res = self.resume_all();

        self.exec.end_resume(res)
    }

    #[tracing::instrument(skip(self), fields(pid = self.handle.raw_id()))]
    fn step_instruction(&mut self) -> rewind_proc::Result<()> {
        self.exec.begin_resume()?;

        let res = match self.threads.current_id() {
            Some(tid) => self.step_thread(tid).map(|_| ()),
            None => Err(Error::NoCurrentThread),
        };

        self.exec.end_resume(res)
    }

    #[tracing::instrument(skip(self))]
    fn step_instruction_out(
        &mut self,
        thread_id: u64,
        from: &str,
        to: &str,
    ) -> rewind_proc::Result<()> {
        self.exec.begin_resume()?;

        let res = self.step_out(thread_id, from, to);

        self.exec.end_resume(res)
    }

    fn request_manual_stop(&self) -> rewind_proc::Result<()> {
        self.exec.request_manual_stop()
    }

    fn manual_stop_handle(&self) -> ManualStopHandle {
        self.exec.manual_stop_handle()
    }

    fn check_and_clear_manual_stop_request(&self) -> bool {
        self.exec.check_and_clear_manual_stop()
    }

    fn switch_thread(&mut self, thread_id: u64) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        self.threads.set_current(thread_id)
    }

    #[tracing::instrument(skip(self), fields(pid = self.handle.raw_id()))]
    fn detach(&mut self, kill: bool) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;

        if kill {
            self.kill()?;
        } else {
            self.release()?;
        }

        self.exec.mark_detached();

        Ok(())
    }
}

impl RecordingManipulation for LiveProcess {}

impl Process for LiveProcess {
    fn write_breakpoint(&mut self, addr: u64, instr: &[u8]) -> rewind_proc::Result<Vec<u8>> {
        self.exec.check_valid()?;

        let mut mem = self.memory();
        self.breakpoints.install(&mut mem, addr, instr)
    }

    fn clear_breakpoint(&mut self, addr: u64, original: &[u8]) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;

        let mut mem = self.memory();
        self.breakpoints.remove(&mut mem, addr, original)
    }
}

impl std::fmt::Debug for LiveProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveProcess")
            .field("exec", &self.exec)
            .field("threads", &self.threads.ids())
            .field("breakpoints", &self.breakpoints.addresses())
            .finish_non_exhaustive()
    }
}
