//! Exercises the contract through a minimal in-memory target, built from the
//! backend-agnostic components only.

use std::collections::BTreeMap;

use rewind_proc::{
    BoxError, BreakpointStore, CommonProcess, Direction, ErrorKind, ExecutionController, Info,
    MemoryIo, Process, ProcessManipulation, RecordingManipulation, Thread, ThreadInfo,
    ThreadRegistry,
};
use test_log::test;
use tokio::sync::oneshot;

#[derive(Clone, Debug)]
struct ToyThread {
    id: u64,
    pc: u64,
}

impl Thread for ToyThread {
    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Default)]
struct ToyMemory(BTreeMap<u64, u8>);

impl MemoryIo for ToyMemory {
    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<(), BoxError> {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = *self.0.get(&(addr + i as u64)).ok_or("unmapped")?;
        }
        Ok(())
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), BoxError> {
        for (i, b) in data.iter().enumerate() {
            *self.0.get_mut(&(addr + i as u64)).ok_or("unmapped")? = *b;
        }
        Ok(())
    }
}

/// Single-threaded target executing one-byte instructions from 0x1000 up to
/// 0x1010, where it exits.
struct ToyProcess {
    common: CommonProcess,
    exec: ExecutionController,
    threads: ThreadRegistry<ToyThread>,
    breakpoints: BreakpointStore,
    mem: ToyMemory,
}

impl ToyProcess {
    fn new() -> Self {
        let mut mem = ToyMemory::default();
        mem.0.extend((0x1000..0x1010).map(|addr| (addr, 0x90)));

        let mut threads = ThreadRegistry::new();
        threads.insert(ToyThread { id: 1, pc: 0x1000 });

        Self {
            common: CommonProcess::new("/bin/toy"),
            exec: ExecutionController::new(7),
            threads,
            breakpoints: BreakpointStore::new(),
            mem,
        }
    }

    fn run(&mut self, single_step: bool) -> rewind_proc::Result<ToyThread> {
        let mut stepped = false;

        loop {
            let thread = self.threads.find_mut(1).ok_or(rewind_proc::Error::NoCurrentThread)?;

            if thread.pc == 0x1010 {
                return Err(rewind_proc::Error::ProcessExited { pid: 7, status: 0 });
            }

            let trapped = stepped && (single_step || self.breakpoints.contains(thread.pc));

            if trapped || (!single_step && self.exec.manual_stop_pending()) {
                return Ok(thread.clone());
            }

            thread.pc += 1;
            stepped = true;
        }
    }
}

impl ThreadInfo for ToyProcess {
    type Thread = ToyThread;

    fn find_thread(&self, thread_id: u64) -> Option<&ToyThread> {
        self.threads.find(thread_id)
    }

    fn thread_list(&self) -> Vec<&ToyThread> {
        self.threads.list()
    }

    fn current_thread(&self) -> Option<&ToyThread> {
        self.threads.current()
    }
}

impl Info for ToyProcess {
    fn pid(&self) -> u64 {
        self.exec.pid()
    }

    fn resume_notify(&mut self, tx: oneshot::Sender<()>) {
        self.exec.set_resume_notify(tx);
    }

    fn valid(&self) -> rewind_proc::Result<()> {
        self.exec.check_valid()
    }

    fn entry_point(&self) -> rewind_proc::Result<u64> {
        Ok(0x1000)
    }

    fn common(&self) -> &CommonProcess {
        &self.common
    }
}

impl ProcessManipulation for ToyProcess {
    fn resume(&mut self) -> rewind_proc::Result<ToyThread> {
        self.exec.begin_resume()?;
        let res = self.run(false);
        self.exec.end_resume(res)
    }

    fn step_instruction(&mut self) -> rewind_proc::Result<()> {
        self.exec.begin_resume()?;
        let res = self.run(true).map(|_| ());
        self.exec.end_resume(res)
    }

    fn step_instruction_out(
        &mut self,
        _thread_id: u64,
        _from: &str,
        _to: &str,
    ) -> rewind_proc::Result<()> {
        Err(rewind_proc::Error::Unsupported("step out"))
    }

    fn request_manual_stop(&self) -> rewind_proc::Result<()> {
        self.exec.request_manual_stop()
    }

    fn manual_stop_handle(&self) -> rewind_proc::ManualStopHandle {
        self.exec.manual_stop_handle()
    }

    fn check_and_clear_manual_stop_request(&self) -> bool {
        self.exec.check_and_clear_manual_stop()
    }

    fn switch_thread(&mut self, thread_id: u64) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        self.threads.set_current(thread_id)
    }

    fn detach(&mut self, _kill: bool) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        self.breakpoints.clear_all(&mut self.mem)?;
        self.exec.mark_detached();
        Ok(())
    }
}

impl RecordingManipulation for ToyProcess {}

impl Process for ToyProcess {
    fn write_breakpoint(&mut self, addr: u64, instr: &[u8]) -> rewind_proc::Result<Vec<u8>> {
        self.exec.check_valid()?;
        self.breakpoints.install(&mut self.mem, addr, instr)
    }

    fn clear_breakpoint(&mut self, addr: u64, original: &[u8]) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        self.breakpoints.remove(&mut self.mem, addr, original)
    }
}

#[test]
fn breakpoint_round_trip() {
    let mut process = ToyProcess::new();

    let original = process.write_breakpoint(0x1004, &[0xcc]).unwrap();
    assert_eq!(original, [0x90]);

    let err = process.write_breakpoint(0x1004, &[0xcc]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MemoryAccess);

    let trapped = process.resume().unwrap();
    assert_eq!(trapped.id(), 1);
    assert_eq!(trapped.pc, 0x1004);

    process.clear_breakpoint(0x1004, &original).unwrap();
    assert_eq!(process.mem.0[&0x1004], 0x90);

    let err = process.clear_breakpoint(0x1004, &original).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MemoryAccess);
}

#[test]
fn exited_process_is_invalid() {
    let mut process = ToyProcess::new();
    assert!(process.is_valid());

    let err = process.resume().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProcessExited);
    assert!(!process.is_valid());

    // every manipulation now fails
    assert_eq!(process.resume().unwrap_err().kind(), ErrorKind::ProcessExited);
    assert_eq!(process.step_instruction().unwrap_err().kind(), ErrorKind::ProcessExited);
    assert_eq!(process.request_manual_stop().unwrap_err().kind(), ErrorKind::ProcessExited);
    assert_eq!(
        process.write_breakpoint(0x1000, &[0xcc]).unwrap_err().kind(),
        ErrorKind::ProcessExited
    );
    assert_eq!(process.detach(false).unwrap_err().kind(), ErrorKind::ProcessExited);

    // pure queries keep working
    assert_eq!(process.pid(), 7);
    assert_eq!(process.executable_path().to_str(), Some("/bin/toy"));
}

#[test]
fn detach_restores_memory() {
    let mut process = ToyProcess::new();

    process.write_breakpoint(0x1002, &[0xcc]).unwrap();
    process.detach(false).unwrap();

    assert_eq!(process.mem.0[&0x1002], 0x90);
    assert_eq!(process.valid().unwrap_err().kind(), ErrorKind::ProcessDetached);
    assert_eq!(process.resume().unwrap_err().kind(), ErrorKind::ProcessDetached);
}

#[test]
fn manual_stop_before_resume() {
    let mut process = ToyProcess::new();

    process.request_manual_stop().unwrap();

    // stops at the first safe point, before executing anything
    let stopped = process.resume().unwrap();
    assert_eq!(stopped.pc, 0x1000);

    assert!(process.check_and_clear_manual_stop_request());
    assert!(!process.check_and_clear_manual_stop_request());

    process.step_instruction().unwrap();
    assert_eq!(process.current_thread().unwrap().pc, 0x1001);
}

#[test]
fn live_target_is_not_a_recording() {
    let mut process = ToyProcess::new();

    assert!(process.recorded().is_none());
    assert_eq!(process.direction(), Direction::Forward);

    assert_eq!(process.restart("").unwrap_err().kind(), ErrorKind::Unsupported);
    assert_eq!(
        process.change_direction(Direction::Backward).unwrap_err().kind(),
        ErrorKind::Unsupported
    );
    assert_eq!(process.when().unwrap_err().kind(), ErrorKind::Unsupported);
    assert_eq!(process.checkpoint("here").unwrap_err().kind(), ErrorKind::Unsupported);
    assert_eq!(process.checkpoints().unwrap_err().kind(), ErrorKind::Unsupported);
    assert_eq!(process.clear_checkpoint(1).unwrap_err().kind(), ErrorKind::Unsupported);
}

#[test(tokio::test)]
async fn resume_notifies_listener() {
    let mut process = ToyProcess::new();
    process.write_breakpoint(0x1003, &[0xcc]).unwrap();

    let (tx, rx) = oneshot::channel();
    process.resume_notify(tx);

    let handle = std::thread::spawn(move || process.resume().map(|t| t.pc));

    rx.await.unwrap();
    assert_eq!(handle.join().unwrap().unwrap(), 0x1003);
}

#[test]
fn switch_to_unknown_thread() {
    let mut process = ToyProcess::new();

    assert!(process.find_thread(1).is_some());
    assert_eq!(process.thread_list().len(), 1);

    assert!(process.switch_thread(2).is_err());
    process.switch_thread(1).unwrap();
}
