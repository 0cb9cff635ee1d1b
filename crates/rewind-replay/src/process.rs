use std::collections::BTreeMap;
use std::path::Path;

use rewind_proc::exec::StepOut;
use rewind_proc::{
    BoxError, BreakpointStore, Checkpoint, CommonProcess, Direction, Error, ExecutionConfig,
    ExecutionController, Info, ManualStopHandle, MemoryIo, Position, Process, ProcessManipulation,
    RecordingController, RecordingManipulation, RestartPoint, Thread, ThreadInfo, ThreadRegistry,
};
use tokio::sync::oneshot;

use crate::TraceSource;

/// Thread of a recorded target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedThread {
    id: u64,
    instr_addr: u64,
}

impl RecordedThread {
    /// Returns the address of the next instruction executed by this thread.
    pub const fn instr_addr(&self) -> u64 {
        self.instr_addr
    }
}

impl Thread for RecordedThread {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Recorded target, replayable forward and backward.
///
/// Breakpoints are never written into the recording: they live in an overlay
/// on top of the recorded memory.
pub struct RecordedProcess<S> {
    common: CommonProcess,
    source: S,
    config: ExecutionConfig,
    exec: ExecutionController,
    recording: RecordingController,
    threads: ThreadRegistry<RecordedThread>,
    breakpoints: BreakpointStore,

    /// Bytes written by breakpoints, which differ from the recorded ones.
    overlay: BTreeMap<u64, u8>,

    /// Index of the next event to execute.
    pos: u64,

    /// Thread ID, and indices of the first and last events of this thread,
    /// in order of appearance.
    spans: Vec<(u64, u64, u64)>,
}

impl<S: TraceSource> RecordedProcess<S> {
    /// Opens a recording at its beginning.
    pub fn new(source: S, config: ExecutionConfig) -> Self {
        let mut spans: Vec<(u64, u64, u64)> = Vec::new();

        for index in 0..source.event_count() {
            let Some(event) = source.event(index) else {
                break;
            };

            match spans.iter_mut().find(|(tid, _, _)| *tid == event.thread_id) {
                Some(span) => span.2 = index,
                None => spans.push((event.thread_id, index, index)),
            }
        }

        let mut process = Self {
            common: CommonProcess::new(source.exe_path()),
            exec: ExecutionController::new(source.pid()),
            recording: RecordingController::new(source.tracedir()),
            source,
            config,
            threads: ThreadRegistry::new(),
            breakpoints: BreakpointStore::new(),
            overlay: BTreeMap::new(),
            pos: 0,
            spans,
        };

        process.refresh_threads(true);

        tracing::info!(
            pid = process.exec.pid(),
            events = process.source.event_count(),
            threads = process.spans.len(),
            "recording opened"
        );

        process
    }

    /// Returns the recording this process replays.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Returns the current position, as an event index.
    pub const fn position(&self) -> u64 {
        self.pos
    }

    /// Reads the memory of the target at the current position, breakpoints
    /// included.
    pub fn read_memory(&self, addr: u64, buf: &mut [u8]) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;

        self.memory()
            .read_memory(addr, buf)
            .map_err(|source| Error::MemoryAccess { addr, source })
    }

    fn memory(&self) -> OverlayMemory<'_, S> {
        OverlayMemory {
            source: &self.source,
            pos: self.pos,
            overlay: &self.overlay,
        }
    }

    /// Rebuilds the list of live threads at the current position.
    ///
    /// With `reset`, the thread about to execute becomes the current thread.
    /// Otherwise, the current thread is kept as long as it's alive.
    fn refresh_threads(&mut self, reset: bool) {
        let previous = self.threads.current_id().filter(|_| !reset);

        self.threads.clear();

        if let Some(next) = self.source.event(self.pos) {
            // registered first, so that it becomes the current thread
            let id = next.thread_id;
            self.threads.insert(RecordedThread {
                id,
                instr_addr: next.instr_addr,
            });
        }

        for &(id, first, last) in &self.spans {
            if first > self.pos || last < self.pos || self.threads.find(id).is_some() {
                continue;
            }

            let next = self.next_event_of(id).and_then(|i| self.source.event(i));

            if let Some(instr_addr) = next.map(|e| e.instr_addr) {
                self.threads.insert(RecordedThread { id, instr_addr });
            }
        }

        if let Some(id) = previous {
            let _ = self.threads.set_current(id);
        }
    }

    /// Returns the index of the next event of the given thread.
    fn next_event_of(&self, thread_id: u64) -> Option<u64> {
        (self.pos..self.source.event_count())
            .find(|&i| self.source.event(i).is_some_and(|e| e.thread_id == thread_id))
    }

    /// Returns the index of the previous event of the given thread.
    fn prev_event_of(&self, thread_id: u64) -> Option<u64> {
        (0..self.pos)
            .rev()
            .find(|&i| self.source.event(i).is_some_and(|e| e.thread_id == thread_id))
    }

    fn exited(&self) -> Error {
        Error::ProcessExited {
            pid: self.exec.pid(),
            status: self.source.exit_status(),
        }
    }

    /// Returns the thread executing the next event, making it the current
    /// thread.
    fn stop_at_next_event(&mut self) -> rewind_proc::Result<RecordedThread> {
        self.refresh_threads(true);
        self.threads.current().cloned().ok_or(Error::NoCurrentThread)
    }

    fn breakpoint_at(&self, index: u64) -> bool {
        self.source
            .event(index)
            .is_some_and(|e| self.breakpoints.contains(e.instr_addr))
    }

    fn resume_forward(&mut self) -> rewind_proc::Result<RecordedThread> {
        let count = self.source.event_count();
        let mut first = true;

        loop {
            if self.pos >= count {
                return Err(self.exited());
            }

            if self.exec.manual_stop_pending() {
                tracing::debug!(pos = self.pos, "manual stop");
                return self.stop_at_next_event();
            }

            if !first && self.breakpoint_at(self.pos) {
                tracing::debug!(pos = self.pos, "breakpoint hit");
                return self.stop_at_next_event();
            }

            self.pos += 1;
            first = false;
        }
    }

    fn resume_backward(&mut self) -> rewind_proc::Result<RecordedThread> {
        loop {
            if self.exec.manual_stop_pending() {
                tracing::debug!(pos = self.pos, "manual stop");
                return self.stop_at_next_event();
            }

            if self.pos == 0 {
                tracing::debug!("beginning of the recording reached");
                return self.stop_at_next_event();
            }

            self.pos -= 1;

            if self.breakpoint_at(self.pos) {
                tracing::debug!(pos = self.pos, "breakpoint hit");
                return self.stop_at_next_event();
            }
        }
    }

    /// Moves the given thread by one instruction in the current direction.
    fn step_thread(&mut self, thread_id: u64) -> rewind_proc::Result<()> {
        match self.recording.direction() {
            Direction::Forward => {
                let index = self.next_event_of(thread_id).ok_or(Error::UnknownThread(thread_id))?;
                self.pos = index + 1;

                if self.pos >= self.source.event_count() {
                    return Err(self.exited());
                }
            }
            Direction::Backward => {
                // at the beginning of its life, the thread stays put
                if let Some(index) = self.prev_event_of(thread_id) {
                    self.pos = index;
                }
            }
        }

        self.refresh_threads(false);

        if self.threads.find(thread_id).is_some() {
            self.threads.set_current(thread_id)?;
        }

        Ok(())
    }

    fn step_out(&mut self, thread_id: u64, from: &str, to: &str) -> rewind_proc::Result<()> {
        let mut step_out = StepOut::new(from, to, self.config.step_out_limit);

        loop {
            self.step_thread(thread_id)?;

            let instr_addr = self
                .threads
                .find(thread_id)
                .map(RecordedThread::instr_addr)
                .ok_or(Error::UnknownThread(thread_id))?;

            if !step_out.keep_stepping(self.source.function_at(instr_addr))? {
                return Ok(());
            }
        }
    }

    fn restart_at(&mut self, point: RestartPoint) -> rewind_proc::Result<()> {
        let count = self.source.event_count();

        let pos = match point {
            RestartPoint::Beginning => 0,
            RestartPoint::Checkpoint(checkpoint) => checkpoint
                .when
                .parse()
                .map_err(|_| Error::InvalidPosition(checkpoint.when.clone()))?,
            RestartPoint::Event(event) if event < count => event,
            RestartPoint::Event(event) => return Err(Error::EventOutOfRange { event, count }),
        };

        self.pos = pos;
        self.refresh_threads(true);

        tracing::info!(pos, "recording restarted");

        Ok(())
    }
}

impl<S: TraceSource> ThreadInfo for RecordedProcess<S> {
    type Thread = RecordedThread;

    fn find_thread(&self, thread_id: u64) -> Option<&RecordedThread> {
        self.threads.find(thread_id)
    }

    fn thread_list(&self) -> Vec<&RecordedThread> {
        self.threads.list()
    }

    fn current_thread(&self) -> Option<&RecordedThread> {
        self.threads.current()
    }
}

impl<S: TraceSource> Info for RecordedProcess<S> {
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
        Ok(self.source.entry_point())
    }

    fn common(&self) -> &CommonProcess {
        &self.common
    }
}

impl<S: TraceSource> ProcessManipulation for RecordedProcess<S> {
    #[tracing::instrument(
        skip(self),
        fields(pos = self.pos, direction = %self.recording.direction())
    )]
    fn resume(&mut self) -> rewind_proc::Result<RecordedThread> {
        self.exec.begin_resume()?;

        let res = match self.recording.direction() {
            Direction::Forward => self.resume_forward(),
            Direction::Backward => self.resume_backward(),
        };

        self.exec.end_resume(res)
    }

    #[tracing::instrument(skip(self), fields(pos = self.pos))]
    fn step_instruction(&mut self) -> rewind_proc::Result<()> {
        self.exec.begin_resume()?;

        let res = match self.threads.current_id() {
            Some(thread_id) => self.step_thread(thread_id),
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

    fn detach(&mut self, kill: bool) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;

        let mut mem = OverlayMemoryMut {
            source: &self.source,
            pos: self.pos,
            overlay: &mut self.overlay,
        };
        self.breakpoints.clear_all(&mut mem)?;

        tracing::debug!(kill, "closing recording");

        self.exec.mark_detached();

        Ok(())
    }
}

impl<S: TraceSource> RecordingManipulation for RecordedProcess<S> {
    fn recorded(&self) -> Option<&Path> {
        Some(self.recording.tracedir())
    }

    fn restart(&mut self, pos: &str) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;

        let point = self.recording.resolve(Position::parse(pos)?)?;
        self.restart_at(point)
    }

    fn change_direction(&mut self, direction: Direction) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        self.recording.set_direction(direction);
        Ok(())
    }

    fn direction(&self) -> Direction {
        self.recording.direction()
    }

    fn when(&self) -> rewind_proc::Result<String> {
        Ok(self.pos.to_string())
    }

    fn checkpoint(&mut self, label: &str) -> rewind_proc::Result<u64> {
        self.exec.check_valid()?;
        Ok(self.recording.add_checkpoint(self.pos.to_string(), label))
    }

    fn checkpoints(&self) -> rewind_proc::Result<Vec<Checkpoint>> {
        Ok(self.recording.checkpoints())
    }

    fn clear_checkpoint(&mut self, id: u64) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        self.recording.clear_checkpoint(id)
    }
}

impl<S: TraceSource> Process for RecordedProcess<S> {
    fn write_breakpoint(&mut self, addr: u64, instr: &[u8]) -> rewind_proc::Result<Vec<u8>> {
        self.exec.check_valid()?;

        let mut mem = OverlayMemoryMut {
            source: &self.source,
            pos: self.pos,
            overlay: &mut self.overlay,
        };
        self.breakpoints.install(&mut mem, addr, instr)
    }

    fn clear_breakpoint(&mut self, addr: u64, original: &[u8]) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;

        let mut mem = OverlayMemoryMut {
            source: &self.source,
            pos: self.pos,
            overlay: &mut self.overlay,
        };
        self.breakpoints.remove(&mut mem, addr, original)?;

        // the recording shows through again, at every position
        let end = addr.saturating_add(original.len() as u64);
        self.overlay.retain(|&a, _| !(addr..end).contains(&a));

        Ok(())
    }
}

impl<S> std::fmt::Debug for RecordedProcess<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordedProcess")
            .field("exec", &self.exec)
            .field("recording", &self.recording)
            .field("pos", &self.pos)
            .field("breakpoints", &self.breakpoints.addresses())
            .finish_non_exhaustive()
    }
}

/// Recorded memory at a given position, seen through the breakpoint overlay.
struct OverlayMemory<'a, S> {
    source: &'a S,
    pos: u64,
    overlay: &'a BTreeMap<u64, u8>,
}

/// Mutable view of the breakpoint overlay.
struct OverlayMemoryMut<'a, S> {
    source: &'a S,
    pos: u64,
    overlay: &'a mut BTreeMap<u64, u8>,
}

fn read_through_overlay<S: TraceSource>(
    source: &S,
    pos: u64,
    overlay: &BTreeMap<u64, u8>,
    addr: u64,
    buf: &mut [u8],
) -> Result<(), BoxError> {
    source.read_memory(pos, addr, buf)?;

    let end = addr + buf.len() as u64;
    for (&a, &b) in overlay.range(addr..end) {
        buf[(a - addr) as usize] = b;
    }

    Ok(())
}

impl<S: TraceSource> MemoryIo for OverlayMemory<'_, S> {
    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<(), BoxError> {
        read_through_overlay(self.source, self.pos, self.overlay, addr, buf)
    }

    fn write_memory(&mut self, _addr: u64, _data: &[u8]) -> Result<(), BoxError> {
        Err("recorded memory is read-only".into())
    }
}

impl<S: TraceSource> MemoryIo for OverlayMemoryMut<'_, S> {
    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<(), BoxError> {
        read_through_overlay(self.source, self.pos, self.overlay, addr, buf)
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), BoxError> {
        let mut recorded = vec![0u8; data.len()];
        self.source.read_memory(self.pos, addr, &mut recorded)?;

        for (i, (&new, &old)) in data.iter().zip(&recorded).enumerate() {
            let a = addr + i as u64;

            if new == old {
                self.overlay.remove(&a);
            } else {
                self.overlay.insert(a, new);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rewind_proc::{
        ExecutionConfig, Process, ProcessManipulation, RecordingManipulation, ThreadInfo,
    };

    use super::RecordedProcess;
    use crate::{Event, TraceLog};

    fn two_threads() -> RecordedProcess<TraceLog> {
        let log = TraceLog::builder(9, "/bin/app", "/tmp/trace")
            .region(0x1000, [0x90u8; 0x20])
            .events([
                Event::new(1, 0x1000),
                Event::new(1, 0x1001),
                Event::new(2, 0x1010),
                Event::new(1, 0x1002),
                Event::new(2, 0x1011),
            ])
            .build()
            .unwrap();

        RecordedProcess::new(log, ExecutionConfig::default())
    }

    #[test]
    fn threads_follow_position() {
        let mut process = two_threads();

        let ids: Vec<_> = process.thread_list().iter().map(|t| t.id).collect();
        assert_eq!(ids, [1]);
        assert_eq!(process.current_thread().unwrap().instr_addr, 0x1000);

        process.restart("2").unwrap();

        let ids: Vec<_> = process.thread_list().iter().map(|t| t.id).collect();
        assert_eq!(ids, [2, 1]);
        assert_eq!(process.current_thread().unwrap().id, 2);
        assert_eq!(process.find_thread(1).unwrap().instr_addr, 0x1002);

        process.restart("4").unwrap();

        let ids: Vec<_> = process.thread_list().iter().map(|t| t.id).collect();
        assert_eq!(ids, [2]);
    }

    #[test]
    fn step_current_thread() {
        let mut process = two_threads();

        process.step_instruction().unwrap();
        process.step_instruction().unwrap();

        // thread 2 executed nothing yet, but is alive
        assert_eq!(process.position(), 2);
        assert_eq!(process.current_thread().unwrap().id, 1);
        assert_eq!(process.current_thread().unwrap().instr_addr, 0x1002);

        // stepping thread 1 executes the pending event of thread 2
        process.step_instruction().unwrap();
        assert_eq!(process.position(), 4);
    }

    #[test]
    fn overlay_hides_breakpoints_from_recording() {
        let mut process = two_threads();

        let original = process.write_breakpoint(0x1002, &[0xcc]).unwrap();
        assert_eq!(original, [0x90]);

        let mut buf = [0u8; 3];
        process.read_memory(0x1001, &mut buf).unwrap();
        assert_eq!(buf, [0x90, 0xcc, 0x90]);

        process.clear_breakpoint(0x1002, &original).unwrap();
        assert!(process.overlay.is_empty());
    }
}
