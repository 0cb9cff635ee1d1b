use std::ops::Range;
use std::path::{Path, PathBuf};

use goblin::container::{Container, Ctx, Endian};
use goblin::elf::Elf;
use goblin::elf::header::{EM_AARCH64, EM_X86_64, ET_CORE};
use goblin::elf::program_header::PT_LOAD;
use rewind_proc::{
    CommonProcess, Error, ExecutionController, Info, ManualStopHandle, Process, ProcessManipulation,
    RecordingManipulation, Thread, ThreadInfo, ThreadRegistry,
};
use scroll::Pread;
use tokio::sync::oneshot;

const NT_PRSTATUS: u32 = 1;
const NT_AUXV: u32 = 6;

/// Offset of `pr_pid` in `struct elf_prstatus`.
const PRSTATUS_PID_OFFSET: usize = 32;

/// Offset of `pr_reg` in `struct elf_prstatus`.
const PRSTATUS_REGS_OFFSET: usize = 112;

/// Thread saved in a core dump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreThread {
    id: u64,
    instr_addr: u64,
}

impl CoreThread {
    /// Returns the instruction address of the thread when the dump was taken.
    pub const fn instr_addr(&self) -> u64 {
        self.instr_addr
    }
}

impl Thread for CoreThread {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Memory segment of a core dump.
#[derive(Clone, Debug)]
struct Segment {
    vaddr: Range<u64>,
    file_range: Range<usize>,
}

/// Process state saved in an ELF core dump.
///
/// A core dump can be inspected (threads, memory) but not executed: every
/// execution operation fails with [Unsupported](rewind_proc::ErrorKind::Unsupported).
pub struct CoreProcess {
    common: CommonProcess,
    exec: ExecutionController,
    threads: ThreadRegistry<CoreThread>,
    data: Vec<u8>,
    segments: Vec<Segment>,
    entry_point: Option<u64>,
}

impl CoreProcess {
    /// Opens the core dump at `core_path`, produced by the executable at
    /// `exe_path`.
    pub fn open(core_path: &Path, exe_path: &Path) -> crate::Result<Self> {
        let data = std::fs::read(core_path)
            .map_err(|e| crate::Error::File(core_path.to_path_buf(), e))?;

        let core = Elf::parse(&data)?;

        if core.header.e_type != ET_CORE {
            return Err(crate::Error::NotACore(core.header.e_type));
        }

        let pc_offset = match core.header.e_machine {
            EM_X86_64 if core.is_64 => PRSTATUS_REGS_OFFSET + 16 * 8,
            EM_AARCH64 if core.is_64 => PRSTATUS_REGS_OFFSET + 32 * 8,
            machine => return Err(crate::Error::ElfPlatform(machine)),
        };

        let endian = if core.little_endian {
            Endian::Little
        } else {
            Endian::Big
        };
        let ctx = Ctx::new(Container::Big, endian);

        let mut segments = Vec::new();

        for phdr in core.program_headers.iter().filter(|phdr| phdr.p_type == PT_LOAD) {
            let file_range = usize::try_from(phdr.p_offset)
                .ok()
                .zip(usize::try_from(phdr.p_filesz).ok())
                .and_then(|(start, len)| Some(start..start.checked_add(len)?))
                .filter(|range| range.end <= data.len())
                .ok_or(crate::Error::Truncated("PT_LOAD segment"))?;

            let end = phdr
                .p_vaddr
                .checked_add(phdr.p_memsz)
                .ok_or(crate::Error::Truncated("PT_LOAD segment"))?;

            segments.push(Segment {
                vaddr: phdr.p_vaddr..end,
                file_range,
            });
        }

        let mut threads = ThreadRegistry::new();
        let mut auxv_entry = None;

        if let Some(notes) = core.iter_note_headers(&data) {
            for note in notes {
                let note = note?;

                match note.n_type {
                    NT_PRSTATUS => {
                        let id: u32 = note.desc.pread_with(PRSTATUS_PID_OFFSET, endian)?;
                        let instr_addr: u64 = note.desc.pread_with(pc_offset, endian)?;

                        threads.insert(CoreThread {
                            id: id.into(),
                            instr_addr,
                        });
                    }
                    NT_AUXV => {
                        auxv_entry = crate::auxv::find(note.desc, ctx, crate::auxv::AT_ENTRY)?;
                    }
                    _ => (),
                }
            }
        }

        let pid = threads.current_id().ok_or(crate::Error::MissingPrstatus)?;

        let entry_point = match auxv_entry {
            Some(entry) => Some(entry),
            None => exe_entry_point(exe_path)
                .inspect_err(|e| tracing::warn!(error = %e, "cannot read executable entry point"))
                .ok(),
        };

        tracing::info!(
            pid,
            threads = threads.len(),
            segments = segments.len(),
            "core dump loaded"
        );

        Ok(Self {
            common: CommonProcess::new(exe_path),
            exec: ExecutionController::new(pid),
            threads,
            data,
            segments,
            entry_point,
        })
    }

    /// Reads memory saved in the core dump.
    ///
    /// Bytes of a segment beyond its file image read as zeros.
    pub fn read_memory(&self, addr: u64, buf: &mut [u8]) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;

        let end = addr.checked_add(buf.len() as u64);

        let segment = self
            .segments
            .iter()
            .find(|seg| seg.vaddr.start <= addr && end.is_some_and(|end| end <= seg.vaddr.end))
            .ok_or_else(|| Error::MemoryAccess {
                addr,
                source: crate::Error::UnmappedCoreMemory { addr, len: buf.len() }.into(),
            })?;

        let offset = (addr - segment.vaddr.start) as usize;
        let image = &self.data[segment.file_range.clone()];

        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = image.get(offset + i).copied().unwrap_or(0);
        }

        Ok(())
    }
}

fn exe_entry_point(exe_path: &Path) -> crate::Result<u64> {
    let exe = std::fs::read(exe_path).map_err(|e| crate::Error::File(PathBuf::from(exe_path), e))?;
    let header = Elf::parse_header(&exe)?;

    Ok(header.e_entry)
}

impl ThreadInfo for CoreProcess {
    type Thread = CoreThread;

    fn find_thread(&self, thread_id: u64) -> Option<&CoreThread> {
        self.threads.find(thread_id)
    }

    fn thread_list(&self) -> Vec<&CoreThread> {
        self.threads.list()
    }

    fn current_thread(&self) -> Option<&CoreThread> {
        self.threads.current()
    }
}

impl Info for CoreProcess {
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
        self.entry_point.ok_or(Error::NoEntryPoint)
    }

    fn common(&self) -> &CommonProcess {
        &self.common
    }
}

impl ProcessManipulation for CoreProcess {
    fn resume(&mut self) -> rewind_proc::Result<CoreThread> {
        self.exec.check_valid()?;
        Err(Error::Unsupported("resuming a core dump"))
    }

    fn step_instruction(&mut self) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        Err(Error::Unsupported("stepping a core dump"))
    }

    fn step_instruction_out(
        &mut self,
        _thread_id: u64,
        _from: &str,
        _to: &str,
    ) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        Err(Error::Unsupported("stepping a core dump"))
    }

    fn request_manual_stop(&self) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        Err(Error::Unsupported("stopping a core dump"))
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

    fn detach(&mut self, _kill: bool) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        self.exec.mark_detached();

        Ok(())
    }
}

impl RecordingManipulation for CoreProcess {}

impl Process for CoreProcess {
    fn write_breakpoint(&mut self, _addr: u64, _instr: &[u8]) -> rewind_proc::Result<Vec<u8>> {
        self.exec.check_valid()?;
        Err(Error::Unsupported("breakpoints in a core dump"))
    }

    fn clear_breakpoint(&mut self, _addr: u64, _original: &[u8]) -> rewind_proc::Result<()> {
        self.exec.check_valid()?;
        Err(Error::Unsupported("breakpoints in a core dump"))
    }
}

impl std::fmt::Debug for CoreProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreProcess")
            .field("exec", &self.exec)
            .field("threads", &self.threads.ids())
            .field("segments", &self.segments.len())
            .finish_non_exhaustive()
    }
}
