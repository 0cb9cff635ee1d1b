use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tokio::sync::oneshot;

use crate::{Error, ManualStopHandle};

/// Target of the debugger.
///
/// This target could be a live process, a core dump, a recording, etc.
///
/// # Concurrency
///
/// Implementations are not required to be thread safe, and operations are
/// expected to be called sequentially. The one exception is the manual-stop
/// request, which can be issued concurrently with [resume](ProcessManipulation::resume)
/// through a [ManualStopHandle].
pub trait Process: Info + ProcessManipulation + RecordingManipulation {
    /// Installs a breakpoint at `addr` by writing the trap instruction `instr`.
    ///
    /// On success, the bytes previously found at `addr` are returned. They
    /// must be given back to [clear_breakpoint](Self::clear_breakpoint).
    ///
    /// # Note
    ///
    /// The target must be stopped.
    fn write_breakpoint(&mut self, addr: u64, instr: &[u8]) -> crate::Result<Vec<u8>>;

    /// Removes the breakpoint at `addr` by writing back `original`.
    ///
    /// # Note
    ///
    /// The target must be stopped.
    fn clear_breakpoint(&mut self, addr: u64, original: &[u8]) -> crate::Result<()>;
}

/// Trait providing general information on the target.
pub trait Info: ThreadInfo {
    /// Returns the process ID of the target.
    fn pid(&self) -> u64;

    /// Specifies a listener, signaled the next time a resume completes.
    ///
    /// Only one listener is kept: a listener registered before the previous
    /// one was signaled replaces it.
    fn resume_notify(&mut self, tx: oneshot::Sender<()>);

    /// Returns `Ok` if this process can be used, otherwise the reason why it
    /// can't ([ProcessExited](Error::ProcessExited) or
    /// [ProcessDetached](Error::ProcessDetached)).
    fn valid(&self) -> crate::Result<()>;

    /// Returns whether this process can be used.
    fn is_valid(&self) -> bool {
        self.valid().is_ok()
    }

    /// Returns the path of the executable of the target.
    fn executable_path(&self) -> &Path {
        &self.common().exe_path
    }

    /// Returns the entry point address of the target.
    fn entry_point(&self) -> crate::Result<u64>;

    /// Returns the fields common to all backends.
    fn common(&self) -> &CommonProcess;
}

/// Trait for getting information on the threads of the target.
pub trait ThreadInfo {
    /// Type of a thread of the target.
    type Thread: crate::Thread + Clone;

    /// Looks up a thread by its ID.
    fn find_thread(&self, thread_id: u64) -> Option<&Self::Thread>;

    /// Returns a snapshot of all known threads.
    fn thread_list(&self) -> Vec<&Self::Thread>;

    /// Returns the thread [single-steps](ProcessManipulation::step_instruction)
    /// apply to.
    ///
    /// After a resume, this is the thread which stopped the target.
    fn current_thread(&self) -> Option<&Self::Thread>;
}

/// Trait for changing the execution state of the target.
pub trait ProcessManipulation: ThreadInfo {
    /// Resumes every thread until one of them traps, and returns it.
    ///
    /// The call blocks until the target is stopped again. If the target
    /// exits in the meantime, [ProcessExited](Error::ProcessExited) is
    /// returned.
    fn resume(&mut self) -> crate::Result<Self::Thread>;

    /// Executes a single instruction on the current thread, without resuming
    /// the other ones.
    ///
    /// A breakpoint at the address of the stepped instruction does not
    /// trigger.
    fn step_instruction(&mut self) -> crate::Result<()>;

    /// Single-steps the given thread until it leaves both functions `from`
    /// and `to`.
    ///
    /// This is used to step out of runtime glue. The number of single-steps is
    /// bounded by the backend's [configuration](crate::ExecutionConfig).
    fn step_instruction_out(&mut self, thread_id: u64, from: &str, to: &str) -> crate::Result<()>;

    /// Requests an in-flight or future resume to stop at the next safe point.
    fn request_manual_stop(&self) -> crate::Result<()>;

    /// Returns a handle for requesting a manual stop while another thread
    /// [resumes](Self::resume) the target.
    fn manual_stop_handle(&self) -> ManualStopHandle;

    /// Returns `true` the first time it's called after a manual stop
    /// request, `false` otherwise.
    fn check_and_clear_manual_stop_request(&self) -> bool;

    /// Makes the thread with the given ID the current thread.
    fn switch_thread(&mut self, thread_id: u64) -> crate::Result<()>;

    /// Releases control of the target, terminating it first if `kill` is set.
    fn detach(&mut self, kill: bool) -> crate::Result<()>;
}

/// Trait for manipulating recordings.
///
/// The provided implementations describe a target which is **not** a
/// recording: queries report so, and every other operation fails with
/// [Unsupported](Error::Unsupported).
pub trait RecordingManipulation {
    /// Returns the directory of the recorded trace, if the target is a
    /// recording.
    fn recorded(&self) -> Option<&Path> {
        None
    }

    /// Restarts the recording from the given [position](crate::Position).
    fn restart(&mut self, _pos: &str) -> crate::Result<()> {
        Err(Error::Unsupported("restart"))
    }

    /// Changes the execution direction.
    fn change_direction(&mut self, _direction: Direction) -> crate::Result<()> {
        Err(Error::Unsupported("changing execution direction"))
    }

    /// Returns the current execution direction.
    fn direction(&self) -> Direction {
        Direction::Forward
    }

    /// Returns the current position in the recording.
    fn when(&self) -> crate::Result<String> {
        Err(Error::Unsupported("recording position"))
    }

    /// Sets a checkpoint at the current position, and returns its ID.
    fn checkpoint(&mut self, _label: &str) -> crate::Result<u64> {
        Err(Error::Unsupported("checkpoint"))
    }

    /// Returns the currently set checkpoints.
    fn checkpoints(&self) -> crate::Result<Vec<Checkpoint>> {
        Err(Error::Unsupported("checkpoint"))
    }

    /// Removes a checkpoint.
    fn clear_checkpoint(&mut self, _id: u64) -> crate::Result<()> {
        Err(Error::Unsupported("checkpoint"))
    }
}

/// Checkpoint set within a recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    /// ID of the checkpoint.
    pub id: u64,

    /// Position of the checkpoint in the recording.
    pub when: String,

    /// Label given by the user (where the checkpoint was set).
    pub label: String,
}

/// Execution direction of the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    /// The target executes normally.
    #[default]
    Forward,

    /// The target executes in reverse.
    Backward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
            Self::Backward => f.write_str("backward"),
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Self::Forward),
            "backward" => Ok(Self::Backward),
            _ => Err(Error::InvalidDirection(s.to_owned())),
        }
    }
}

/// Fields common to all backends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommonProcess {
    /// Path of the executable of the target.
    pub exe_path: PathBuf,
}

impl CommonProcess {
    /// Creates the fields common to all backends.
    pub fn new(exe_path: impl Into<PathBuf>) -> Self {
        Self {
            exe_path: exe_path.into(),
        }
    }
}
