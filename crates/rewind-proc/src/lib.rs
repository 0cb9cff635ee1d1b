//! This crate provides the execution-control contract of the Rewind debugger.
//!
//! A debugging session talks to its target through the [Process] trait,
//! whatever the target actually is:
//! - a live process, driven through the operating system's debugging API,
//! - a core dump, which can be inspected but not executed,
//! - a recording, which can be replayed **forward and backward** in time.
//!
//! Each backend implements the same contract, and operations which make no
//! sense for a given backend (e.g., changing the execution direction of a live
//! process) fail with [ErrorKind::Unsupported] instead of being left out.
//!
//! Besides the traits, this crate provides the backend-agnostic building
//! blocks every backend is made of:
//! - [BreakpointStore] keeps track of the installed breakpoints and of the
//!   bytes they replaced,
//! - [ThreadRegistry] keeps track of the threads of the target,
//! - [ExecutionController] implements the execution state machine, the
//!   manual-stop request and the resume notification,
//! - [RecordingController] manages checkpoints, the execution direction and
//!   the [restart position](Position) of recorded targets.
//!
//! # Example
//!
//! ```no_run
//! use rewind_proc::{Process, Thread};
//!
//! fn run_to_breakpoint<P: Process>(process: &mut P, addr: u64) -> rewind_proc::Result<u64> {
//!     let original = process.write_breakpoint(addr, &[0xcc])?;
//!
//!     let trapped = process.resume()?;
//!
//!     process.clear_breakpoint(addr, &original)?;
//!
//!     Ok(trapped.id())
//! }
//! ```

/// Module containing the breakpoint store.
pub mod breakpoint;

mod error;

/// Module containing the execution controller.
pub mod exec;

mod memory;
mod process;

/// Module containing the recording controller.
pub mod recording;

/// Module containing the thread registry.
pub mod thread;

pub use self::breakpoint::BreakpointStore;
pub use self::error::{BoxError, Error, ErrorKind, Result};
pub use self::exec::{ExecState, ExecutionConfig, ExecutionController};
pub use self::exec::{FunctionLookup, Interrupt, ManualStopHandle};
pub use self::memory::MemoryIo;
pub use self::process::{Checkpoint, CommonProcess, Direction};
pub use self::process::{Info, Process, ProcessManipulation, RecordingManipulation, ThreadInfo};
pub use self::recording::{Position, RecordingController, RestartPoint};
pub use self::thread::{Thread, ThreadRegistry};
