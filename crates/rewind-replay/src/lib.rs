//! This crate provides the recording backend of the Rewind debugger.
//!
//! A recording is replayed through [RecordedProcess], which implements the
//! [Process](rewind_proc::Process) contract on top of any [TraceSource]:
//! execution can be resumed **forward or backward**, checkpoints can be set,
//! and the replay can be restarted from a checkpoint or from any event.
//!
//! [TraceLog] is a recording held in memory, mainly used to replay
//! synthetic traces.
//!
//! # Example
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use rewind_proc::{Direction, ExecutionConfig, Process, ProcessManipulation};
//! use rewind_proc::RecordingManipulation;
//! use rewind_replay::{Event, RecordedProcess, TraceLog};
//!
//! let log = TraceLog::builder(1, "/bin/app", "/tmp/trace")
//!     .region(0x1000, [0x90u8; 0x10])
//!     .events((0x1000..0x1008).map(|addr| Event::new(1, addr)))
//!     .build()?;
//!
//! let mut process = RecordedProcess::new(log, ExecutionConfig::default());
//! process.write_breakpoint(0x1004, &[0xcc])?;
//!
//! process.resume()?;
//! assert_eq!(process.when()?, "4");
//!
//! process.change_direction(Direction::Backward)?;
//! process.resume()?;
//! assert_eq!(process.when()?, "0");
//! # Ok(())
//! # }
//! ```

mod error;
mod log;
mod process;
mod source;

pub use self::error::{Error, Result};
pub use self::log::{Builder as TraceLogBuilder, TraceLog};
pub use self::process::{RecordedProcess, RecordedThread};
pub use self::source::{Event, MemoryWrite, TraceSource};
