//! This crate provides the native backends of the Rewind debugger.
//!
//! - [LiveProcess] debugs a process running on the **same host machine**,
//!   either spawned as a child or attached to.
//! - [CoreProcess] inspects the state of a process saved in an ELF core dump.
//!
//! Both implement the [Process](rewind_proc::Process) contract.
//!
//! # Supported Platforms
//!
//! <table>
//!     <thead>
//!         <tr>
//!             <th>Host Machine</th>
//!             <th>Debuggee Platform</th>
//!         </tr>
//!     </thead>
//!     <tbody>
//!         <tr>
//!             <td>Linux <code>x86_64</code></td>
//!             <td><code>x86_64</code></td>
//!         </tr>
//!         <tr>
//!             <td>Linux <code>aarch64</code></td>
//!             <td><code>aarch64</code></td>
//!         </tr>
//!     </tbody>
//! </table>
//!
//! # Example
//!
//! ```no_run
//! use std::process::Command;
//!
//! use rewind_native::LiveProcess;
//! use rewind_proc::{ExecutionConfig, Info, Process, ProcessManipulation};
//!
//! let mut process = LiveProcess::spawn(Command::new("/bin/true"), ExecutionConfig::default())?;
//!
//! let entry = process.entry_point()?;
//! process.write_breakpoint(entry + 4, &[0xcc])?;
//!
//! let thread = process.resume()?;
//! println!("stopped at {:#x}", thread.instr_addr());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod auxv;
mod core;
mod elf;
mod error;
mod live;
mod sys;

pub use self::core::{CoreProcess, CoreThread};
pub use self::elf::ElfSymbols;
pub use self::error::{Error, Result};
pub use self::live::{LiveProcess, LiveThread};
