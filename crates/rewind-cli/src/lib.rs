//! Crate implementing the CLI commands.

mod cli;
mod config;
mod dump;
mod run;
mod session;

pub use self::cli::{CliAction, CliOpts};
pub use self::config::{BreakpointConfig, SessionConfig};
pub use self::dump::evaluate_core;
pub use self::run::{Target, evaluate_run};
pub use self::session::{SessionEnd, StoppedThread, run_session};
