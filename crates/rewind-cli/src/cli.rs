use std::path::PathBuf;

/// The Rewind debugger.
#[derive(clap::Parser)]
pub struct CliOpts {
    /// The command to run.
    #[clap(subcommand)]
    pub action: CliAction,
}

/// The command to run.
#[derive(clap::Subcommand)]
pub enum CliAction {
    /// Command to spawn a new process and debug it.
    Run {
        /// Session configuration (KDL format).
        ///
        /// If it ends with `.kdl`, it is treated as a path to a configuration
        /// file for the debugging session. Otherwise it is directly parsed as
        /// inline KDL-formatted configuration.
        #[clap(short, long, value_name = "CONTENT/PATH", default_value = "")]
        config: String,

        /// Path to the optional destination of the session report.
        #[clap(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Name of program to run.
        program: PathBuf,

        /// Program's arguments.
        args: Vec<String>,
    },

    /// Command to attach to a running process and debug it.
    Attach {
        /// Session configuration (KDL format).
        ///
        /// See the `run` command.
        #[clap(short, long, value_name = "CONTENT/PATH", default_value = "")]
        config: String,

        /// Path to the optional destination of the session report.
        #[clap(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// ID of the process to attach to.
        pid: u64,
    },

    /// Command to dump information from a core dump.
    Core {
        /// Path to the core dump.
        core: PathBuf,

        /// Path to the executable which produced the core dump.
        exe: PathBuf,

        /// Path to the optional destination of the dump.
        #[clap(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Memory to dump, as `<ADDR>:<LEN>` (e.g., `0x7ffc0000:64`).
        #[clap(short, long, value_name = "ADDR:LEN", value_parser = parse_memory_range)]
        memory: Vec<(u64, usize)>,
    },
}

impl CliOpts {
    /// Parses the CLI from the command-line.
    ///
    /// # Warning
    ///
    /// Exits on error.
    pub fn parse_from_cmdline() -> Self {
        <Self as clap::Parser>::parse()
    }
}

/// Parses an address, either hexadecimal (`0x` prefix) or decimal.
pub fn parse_addr(s: &str) -> Result<u64, String> {
    let res = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };

    res.map_err(|e| format!("invalid address {s:?}: {e}"))
}

fn parse_memory_range(s: &str) -> Result<(u64, usize), String> {
    let (addr, len) = s
        .split_once(':')
        .ok_or_else(|| format!("expected <ADDR>:<LEN>, found {s:?}"))?;

    let len = len.parse().map_err(|e| format!("invalid length {len:?}: {e}"))?;

    Ok((parse_addr(addr)?, len))
}
