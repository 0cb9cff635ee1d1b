use std::io::Write;

use kdl::{KdlEntry, KdlNode};
use miette::IntoDiagnostic;
use rewind_proc::{Error, Process, Thread};

use crate::cli::parse_addr;
use crate::config::SessionConfig;

#[cfg(target_arch = "x86_64")]
const BREAKPOINT_INSTR: &[u8] = &[0xcc]; // int3

#[cfg(target_arch = "aarch64")]
const BREAKPOINT_INSTR: &[u8] = &[0x00, 0x00, 0x20, 0xd4]; // brk #0

/// Thread which knows where it stopped.
pub trait StoppedThread: Thread {
    /// Returns the instruction address of the thread.
    fn instr_addr(&self) -> u64;
}

impl StoppedThread for rewind_native::LiveThread {
    fn instr_addr(&self) -> u64 {
        self.instr_addr()
    }
}

impl StoppedThread for rewind_native::CoreThread {
    fn instr_addr(&self) -> u64 {
        self.instr_addr()
    }
}

/// How a debugging session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The process exited with the given status.
    Exited(i32),

    /// The session was interrupted, and the process detached.
    Interrupted,
}

/// Runs a non-interactive debugging session.
///
/// The configured breakpoints are installed, then the process is resumed until
/// it exits or a manual stop is requested. Every stop is reported to `output`
/// as a KDL node.
///
/// `resolve_symbol` gives the address of a function of the executable.
pub fn run_session<P>(
    process: &mut P,
    config: &SessionConfig,
    resolve_symbol: impl Fn(&str) -> Option<u64>,
    mut output: impl Write,
) -> miette::Result<SessionEnd>
where
    P: Process,
    P::Thread: StoppedThread,
{
    let mut addresses = Vec::with_capacity(config.breakpoints.len() + 1);

    if config.break_at_entry {
        addresses.push(process.entry_point().into_diagnostic()?);
    }

    for bp in config.breakpoints.iter() {
        let addr = match resolve_symbol(&bp.location) {
            Some(addr) => addr,
            None => parse_addr(&bp.location)
                .map_err(|e| miette::miette!("unknown breakpoint location: {e}"))?,
        };

        addresses.push(addr);
    }

    let mut breakpoints = Vec::with_capacity(addresses.len());

    for addr in addresses {
        if breakpoints.iter().any(|(bp_addr, _)| *bp_addr == addr) {
            continue;
        }

        let original = process.write_breakpoint(addr, BREAKPOINT_INSTR).into_diagnostic()?;
        breakpoints.push((addr, original));

        tracing::debug!(addr = format_args!("{addr:#x}"), "breakpoint installed");
    }

    loop {
        match process.resume() {
            Ok(thread) => {
                let interrupted = process.check_and_clear_manual_stop_request();

                let mut node = KdlNode::new(if interrupted { "interrupted" } else { "stop" });
                dump_thread(&mut node, &thread);
                write_node(&mut output, node)?;

                if interrupted {
                    for (addr, original) in breakpoints {
                        process.clear_breakpoint(addr, &original).into_diagnostic()?;
                    }

                    process.detach(false).into_diagnostic()?;

                    return Ok(SessionEnd::Interrupted);
                }
            }
            Err(Error::ProcessExited { status, .. }) => {
                let mut node = KdlNode::new("exited");
                node.entries_mut()
                    .push(KdlEntry::new_prop("status", i128::from(status)));
                write_node(&mut output, node)?;

                return Ok(SessionEnd::Exited(status));
            }
            Err(e) => return Err(e).into_diagnostic(),
        }
    }
}

/// Appends the ID and the instruction address of a thread to a KDL node.
pub fn dump_thread(node: &mut KdlNode, thread: &impl StoppedThread) {
    let addr = thread.instr_addr();

    node.entries_mut().push(i128::from(thread.id()).into());
    node.entries_mut()
        .push(KdlEntry::new_prop("addr", format!("{addr:#x}")));
}

fn write_node(output: &mut impl Write, mut node: KdlNode) -> miette::Result<()> {
    node.autoformat();

    writeln!(output, "{node}").into_diagnostic()
}

#[cfg(test)]
mod tests {
    use kdl::KdlDocument;
    use rewind_proc::{ErrorKind, Info, ProcessManipulation};
    use rewind_replay::{Event, RecordedProcess, TraceLog};
    use test_log::test;

    use super::*;
    use crate::config::BreakpointConfig;

    impl StoppedThread for rewind_replay::RecordedThread {
        fn instr_addr(&self) -> u64 {
            self.instr_addr()
        }
    }

    fn recording() -> RecordedProcess<TraceLog> {
        let log = TraceLog::builder(7, "/bin/demo", "/tmp/demo.trace")
            .entry_point(0x1000)
            .region(0x1000, vec![0x90u8; 0x100])
            .function("main", 0x1000..0x1080)
            .events((0..16).map(|i| Event::new(1, 0x1000 + i * 4)))
            .exit_status(3)
            .build()
            .unwrap();

        RecordedProcess::new(log, Default::default())
    }

    fn config(break_at_entry: bool, locations: &[&str]) -> SessionConfig {
        SessionConfig {
            step_out_limit: 100,
            break_at_entry,
            breakpoints: locations
                .iter()
                .map(|location| BreakpointConfig {
                    location: location.to_string(),
                })
                .collect(),
        }
    }

    fn resolve(name: &str) -> Option<u64> {
        (name == "helper").then_some(0x1010)
    }

    #[test]
    fn session_reports_stops_and_exit() {
        let mut process = recording();
        let mut output = Vec::new();

        let end = run_session(
            &mut process,
            &config(false, &["0x1008", "helper"]),
            resolve,
            &mut output,
        )
        .unwrap();

        assert_eq!(end, SessionEnd::Exited(3));

        let report: KdlDocument = String::from_utf8(output).unwrap().parse().unwrap();
        let names: Vec<_> = report.nodes().iter().map(|n| n.name().value()).collect();
        assert_eq!(names, ["stop", "stop", "exited"]);

        assert!(report.nodes()[0].to_string().contains("0x1008"));
        assert!(report.nodes()[1].to_string().contains("0x1010"));
    }

    #[test]
    fn session_deduplicates_breakpoints() {
        let mut process = recording();
        let mut output = Vec::new();

        let config = config(false, &["0x1008", "4104"]);
        let end = run_session(&mut process, &config, resolve, &mut output).unwrap();

        assert_eq!(end, SessionEnd::Exited(3));

        let report: KdlDocument = String::from_utf8(output).unwrap().parse().unwrap();
        assert_eq!(report.nodes().len(), 2);
    }

    #[test]
    fn session_interrupted() {
        let mut process = recording();
        let mut output = Vec::new();

        process.request_manual_stop().unwrap();

        let end = run_session(&mut process, &config(true, &[]), resolve, &mut output).unwrap();

        assert_eq!(end, SessionEnd::Interrupted);
        assert_eq!(process.valid().unwrap_err().kind(), ErrorKind::ProcessDetached);

        let report: KdlDocument = String::from_utf8(output).unwrap().parse().unwrap();
        let names: Vec<_> = report.nodes().iter().map(|n| n.name().value()).collect();
        assert_eq!(names, ["interrupted"]);
    }

    #[test]
    fn session_unknown_location() {
        let mut process = recording();

        let res = run_session(&mut process, &config(false, &["nowhere"]), resolve, Vec::new());

        assert!(res.is_err());
    }
}
