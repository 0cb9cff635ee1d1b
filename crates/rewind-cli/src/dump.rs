use std::io::Write;
use std::path::Path;

use kdl::{KdlDocument, KdlEntry, KdlNode};
use miette::IntoDiagnostic;
use rewind_native::{CoreProcess, ElfSymbols};
use rewind_proc::{FunctionLookup, Info, Thread, ThreadInfo};

use crate::session::dump_thread;

/// Runs the subcommand for dumping core dump information.
pub fn evaluate_core(
    core: &Path,
    exe: &Path,
    memory: &[(u64, usize)],
    mut output: impl Write,
) -> miette::Result<()> {
    let process = CoreProcess::open(core, exe).into_diagnostic()?;

    let symbols = ElfSymbols::open(exe, process.entry_point().ok()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "cannot load symbols");
        ElfSymbols::default()
    });

    let mut kdl = dump_to_kdl(&process, &symbols, memory)?;

    kdl.autoformat();

    output
        .write_all(kdl.to_string().as_bytes())
        .into_diagnostic()?;

    Ok(())
}

fn dump_to_kdl(
    process: &CoreProcess,
    symbols: &impl FunctionLookup,
    memory: &[(u64, usize)],
) -> miette::Result<KdlDocument> {
    let mut kdl = KdlDocument::new();

    kdl.nodes_mut().push({
        let mut node = KdlNode::new("process");

        node.entries_mut()
            .push(i128::from(process.pid()).into());
        node.entries_mut().push(KdlEntry::new_prop(
            "exe",
            process.executable_path().display().to_string(),
        ));

        if let Ok(entry) = process.entry_point() {
            node.entries_mut()
                .push(KdlEntry::new_prop("entry", format!("{entry:#x}")));
        }

        node
    });

    let current = process.current_thread().map(|t| t.id());

    for thread in process.thread_list() {
        kdl.nodes_mut().push({
            let mut node = KdlNode::new("thread");
            dump_thread(&mut node, thread);

            if let Some(function) = symbols.function_at(thread.instr_addr()) {
                node.entries_mut()
                    .push(KdlEntry::new_prop("function", function));
            }

            if current == Some(thread.id()) {
                node.entries_mut().push(KdlEntry::new_prop("current", true));
            }

            node
        });
    }

    for &(addr, len) in memory {
        let mut bytes = vec![0u8; len];
        process.read_memory(addr, &mut bytes).into_diagnostic()?;

        let hex = bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ");

        kdl.nodes_mut().push({
            let mut node = KdlNode::new("memory");
            node.entries_mut()
                .push(KdlEntry::new_prop("addr", format!("{addr:#x}")));
            node.entries_mut().push(hex.into());
            node
        });
    }

    Ok(kdl)
}
