use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use miette::IntoDiagnostic;
use rewind_native::LiveProcess;
use rewind_proc::{ExecutionConfig, ManualStopHandle, ProcessManipulation};
use tokio::sync::oneshot;

use crate::config::SessionConfig;
use crate::session::{SessionEnd, run_session};

/// Process to debug.
#[derive(Debug)]
pub enum Target {
    /// Program to spawn.
    Spawn {
        /// Path of the program.
        program: PathBuf,

        /// Arguments of the program.
        args: Vec<String>,
    },

    /// ID of a running process to attach to.
    Attach(u64),
}

impl Target {
    fn open(self, config: ExecutionConfig) -> rewind_native::Result<LiveProcess> {
        match self {
            Self::Spawn { program, args } => {
                let mut command = Command::new(program);

                // keep Ctrl-C for the debugger
                command.args(args).process_group(0);

                LiveProcess::spawn(command, config)
            }
            Self::Attach(pid) => LiveProcess::attach(pid, config),
        }
    }
}

/// Runs the subcommand for debugging a live process.
///
/// The whole session runs on a single blocking thread, while Ctrl-C is
/// forwarded to the session as a manual stop request.
pub async fn evaluate_run(
    target: Target,
    config: SessionConfig,
    output: impl Write + Send + 'static,
) -> miette::Result<SessionEnd> {
    let (handle_tx, handle_rx) = oneshot::channel();

    let session = tokio::task::spawn_blocking(move || {
        let mut process = target.open(config.execution()).into_diagnostic()?;

        let _ = handle_tx.send(process.manual_stop_handle());

        let symbols = process.symbols().clone();

        run_session(&mut process, &config, |name| symbols.addr_of(name), output)
    });

    if let Ok(handle) = handle_rx.await {
        tokio::spawn(forward_ctrl_c(handle));
    }

    session.await.into_diagnostic()?
}

async fn forward_ctrl_c(handle: ManualStopHandle) {
    while tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupting the process");

        if let Err(e) = handle.request() {
            tracing::debug!(error = %e, "cannot interrupt the process");
            break;
        }
    }
}
