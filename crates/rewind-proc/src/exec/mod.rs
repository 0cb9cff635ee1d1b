mod manual_stop;
mod step_out;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use tokio::sync::oneshot;

pub use self::manual_stop::{Interrupt, ManualStopHandle};
pub use self::step_out::{FunctionLookup, StepOut};
use crate::Error;

/// Default maximum number of single-steps to step out of a function.
pub const DEFAULT_STEP_OUT_LIMIT: usize = 100_000;

/// Configuration of the execution of a target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Maximum number of single-steps performed by a step-out operation.
    pub step_out_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_out_limit: DEFAULT_STEP_OUT_LIMIT,
        }
    }
}

/// Execution state of a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecState {
    /// Every thread of the target is stopped.
    Stopped,

    /// The target is being resumed or single-stepped.
    Running,

    /// The target has terminated (terminal state).
    Exited {
        /// Exit status of the target.
        status: i32,
    },

    /// The debugger has released control of the target (terminal state).
    Detached,
}

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const EXITED: u8 = 2;
const DETACHED: u8 = 3;

/// State shared with the [manual-stop handles](ManualStopHandle).
pub(crate) struct Shared {
    pid: u64,
    state: AtomicU8,
    exit_status: AtomicI32,
    manual_stop: AtomicBool,
}

impl Shared {
    fn state(&self) -> ExecState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => ExecState::Running,
            EXITED => ExecState::Exited {
                status: self.exit_status.load(Ordering::SeqCst),
            },
            DETACHED => ExecState::Detached,
            _ => ExecState::Stopped,
        }
    }

    fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    fn check_valid(&self) -> crate::Result<()> {
        match self.state() {
            ExecState::Exited { status } => Err(Error::ProcessExited {
                pid: self.pid,
                status,
            }),
            ExecState::Detached => Err(Error::ProcessDetached { pid: self.pid }),
            ExecState::Stopped | ExecState::Running => Ok(()),
        }
    }
}

/// Execution controller of a target.
///
/// It implements the state machine every backend goes through:
///
/// ```text
///            resume/step            exit
///  Stopped ───────────────► Running ─────► Exited
///     ▲                        │
///     └────────────────────────┘        detach
///              trap/stop          (any) ─────► Detached
/// ```
///
/// Once the target has exited or is detached, every manipulation fails.
///
/// It also owns the manual-stop request flag, and the one-shot resume
/// notification.
pub struct ExecutionController {
    shared: Arc<Shared>,

    /// Backend logic for interrupting the running target.
    interrupter: Option<Arc<dyn Interrupt>>,

    /// Listener to signal once the current (or next) resume completes.
    resume_notify: Option<oneshot::Sender<()>>,
}

impl ExecutionController {
    /// Creates the execution controller of a stopped target.
    pub fn new(pid: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                pid,
                state: AtomicU8::new(STOPPED),
                exit_status: AtomicI32::new(0),
                manual_stop: AtomicBool::new(false),
            }),
            interrupter: None,
            resume_notify: None,
        }
    }

    /// Specifies how to interrupt the running target when a manual stop is
    /// requested.
    pub fn with_interrupter(mut self, interrupter: impl Interrupt + 'static) -> Self {
        self.interrupter = Some(Arc::new(interrupter));
        self
    }

    /// Returns the process ID of the target.
    pub fn pid(&self) -> u64 {
        self.shared.pid
    }

    /// Returns the execution state of the target.
    pub fn state(&self) -> ExecState {
        self.shared.state()
    }

    /// Fails if the target has exited or is detached.
    pub fn check_valid(&self) -> crate::Result<()> {
        self.shared.check_valid()
    }

    /// Moves the target into the running state.
    ///
    /// Fails if the target has exited or is detached.
    pub fn begin_resume(&mut self) -> crate::Result<()> {
        self.check_valid()?;
        self.shared.state.store(RUNNING, Ordering::SeqCst);
        Ok(())
    }

    /// Completes a resume started with [begin_resume](Self::begin_resume).
    ///
    /// The target goes back to the stopped state, unless `res` reports that
    /// the target has exited or is detached. In any case, the registered
    /// resume listener is signaled.
    pub fn end_resume<T>(&mut self, res: crate::Result<T>) -> crate::Result<T> {
        match &res {
            Err(Error::ProcessExited { status, .. }) => self.mark_exited(*status),
            Err(Error::ProcessDetached { .. }) => self.mark_detached(),
            _ => {
                let _ = self.shared.state.compare_exchange(
                    RUNNING,
                    STOPPED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            }
        }

        if let Some(tx) = self.resume_notify.take() {
            // the listener may have gone away
            let _ = tx.send(());
        }

        res
    }

    /// Moves the target into the exited state.
    pub fn mark_exited(&mut self, status: i32) {
        self.shared.exit_status.store(status, Ordering::SeqCst);
        self.shared.state.store(EXITED, Ordering::SeqCst);

        tracing::info!(pid = self.shared.pid, status, "process exited");
    }

    /// Moves the target into the detached state.
    pub fn mark_detached(&mut self) {
        self.shared.state.store(DETACHED, Ordering::SeqCst);

        tracing::info!(pid = self.shared.pid, "process detached");
    }

    /// Registers a listener, signaled the next time a resume completes.
    ///
    /// # Note
    ///
    /// Only one listener is kept. Registering a listener before the previous
    /// one was signaled replaces it: the previous receiver observes a closed
    /// channel and never receives the signal.
    pub fn set_resume_notify(&mut self, tx: oneshot::Sender<()>) {
        if self.resume_notify.replace(tx).is_some() {
            tracing::debug!(pid = self.shared.pid, "resume listener replaced");
        }
    }

    /// Returns a handle for requesting manual stops from another thread.
    pub fn manual_stop_handle(&self) -> ManualStopHandle {
        ManualStopHandle {
            shared: self.shared.clone(),
            interrupter: self.interrupter.clone(),
        }
    }

    /// Requests an in-flight or future resume to stop at the next safe point.
    pub fn request_manual_stop(&self) -> crate::Result<()> {
        self.manual_stop_handle().request()
    }

    /// Returns `true` the first time it's called after a manual stop request.
    pub fn check_and_clear_manual_stop(&self) -> bool {
        self.shared.manual_stop.swap(false, Ordering::SeqCst)
    }

    /// Returns whether a manual stop is requested, without consuming the
    /// request.
    ///
    /// Backends call it at safe points while resuming the target.
    pub fn manual_stop_pending(&self) -> bool {
        self.shared.manual_stop.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionController")
            .field("pid", &self.shared.pid)
            .field("state", &self.state())
            .field("manual_stop", &self.manual_stop_pending())
            .finish_non_exhaustive()
    }
}
