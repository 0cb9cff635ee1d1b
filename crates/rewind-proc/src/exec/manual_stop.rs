use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::Shared;
use crate::BoxError;

/// Trait implementing the backend logic for interrupting a running target.
///
/// It is invoked when a manual stop is requested while the target is
/// running, possibly from a different thread than the one resuming the
/// target.
pub trait Interrupt: Send + Sync {
    /// Makes the running target stop at the next safe point.
    fn interrupt(&self) -> Result<(), BoxError>;
}

/// Handle for requesting a manual stop of a target.
///
/// This is the only part of a process which is meant to be used
/// **concurrently** with [resume](crate::ProcessManipulation::resume). It can
/// be cloned and sent to another thread.
#[derive(Clone)]
pub struct ManualStopHandle {
    pub(super) shared: Arc<Shared>,
    pub(super) interrupter: Option<Arc<dyn Interrupt>>,
}

impl ManualStopHandle {
    /// Requests an in-flight or future resume to stop at the next safe point.
    ///
    /// The request stays pending until it is consumed by
    /// [check_and_clear](Self::check_and_clear).
    pub fn request(&self) -> crate::Result<()> {
        self.shared.check_valid()?;

        self.shared.manual_stop.store(true, Ordering::SeqCst);

        if self.shared.is_running() {
            if let Some(interrupter) = self.interrupter.as_ref() {
                interrupter.interrupt().map_err(crate::Error::Backend)?;
            }
        }

        tracing::debug!(pid = self.shared.pid, "manual stop requested");

        Ok(())
    }

    /// Returns `true` the first time it's called after a call to
    /// [request](Self::request), `false` otherwise.
    pub fn check_and_clear(&self) -> bool {
        self.shared.manual_stop.swap(false, Ordering::SeqCst)
    }

    /// Returns whether a manual stop is requested, without consuming the
    /// request.
    pub fn is_pending(&self) -> bool {
        self.shared.manual_stop.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ManualStopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualStopHandle")
            .field("pid", &self.shared.pid)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}
