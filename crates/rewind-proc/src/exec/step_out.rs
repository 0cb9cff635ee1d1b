/// Trait for resolving the function containing a given address.
///
/// Symbol resolution is out of the scope of this crate; backends provide
/// their own implementation (e.g., from the ELF symbol table).
pub trait FunctionLookup {
    /// Returns the name of the function containing `addr`, if any.
    fn function_at(&self, addr: u64) -> Option<&str>;
}

/// Progress of a step-out operation.
///
/// A thread is single-stepped until it lands outside of both the function
/// it steps out of (`from`) and an equivalent function (`to`, e.g., a
/// wrapper or runtime glue). Since control flow may diverge and never leave
/// these functions, the number of single-steps is bounded.
///
/// ```
/// # fn main() -> rewind_proc::Result<()> {
/// use rewind_proc::exec::StepOut;
///
/// let mut step_out = StepOut::new("runtime.call32", "runtime.reflectcall", 10);
///
/// assert!(step_out.keep_stepping(Some("runtime.call32"))?);
/// assert!(step_out.keep_stepping(Some("runtime.reflectcall"))?);
/// assert!(!step_out.keep_stepping(Some("main.main"))?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StepOut<'a> {
    from: &'a str,
    to: &'a str,
    limit: usize,
    steps: usize,
}

impl<'a> StepOut<'a> {
    /// Starts stepping out of `from`, allowing at most `limit` single-steps.
    pub const fn new(from: &'a str, to: &'a str, limit: usize) -> Self {
        Self {
            from,
            to,
            limit,
            steps: 0,
        }
    }

    /// Registers a single-step which landed in `function`, and returns whether
    /// the thread needs to be stepped again.
    ///
    /// Landing at an address with no known function ends the operation.
    pub fn keep_stepping(&mut self, function: Option<&str>) -> crate::Result<bool> {
        self.steps += 1;

        let inside = function.is_some_and(|name| name == self.from || name == self.to);

        if !inside {
            tracing::debug!(steps = self.steps, function, "stepped out");
            return Ok(false);
        }

        if self.steps >= self.limit {
            return Err(crate::Error::StepOutLimit {
                function: self.from.to_owned(),
                steps: self.steps,
            });
        }

        Ok(true)
    }

    /// Returns the number of registered single-steps.
    pub const fn steps(&self) -> usize {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::StepOut;
    use crate::Error;

    #[test]
    fn stops_outside_of_both_functions() {
        let mut step_out = StepOut::new("glue", "trampoline", 100);

        let path = [Some("glue"), Some("glue"), Some("trampoline"), None];

        let mut stepped = 0;
        for function in path {
            stepped += 1;
            if !step_out.keep_stepping(function).unwrap() {
                break;
            }
        }

        assert_eq!(stepped, 4);
        assert_eq!(step_out.steps(), 4);
    }

    #[test]
    fn bounded_when_never_leaving() {
        let mut step_out = StepOut::new("spin", "spin", 3);

        assert!(step_out.keep_stepping(Some("spin")).unwrap());
        assert!(step_out.keep_stepping(Some("spin")).unwrap());

        let err = step_out.keep_stepping(Some("spin")).unwrap_err();
        assert!(matches!(err, Error::StepOutLimit { steps: 3, .. }));
    }
}
