use rewind_proc::ExecutionConfig;
use rewind_proc::exec::DEFAULT_STEP_OUT_LIMIT;

/// Configuration of a debugging session.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct SessionConfig {
    /// Maximum number of single-steps performed to step out of a function.
    #[knus(child, default = DEFAULT_STEP_OUT_LIMIT, unwrap(argument))]
    pub step_out_limit: usize,

    /// Whether to stop at the entry point of the program.
    #[knus(child)]
    pub break_at_entry: bool,

    /// Breakpoints to install before resuming the program.
    #[knus(children(name = "breakpoint"))]
    pub breakpoints: Vec<BreakpointConfig>,
}

/// Configuration of a breakpoint.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct BreakpointConfig {
    /// Location of the breakpoint: either an address (e.g., `"0x401000"`), or
    /// the name of a function of the executable.
    #[knus(argument)]
    pub location: String,
}

impl SessionConfig {
    /// Returns the execution configuration of the debugged process.
    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            step_out_limit: self.step_out_limit,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::{BreakpointConfig, SessionConfig};

    #[test]
    fn parse_from_kdl_defaults() {
        let config = knus::parse::<SessionConfig>("<content>", "")
            .map_err(miette::Report::new)
            .expect("parse kdl");

        assert_eq!(
            config,
            SessionConfig {
                step_out_limit: 100_000,
                break_at_entry: false,
                breakpoints: vec![],
            }
        );
        assert_eq!(config.execution(), rewind_proc::ExecutionConfig::default());
    }

    #[test]
    fn parse_from_kdl_full() {
        let config = knus::parse::<SessionConfig>(
            "<content>",
            indoc::indoc! {r#"
                step-out-limit 10
                break-at-entry
                breakpoint "0x401000"
                breakpoint "main"
            "#},
        )
        .map_err(miette::Report::new)
        .expect("parse kdl");

        assert_eq!(
            config,
            SessionConfig {
                step_out_limit: 10,
                break_at_entry: true,
                breakpoints: vec![
                    BreakpointConfig {
                        location: "0x401000".to_owned(),
                    },
                    BreakpointConfig {
                        location: "main".to_owned(),
                    },
                ],
            }
        );
        assert_eq!(config.execution().step_out_limit, 10);
    }

    #[test]
    fn parse_from_kdl_invalid() {
        let res = knus::parse::<SessionConfig>(
            "<content>",
            indoc::indoc! {r#"
                step-out-limit "many"
            "#},
        );

        assert!(res.is_err());
    }
}
