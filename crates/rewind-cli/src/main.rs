#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use std::ffi::OsStr;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use miette::IntoDiagnostic;

use rewind_cli::{CliAction, CliOpts, SessionConfig, SessionEnd, Target};

use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("REWIND_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let res = match cli.action {
        CliAction::Run {
            config,
            output,
            program,
            args,
        } => evaluate_run(config, output, Target::Spawn { program, args }).map(Some),
        CliAction::Attach {
            config,
            output,
            pid,
        } => evaluate_run(config, output, Target::Attach(pid)).map(Some),
        CliAction::Core {
            core,
            exe,
            output,
            memory,
        } => evaluate_core(core, exe, output, memory).map(|_| None),
    };

    match res {
        Ok(Some(exit_code)) => std::process::exit(exit_code),
        Ok(None) => (),
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}

fn evaluate_core(
    core: PathBuf,
    exe: PathBuf,
    output: Option<PathBuf>,
    memory: Vec<(u64, usize)>,
) -> miette::Result<()> {
    if let Some(output) = output {
        let file = File::create(output).into_diagnostic()?;
        rewind_cli::evaluate_core(&core, &exe, &memory, file)
    } else {
        rewind_cli::evaluate_core(&core, &exe, &memory, std::io::stdout())
    }
}

fn evaluate_run(config: String, output: Option<PathBuf>, target: Target) -> miette::Result<i32> {
    let config = parse_session_config(config)?;

    let output: Box<dyn Write + Send> = match output {
        Some(output) => Box::new(File::create(output).into_diagnostic()?),
        None => Box::new(std::io::stdout()),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    let end = runtime.block_on(rewind_cli::evaluate_run(target, config, output))?;

    Ok(match end {
        SessionEnd::Exited(status) => status,
        SessionEnd::Interrupted => 130,
    })
}

fn parse_session_config(config: String) -> miette::Result<SessionConfig> {
    let path = Path::new(&config);

    let config = if let Some((filename, "kdl")) = path
        .file_name()
        .and_then(OsStr::to_str)
        .zip(path.extension().and_then(OsStr::to_str))
    {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        knus::parse(filename, &content)?
    } else {
        knus::parse("<content>", &config)?
    };

    Ok(config)
}
