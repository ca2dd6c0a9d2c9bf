//! Binary entry point: parses the CLI, initializes logging, installs a
//! `SIGINT`/`SIGTERM` handler, and dispatches to the chosen subcommand
//! (`spec.md` §6, §7 error-handling policy table).

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, Level};
use tracing_subscriber::EnvFilter;

use sts_mcs::cli::{Cli, Command};
use sts_mcs::error::StsError;

/// Exit code reserved for "interrupted by a caught signal", distinct from
/// a shell's own 128+signum convention so a caller can tell a clean
/// interrupt apart from a crash.
const EXIT_INTERRUPTED: u8 = 13;
/// Exit code for "the target bug did not reproduce" (`spec.md` §7).
const EXIT_BUG_NOT_REPRODUCIBLE: u8 = 5;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let interrupted = Arc::new(AtomicBool::new(false));
    if let Err(e) = install_signal_handler(Arc::clone(&interrupted)) {
        error!(error = %e, "failed to install signal handler, continuing without it");
    }

    let cli = Cli::parse();
    let result = dispatch(&cli.command);

    if interrupted.load(Ordering::SeqCst) {
        return ExitCode::from(EXIT_INTERRUPTED);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(StsError::BugNotReproducible) = e.downcast_ref::<StsError>() {
                error!("bug not reproducible");
                return ExitCode::from(EXIT_BUG_NOT_REPRODUCIBLE);
            }
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Run { out, config, rounds } => sts_mcs::cli::run::run(out, config.as_ref(), *rounds),
        Command::Mcs {
            trace,
            out,
            config,
            efficient,
            violation,
        } => sts_mcs::cli::mcs::run(trace, out, config.as_ref(), *efficient, *violation),
        Command::Show { trace } => sts_mcs::cli::show::run(trace),
        Command::RunTrial => sts_mcs::cli::run_trial::run(),
    }
}

fn install_signal_handler(flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))?;
    signal_hook::flag::register(signal_hook::consts::SIGQUIT, flag)?;
    Ok(())
}
