//! Command-line surface (`spec.md` §6 "thin, out of core"): a `clap`
//! derive with subcommands `run` (fuzz and write a trace), `mcs` (load a
//! trace and run the minimal-causal-sequence search), `show` (print a
//! trace/MCS summary), and the hidden `run-trial` subcommand the re-exec
//! isolation mechanism in [`crate::trial`] uses to drive one child-process
//! replay.

pub mod mcs;
pub mod run;
pub mod run_trial;
pub mod show;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sts", about = "Record-and-replay debugger for distributed network controllers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fuzz a simulation run and write the resulting trace log.
    Run {
        #[arg(long, default_value = "trace.jsonl")]
        out: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 100)]
        rounds: u32,
    },
    /// Load a trace log and shrink it to a minimal causal sequence.
    Mcs {
        #[arg(long)]
        trace: PathBuf,
        #[arg(long, default_value = "mcs.jsonl")]
        out: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        efficient: bool,
        /// Which fingerprint of the final `InvariantViolation` to treat as
        /// the target bug signature, when the original run ended in more
        /// than one simultaneous violation (`spec.md` §3 "Bug signature").
        #[arg(long, default_value_t = 0)]
        violation: usize,
    },
    /// Print a human-readable summary of a trace or MCS result.
    Show {
        #[arg(long)]
        trace: PathBuf,
    },
    /// Hidden: runs exactly one replay trial, reading its request from
    /// stdin and writing its response to stdout. Invoked only by this
    /// binary's own re-exec during delta debugging, never by a user.
    #[command(hide = true, name = "run-trial")]
    RunTrial,
}
