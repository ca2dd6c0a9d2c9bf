//! Record-and-replay debugger and minimal-causal-sequence finder for
//! distributed network controllers.
//!
//! # Architecture
//!
//! ```text
//! fuzzer ──> trace log ──> event DAG ──> replay engine ──> invariant oracle
//!                                  ^                              |
//!                                  └──────── delta debugger <──────┘
//! ```
//!
//! A live run drives a [`simulation::Simulation`] collaborator through
//! [`fuzzer::Fuzzer`], recording every injected input event and every
//! internal event the controller reports through a
//! [`sync::RecordingSyncCallback`] into a [`trace_log::TraceLog`]. Given a
//! trace that ends in an invariant violation, [`delta_debug::DeltaDebugger`]
//! repeatedly asks a [`delta_debug::TrialRunner`] — normally
//! [`trial::run_trial_subprocess`], which re-execs this binary's hidden
//! `run-trial` subcommand — whether some subset of the input events still
//! reproduces the bug, shrinking the trace to a minimal causal sequence.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod adapters;
pub mod cli;
pub mod config;
pub mod dag;
pub mod delta_debug;
pub mod error;
pub mod event;
pub mod fuzzer;
pub mod oracle;
pub mod replay;
pub mod scheduler;
pub mod simulation;
pub mod stats;
pub mod sync;
pub mod trace_log;
pub mod trial;

pub use cli::Cli;
pub use error::StsError;
