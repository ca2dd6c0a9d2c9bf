//! Error kinds for the MCS finder, per the error-handling policy table.
//!
//! Library code never calls `std::process::exit`; only the CLI layer
//! translates [`StsError::BugNotReproducible`] into exit code 5 and a
//! caught interrupt signal into exit code 13.

use std::path::PathBuf;

/// Errors surfaced by the simulation/replay/delta-debugging pipeline.
#[derive(Debug, thiserror::Error)]
pub enum StsError {
    /// The initial reproducibility pass did not reproduce the target
    /// violation. Fatal at the CLI boundary (exit code 5); an ordinary
    /// negative result during `ddmin` itself.
    #[error("bug not reproducible: replay of the full trace did not match the bug signature")]
    BugNotReproducible,

    /// The DAG has no input events left to prune, or none of a supported
    /// kind.
    #[error("no supported input events in trace")]
    NoSupportedInputs,

    /// A controller asked for a deterministic value this crate does not
    /// know how to answer.
    #[error("unsupported deterministic value request: {0}")]
    UnsupportedDeterministicValue(String),

    /// The trace log failed to parse.
    #[error("corrupt trace at {path}: {reason}")]
    CorruptTrace { path: PathBuf, reason: String },

    /// An expected internal event did not arrive within its timeout.
    #[error("event {label} timed out waiting for fingerprint {fingerprint}")]
    EventTimeout { label: String, fingerprint: String },

    /// An observed internal event had no expected counterpart.
    #[error("unexpected internal event with fingerprint {fingerprint}")]
    UnexpectedInternalEvent { fingerprint: String },

    /// A replay trial's child process crashed or could not be spawned.
    #[error("subprocess crash during trial {subsequence_id}: {reason}")]
    SubprocessCrash { subsequence_id: u64, reason: String },

    /// Too many consecutive subprocess crashes; operator attention needed.
    #[error("{count} consecutive subprocess crashes, giving up")]
    TooManyCrashes { count: u64 },

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure outside of trace parsing.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StsError>;
