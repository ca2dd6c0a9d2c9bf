//! Runs one replay trial in a fresh child process (`spec.md` §5
//! "Concurrency & Resource Model").
//!
//! Rust has no `fork()` equivalent that safely duplicates a running
//! process; instead the parent re-execs its own binary with the hidden
//! `run-trial` subcommand, passing the candidate atom set on the child's
//! stdin and reading its result back from stdout. Both sides speak a
//! length-prefixed JSON frame (a 4-byte big-endian length followed by that
//! many bytes of JSON) rather than newline-delimited JSON, so a JSON value
//! containing an embedded newline can never desynchronize the stream.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::dag::Atom;
use crate::error::StsError;
use crate::event::Fingerprint;
use crate::stats::ClientDict;

#[derive(Debug, Serialize, Deserialize)]
pub struct TrialRequest {
    pub trace_path: std::path::PathBuf,
    pub kept_atoms: Vec<AtomWire>,
    /// The fingerprint a trial must observe the live invariant checker
    /// report to count as reproducing the target bug (`spec.md` §3 "Bug
    /// signature", §4.F). Computed once by the parent from the original,
    /// unpruned trace so every trial is judged against the same target
    /// regardless of which atoms it kept.
    pub bug_signature: Fingerprint,
}

/// Wire representation of an [`Atom`]; `Atom` itself has no `Serialize`
/// impl since its in-process form is only ever constructed from a
/// [`crate::dag::EventDag`], not parsed directly off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AtomWire {
    Single { label: String },
    Pair { a: String, b: String },
}

impl From<&Atom> for AtomWire {
    fn from(atom: &Atom) -> Self {
        match atom {
            Atom::Single(label) => AtomWire::Single { label: label.clone() },
            Atom::Pair(a, b) => AtomWire::Pair { a: a.clone(), b: b.clone() },
        }
    }
}

impl From<&AtomWire> for Atom {
    fn from(wire: &AtomWire) -> Self {
        match wire {
            AtomWire::Single { label } => Atom::Single(label.clone()),
            AtomWire::Pair { a, b } => Atom::Pair(a.clone(), b.clone()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrialResponse {
    pub reproduced: bool,
    pub timed_out_labels: Vec<String>,
    pub stats: ClientDict,
}

/// Writes one length-prefixed JSON frame.
pub fn write_frame<T: Serialize>(writer: &mut impl Write, value: &T) -> Result<(), StsError> {
    let bytes = serde_json::to_vec(value).map_err(StsError::Serde)?;
    let len = u32::try_from(bytes.len()).map_err(|_| StsError::CorruptTrace {
        path: Default::default(),
        reason: "trial frame too large".into(),
    })?;
    writer.write_all(&len.to_be_bytes()).map_err(StsError::Io)?;
    writer.write_all(&bytes).map_err(StsError::Io)?;
    writer.flush().map_err(StsError::Io)?;
    Ok(())
}

/// Reads one length-prefixed JSON frame.
pub fn read_frame<T: for<'de> Deserialize<'de>>(reader: &mut impl Read) -> Result<T, StsError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).map_err(StsError::Io)?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(StsError::Io)?;
    serde_json::from_slice(&buf).map_err(StsError::Serde)
}

/// Spawns `binary run-trial`, feeds it one request frame, and collects its
/// response frame. A non-zero exit or broken pipe is reported as a
/// [`StsError::SubprocessCrash`] rather than propagating the raw I/O
/// error, so the delta debugger can treat it as "this subset is
/// inconclusive" instead of aborting the whole search.
pub fn run_trial_subprocess(
    binary: &std::path::Path,
    request: &TrialRequest,
    subsequence_id: u64,
) -> Result<TrialResponse, StsError> {
    let mut child: Child = Command::new(binary)
        .arg("run-trial")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| StsError::SubprocessCrash {
            subsequence_id,
            reason: format!("spawn failed: {e}"),
        })?;

    let mut stdin = child.stdin.take().ok_or_else(|| StsError::SubprocessCrash {
        subsequence_id,
        reason: "child stdin unavailable".into(),
    })?;
    write_frame(&mut stdin, request).map_err(|e| StsError::SubprocessCrash {
        subsequence_id,
        reason: format!("failed writing request: {e}"),
    })?;
    drop(stdin);

    let mut stdout = child.stdout.take().ok_or_else(|| StsError::SubprocessCrash {
        subsequence_id,
        reason: "child stdout unavailable".into(),
    })?;
    let response: TrialResponse = read_frame(&mut stdout).map_err(|e| StsError::SubprocessCrash {
        subsequence_id,
        reason: format!("failed reading response: {e}"),
    })?;

    let status = child.wait().map_err(|e| StsError::SubprocessCrash {
        subsequence_id,
        reason: format!("failed waiting on child: {e}"),
    })?;
    if !status.success() {
        return Err(StsError::SubprocessCrash {
            subsequence_id,
            reason: format!("child exited with {status}"),
        });
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let request = TrialRequest {
            trace_path: "trace.jsonl".into(),
            kept_atoms: vec![AtomWire::Single { label: "e0".into() }],
            bug_signature: crate::event::Fingerprint::new(serde_json::json!("F")),
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &request).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let parsed: TrialRequest = read_frame(&mut cursor).unwrap();
        assert_eq!(parsed.trace_path, request.trace_path);
        assert_eq!(parsed.kept_atoms.len(), 1);
    }

    #[test]
    fn atom_wire_round_trips_pair() {
        let atom = Atom::Pair("e0".into(), "e1".into());
        let wire = AtomWire::from(&atom);
        let back = Atom::from(&wire);
        assert_eq!(atom, back);
    }
}
