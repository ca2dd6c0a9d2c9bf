//! Newline-delimited-JSON trace log I/O (`spec.md` §6 "Trace log format").
//!
//! One event per line, in log order. A trace log may be accompanied by a
//! `.unacked` sidecar file (same path with that suffix appended) listing
//! labels of events that were written but whose receipt was never
//! acknowledged by the collaborator that produced them — these are dropped
//! on load rather than trusted, matching the original implementation's
//! handling of a trace file truncated by a crash mid-write.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::StsError;
use crate::event::Event;

pub struct TraceLog {
    pub events: Vec<Event>,
}

impl TraceLog {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    fn unacked_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(".unacked");
        PathBuf::from(os)
    }

    /// Loads a trace log, dropping any events named in the `.unacked`
    /// sidecar if present.
    pub fn load(path: &Path) -> Result<Self, StsError> {
        let file = File::open(path).map_err(StsError::Io)?;
        let reader = BufReader::new(file);

        let unacked = Self::load_unacked(path)?;

        let mut events = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(StsError::Io)?;
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(&line).map_err(|e| StsError::CorruptTrace {
                path: path.to_path_buf(),
                reason: format!("line {}: {e}", lineno + 1),
            })?;
            let event = Event::from_json(&value).map_err(|e| match e {
                StsError::CorruptTrace { reason, .. } => StsError::CorruptTrace {
                    path: path.to_path_buf(),
                    reason: format!("line {}: {reason}", lineno + 1),
                },
                other => other,
            })?;
            if !unacked.contains(&event.label) {
                events.push(event);
            }
        }
        Ok(Self { events })
    }

    fn load_unacked(path: &Path) -> Result<Vec<String>, StsError> {
        let sidecar = Self::unacked_path(path);
        if !sidecar.exists() {
            warn!(path = %sidecar.display(), "no .unacked sidecar found, assuming no buffered receipts");
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&sidecar).map_err(StsError::Io)?;
        Ok(content.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    /// Writes the trace log as newline-delimited JSON, one event per line.
    pub fn save(&self, path: &Path) -> Result<(), StsError> {
        let file = File::create(path).map_err(StsError::Io)?;
        let mut writer = BufWriter::new(file);
        for event in &self.events {
            serde_json::to_writer(&mut writer, &event.to_json()).map_err(StsError::Serde)?;
            writer.write_all(b"\n").map_err(StsError::Io)?;
        }
        writer.flush().map_err(StsError::Io)?;
        Ok(())
    }

    /// Appends a single event and immediately flushes, used by the
    /// recording sync callback so a crash loses at most the in-flight
    /// event.
    pub fn append_one(writer: &mut impl Write, event: &Event) -> Result<(), StsError> {
        serde_json::to_writer(&mut *writer, &event.to_json()).map_err(StsError::Serde)?;
        writer.write_all(b"\n").map_err(StsError::Io)?;
        writer.flush().map_err(StsError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, InputEvent, LogicalTime};
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let events = vec![
            Event::new("e0", LogicalTime::new(0, 0), EventKind::Input(InputEvent::SwitchFailure { dpid: 1 })),
            Event::new("e1", LogicalTime::new(0, 1), EventKind::Input(InputEvent::SwitchRecovery { dpid: 1 })),
        ];
        TraceLog::new(events.clone()).save(&path).unwrap();
        let loaded = TraceLog::load(&path).unwrap();
        assert_eq!(loaded.events.len(), 2);
        assert_eq!(loaded.events[0].label, "e0");
    }

    #[test]
    fn drops_unacked_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let events = vec![
            Event::new("e0", LogicalTime::new(0, 0), EventKind::Input(InputEvent::SwitchFailure { dpid: 1 })),
            Event::new("e1", LogicalTime::new(0, 1), EventKind::Input(InputEvent::SwitchRecovery { dpid: 1 })),
        ];
        TraceLog::new(events).save(&path).unwrap();
        let sidecar = TraceLog::unacked_path(&path);
        fs::write(&sidecar, "e1\n").unwrap();
        let loaded = TraceLog::load(&path).unwrap();
        assert_eq!(loaded.events.len(), 1);
        assert_eq!(loaded.events[0].label, "e0");
    }
}
