//! Synchronization callbacks bridging the simulation clock to recording
//! and replay (`spec.md` §4.H).
//!
//! During a live run, a [`RecordingSyncCallback`] logs every controller
//! state change and answers deterministic-value requests (currently only
//! `"gettimeofday"`) from the real wall clock. During replay, a
//! [`ReplaySyncCallback`] answers the same requests from the recorded
//! trace instead, so the controller observes identical values on both
//! runs. Both sides share a bootstrap window during which requests are
//! passed straight through rather than matched, since a controller's
//! startup sequence is rarely deterministic enough to log precisely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapters::clock::{Clock, SystemClock};
use crate::error::StsError;
use crate::event::{Event, Fingerprint};

/// A pending state change the simulation has not yet consumed, keyed by
/// fingerprint with a multiplicity (a controller may emit the same
/// state-change shape more than once before the simulation drains it).
type PendingMultiset = HashMap<Fingerprint, u64>;

pub trait SyncCallback {
    /// Called when the controller reports a named state change.
    fn state_change(&mut self, cid: u64, name: &str, value: serde_json::Value) -> Result<(), StsError>;

    /// Called when the controller asks for a value it cannot compute
    /// deterministically on its own (e.g. the current wall-clock time).
    fn deterministic_value(&mut self, request: &str) -> Result<serde_json::Value, StsError>;
}

/// Logs every state change and answers deterministic-value requests from
/// the real clock. Used while producing a trace log for later replay.
pub struct RecordingSyncCallback {
    recorded: Vec<Event>,
    clock: Arc<dyn Clock>,
    start: Instant,
    pass_through_until: Duration,
}

impl RecordingSyncCallback {
    /// Uses the real wall clock. Equivalent to
    /// `RecordingSyncCallback::with_clock(bootstrap_pass_through,
    /// Arc::new(SystemClock))`.
    pub fn new(bootstrap_pass_through: Duration) -> Self {
        Self::with_clock(bootstrap_pass_through, Arc::new(SystemClock))
    }

    /// As [`Self::new`], but driven by an arbitrary [`Clock`] so tests can
    /// substitute a [`crate::adapters::clock::SimClock`] instead of the
    /// real wall clock.
    pub fn with_clock(bootstrap_pass_through: Duration, clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Self {
            recorded: Vec::new(),
            clock,
            start,
            pass_through_until: bootstrap_pass_through,
        }
    }

    pub fn take_recorded(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.recorded)
    }

    fn elapsed(&self) -> Duration {
        self.clock.elapsed_since(self.start)
    }

    fn in_bootstrap(&self) -> bool {
        self.elapsed() < self.pass_through_until
    }
}

impl SyncCallback for RecordingSyncCallback {
    fn state_change(&mut self, cid: u64, name: &str, value: serde_json::Value) -> Result<(), StsError> {
        if self.in_bootstrap() {
            return Ok(());
        }
        let elapsed = self.elapsed();
        let time = crate::event::LogicalTime::new(
            elapsed.as_secs() as i64,
            i64::from(elapsed.subsec_micros()),
        );
        let kind = crate::event::EventKind::Internal(crate::event::InternalEvent::ControllerStateChange {
            cid,
            time,
            fingerprint: Fingerprint::new(serde_json::json!([cid, name])),
            name: name.to_string(),
            value,
        });
        let label = format!("sc{}", self.recorded.len());
        self.recorded.push(Event::new(label, time, kind));
        Ok(())
    }

    fn deterministic_value(&mut self, request: &str) -> Result<serde_json::Value, StsError> {
        match request {
            "gettimeofday" => {
                let elapsed = self.elapsed();
                Ok(serde_json::json!([elapsed.as_secs(), elapsed.subsec_micros()]))
            }
            other => Err(StsError::UnsupportedDeterministicValue(other.to_string())),
        }
    }
}

/// Answers deterministic-value requests and tracks pending state changes
/// from the recorded trace rather than the real clock, so a replayed
/// controller sees the same values the original run produced.
pub struct ReplaySyncCallback {
    deterministic_values: std::collections::VecDeque<serde_json::Value>,
    pending: PendingMultiset,
    pass_through: bool,
}

impl ReplaySyncCallback {
    pub fn new(deterministic_values: Vec<serde_json::Value>) -> Self {
        Self {
            deterministic_values: deterministic_values.into(),
            pending: PendingMultiset::new(),
            pass_through: true,
        }
    }

    /// Enables pass-through mode: state changes are accepted unconditionally
    /// without being checked against `pending`. Used during the bootstrap
    /// window before the simulation starts injecting input events.
    pub fn set_pass_through(&mut self) {
        self.pass_through = true;
    }

    pub fn unset_pass_through(&mut self) {
        self.pass_through = false;
    }

    /// Registers that the simulation now expects to observe this
    /// fingerprint as a future state change.
    pub fn expect(&mut self, fingerprint: Fingerprint) {
        *self.pending.entry(fingerprint).or_insert(0) += 1;
    }

    fn consume_pending(&mut self, fingerprint: &Fingerprint) -> bool {
        match self.pending.get_mut(fingerprint) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }
}

impl SyncCallback for ReplaySyncCallback {
    fn state_change(&mut self, cid: u64, name: &str, _value: serde_json::Value) -> Result<(), StsError> {
        if self.pass_through {
            return Ok(());
        }
        let fingerprint = Fingerprint::new(serde_json::json!([cid, name]));
        if self.consume_pending(&fingerprint) {
            Ok(())
        } else {
            Err(StsError::UnexpectedInternalEvent {
                fingerprint: fingerprint.to_string(),
            })
        }
    }

    fn deterministic_value(&mut self, request: &str) -> Result<serde_json::Value, StsError> {
        match request {
            "gettimeofday" => self
                .deterministic_values
                .pop_front()
                .ok_or_else(|| StsError::UnsupportedDeterministicValue(request.to_string())),
            other => Err(StsError::UnsupportedDeterministicValue(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_passes_through_during_bootstrap() {
        let mut cb = ReplaySyncCallback::new(vec![]);
        assert!(cb.state_change(1, "role", serde_json::json!("MASTER")).is_ok());
    }

    #[test]
    fn replay_rejects_unexpected_state_change_once_armed() {
        let mut cb = ReplaySyncCallback::new(vec![]);
        cb.unset_pass_through();
        let result = cb.state_change(1, "role", serde_json::json!("MASTER"));
        assert!(result.is_err());
    }

    #[test]
    fn replay_accepts_expected_state_change() {
        let mut cb = ReplaySyncCallback::new(vec![]);
        cb.unset_pass_through();
        let fp = Fingerprint::new(serde_json::json!([1, "role"]));
        cb.expect(fp);
        assert!(cb.state_change(1, "role", serde_json::json!("MASTER")).is_ok());
    }

    #[test]
    fn replay_deterministic_value_drains_in_order() {
        let mut cb = ReplaySyncCallback::new(vec![serde_json::json!([1, 0]), serde_json::json!([2, 0])]);
        assert_eq!(cb.deterministic_value("gettimeofday").unwrap(), serde_json::json!([1, 0]));
        assert_eq!(cb.deterministic_value("gettimeofday").unwrap(), serde_json::json!([2, 0]));
        assert!(cb.deterministic_value("gettimeofday").is_err());
    }

    #[test]
    fn unsupported_request_is_an_error() {
        let mut cb = ReplaySyncCallback::new(vec![]);
        assert!(cb.deterministic_value("random").is_err());
    }

    #[test]
    fn recording_uses_injected_clock_not_the_wall_clock() {
        use crate::adapters::clock::SimClock;

        let clock = Arc::new(SimClock::new());
        let mut cb = RecordingSyncCallback::with_clock(Duration::from_millis(0), Arc::clone(&clock) as Arc<dyn Clock>);
        clock.advance_by(Duration::from_secs(3));
        cb.state_change(1, "role", serde_json::json!("MASTER")).unwrap();
        let recorded = cb.take_recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].time, crate::event::LogicalTime::new(3, 0));
    }
}
