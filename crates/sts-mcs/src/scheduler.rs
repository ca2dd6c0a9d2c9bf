//! Matches observed internal events against the expected sequence from a
//! trace during replay (`spec.md` §4.C).
//!
//! Expected internal events are consumed strictly in log order within each
//! fingerprint bucket (first-in-first-out by fingerprint), since two
//! internal events of the same shape are interchangeable for matching
//! purposes but their relative order against *other* fingerprints still
//! matters for when a timeout should fire. An event arriving with a
//! fingerprint that has no expected occurrences left is "unexpected"; an
//! expected event that does not arrive before its per-class timeout
//! expires is reported as timed out so the next trial can mark it and the
//! replay can keep moving instead of hanging.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::event::{Event, EventKind, Fingerprint, InternalEvent, LogicalTime};

/// The outcome of matching one observed internal event against the
/// expected queue. An unexpected event is further classified as "early"
/// when its own recorded/observed timestamp precedes the time of the
/// event the scheduler is currently waiting on — it may simply be a real
/// event that arrived out of order relative to the trace, rather than one
/// that will never arrive at all (`spec.md` §4.C).
#[derive(Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { label: String },
    Unexpected { early: bool },
}

/// Tracks, for each fingerprint, the FIFO queue of expected event labels
/// still outstanding.
pub struct Scheduler {
    expected: std::collections::HashMap<Fingerprint, VecDeque<String>>,
    timed_out: HashSet<String>,
    config: SchedulerConfig,
    /// Number of fingerprints that had more than one outstanding expected
    /// occurrence when armed (`spec.md` §4.C "ambiguous").
    ambiguous_fingerprints: u64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            expected: std::collections::HashMap::new(),
            timed_out: HashSet::new(),
            config,
            ambiguous_fingerprints: 0,
        }
    }

    /// Loads the expected internal events for one trial, in log order.
    pub fn arm(&mut self, events: &[&Event]) {
        self.expected.clear();
        self.timed_out.clear();
        self.ambiguous_fingerprints = 0;
        for event in events {
            if event.is_internal() {
                self.expected
                    .entry(event.fingerprint.clone())
                    .or_default()
                    .push_back(event.label.clone());
            }
        }
        self.ambiguous_fingerprints = self
            .expected
            .values()
            .filter(|queue| queue.len() > 1)
            .count() as u64;
    }

    /// Number of fingerprints with more than one outstanding expected
    /// occurrence, as computed at the last [`Self::arm`] call.
    pub fn ambiguity_count(&self) -> u64 {
        self.ambiguous_fingerprints
    }

    /// Consumes the oldest expected label for `fingerprint`, if any.
    /// `observed_at` is the observed event's own timestamp; `expected_at`
    /// is the timestamp of the event currently being waited on. When the
    /// fingerprint has no outstanding expected occurrence and `observed_at`
    /// precedes `expected_at`, the mismatch is classified as early rather
    /// than plain unexpected.
    pub fn observe(
        &mut self,
        fingerprint: &Fingerprint,
        observed_at: LogicalTime,
        expected_at: LogicalTime,
    ) -> MatchOutcome {
        match self.expected.get_mut(fingerprint).and_then(VecDeque::pop_front) {
            Some(label) => MatchOutcome::Matched { label },
            None => MatchOutcome::Unexpected { early: observed_at < expected_at },
        }
    }

    /// The timeout to apply while waiting for the next occurrence of
    /// `event`, per its class (`spec.md` §4.C).
    pub fn timeout_for(&self, event: &Event) -> Duration {
        match event.as_internal() {
            Some(InternalEvent::ControlMessageSend { .. } | InternalEvent::ControlMessageReceive { .. }) => {
                self.config.control_message_timeout()
            }
            Some(InternalEvent::ControllerStateChange { .. }) => {
                self.config.controller_state_change_timeout()
            }
            _ => self.config.default_wait_time(),
        }
    }

    pub fn mark_timed_out(&mut self, label: &str) {
        self.timed_out.insert(label.to_string());
        if let Some(queue) = self.expected.values_mut().find(|q| q.front().map(String::as_str) == Some(label)) {
            queue.pop_front();
        }
    }

    pub fn timed_out_labels(&self) -> HashSet<String> {
        self.timed_out.clone()
    }

    /// True once every expected fingerprint bucket has been drained.
    pub fn is_drained(&self) -> bool {
        self.expected.values().all(VecDeque::is_empty)
    }

    /// Remaining expected labels across all fingerprints, for diagnostics.
    pub fn pending_labels(&self) -> Vec<String> {
        self.expected.values().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LogicalTime};

    fn internal_event(label: &str, cid: u64) -> Event {
        Event::new(
            label,
            LogicalTime::new(0, 0),
            EventKind::Internal(InternalEvent::ControllerStateChange {
                cid,
                time: LogicalTime::new(0, 0),
                fingerprint: Fingerprint::new(serde_json::json!([cid, "x"])),
                name: "x".into(),
                value: serde_json::json!(1),
            }),
        )
    }

    #[test]
    fn matches_in_fifo_order_per_fingerprint() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let e0 = internal_event("e0", 1);
        let e1 = internal_event("e1", 1);
        let refs = vec![&e0, &e1];
        scheduler.arm(&refs);
        assert_eq!(scheduler.ambiguity_count(), 1);
        let fp = e0.fingerprint.clone();
        let now = LogicalTime::new(0, 0);
        assert_eq!(scheduler.observe(&fp, now, now), MatchOutcome::Matched { label: "e0".into() });
        assert_eq!(scheduler.observe(&fp, now, now), MatchOutcome::Matched { label: "e1".into() });
        assert_eq!(scheduler.observe(&fp, now, now), MatchOutcome::Unexpected { early: false });
    }

    #[test]
    fn unexpected_event_before_current_deadline_is_early() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.arm(&[]);
        let fp = Fingerprint::new(serde_json::json!("never-expected"));
        let observed_at = LogicalTime::new(0, 0);
        let expected_at = LogicalTime::new(5, 0);
        assert_eq!(
            scheduler.observe(&fp, observed_at, expected_at),
            MatchOutcome::Unexpected { early: true }
        );
        assert_eq!(
            scheduler.observe(&fp, expected_at, observed_at),
            MatchOutcome::Unexpected { early: false }
        );
    }

    #[test]
    fn control_message_uses_short_timeout() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let event = Event::new(
            "e0",
            LogicalTime::new(0, 0),
            EventKind::Internal(InternalEvent::ControlMessageSend {
                dpid: 1,
                cid: 1,
                fingerprint: Fingerprint::new(serde_json::json!(1)),
            }),
        );
        assert_eq!(scheduler.timeout_for(&event), Duration::from_secs(2));
    }

    #[test]
    fn drained_once_all_fingerprints_empty() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let e0 = internal_event("e0", 1);
        scheduler.arm(&[&e0]);
        assert!(!scheduler.is_drained());
        let now = LogicalTime::new(0, 0);
        scheduler.observe(&e0.fingerprint, now, now);
        assert!(scheduler.is_drained());
    }
}
