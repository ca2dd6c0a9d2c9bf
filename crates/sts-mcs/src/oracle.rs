//! Adapts an [`InvariantChecker`] into the internal-event stream the
//! replay engine and scheduler consume (`spec.md` §4.F).
//!
//! The checker itself only returns a set of violation fingerprints; this
//! module is responsible for turning a non-empty result into the terminal
//! [`InternalEvent::InvariantViolation`] event that [`crate::dag`] and
//! [`crate::delta_debug`] key their "did this trial reproduce the bug"
//! decision on.

use crate::event::{Event, EventKind, InternalEvent, LogicalTime};
use crate::simulation::{InvariantChecker, Simulation};

/// Runs `checker` against `sim` and, if it reports any violation, returns
/// the terminal event to append to the trace.
pub fn poll_invariant(
    checker: &dyn InvariantChecker,
    sim: &mut dyn Simulation,
    at: LogicalTime,
    label: impl Into<String>,
) -> Option<Event> {
    let violations = checker.check(sim);
    if violations.is_empty() {
        return None;
    }
    Some(Event::new(
        label,
        at,
        EventKind::Internal(InternalEvent::InvariantViolation { violations }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::fake::{FakeInvariantChecker, FakeSimulation};

    #[test]
    fn no_event_when_no_violation() {
        let mut sim = FakeSimulation::new(3);
        let checker = FakeInvariantChecker { min_failed: 5 };
        assert!(poll_invariant(&checker, &mut sim, LogicalTime::new(0, 0), "v0").is_none());
    }

    #[test]
    fn emits_terminal_event_on_violation() {
        let mut sim = FakeSimulation::new(1);
        sim.inject_input(&crate::event::InputEvent::SwitchFailure { dpid: 0 }, LogicalTime::new(0, 0))
            .unwrap();
        let checker = FakeInvariantChecker { min_failed: 1 };
        let event = poll_invariant(&checker, &mut sim, LogicalTime::new(1, 0), "v0").unwrap();
        assert!(matches!(
            event.kind,
            EventKind::Internal(InternalEvent::InvariantViolation { .. })
        ));
    }
}
