//! Collaborator traits the replay engine, fuzzer, and delta debugger drive
//! (`spec.md` §6 "Design Notes"), replacing the original implementation's
//! monkey-patched simulation object and `EventMixin` back-reference cycles
//! with explicit dependency injection, the way `kimberlite-sim`'s
//! `adapters` module injects `Clock`/`Rng` rather than reaching for the
//! real clock directly.
//!
//! These traits are intentionally minimal and `dyn`-safe. A production
//! deployment plugs in real OpenFlow/socket-backed implementations; this
//! crate ships only the in-memory [`fake`] used by its own tests and by
//! the end-to-end scenario suite.

use crate::event::{InputEvent, InternalEvent, LinkId, LogicalTime};
use crate::sync::SyncCallback;

/// Errors a collaborator implementation can raise while driving the
/// simulated network. Distinct from [`crate::error::StsError`] because
/// these are errors from the system under test, not the harness.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("bootstrap failed: {0}")]
    BootstrapFailed(String),
    #[error("cannot inject event: {0}")]
    InjectFailed(String),
}

/// An internal event observed during replay, paired with the time the
/// collaborator reports it happened. The timestamp is what lets the
/// scheduler tell an "early" observation (one that precedes the currently
/// awaited expected event) apart from a plain unexpected one (`spec.md`
/// §4.C).
#[derive(Debug, Clone)]
pub struct ObservedInternalEvent {
    pub kind: InternalEvent,
    pub time: LogicalTime,
}

pub trait Simulation {
    fn bootstrap(&mut self, wait_seconds: Option<f64>) -> Result<(), SimError>;
    fn clean_up(&mut self);
    fn topology(&mut self) -> &mut dyn TopologyView;
    fn inject_input(&mut self, event: &InputEvent, at: LogicalTime) -> Result<(), SimError>;
    fn poll_internal_events(&mut self) -> Vec<ObservedInternalEvent>;
    fn sync_callback(&mut self) -> &mut dyn SyncCallback;
}

pub trait TopologyView {
    fn live_switches(&self) -> Vec<u64>;
    fn failed_switches(&self) -> Vec<u64>;
    fn live_links(&self) -> Vec<LinkId>;
    fn cut_links(&self) -> Vec<LinkId>;
    fn hosts(&self) -> Vec<u64>;
    fn access_links(&self) -> Vec<LinkId>;
    fn live_edge_switches(&self) -> Vec<u64>;
    fn crash_switch(&mut self, dpid: u64);
    fn recover_switch(&mut self, dpid: u64) -> bool;
    fn sever_link(&mut self, link: LinkId);
    fn repair_link(&mut self, link: LinkId);
    fn migrate_host(&mut self, old: (u64, u16), new: (u64, u16));
    /// Control channels (controller id, switch dpid) not currently blocked.
    fn live_channels(&self) -> Vec<(u64, u64)>;
    /// Control channels currently blocked.
    fn blocked_channels(&self) -> Vec<(u64, u64)>;
    fn block_connection(&mut self, dpid: u64, cid: u64);
    fn unblock_connection(&mut self, dpid: u64, cid: u64);
    fn live_controllers(&self) -> Vec<u64>;
    fn failed_controllers(&self) -> Vec<u64>;
    fn crash_controller(&mut self, cid: u64);
    fn recover_controller(&mut self, cid: u64) -> bool;
}

pub trait InvariantChecker {
    fn check(&self, sim: &mut dyn Simulation) -> Vec<crate::event::Fingerprint>;
}

/// An in-memory fake implementing all three collaborator traits, used by
/// this crate's own tests and the end-to-end scenario suite. It has no
/// real network underneath: topology mutations just flip membership in a
/// handful of `Vec`s, and invariant violations are driven directly by the
/// test rather than discovered by inspecting real controller state.
pub mod fake {
    use super::{InvariantChecker, ObservedInternalEvent, SimError, Simulation, TopologyView};
    use crate::event::{Fingerprint, InputEvent, LinkId, LogicalTime};
    use crate::sync::{RecordingSyncCallback, SyncCallback};
    use std::time::Duration;

    pub struct FakeTopology {
        pub switches: Vec<u64>,
        pub failed: Vec<u64>,
        pub links: Vec<LinkId>,
        pub cut: Vec<LinkId>,
        pub hosts: Vec<u64>,
        /// Controller ids known to this topology.
        pub controllers: Vec<u64>,
        pub failed_controllers: Vec<u64>,
        /// Control channels as (dpid, cid) pairs.
        pub channels: Vec<(u64, u64)>,
        pub blocked_channels: Vec<(u64, u64)>,
    }

    impl TopologyView for FakeTopology {
        fn live_switches(&self) -> Vec<u64> {
            self.switches.iter().copied().filter(|d| !self.failed.contains(d)).collect()
        }
        fn failed_switches(&self) -> Vec<u64> {
            self.failed.clone()
        }
        fn live_links(&self) -> Vec<LinkId> {
            self.links.iter().copied().filter(|l| !self.cut.contains(l)).collect()
        }
        fn cut_links(&self) -> Vec<LinkId> {
            self.cut.clone()
        }
        fn hosts(&self) -> Vec<u64> {
            self.hosts.clone()
        }
        fn access_links(&self) -> Vec<LinkId> {
            self.links.clone()
        }
        fn live_edge_switches(&self) -> Vec<u64> {
            self.live_switches()
        }
        fn crash_switch(&mut self, dpid: u64) {
            if !self.failed.contains(&dpid) {
                self.failed.push(dpid);
            }
        }
        fn recover_switch(&mut self, dpid: u64) -> bool {
            let before = self.failed.len();
            self.failed.retain(|d| *d != dpid);
            self.failed.len() != before
        }
        fn sever_link(&mut self, link: LinkId) {
            if !self.cut.contains(&link) {
                self.cut.push(link);
            }
        }
        fn repair_link(&mut self, link: LinkId) {
            self.cut.retain(|l| *l != link);
        }
        fn migrate_host(&mut self, _old: (u64, u16), _new: (u64, u16)) {}
        fn live_channels(&self) -> Vec<(u64, u64)> {
            self.channels.iter().copied().filter(|c| !self.blocked_channels.contains(c)).collect()
        }
        fn blocked_channels(&self) -> Vec<(u64, u64)> {
            self.blocked_channels.clone()
        }
        fn block_connection(&mut self, dpid: u64, cid: u64) {
            if !self.blocked_channels.contains(&(dpid, cid)) {
                self.blocked_channels.push((dpid, cid));
            }
        }
        fn unblock_connection(&mut self, dpid: u64, cid: u64) {
            self.blocked_channels.retain(|c| *c != (dpid, cid));
        }
        fn live_controllers(&self) -> Vec<u64> {
            self.controllers.iter().copied().filter(|c| !self.failed_controllers.contains(c)).collect()
        }
        fn failed_controllers(&self) -> Vec<u64> {
            self.failed_controllers.clone()
        }
        fn crash_controller(&mut self, cid: u64) {
            if !self.failed_controllers.contains(&cid) {
                self.failed_controllers.push(cid);
            }
        }
        fn recover_controller(&mut self, cid: u64) -> bool {
            let before = self.failed_controllers.len();
            self.failed_controllers.retain(|c| *c != cid);
            self.failed_controllers.len() != before
        }
    }

    /// A fake [`Simulation`] whose invariant violations are scripted ahead
    /// of time: `violation_after` says how many total input events must
    /// have been injected before [`FakeInvariantChecker`] reports a
    /// violation, modeling a bug that only manifests after enough
    /// perturbation has landed.
    pub struct FakeSimulation {
        pub topology: FakeTopology,
        pub sync: RecordingSyncCallback,
        pub injected: Vec<InputEvent>,
    }

    impl FakeSimulation {
        pub fn new(switch_count: u64) -> Self {
            Self {
                topology: FakeTopology {
                    switches: (0..switch_count).collect(),
                    failed: Vec::new(),
                    links: Vec::new(),
                    cut: Vec::new(),
                    hosts: Vec::new(),
                    controllers: Vec::new(),
                    failed_controllers: Vec::new(),
                    channels: Vec::new(),
                    blocked_channels: Vec::new(),
                },
                sync: RecordingSyncCallback::new(Duration::from_millis(0)),
                injected: Vec::new(),
            }
        }
    }

    impl Simulation for FakeSimulation {
        fn bootstrap(&mut self, _wait_seconds: Option<f64>) -> Result<(), SimError> {
            Ok(())
        }
        fn clean_up(&mut self) {}
        fn topology(&mut self) -> &mut dyn TopologyView {
            &mut self.topology
        }
        fn inject_input(&mut self, event: &InputEvent, _at: LogicalTime) -> Result<(), SimError> {
            match event {
                InputEvent::SwitchFailure { dpid } => self.topology.crash_switch(*dpid),
                InputEvent::SwitchRecovery { dpid } => {
                    self.topology.recover_switch(*dpid);
                }
                InputEvent::LinkFailure { link } => self.topology.sever_link(*link),
                InputEvent::LinkRecovery { link } => self.topology.repair_link(*link),
                InputEvent::ControllerFailure { cid } => self.topology.crash_controller(*cid),
                InputEvent::ControllerRecovery { cid } => {
                    self.topology.recover_controller(*cid);
                }
                InputEvent::ControlChannelBlock { dpid, cid } => {
                    self.topology.block_connection(*dpid, *cid);
                }
                InputEvent::ControlChannelUnblock { dpid, cid } => {
                    self.topology.unblock_connection(*dpid, *cid);
                }
                _ => {}
            }
            self.injected.push(event.clone());
            Ok(())
        }
        fn poll_internal_events(&mut self) -> Vec<ObservedInternalEvent> {
            Vec::new()
        }
        fn sync_callback(&mut self) -> &mut dyn SyncCallback {
            &mut self.sync
        }
    }

    /// Reports an invariant violation once at least `min_failed` switches
    /// are simultaneously down — a stand-in for "controller loses the
    /// network partition invariant once enough of the fabric is gone".
    pub struct FakeInvariantChecker {
        pub min_failed: usize,
    }

    impl InvariantChecker for FakeInvariantChecker {
        fn check(&self, sim: &mut dyn Simulation) -> Vec<Fingerprint> {
            if sim.topology().failed_switches().len() >= self.min_failed {
                vec![Fingerprint::new(serde_json::json!("partition_invariant_violated"))]
            } else {
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;

    #[test]
    fn fake_simulation_tracks_failed_switches() {
        let mut sim = FakeSimulation::new(3);
        sim.inject_input(&InputEvent::SwitchFailure { dpid: 1 }, LogicalTime::new(0, 0))
            .unwrap();
        assert_eq!(sim.topology().failed_switches(), vec![1]);
    }

    #[test]
    fn invariant_checker_fires_once_threshold_met() {
        let mut sim = FakeSimulation::new(3);
        let checker = FakeInvariantChecker { min_failed: 2 };
        assert!(checker.check(&mut sim).is_empty());
        sim.inject_input(&InputEvent::SwitchFailure { dpid: 1 }, LogicalTime::new(0, 0))
            .unwrap();
        sim.inject_input(&InputEvent::SwitchFailure { dpid: 2 }, LogicalTime::new(0, 1))
            .unwrap();
        assert_eq!(checker.check(&mut sim).len(), 1);
    }
}
