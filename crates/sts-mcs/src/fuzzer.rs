//! Randomized fault injection loop (`spec.md` §4.E).
//!
//! Each round runs the same eight checks in a fixed order — dataplane
//! traffic, control channels, message receipts, switch crashes, link
//! failures, traffic fuzzing, controller crashes, host migrations — so a
//! fixed RNG seed always produces the same sequence of input events
//! regardless of what else is going on in the simulation. All randomness
//! in this module flows through a single seeded [`rand::rngs::SmallRng`];
//! nothing here calls `rand::thread_rng()`.
//!
//! Steps 1 (dataplane delay/drop) and 3 (pending message receipts) need a
//! queued dataplane trace and a pending-receipt queue that this crate's
//! [`TopologyView`]/[`Simulation`] traits deliberately do not expose — that
//! state is owned by the collaborator on the other side of those traits
//! (`spec.md` §6, "a fixed set of operations"). Those two steps are kept as
//! explicit, documented no-ops. Steps 2 (control-channel block/unblock) and
//! 7 (controller crash/recovery) mirror [`Fuzzer::check_switch_crashes`]
//! against the channel/controller accessors [`TopologyView`] exposes.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use rand::rngs::SmallRng;

use crate::config::FuzzerParams;
use crate::event::{InputEvent, LinkId};
use crate::simulation::{Simulation, TopologyView};

/// One round's worth of input events to inject, in the order they were
/// decided. The caller is responsible for actually injecting them and
/// recording them to the trace log.
#[derive(Debug, Default)]
pub struct FuzzRound {
    pub events: Vec<InputEvent>,
}

pub struct Fuzzer {
    params: FuzzerParams,
    /// Next free port number to hand out per switch during host migration
    /// (step 8), since `TopologyView` reports live edge switches but not
    /// their port allocation state.
    next_port: HashMap<u64, u16>,
}

impl Fuzzer {
    pub fn new(params: FuzzerParams) -> Self {
        Self {
            params,
            next_port: HashMap::new(),
        }
    }

    pub fn params(&self) -> &FuzzerParams {
        &self.params
    }

    /// Runs one round of the fixed eight-step check order against the
    /// current topology, producing whatever input events this round's
    /// coin flips decided to inject.
    pub fn trigger_events(&mut self, rng: &mut SmallRng, topology: &mut dyn TopologyView) -> FuzzRound {
        let mut round = FuzzRound::default();
        self.check_dataplane(rng, &mut round);
        self.check_control_channels(rng, topology, &mut round);
        self.check_message_receipts(rng, &mut round);
        self.check_switch_crashes(rng, topology, &mut round);
        self.check_link_failures(rng, topology, &mut round);
        self.fuzz_traffic(rng, topology, &mut round);
        self.check_controllers(rng, topology, &mut round);
        self.check_migrations(rng, topology, &mut round);
        round
    }

    /// Step 1: dataplane delay/drop/permit. No-op here; see module docs.
    fn check_dataplane(&self, _rng: &mut SmallRng, _round: &mut FuzzRound) {
        let _ = (self.params.dataplane_delay_rate, self.params.dataplane_drop_rate);
    }

    /// Rolls `controlplane_block_rate` independently for each unblocked
    /// control channel, then `controlplane_unblock_rate` for each blocked
    /// channel not blocked this round (`spec.md` §4.E.2), mirroring
    /// [`Self::check_switch_crashes`]'s one-state-change-per-round shape.
    fn check_control_channels(&self, rng: &mut SmallRng, topology: &mut dyn TopologyView, round: &mut FuzzRound) {
        let mut blocked_this_round: HashSet<(u64, u64)> = HashSet::new();
        for (dpid, cid) in topology.live_channels() {
            if rng.gen_bool(self.params.controlplane_block_rate) {
                topology.block_connection(dpid, cid);
                blocked_this_round.insert((dpid, cid));
                round.events.push(InputEvent::ControlChannelBlock { dpid, cid });
            }
        }
        for (dpid, cid) in topology.blocked_channels() {
            if blocked_this_round.contains(&(dpid, cid)) {
                continue;
            }
            if rng.gen_bool(self.params.controlplane_unblock_rate) {
                topology.unblock_connection(dpid, cid);
                round.events.push(InputEvent::ControlChannelUnblock { dpid, cid });
            }
        }
    }

    /// Step 3: pending controller-bound message release. No-op here; see
    /// module docs.
    fn check_message_receipts(&self, _rng: &mut SmallRng, _round: &mut FuzzRound) {
        let _ = self.params.ofp_message_receipt_rate;
    }

    /// Rolls `switch_failure_rate` independently for each live switch, then
    /// `switch_recovery_rate` independently for each failed switch that did
    /// not fail this round (`spec.md` §4.E.4, the one-state-change-per-
    /// entity-per-round invariant: a switch can never fail and recover in
    /// the same round). `min_live_count` stops the failure pass from
    /// bringing the network down entirely.
    fn check_switch_crashes(&self, rng: &mut SmallRng, topology: &mut dyn TopologyView, round: &mut FuzzRound) {
        let mut failed_this_round: HashSet<u64> = HashSet::new();
        for dpid in topology.live_switches() {
            if topology.live_switches().len() <= self.params.min_live_count as usize {
                break;
            }
            if rng.gen_bool(self.params.switch_failure_rate) {
                topology.crash_switch(dpid);
                failed_this_round.insert(dpid);
                round.events.push(InputEvent::SwitchFailure { dpid });
            }
        }
        for dpid in topology.failed_switches() {
            if failed_this_round.contains(&dpid) {
                continue;
            }
            if rng.gen_bool(self.params.switch_recovery_rate) {
                topology.recover_switch(dpid);
                round.events.push(InputEvent::SwitchRecovery { dpid });
            }
        }
    }

    /// Symmetric to [`Self::check_switch_crashes`] for links (`spec.md`
    /// §4.E.5).
    fn check_link_failures(&self, rng: &mut SmallRng, topology: &mut dyn TopologyView, round: &mut FuzzRound) {
        let mut cut_this_round: HashSet<LinkId> = HashSet::new();
        for link in topology.live_links() {
            if rng.gen_bool(self.params.link_failure_rate) {
                topology.sever_link(link);
                cut_this_round.insert(link);
                round.events.push(InputEvent::LinkFailure { link });
            }
        }
        for link in topology.cut_links() {
            if cut_this_round.contains(&link) {
                continue;
            }
            if rng.gen_bool(self.params.link_recovery_rate) {
                topology.repair_link(link);
                round.events.push(InputEvent::LinkRecovery { link });
            }
        }
    }

    /// Step 6: "if no dataplane trace is configured, for each host sample
    /// `traffic_generation_rate` and synthesize a packet" (`spec.md`
    /// §4.E.6). This crate never configures a dataplane trace (that lives
    /// entirely on the far side of the `Simulation` collaborator), so the
    /// per-host sampling always applies.
    fn fuzz_traffic(&self, rng: &mut SmallRng, topology: &mut dyn TopologyView, round: &mut FuzzRound) {
        for _host in topology.hosts() {
            if rng.gen_bool(self.params.traffic_generation_rate) {
                round.events.push(InputEvent::TrafficInjection { dp_event: None });
            }
        }
    }

    /// Symmetric to [`Self::check_switch_crashes`] for controllers
    /// (`spec.md` §4.E.7): rolls `controller_failure_rate` per live
    /// controller, respecting `min_live_count`, then
    /// `controller_recovery_rate` per controller that did not fail this
    /// round.
    fn check_controllers(&self, rng: &mut SmallRng, topology: &mut dyn TopologyView, round: &mut FuzzRound) {
        let mut failed_this_round: HashSet<u64> = HashSet::new();
        for cid in topology.live_controllers() {
            if topology.live_controllers().len() <= self.params.min_live_count as usize {
                break;
            }
            if rng.gen_bool(self.params.controller_failure_rate) {
                topology.crash_controller(cid);
                failed_this_round.insert(cid);
                round.events.push(self.controller_failure_event(cid));
            }
        }
        for cid in topology.failed_controllers() {
            if failed_this_round.contains(&cid) {
                continue;
            }
            if rng.gen_bool(self.params.controller_recovery_rate) {
                topology.recover_controller(cid);
                round.events.push(self.controller_recovery_event(cid));
            }
        }
    }

    /// Step 8: for each access link, with probability `host_migration_rate`
    /// pick a uniformly random live edge switch, assign the next free port
    /// number on it, and migrate (`spec.md` §4.E.8).
    fn check_migrations(&mut self, rng: &mut SmallRng, topology: &mut dyn TopologyView, round: &mut FuzzRound) {
        let edge_switches = topology.live_edge_switches();
        if edge_switches.is_empty() {
            return;
        }
        for link in topology.access_links() {
            if !rng.gen_bool(self.params.host_migration_rate) {
                continue;
            }
            let new_dpid = edge_switches[rng.gen_range(0..edge_switches.len())];
            let new_port = self.allocate_port(new_dpid);
            if (new_dpid, new_port) == (link.dst_dpid, link.dst_port) {
                continue;
            }
            topology.migrate_host((link.src_dpid, link.src_port), (new_dpid, new_port));
            round.events.push(InputEvent::HostMigration {
                old_dpid: link.src_dpid,
                old_port: link.src_port,
                new_dpid,
                new_port,
            });
        }
    }

    /// Hands out the next free port on `dpid`, tracked locally since
    /// `TopologyView` does not expose per-switch port allocation state.
    fn allocate_port(&mut self, dpid: u64) -> u16 {
        let next = self.next_port.entry(dpid).or_insert(1);
        let port = *next;
        *next += 1;
        port
    }

    /// Builds a controller-failure input event for `cid`, shared by
    /// [`Self::check_controllers`] and any caller driving controller
    /// liveness outside the per-round dice roll.
    pub fn controller_failure_event(&self, cid: u64) -> InputEvent {
        InputEvent::ControllerFailure { cid }
    }

    pub fn controller_recovery_event(&self, cid: u64) -> InputEvent {
        InputEvent::ControllerRecovery { cid }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::fake::FakeSimulation;
    use rand::SeedableRng;

    #[test]
    fn same_seed_produces_same_round() {
        let params = FuzzerParams {
            switch_failure_rate: 1.0,
            ..FuzzerParams::default()
        };
        let mut fuzzer_a = Fuzzer::new(params);
        let mut fuzzer_b = Fuzzer::new(params);

        let mut sim_a = FakeSimulation::new(4);
        let mut rng_a = SmallRng::seed_from_u64(42);
        let round_a = fuzzer_a.trigger_events(&mut rng_a, sim_a.topology());

        let mut sim_b = FakeSimulation::new(4);
        let mut rng_b = SmallRng::seed_from_u64(42);
        let round_b = fuzzer_b.trigger_events(&mut rng_b, sim_b.topology());

        assert_eq!(round_a.events, round_b.events);
    }

    #[test]
    fn switch_cannot_fail_and_recover_in_same_round() {
        let params = FuzzerParams {
            switch_failure_rate: 1.0,
            switch_recovery_rate: 1.0,
            min_live_count: 0,
            ..FuzzerParams::default()
        };
        let mut fuzzer = Fuzzer::new(params);
        let mut sim = FakeSimulation::new(3);
        let mut rng = SmallRng::seed_from_u64(5);
        let round = fuzzer.trigger_events(&mut rng, sim.topology());

        let mut failed_and_recovered = HashSet::new();
        let mut seen = HashSet::new();
        for event in &round.events {
            match event {
                InputEvent::SwitchFailure { dpid } => {
                    seen.insert(*dpid);
                }
                InputEvent::SwitchRecovery { dpid } => {
                    if seen.contains(dpid) {
                        failed_and_recovered.insert(*dpid);
                    }
                }
                _ => {}
            }
        }
        assert!(
            failed_and_recovered.is_empty(),
            "switches failed and recovered in the same round: {failed_and_recovered:?}"
        );
    }

    #[test]
    fn never_fails_last_live_switch() {
        let params = FuzzerParams {
            switch_failure_rate: 1.0,
            min_live_count: 1,
            ..FuzzerParams::default()
        };
        let mut fuzzer = Fuzzer::new(params);
        let mut sim = FakeSimulation::new(1);
        let mut rng = SmallRng::seed_from_u64(7);
        fuzzer.trigger_events(&mut rng, sim.topology());
        assert_eq!(sim.topology().live_switches().len(), 1);
    }

    #[test]
    fn blocks_live_control_channel() {
        let params = FuzzerParams {
            controlplane_block_rate: 1.0,
            switch_failure_rate: 0.0,
            link_failure_rate: 0.0,
            host_migration_rate: 0.0,
            traffic_generation_rate: 0.0,
            ..FuzzerParams::default()
        };
        let mut fuzzer = Fuzzer::new(params);
        let mut sim = FakeSimulation::new(1);
        sim.topology.channels.push((1, 1));
        let mut rng = SmallRng::seed_from_u64(9);
        let round = fuzzer.trigger_events(&mut rng, sim.topology());
        assert_eq!(round.events, vec![InputEvent::ControlChannelBlock { dpid: 1, cid: 1 }]);
        assert_eq!(sim.topology().blocked_channels(), vec![(1, 1)]);
    }

    #[test]
    fn channel_cannot_block_and_unblock_in_same_round() {
        let params = FuzzerParams {
            controlplane_block_rate: 1.0,
            controlplane_unblock_rate: 1.0,
            switch_failure_rate: 0.0,
            link_failure_rate: 0.0,
            host_migration_rate: 0.0,
            traffic_generation_rate: 0.0,
            ..FuzzerParams::default()
        };
        let mut fuzzer = Fuzzer::new(params);
        let mut sim = FakeSimulation::new(1);
        sim.topology.channels.push((1, 1));
        let mut rng = SmallRng::seed_from_u64(13);
        let round = fuzzer.trigger_events(&mut rng, sim.topology());
        assert_eq!(round.events, vec![InputEvent::ControlChannelBlock { dpid: 1, cid: 1 }]);
    }

    #[test]
    fn never_crashes_last_live_controller() {
        let params = FuzzerParams {
            controller_failure_rate: 1.0,
            min_live_count: 1,
            switch_failure_rate: 0.0,
            link_failure_rate: 0.0,
            host_migration_rate: 0.0,
            traffic_generation_rate: 0.0,
            ..FuzzerParams::default()
        };
        let mut fuzzer = Fuzzer::new(params);
        let mut sim = FakeSimulation::new(1);
        sim.topology.controllers = vec![1];
        let mut rng = SmallRng::seed_from_u64(17);
        fuzzer.trigger_events(&mut rng, sim.topology());
        assert_eq!(sim.topology().live_controllers().len(), 1);
    }

    #[test]
    fn migrates_host_to_live_edge_switch_with_fresh_port() {
        let params = FuzzerParams {
            host_migration_rate: 1.0,
            switch_failure_rate: 0.0,
            switch_recovery_rate: 0.0,
            link_failure_rate: 0.0,
            link_recovery_rate: 0.0,
            traffic_generation_rate: 0.0,
            ..FuzzerParams::default()
        };
        let mut fuzzer = Fuzzer::new(params);
        let mut sim = FakeSimulation::new(3);
        sim.topology.links.push(crate::event::LinkId {
            src_dpid: 9,
            src_port: 1,
            dst_dpid: 0,
            dst_port: 1,
        });
        let mut rng = SmallRng::seed_from_u64(3);
        let round = fuzzer.trigger_events(&mut rng, sim.topology());
        assert_eq!(round.events.len(), 1);
        assert!(matches!(round.events[0], InputEvent::HostMigration { .. }));
    }

    #[test]
    fn generates_traffic_per_host_independently() {
        let params = FuzzerParams {
            traffic_generation_rate: 1.0,
            switch_failure_rate: 0.0,
            link_failure_rate: 0.0,
            host_migration_rate: 0.0,
            ..FuzzerParams::default()
        };
        let mut fuzzer = Fuzzer::new(params);
        let mut sim = FakeSimulation::new(2);
        sim.topology.hosts = vec![1, 2, 3];
        let mut rng = SmallRng::seed_from_u64(11);
        let round = fuzzer.trigger_events(&mut rng, sim.topology());
        let traffic_events = round
            .events
            .iter()
            .filter(|e| matches!(e, InputEvent::TrafficInjection { .. }))
            .count();
        assert_eq!(traffic_events, 3);
    }
}
