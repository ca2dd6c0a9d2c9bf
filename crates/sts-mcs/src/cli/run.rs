//! `sts run`: fuzzes a simulation for a fixed number of rounds and writes
//! every injected input event plus the eventual invariant-violation event,
//! if one occurs, to a trace log (`spec.md` §2 component B, §4.E).

use std::path::{Path, PathBuf};

use tracing::info;

use crate::adapters::rng::seeded_rng;
use crate::config::StsConfig;
use crate::event::{Event, EventKind, LogicalTime};
use crate::fuzzer::Fuzzer;
use crate::oracle::poll_invariant;
use crate::simulation::fake::{FakeInvariantChecker, FakeSimulation};
use crate::trace_log::TraceLog;

pub fn run(out: &Path, config_path: Option<&PathBuf>, rounds: u32) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => StsConfig::load(path)?,
        None => StsConfig::default(),
    };

    let mut rng = seeded_rng(config.seed);
    let halt_on_violation = config.fuzzer.halt_on_violation;
    let check_interval = config.fuzzer.check_interval;
    let mut fuzzer = Fuzzer::new(config.fuzzer);
    let mut sim = FakeSimulation::new(4);
    let checker = FakeInvariantChecker { min_failed: 2 };

    let mut events = Vec::new();
    let mut label_counter = 0u64;

    for round in 0..rounds {
        let time = LogicalTime::new(i64::from(round), 0);
        let fuzz_round = fuzzer.trigger_events(&mut rng, sim.topology());
        for input in fuzz_round.events {
            let label = format!("e{label_counter}");
            label_counter += 1;
            events.push(Event::new(label, time, EventKind::Input(input)));
        }

        let should_check = check_interval.is_some_and(|interval| interval == 0 || round % interval == 0);
        if should_check {
            if let Some(violation) = poll_invariant(&checker, &mut sim, time, format!("v{round}")) {
                events.push(violation);
                if halt_on_violation {
                    info!(round, "invariant violated, stopping fuzz run");
                    break;
                }
            }
        }
    }

    TraceLog::new(events).save(out)?;
    info!(path = %out.display(), "trace written");
    Ok(())
}
