//! `sts show`: prints a human-readable summary of a trace log — event
//! counts by class, and the bug signature if the trace ends in an
//! invariant violation.

use std::collections::BTreeMap;
use std::path::Path;

use crate::dag::EventDag;
use crate::trace_log::TraceLog;

pub fn run(trace_path: &Path) -> anyhow::Result<()> {
    let log = TraceLog::load(trace_path)?;
    let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    for event in &log.events {
        *counts.entry(event.kind.class_tag()).or_insert(0) += 1;
    }

    println!("trace: {}", trace_path.display());
    println!("events: {}", log.events.len());
    for (class, count) in &counts {
        println!("  {class}: {count}");
    }

    let dag = EventDag::new(log.events);
    match dag.get_last_invariant_violation() {
        Some(event) => {
            let fingerprints = dag.last_violation_fingerprints();
            println!("bug signature (at {}): {} fingerprint(s)", event.label, fingerprints.len());
            for fp in &fingerprints {
                println!("  {fp}");
            }
        }
        None => println!("no invariant violation recorded in this trace"),
    }

    Ok(())
}
