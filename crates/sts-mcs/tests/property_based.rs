//! Property-based checks for the testable invariants in `spec.md` §8:
//! shrink monotonicity and MCS locality (1-minimality), run over randomly
//! generated atom sets and required-subset oracles rather than the fixed
//! scenarios in `tests/end_to_end.rs`.

use std::collections::HashSet;

use proptest::prelude::*;

use sts_mcs::dag::{Atom, EventDag};
use sts_mcs::delta_debug::{DeltaDebugger, TrialOutcome, TrialRunner};
use sts_mcs::error::StsError;
use sts_mcs::event::{Event, EventKind, InputEvent, LogicalTime};
use sts_mcs::stats::ClientDict;

fn atoms(labels: &[&str]) -> Vec<Atom> {
    labels.iter().map(|l| Atom::Single((*l).to_string())).collect()
}

fn dummy_dag(n: usize) -> EventDag {
    let events = (0..n.max(1))
        .map(|i| {
            Event::new(
                format!("d{i}"),
                LogicalTime::new(0, 0),
                EventKind::Input(InputEvent::SwitchFailure { dpid: i as u64 }),
            )
        })
        .collect();
    EventDag::new(events)
}

/// Reproduces iff every label in `required` is present in `kept` — a
/// monotone oracle whose unique 1-minimal set is `required` itself.
struct RequiresSubset {
    required: HashSet<String>,
    /// Every distinct kept-label set this runner was ever asked about, to
    /// check cache consistency (`spec.md` §8 property 3).
    seen: Vec<HashSet<String>>,
}

impl TrialRunner for RequiresSubset {
    fn run_trial(&mut self, _dag: &EventDag, kept: &[Atom]) -> Result<TrialOutcome, StsError> {
        let kept_labels: HashSet<String> =
            kept.iter().flat_map(|a| a.labels().into_iter().map(str::to_string)).collect();
        self.seen.push(kept_labels.clone());
        Ok(TrialOutcome {
            reproduced: self.required.is_subset(&kept_labels),
            timed_out_labels: HashSet::new(),
            stats: ClientDict::default(),
        })
    }
}

proptest! {
    /// `spec.md` §8 property 2 "MCS locality": for a monotone oracle
    /// requiring a fixed subset of atoms, `ddmin` converges to exactly
    /// that subset — no smaller set reproduces (every required atom is
    /// load-bearing) and no larger one is needed (nothing extraneous
    /// survives).
    #[test]
    fn ddmin_converges_to_exact_required_subset(
        total in 1usize..12,
        required_mask in prop::collection::vec(any::<bool>(), 11),
    ) {
        let labels: Vec<String> = (0..total).map(|i| format!("d{i}")).collect();

        // At least one required label, so the oracle is satisfiable.
        let mut required: HashSet<String> = labels
            .iter()
            .zip(required_mask.iter())
            .filter(|(_, &bit)| bit)
            .map(|(l, _)| l.clone())
            .collect();
        if required.is_empty() {
            required.insert(labels[0].clone());
        }

        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let all_atoms = atoms(&label_refs);
        let dag = dummy_dag(total);

        let mut runner = RequiresSubset { required: required.clone(), seen: Vec::new() };
        let mut debugger = DeltaDebugger::new(total as u64, 4);
        let result = debugger.minimize(&dag, all_atoms, &mut runner).unwrap();

        let minimal_labels: HashSet<String> = result
            .minimal
            .iter()
            .flat_map(|a| a.labels().into_iter().map(str::to_string))
            .collect();
        prop_assert_eq!(&minimal_labels, &required);

        // Cache consistency (`spec.md` §8 property 3): no exact kept-label
        // set was ever presented to the runner twice.
        let mut dedup: HashSet<Vec<String>> = HashSet::new();
        for set in &runner.seen {
            let mut sorted: Vec<String> = set.iter().cloned().collect();
            sorted.sort();
            prop_assert!(dedup.insert(sorted), "subset {:?} tested twice", set);
        }
    }
}
