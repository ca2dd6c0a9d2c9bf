//! Delta-debugging driver: shrinks a failure-reproducing trace to a
//! minimal causal sequence (`spec.md` §4.G).
//!
//! [`DeltaDebugger::minimize`] implements the canonical `ddmin` algorithm
//! (Zeller & Hildebrandt, TSE 2002 §3.2): repeatedly test whether the bug
//! still reproduces with only one chunk of the current atom set present,
//! or with one chunk removed, doubling the chunk count only once neither
//! narrowing move succeeds. [`DeltaDebugger::minimize_efficient`]
//! implements the O(n) "carryover" variant, which remembers which chunks
//! were already ruled out as individually irrelevant instead of re-testing
//! them from scratch on every round.
//!
//! Every trial's reproduced/not-reproduced result is cached by the exact
//! set of atom labels tested, since `ddmin` frequently repeats a subset it
//! has already seen (particularly the complement tests in the later
//! low-`n` rounds).

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::dag::{Atom, EventDag, complement, split_list};
use crate::error::StsError;
use crate::stats::{ClientDict, RuntimeStats};

/// What a single trial reported back, independent of how it was actually
/// executed (in-process or via [`crate::trial`]'s subprocess isolation).
pub struct TrialOutcome {
    pub reproduced: bool,
    pub timed_out_labels: HashSet<String>,
    pub stats: ClientDict,
}

pub trait TrialRunner {
    /// Runs one trial with only the atoms in `kept` present (everything
    /// else pruned) and reports whether the target bug reproduced.
    fn run_trial(&mut self, dag: &EventDag, kept: &[Atom]) -> Result<TrialOutcome, StsError>;
}

#[derive(Debug, Clone)]
pub struct MinimizationResult {
    pub minimal: Vec<Atom>,
    pub trials_run: u64,
    pub cache_hits: u64,
}

fn cache_key(atoms: &[Atom]) -> Vec<String> {
    let mut labels: Vec<String> = atoms.iter().flat_map(|a| a.labels().into_iter().map(str::to_string)).collect();
    labels.sort();
    labels
}

/// Runs `atoms` (the full, unpruned set) through `runner` up to
/// `1 + retries` times, stopping as soon as one attempt reproduces the
/// target bug (`spec.md` §4.G, §7: `BugNotReproducible` on this initial
/// pass is fatal; a negative result during `ddmin` itself is not).
pub fn verify_reproducible(
    dag: &EventDag,
    atoms: &[Atom],
    runner: &mut dyn TrialRunner,
    retries: u32,
) -> Result<bool, StsError> {
    for attempt in 0..=retries {
        match runner.run_trial(dag, atoms) {
            Ok(outcome) if outcome.reproduced => return Ok(true),
            Ok(_) => info!(attempt, "reproducibility pass did not reproduce the bug"),
            Err(e) => info!(attempt, error = %e, "reproducibility trial crashed"),
        }
    }
    Ok(false)
}

pub struct DeltaDebugger {
    cache: HashMap<Vec<String>, bool>,
    pub stats: RuntimeStats,
    max_consecutive_crashes: u64,
}

impl DeltaDebugger {
    pub fn new(total_inputs: u64, max_consecutive_crashes: u64) -> Self {
        Self {
            cache: HashMap::new(),
            stats: RuntimeStats::new(total_inputs),
            max_consecutive_crashes,
        }
    }

    /// Tests `subset` against the cache first, running a trial only on a
    /// miss. Returns whether the bug reproduced with exactly this atom
    /// set present.
    fn test(
        &mut self,
        dag: &EventDag,
        subset: &[Atom],
        runner: &mut dyn TrialRunner,
        trials_run: &mut u64,
        cache_hits: &mut u64,
        consecutive_crashes: &mut u64,
    ) -> Result<bool, StsError> {
        let key = cache_key(subset);
        if let Some(&result) = self.cache.get(&key) {
            *cache_hits += 1;
            return Ok(result);
        }
        if subset.is_empty() {
            self.cache.insert(key, false);
            return Ok(false);
        }

        let outcome = match runner.run_trial(dag, subset) {
            Ok(outcome) => {
                *consecutive_crashes = 0;
                outcome
            }
            Err(StsError::SubprocessCrash { .. }) => {
                *consecutive_crashes += 1;
                self.stats.record_crash();
                if *consecutive_crashes >= self.max_consecutive_crashes {
                    return Err(StsError::TooManyCrashes {
                        count: *consecutive_crashes,
                    });
                }
                self.cache.insert(key, false);
                return Ok(false);
            }
            Err(other) => return Err(other),
        };

        *trials_run += 1;
        self.stats.merge_client_dict(&outcome.stats, *trials_run, subset.len());
        self.cache.insert(key, outcome.reproduced);
        Ok(outcome.reproduced)
    }

    /// Canonical `ddmin`: narrows `atoms` to the smallest subset that still
    /// reproduces the bug, assuming `atoms` itself already reproduces it.
    pub fn minimize(
        &mut self,
        dag: &EventDag,
        atoms: Vec<Atom>,
        runner: &mut dyn TrialRunner,
    ) -> Result<MinimizationResult, StsError> {
        let mut c = atoms;
        let mut n = 2usize;
        let mut trials_run = 0u64;
        let mut cache_hits = 0u64;
        let mut consecutive_crashes = 0u64;

        loop {
            self.stats.record_round();
            if c.len() <= 1 {
                break;
            }
            let chunks = split_list(&c, n);

            let mut narrowed = false;
            for chunk in &chunks {
                if chunk.len() == c.len() {
                    continue;
                }
                if self.test(dag, chunk, runner, &mut trials_run, &mut cache_hits, &mut consecutive_crashes)? {
                    info!(size = chunk.len(), "ddmin: subset reproduces, narrowing");
                    c = chunk.clone();
                    n = 2;
                    narrowed = true;
                    break;
                }
            }
            if narrowed {
                continue;
            }

            for chunk in &chunks {
                let comp = complement(&c, chunk);
                if comp.is_empty() || comp.len() == c.len() {
                    continue;
                }
                if self.test(dag, &comp, runner, &mut trials_run, &mut cache_hits, &mut consecutive_crashes)? {
                    info!(size = comp.len(), "ddmin: complement reproduces, narrowing");
                    c = comp;
                    n = (n.saturating_sub(1)).max(2);
                    narrowed = true;
                    break;
                }
            }
            if narrowed {
                continue;
            }

            if n >= c.len() {
                break;
            }
            n = (n * 2).min(c.len());
        }

        Ok(MinimizationResult {
            minimal: c,
            trials_run,
            cache_hits,
        })
    }

    /// The O(n) carryover variant: a chunk ruled out as individually
    /// irrelevant (its complement still reproduces) is remembered and
    /// excluded from consideration in later rounds rather than re-tested,
    /// since removing an already-irrelevant atom again cannot un-reproduce
    /// the bug.
    pub fn minimize_efficient(
        &mut self,
        dag: &EventDag,
        atoms: Vec<Atom>,
        runner: &mut dyn TrialRunner,
    ) -> Result<MinimizationResult, StsError> {
        let mut c = atoms;
        let mut n = 2usize;
        let mut trials_run = 0u64;
        let mut cache_hits = 0u64;
        let mut consecutive_crashes = 0u64;
        let mut carryover: Vec<Atom> = Vec::new();

        loop {
            self.stats.record_round();
            if c.len() <= 1 {
                break;
            }
            let chunks = split_list(&c, n);
            let mut narrowed = false;

            for (i, chunk) in chunks.iter().enumerate() {
                let mut candidate = carryover.clone();
                candidate.extend(complement(&c, chunk).into_iter());
                if candidate.len() == c.len() || candidate.is_empty() {
                    continue;
                }
                if self.test(dag, &candidate, runner, &mut trials_run, &mut cache_hits, &mut consecutive_crashes)? {
                    info!(removed = chunk.len(), "efficient ddmin: chunk irrelevant, carrying over");
                    c = candidate;
                    n = (n.saturating_sub(1)).max(2);
                    narrowed = true;
                    break;
                }
                let _ = i;
            }
            if narrowed {
                continue;
            }

            carryover.clear();
            if n >= c.len() {
                break;
            }
            n = (n * 2).min(c.len());
        }

        Ok(MinimizationResult {
            minimal: c,
            trials_run,
            cache_hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventKind, InputEvent, LogicalTime};

    /// A trial runner whose ground truth is "reproduces iff every label in
    /// `required` is present in `kept`" — a minimal test double for the
    /// shrink-monotonicity property.
    struct FixedBugRunner {
        required: HashSet<String>,
    }

    impl TrialRunner for FixedBugRunner {
        fn run_trial(&mut self, _dag: &EventDag, kept: &[Atom]) -> Result<TrialOutcome, StsError> {
            let kept_labels: HashSet<String> = kept.iter().flat_map(|a| a.labels().into_iter().map(str::to_string)).collect();
            let reproduced = self.required.is_subset(&kept_labels);
            Ok(TrialOutcome {
                reproduced,
                timed_out_labels: HashSet::new(),
                stats: ClientDict::default(),
            })
        }
    }

    fn atoms(labels: &[&str]) -> Vec<Atom> {
        labels.iter().map(|l| Atom::Single((*l).to_string())).collect()
    }

    fn dummy_dag() -> EventDag {
        EventDag::new(vec![Event::new(
            "d0",
            LogicalTime::new(0, 0),
            EventKind::Input(InputEvent::SwitchFailure { dpid: 0 }),
        )])
    }

    #[test]
    fn ddmin_shrinks_to_exact_required_set() {
        let mut debugger = DeltaDebugger::new(6, 4);
        let mut runner = FixedBugRunner {
            required: ["e1", "e4"].iter().map(|s| s.to_string()).collect(),
        };
        let all = atoms(&["e0", "e1", "e2", "e3", "e4", "e5"]);
        let dag = dummy_dag();
        let result = debugger.minimize(&dag, all, &mut runner).unwrap();
        let labels: HashSet<String> = result.minimal.iter().flat_map(|a| a.labels().into_iter().map(str::to_string)).collect();
        assert_eq!(labels, runner.required);
    }

    #[test]
    fn efficient_ddmin_shrinks_to_exact_required_set() {
        let mut debugger = DeltaDebugger::new(6, 4);
        let mut runner = FixedBugRunner {
            required: ["e2"].iter().map(|s| s.to_string()).collect(),
        };
        let all = atoms(&["e0", "e1", "e2", "e3", "e4", "e5"]);
        let dag = dummy_dag();
        let result = debugger.minimize_efficient(&dag, all, &mut runner).unwrap();
        let labels: HashSet<String> = result.minimal.iter().flat_map(|a| a.labels().into_iter().map(str::to_string)).collect();
        assert_eq!(labels, runner.required);
    }

    #[test]
    fn cache_avoids_rerunning_identical_subset() {
        let mut debugger = DeltaDebugger::new(2, 4);
        let dag = dummy_dag();
        let mut runner = FixedBugRunner {
            required: ["e0"].iter().map(|s| s.to_string()).collect(),
        };
        let subset = atoms(&["e0"]);
        let mut trials = 0;
        let mut hits = 0;
        let mut crashes = 0;
        debugger.test(&dag, &subset, &mut runner, &mut trials, &mut hits, &mut crashes).unwrap();
        debugger.test(&dag, &subset, &mut runner, &mut trials, &mut hits, &mut crashes).unwrap();
        assert_eq!(trials, 1);
        assert_eq!(hits, 1);
    }

    #[test]
    fn gives_up_after_too_many_crashes() {
        struct AlwaysCrashes;
        impl TrialRunner for AlwaysCrashes {
            fn run_trial(&mut self, _dag: &EventDag, _kept: &[Atom]) -> Result<TrialOutcome, StsError> {
                Err(StsError::SubprocessCrash {
                    subsequence_id: 0,
                    reason: "boom".into(),
                })
            }
        }
        let mut debugger = DeltaDebugger::new(4, 2);
        let dag = dummy_dag();
        let all = atoms(&["e0", "e1", "e2", "e3"]);
        let result = debugger.minimize(&dag, all, &mut AlwaysCrashes);
        assert!(matches!(result, Err(StsError::TooManyCrashes { .. })));
    }
}
