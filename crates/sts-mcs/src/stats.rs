//! Runtime statistics accumulated across delta-debugging trials
//! (`spec.md` §3 "Runtime stats").
//!
//! A subprocess trial (see [`crate::trial`]) accumulates its own
//! [`RuntimeStats`] and reports it back to the parent over the trial IPC
//! channel as a `client_dict`; the parent merges each child's contribution
//! into its own running total with [`RuntimeStats::merge_client_dict`].
//! This mirrors the original `RuntimeStats.client_dict`/`merge_client_dict`
//! split between fields tracked only in the parent (wall-clock totals) and
//! fields a child can usefully report (trial-scoped counters).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Counters reported by a child trial process back to the parent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ClientDict {
    pub inputs_pruned: u64,
    pub events_replayed: u64,
    pub events_timed_out: u64,
    /// Observed internal events matched against an expected one.
    pub events_matched: u64,
    /// Observed internal events with no expected counterpart, observed at
    /// or after the currently awaited event's time (`spec.md` §4.C
    /// "unexpected").
    pub events_new: u64,
    /// Observed internal events with no expected counterpart, observed
    /// before the currently awaited event's time (`spec.md` §4.C "early").
    pub events_early: u64,
    /// Expected fingerprints that had more than one outstanding candidate
    /// at the time they were armed (`spec.md` §4.C "ambiguous").
    pub events_ambiguous: u64,
    pub total_trials: u64,
    /// Wall-clock time this trial spent in the replay loop.
    pub replay_wall_clock_secs: f64,
    /// True the first time this trial's replay reproduced the target bug,
    /// so the parent can record which run first confirmed it.
    pub violation_found: bool,
}

/// Full accounting, kept only by the parent process. `total_inputs`,
/// `original_duration_secs`, and the wall-clock/iteration-size fields are
/// parent-only; everything else is additive across children via
/// [`Self::merge_client_dict`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub total_inputs: u64,
    pub inputs_pruned: u64,
    pub events_replayed: u64,
    pub events_timed_out: u64,
    pub events_matched: u64,
    pub events_new: u64,
    pub events_early: u64,
    pub events_ambiguous: u64,
    pub total_trials: u64,
    pub subprocess_crashes: u64,
    pub ddmin_rounds: u64,
    /// Wall-clock span, in seconds, of the original trace that produced the
    /// bug (its last event's logical time minus its first's).
    pub original_duration_secs: f64,
    /// Cumulative wall-clock time spent replaying trials, summed across
    /// every child's contribution.
    pub replay_wall_clock_secs: f64,
    /// Wall-clock time spent in the pruning (`ddmin`) loop itself, set once
    /// minimization finishes.
    pub prune_wall_clock_secs: f64,
    /// Size of the kept atom set tried at each subsequence id, in the order
    /// trials were actually run (cache hits do not get an id).
    pub iteration_sizes: HashMap<u64, usize>,
    /// The subsequence id of the first trial whose replay reproduced the
    /// target bug, if any.
    pub violation_found_at_run: Option<u64>,
}

impl RuntimeStats {
    pub fn new(total_inputs: u64) -> Self {
        Self {
            total_inputs,
            inputs_pruned: 0,
            events_replayed: 0,
            events_timed_out: 0,
            events_matched: 0,
            events_new: 0,
            events_early: 0,
            events_ambiguous: 0,
            total_trials: 0,
            subprocess_crashes: 0,
            ddmin_rounds: 0,
            original_duration_secs: 0.0,
            replay_wall_clock_secs: 0.0,
            prune_wall_clock_secs: 0.0,
            iteration_sizes: HashMap::new(),
            violation_found_at_run: None,
        }
    }

    /// The subset of fields a child trial process can contribute to the
    /// parent's total.
    pub fn client_dict(&self) -> ClientDict {
        ClientDict {
            inputs_pruned: self.inputs_pruned,
            events_replayed: self.events_replayed,
            events_timed_out: self.events_timed_out,
            events_matched: self.events_matched,
            events_new: self.events_new,
            events_early: self.events_early,
            events_ambiguous: self.events_ambiguous,
            total_trials: self.total_trials,
            replay_wall_clock_secs: self.replay_wall_clock_secs,
            violation_found: false,
        }
    }

    /// Folds a child's reported counters into this (parent) total.
    /// `subsequence_id` and `kept_size` record which trial this was so
    /// [`Self::iteration_sizes`] and [`Self::violation_found_at_run`] stay
    /// keyed by the same id the driver assigned the trial.
    pub fn merge_client_dict(&mut self, child: &ClientDict, subsequence_id: u64, kept_size: usize) {
        self.inputs_pruned += child.inputs_pruned;
        self.events_replayed += child.events_replayed;
        self.events_timed_out += child.events_timed_out;
        self.events_matched += child.events_matched;
        self.events_new += child.events_new;
        self.events_early += child.events_early;
        self.events_ambiguous += child.events_ambiguous;
        self.total_trials += child.total_trials;
        self.replay_wall_clock_secs += child.replay_wall_clock_secs;
        self.iteration_sizes.insert(subsequence_id, kept_size);
        if child.violation_found && self.violation_found_at_run.is_none() {
            self.violation_found_at_run = Some(subsequence_id);
        }
    }

    pub fn record_crash(&mut self) {
        self.subprocess_crashes += 1;
    }

    pub fn record_round(&mut self) {
        self.ddmin_rounds += 1;
    }

    /// Fraction of the original input events pruned so far, in `[0, 1]`.
    pub fn reduction_ratio(&self) -> f64 {
        if self.total_inputs == 0 {
            return 0.0;
        }
        self.inputs_pruned as f64 / self.total_inputs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_child_counters() {
        let mut stats = RuntimeStats::new(10);
        stats.merge_client_dict(
            &ClientDict {
                inputs_pruned: 2,
                events_replayed: 5,
                events_timed_out: 1,
                total_trials: 1,
                ..ClientDict::default()
            },
            1,
            4,
        );
        stats.merge_client_dict(
            &ClientDict {
                inputs_pruned: 1,
                events_replayed: 3,
                events_timed_out: 0,
                total_trials: 1,
                violation_found: true,
                ..ClientDict::default()
            },
            2,
            2,
        );
        assert_eq!(stats.inputs_pruned, 3);
        assert_eq!(stats.events_replayed, 8);
        assert_eq!(stats.total_trials, 2);
        assert_eq!(stats.iteration_sizes.get(&1), Some(&4));
        assert_eq!(stats.iteration_sizes.get(&2), Some(&2));
        assert_eq!(stats.violation_found_at_run, Some(2));
    }

    #[test]
    fn reduction_ratio_handles_zero_inputs() {
        let stats = RuntimeStats::new(0);
        assert_eq!(stats.reduction_ratio(), 0.0);
    }
}
