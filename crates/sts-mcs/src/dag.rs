//! The event DAG and the pure list-manipulation helpers the delta debugger
//! prunes with (`spec.md` §3 "Event DAG", §4.A, §4.G).
//!
//! The DAG here is a simplified causal structure: a linear sequence of
//! events in log order, annotated with which input events are still "live"
//! (not yet pruned) and which atomic groups they belong to. This mirrors
//! the original implementation's treatment of the trace as an ordered list
//! with a parallel "already pruned" bitmap rather than a full dependency
//! graph — `spec.md` explicitly scopes out general causal-dependency
//! tracking beyond atomic pairing.

use std::collections::HashSet;

use crate::event::{Event, EventKind, Fingerprint, InputEvent};

/// An atomic unit of pruning: either a single input event, or a
/// failure/recovery (or block/unblock) pair that must be pruned or kept
/// together (`spec.md` §4.A invariant 4).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Atom {
    Single(String),
    Pair(String, String),
}

impl Atom {
    pub fn labels(&self) -> Vec<&str> {
        match self {
            Atom::Single(a) => vec![a.as_str()],
            Atom::Pair(a, b) => vec![a.as_str(), b.as_str()],
        }
    }
}

/// An ordered trace plus the set of labels currently pruned out.
#[derive(Debug, Clone)]
pub struct EventDag {
    events: Vec<Event>,
    pruned: HashSet<String>,
}

impl EventDag {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            pruned: HashSet::new(),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn is_pruned(&self, label: &str) -> bool {
        self.pruned.contains(label)
    }

    /// All input events not yet pruned, in log order.
    pub fn live_input_events(&self) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.is_input() && !self.pruned.contains(&e.label))
            .collect()
    }

    /// All events (input and internal) not yet pruned, in log order. This
    /// is the sequence handed to the replay engine for a trial.
    pub fn live_events(&self) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| !self.pruned.contains(&e.label))
            .collect()
    }

    /// Groups the live input events into atoms: Failure/Recovery (and
    /// Block/Unblock) pairs addressing the same target collapse into one
    /// [`Atom::Pair`]; everything else is an [`Atom::Single`].
    ///
    /// Pairing is matched on event class plus target identity (dpid, cid,
    /// or link endpoints), not on adjacency in the log — a recovery may be
    /// separated from its failure by unrelated internal events.
    pub fn atomic_input_events(&self) -> Vec<Atom> {
        let live = self.live_input_events();
        let mut consumed: HashSet<&str> = HashSet::new();
        let mut atoms = Vec::new();

        for event in &live {
            if consumed.contains(event.label.as_str()) {
                continue;
            }
            let partner = pairing_key(event.as_input().unwrap())
                .and_then(|key| find_partner(&live, event.label.as_str(), &key));

            match partner {
                Some(partner_label) => {
                    consumed.insert(event.label.as_str());
                    consumed.insert(partner_label);
                    atoms.push(Atom::Pair(event.label.clone(), partner_label.to_string()));
                }
                None => {
                    consumed.insert(event.label.as_str());
                    atoms.push(Atom::Single(event.label.clone()));
                }
            }
        }
        atoms
    }

    /// Marks every label in `atoms` as pruned.
    pub fn prune_atoms(&mut self, atoms: &[Atom]) {
        for atom in atoms {
            for label in atom.labels() {
                self.pruned.insert(label.to_string());
            }
        }
    }

    /// Returns a clone with `atoms` pruned, leaving `self` untouched.
    pub fn with_atoms_pruned(&self, atoms: &[Atom]) -> Self {
        let mut clone = self.clone();
        clone.prune_atoms(atoms);
        clone
    }

    /// Marks input events unsupported by the replay engine as permanently
    /// pruned (`spec.md` §4.A "unsupported input filtering"): currently,
    /// any [`InputEvent::PolicyChange`] with an empty detail map, which
    /// carries no replayable payload.
    pub fn filter_unsupported_input_types(&mut self) {
        let unsupported: Vec<String> = self
            .events
            .iter()
            .filter(|e| {
                matches!(
                    e.as_input(),
                    Some(InputEvent::PolicyChange { detail }) if detail.is_empty()
                )
            })
            .map(|e| e.label.clone())
            .collect();
        for label in unsupported {
            self.pruned.insert(label);
        }
    }

    /// Marks events timed out during the last replay trial so they are
    /// excluded from interpolated-time matching on the next one
    /// (`spec.md` §4.C).
    pub fn set_events_as_timed_out(&mut self, labels: &HashSet<String>) {
        for event in &mut self.events {
            if labels.contains(&event.label) {
                event.timed_out = true;
            }
        }
    }

    /// Drops already-pruned labels from a timed-out-label set returned by a
    /// trial, since a label can only time out if its event was actually
    /// scheduled.
    pub fn filter_timeouts(&self, labels: HashSet<String>) -> HashSet<String> {
        labels
            .into_iter()
            .filter(|l| !self.pruned.contains(l))
            .collect()
    }

    /// The last internal event in the live sequence reporting an invariant
    /// violation, if any (`spec.md` §4.F).
    pub fn get_last_invariant_violation(&self) -> Option<&Event> {
        self.live_events()
            .into_iter()
            .rev()
            .find(|e| matches!(e.as_internal(), Some(crate::event::InternalEvent::InvariantViolation { .. })))
    }

    /// The bug-signature fingerprint set of the last invariant violation,
    /// used to decide whether a trial reproduced the target bug.
    pub fn last_violation_fingerprints(&self) -> HashSet<Fingerprint> {
        self.last_violation_list().into_iter().collect()
    }

    /// The last invariant violation's fingerprint list, in the order the
    /// oracle returned them, so a single bug signature can be picked out of
    /// it by index (`spec.md` §3 "Bug signature": "one element... chosen by
    /// the user when the trace ended in multiple violations").
    pub fn last_violation_list(&self) -> Vec<Fingerprint> {
        match self.get_last_invariant_violation().map(|e| e.kind.clone()) {
            Some(EventKind::Internal(crate::event::InternalEvent::InvariantViolation { violations })) => violations,
            _ => Vec::new(),
        }
    }

    /// The `index`-th fingerprint of the last invariant violation, the bug
    /// signature a trial must reproduce (`spec.md` §3 "Bug signature").
    pub fn bug_signature(&self, index: usize) -> Option<Fingerprint> {
        self.last_violation_list().into_iter().nth(index)
    }

    /// Drops any live recovery-class input (`SwitchRecovery`,
    /// `ControllerRecovery`, `LinkRecovery`, `ControlChannelUnblock`) whose
    /// matching failure/block predecessor is not itself live earlier in the
    /// log (`spec.md` §4.A invariant 4: "an input whose required
    /// predecessor was dropped is itself dropped").
    ///
    /// `atomic_input_events` already keeps a failure and its recovery
    /// together when both survive pruning as a single `Atom::Pair`, but that
    /// only covers the case where both halves are still present in the
    /// trace to be paired. A recovery can still end up live and orphaned —
    /// e.g. once [`Self::filter_unsupported_input_types`] or a `Peeker`
    /// rewrite removes its failure but leaves the recovery in place — and
    /// such an orphan would otherwise survive as a lone `Atom::Single`.
    pub fn mark_invalid_input_sequences(&mut self) {
        let mut to_prune = Vec::new();
        for (idx, event) in self.events.iter().enumerate() {
            if self.pruned.contains(&event.label) {
                continue;
            }
            let Some(input) = event.as_input() else {
                continue;
            };
            if !is_recovery_class(input) {
                continue;
            }
            let Some(key) = pairing_key(input) else {
                continue;
            };
            let has_live_predecessor = self.events[..idx].iter().any(|prior| {
                !self.pruned.contains(&prior.label)
                    && prior.as_input().is_some_and(|prior_input| {
                        !is_recovery_class(prior_input) && pairing_key(prior_input) == Some(key)
                    })
            });
            if !has_live_predecessor {
                to_prune.push(event.label.clone());
            }
        }
        for label in to_prune {
            self.pruned.insert(label);
        }
    }

    /// True if every atom has at least one remaining live label to prune
    /// (used to skip already-fully-pruned subsets without a trial).
    pub fn has_any_live(&self, atoms: &[Atom]) -> bool {
        atoms
            .iter()
            .any(|atom| atom.labels().iter().any(|l| !self.pruned.contains(*l)))
    }
}

fn pairing_key(event: &InputEvent) -> Option<(&'static str, u64, u64)> {
    match event {
        InputEvent::SwitchFailure { dpid } | InputEvent::SwitchRecovery { dpid } => {
            Some(("switch", *dpid, 0))
        }
        InputEvent::ControllerFailure { cid } | InputEvent::ControllerRecovery { cid } => {
            Some(("controller", *cid, 0))
        }
        InputEvent::LinkFailure { link } | InputEvent::LinkRecovery { link } => {
            Some(("link", link.src_dpid, u64::from(link.src_port) << 32 | u64::from(link.dst_port)))
        }
        InputEvent::ControlChannelBlock { dpid, cid }
        | InputEvent::ControlChannelUnblock { dpid, cid } => Some(("channel", *dpid, *cid)),
        _ => None,
    }
}

fn is_recovery_class(event: &InputEvent) -> bool {
    matches!(
        event,
        InputEvent::SwitchRecovery { .. }
            | InputEvent::ControllerRecovery { .. }
            | InputEvent::LinkRecovery { .. }
            | InputEvent::ControlChannelUnblock { .. }
    )
}

fn find_partner<'a>(live: &[&'a Event], own_label: &str, key: &(&'static str, u64, u64)) -> Option<&'a str> {
    let own = live.iter().find(|e| e.label == own_label)?;
    let own_is_recovery = is_recovery_class(own.as_input().unwrap());
    live.iter()
        .find(|e| {
            e.label != own_label
                && e.as_input()
                    .and_then(pairing_key)
                    .is_some_and(|k| &k == key)
                && is_recovery_class(e.as_input().unwrap()) != own_is_recovery
        })
        .map(|e| e.label.as_str())
}

/// A pluggable rewriter applied to the DAG once before minimization begins.
/// `spec.md` §9 references the original implementation's `Peeker`
/// transformer without specifying its behavior ("do not guess"); this
/// crate treats it as an optional hook defaulting to the identity
/// transform, per that ambiguity's documented resolution.
pub type Peeker = Box<dyn Fn(EventDag) -> EventDag>;

/// Applies `peeker` to `dag` if one was supplied, otherwise returns `dag`
/// unchanged.
pub fn apply_peeker(dag: EventDag, peeker: Option<&Peeker>) -> EventDag {
    match peeker {
        Some(rewrite) => rewrite(dag),
        None => dag,
    }
}

/// Splits `atoms` into `n` contiguous chunks of as-equal-as-possible size.
///
/// Per `spec.md` §4.G: if `n` exceeds the number of atoms, each atom
/// becomes its own one-element chunk rather than producing empty chunks.
pub fn split_list<T: Clone>(items: &[T], n: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    if n == 0 {
        return vec![items.to_vec()];
    }
    if n >= items.len() {
        return items.iter().map(|i| vec![i.clone()]).collect();
    }
    let base = items.len() / n;
    let remainder = items.len() % n;
    let mut chunks = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let size = base + usize::from(i < remainder);
        chunks.push(items[start..start + size].to_vec());
        start += size;
    }
    chunks
}

/// The complement of `chunk` within `items`, preserving original order.
pub fn complement<T: Clone + PartialEq>(items: &[T], chunk: &[T]) -> Vec<T> {
    items.iter().filter(|i| !chunk.contains(i)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventKind, InputEvent, LogicalTime};

    fn switch_failure(label: &str, dpid: u64) -> Event {
        Event::new(label, LogicalTime::new(0, 0), EventKind::Input(InputEvent::SwitchFailure { dpid }))
    }
    fn switch_recovery(label: &str, dpid: u64) -> Event {
        Event::new(label, LogicalTime::new(0, 0), EventKind::Input(InputEvent::SwitchRecovery { dpid }))
    }

    #[test]
    fn pairs_failure_and_recovery_for_same_target() {
        let dag = EventDag::new(vec![switch_failure("e0", 1), switch_recovery("e1", 1)]);
        let atoms = dag.atomic_input_events();
        assert_eq!(atoms, vec![Atom::Pair("e0".into(), "e1".into())]);
    }

    #[test]
    fn does_not_pair_different_targets() {
        let dag = EventDag::new(vec![switch_failure("e0", 1), switch_failure("e1", 2)]);
        let atoms = dag.atomic_input_events();
        assert_eq!(
            atoms,
            vec![Atom::Single("e0".into()), Atom::Single("e1".into())]
        );
    }

    #[test]
    fn split_list_one_chunk_per_item_when_n_exceeds_len() {
        let items = vec![1, 2, 3];
        let chunks = split_list(&items, 10);
        assert_eq!(chunks, vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn split_list_even_division() {
        let items = vec![1, 2, 3, 4];
        let chunks = split_list(&items, 2);
        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn apply_peeker_defaults_to_identity() {
        let dag = EventDag::new(vec![switch_failure("e0", 1)]);
        let rewritten = apply_peeker(dag.clone(), None);
        assert_eq!(rewritten.events().len(), dag.events().len());
    }

    #[test]
    fn apply_peeker_runs_supplied_rewrite() {
        let dag = EventDag::new(vec![switch_failure("e0", 1), switch_failure("e1", 2)]);
        let peeker: Peeker = Box::new(|d: EventDag| {
            let mut kept = d.events().to_vec();
            kept.truncate(1);
            EventDag::new(kept)
        });
        let rewritten = apply_peeker(dag, Some(&peeker));
        assert_eq!(rewritten.events().len(), 1);
    }

    #[test]
    fn complement_preserves_order() {
        let items = vec![1, 2, 3, 4, 5];
        let chunk = vec![2, 4];
        assert_eq!(complement(&items, &chunk), vec![1, 3, 5]);
    }

    #[test]
    fn bug_signature_picks_by_index_from_last_violation() {
        use crate::event::{Event, EventKind, Fingerprint, InternalEvent};

        let violation = Event::new(
            "v0",
            LogicalTime::new(1, 0),
            EventKind::Internal(InternalEvent::InvariantViolation {
                violations: vec![
                    Fingerprint::new(serde_json::json!("A")),
                    Fingerprint::new(serde_json::json!("B")),
                ],
            }),
        );
        let dag = EventDag::new(vec![switch_failure("e0", 1), violation]);
        assert_eq!(dag.bug_signature(0), Some(Fingerprint::new(serde_json::json!("A"))));
        assert_eq!(dag.bug_signature(1), Some(Fingerprint::new(serde_json::json!("B"))));
        assert_eq!(dag.bug_signature(2), None);
    }

    #[test]
    fn orphaned_recovery_without_live_failure_is_pruned() {
        let mut dag = EventDag::new(vec![switch_failure("e0", 1), switch_recovery("e1", 1)]);
        dag.prune_atoms(&[Atom::Single("e0".into())]);
        assert!(dag.live_input_events().iter().any(|e| e.label == "e1"));
        dag.mark_invalid_input_sequences();
        assert!(dag.is_pruned("e1"));
    }

    #[test]
    fn recovery_with_live_failure_survives() {
        let mut dag = EventDag::new(vec![switch_failure("e0", 1), switch_recovery("e1", 1)]);
        dag.mark_invalid_input_sequences();
        assert!(!dag.is_pruned("e0"));
        assert!(!dag.is_pruned("e1"));
    }

    #[test]
    fn unrelated_recovery_for_different_target_is_untouched() {
        let mut dag = EventDag::new(vec![switch_failure("e0", 1), switch_recovery("e1", 2)]);
        dag.mark_invalid_input_sequences();
        assert!(!dag.is_pruned("e0"));
        assert!(dag.is_pruned("e1"));
    }

    #[test]
    fn pruning_atoms_removes_both_members_of_pair() {
        let mut dag = EventDag::new(vec![switch_failure("e0", 1), switch_recovery("e1", 1)]);
        dag.prune_atoms(&[Atom::Pair("e0".into(), "e1".into())]);
        assert!(dag.is_pruned("e0"));
        assert!(dag.is_pruned("e1"));
        assert!(dag.live_input_events().is_empty());
    }
}
