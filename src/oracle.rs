//! Naive signature refinement, used as a test oracle
//!
//! Quadratic and allocation-happy, but small enough to trust by reading:
//! repeatedly renumber every state by its signature until the class count
//! stops growing. Branching signatures close over silent steps that stay in
//! the current class; callers feed it LTSs without inert cycles (the same
//! precondition the engine documents).

#![allow(missing_docs)]

use std::collections::BTreeMap;

use crate::lts::{LabelledTransitionSystem, LtsView, StateIdx};

/// Strong bisimulation classes by naive signature refinement.
pub(crate) fn strong_classes(lts: &LabelledTransitionSystem) -> Vec<usize> {
    signature_refinement(lts, false)
}

/// Branching bisimulation classes by naive signature refinement.
pub(crate) fn branching_classes(lts: &LabelledTransitionSystem) -> Vec<usize> {
    signature_refinement(lts, true)
}

fn signature_refinement(lts: &LabelledTransitionSystem, branching: bool) -> Vec<usize> {
    let n = lts.num_states();
    let mut classes = vec![0usize; n];
    let mut count = 1usize;
    loop {
        let mut ids: BTreeMap<Vec<(usize, usize)>, usize> = BTreeMap::new();
        let mut next = vec![0usize; n];
        for s in 0..n {
            let sig = if branching {
                branching_signature(lts, &classes, s)
            } else {
                strong_signature(lts, &classes, s)
            };
            let fresh = ids.len();
            next[s] = *ids.entry(sig).or_insert(fresh);
        }
        let new_count = ids.len();
        if new_count == count {
            return next;
        }
        count = new_count;
        classes = next;
    }
}

fn strong_signature(
    lts: &LabelledTransitionSystem,
    classes: &[usize],
    s: usize,
) -> Vec<(usize, usize)> {
    let mut sig: Vec<(usize, usize)> = lts
        .outgoing(StateIdx(s))
        .iter()
        .map(|t| (t.label.as_usize(), classes[t.to.as_usize()]))
        .collect();
    sig.sort_unstable();
    sig.dedup();
    sig
}

/// Everything reachable from `s` by silent steps inside its own class can
/// act on `s`'s behalf; silent steps that stay in the class are not part of
/// the signature.
fn branching_signature(
    lts: &LabelledTransitionSystem,
    classes: &[usize],
    s: usize,
) -> Vec<(usize, usize)> {
    let mut sig: Vec<(usize, usize)> = Vec::new();
    let mut visited = vec![false; lts.num_states()];
    let mut stack = vec![s];
    visited[s] = true;
    while let Some(u) = stack.pop() {
        for t in lts.outgoing(StateIdx(u)) {
            let to = t.to.as_usize();
            if lts.is_silent(t.label) && classes[to] == classes[s] {
                if !visited[to] {
                    visited[to] = true;
                    stack.push(to);
                }
            } else {
                sig.push((t.label.as_usize(), classes[to]));
            }
        }
    }
    sig.sort_unstable();
    sig.dedup();
    sig
}

/// Whether two class assignments induce the same partition (class numbers
/// may differ).
pub(crate) fn equal_partitions(a: &[usize], b: &[usize]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    for i in 0..a.len() {
        for j in i + 1..a.len() {
            if (a[i] == a[j]) != (b[i] == b[j]) {
                return false;
            }
        }
    }
    true
}

/// The stability property of the produced partition: within each class,
/// every bottom state offers the same non-inert `(label, class)` pairs.
pub(crate) fn is_stable_branching(lts: &LabelledTransitionSystem, classes: &[usize]) -> bool {
    let n = lts.num_states();
    let is_bottom = |s: usize| {
        lts.outgoing(StateIdx(s))
            .iter()
            .all(|t| !(lts.is_silent(t.label) && classes[t.to.as_usize()] == classes[s]))
    };
    let direct_sig = |s: usize| {
        let mut sig: Vec<(bool, usize, usize)> = lts
            .outgoing(StateIdx(s))
            .iter()
            .filter(|t| !(lts.is_silent(t.label) && classes[t.to.as_usize()] == classes[s]))
            .map(|t| {
                // Silent labels are interchangeable under branching.
                (lts.is_silent(t.label), if lts.is_silent(t.label) { 0 } else { t.label.as_usize() }, classes[t.to.as_usize()])
            })
            .collect();
        sig.sort_unstable();
        sig.dedup();
        sig
    };
    let num_classes = classes.iter().max().map_or(0, |m| m + 1);
    let mut reference: Vec<Option<Vec<(bool, usize, usize)>>> = vec![None; num_classes];
    for s in 0..n {
        if !is_bottom(s) {
            continue;
        }
        let sig = direct_sig(s);
        match &reference[classes[s]] {
            None => reference[classes[s]] = Some(sig),
            Some(want) => {
                if *want != sig {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lts::LtsBuilder;

    #[test]
    fn oracle_handles_tau_absorption() {
        let mut b = LtsBuilder::new();
        b.add(0, 0, 1).add(1, 1, 2);
        let lts = b.build(3, 0, vec![true, false]);
        let classes = branching_classes(&lts);
        assert_eq!(classes[0], classes[1]);
        assert_ne!(classes[0], classes[2]);
        let strong = strong_classes(&lts);
        assert_ne!(strong[0], strong[1]);
    }

    #[test]
    fn partition_equality_ignores_numbering() {
        assert!(equal_partitions(&[0, 0, 1], &[5, 5, 2]));
        assert!(!equal_partitions(&[0, 0, 1], &[0, 1, 1]));
    }
}
