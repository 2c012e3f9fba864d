//! Labelled transition systems
//!
//! The partitioner consumes an LTS through a deliberately small surface:
//! iterate the transition list, query whether a label is silent, and — once
//! the quotient is known — replace the transition list wholesale. Everything
//! else (per-state outgoing/incoming indices, bottom-state bookkeeping) the
//! engine derives itself, so a caller owes no ordering guarantees beyond the
//! transition list being well-formed.
//!
//! [`LabelledTransitionSystem`] is the concrete in-memory form used by the
//! tests and by [`random_lts`]; [`LtsView`] is the seam for callers that keep
//! their transitions elsewhere.

#![forbid(unsafe_code)]

use rand::Rng;

/// Index of a state `s ∈ {0..n-1}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateIdx(pub usize);

impl StateIdx {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Index of a transition `t ∈ {0..m-1}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransIdx(pub usize);

impl TransIdx {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Index of an action label.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelIdx(pub usize);

impl LabelIdx {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// A single `(from, label, to)` transition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Transition {
    /// Source state.
    pub from: StateIdx,
    /// Action label.
    pub label: LabelIdx,
    /// Target state.
    pub to: StateIdx,
}

/// Read/replace access to a labelled transition system.
///
/// This is the full external surface the engine needs: state and label
/// counts, the flat transition list, the silent-label predicate, and the
/// final in-place replacement by the quotient.
pub trait LtsView {
    /// Number of states.
    fn num_states(&self) -> usize;

    /// Number of action labels.
    fn num_labels(&self) -> usize;

    /// The initial state.
    fn initial_state(&self) -> StateIdx;

    /// The flat transition list.
    fn transitions(&self) -> &[Transition];

    /// Whether `label` is a silent (τ-like) action.
    fn is_silent(&self, label: LabelIdx) -> bool;

    /// Replace this LTS by its quotient: `num_classes` states, the given
    /// transition list, and the mapped initial state. `class_of` maps every
    /// old state to its class and may be used to merge per-state payload.
    fn apply_quotient(
        &mut self,
        num_classes: usize,
        initial: StateIdx,
        transitions: Vec<Transition>,
        class_of: &dyn Fn(StateIdx) -> usize,
    );
}

/// In-memory labelled transition system.
///
/// Transitions are kept sorted by source state so that `outgoing` is a slice
/// view; an incoming index is built on demand. State labels are optional
/// payload that `apply_quotient` merges per equivalence class.
#[derive(Clone, Debug)]
pub struct LabelledTransitionSystem {
    num_states: usize,
    initial: StateIdx,
    transitions: Vec<Transition>,
    out_start: Vec<usize>,
    hidden: Vec<bool>,
    state_labels: Vec<String>,
}

impl LabelledTransitionSystem {
    /// Build an LTS from parts. `hidden[l]` marks label `l` as silent.
    /// `state_labels` is either empty or one label per state.
    pub fn new(
        num_states: usize,
        initial: StateIdx,
        mut transitions: Vec<Transition>,
        hidden: Vec<bool>,
        state_labels: Vec<String>,
    ) -> Self {
        debug_assert!(
            state_labels.is_empty() || state_labels.len() == num_states,
            "state labels must be absent or one per state"
        );
        transitions.sort_unstable();
        transitions.dedup();
        let out_start = source_index(num_states, &transitions);
        LabelledTransitionSystem {
            num_states,
            initial,
            transitions,
            out_start,
            hidden,
            state_labels,
        }
    }

    /// Outgoing transitions of `s`, as a slice.
    #[inline]
    pub fn outgoing(&self, s: StateIdx) -> &[Transition] {
        &self.transitions[self.out_start[s.0]..self.out_start[s.0 + 1]]
    }

    /// Number of transitions.
    #[inline]
    pub fn num_transitions(&self) -> usize {
        self.transitions.len()
    }

    /// Per-state labels (empty when the LTS carries no state payload).
    #[inline]
    pub fn state_labels(&self) -> &[String] {
        &self.state_labels
    }

    /// Incoming transition indices per state (built on demand; used by the
    /// naive oracle, not by the engine, which keeps its own index).
    pub fn incoming_index(&self) -> Vec<Vec<TransIdx>> {
        let mut incoming = vec![Vec::new(); self.num_states];
        for (i, t) in self.transitions.iter().enumerate() {
            incoming[t.to.0].push(TransIdx(i));
        }
        incoming
    }
}

impl LtsView for LabelledTransitionSystem {
    #[inline]
    fn num_states(&self) -> usize {
        self.num_states
    }

    #[inline]
    fn num_labels(&self) -> usize {
        self.hidden.len()
    }

    #[inline]
    fn initial_state(&self) -> StateIdx {
        self.initial
    }

    #[inline]
    fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    #[inline]
    fn is_silent(&self, label: LabelIdx) -> bool {
        self.hidden[label.0]
    }

    fn apply_quotient(
        &mut self,
        num_classes: usize,
        initial: StateIdx,
        mut transitions: Vec<Transition>,
        class_of: &dyn Fn(StateIdx) -> usize,
    ) {
        transitions.sort_unstable();
        transitions.dedup();

        // Merge state labels per class, in state order, skipping duplicates.
        if !self.state_labels.is_empty() {
            let mut merged: Vec<Vec<&str>> = vec![Vec::new(); num_classes];
            for (s, label) in self.state_labels.iter().enumerate() {
                let class = class_of(StateIdx(s));
                if !label.is_empty() && !merged[class].contains(&label.as_str()) {
                    merged[class].push(label);
                }
            }
            self.state_labels = merged.into_iter().map(|parts| parts.join("+")).collect();
        }

        self.num_states = num_classes;
        self.initial = initial;
        self.out_start = source_index(num_classes, &transitions);
        self.transitions = transitions;
    }
}

fn source_index(num_states: usize, transitions: &[Transition]) -> Vec<usize> {
    let mut out_start = vec![0usize; num_states + 1];
    for t in transitions {
        out_start[t.from.0 + 1] += 1;
    }
    for i in 0..num_states {
        out_start[i + 1] += out_start[i];
    }
    out_start
}

/// Convenience builder that accumulates transitions before freezing them
/// into a [`LabelledTransitionSystem`].
#[derive(Default)]
pub struct LtsBuilder {
    transitions: Vec<Transition>,
}

impl LtsBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        LtsBuilder::default()
    }

    /// Record one transition.
    pub fn add(&mut self, from: usize, label: usize, to: usize) -> &mut Self {
        self.transitions.push(Transition {
            from: StateIdx(from),
            label: LabelIdx(label),
            to: StateIdx(to),
        });
        self
    }

    /// Freeze into an LTS. `hidden[l]` marks silent labels.
    pub fn build(
        self,
        num_states: usize,
        initial: usize,
        hidden: Vec<bool>,
    ) -> LabelledTransitionSystem {
        LabelledTransitionSystem::new(
            num_states,
            StateIdx(initial),
            self.transitions,
            hidden,
            Vec::new(),
        )
    }
}

/// Generate a random LTS with `num_states` states and labels `0..num_labels`
/// where label `0` is silent. Every state gets up to `out_degree` outgoing
/// transitions. When `acyclic_tau` is set, silent transitions only run from
/// lower to higher state indices, so the result is free of inert cycles
/// (the shape the branching engine's documented precondition asks for).
pub fn random_lts(
    rng: &mut impl Rng,
    num_states: usize,
    num_labels: usize,
    out_degree: usize,
    acyclic_tau: bool,
) -> LabelledTransitionSystem {
    debug_assert!(num_states > 0 && num_labels > 0);
    let mut builder = LtsBuilder::new();
    for from in 0..num_states {
        let degree = rng.gen_range(0..=out_degree);
        for _ in 0..degree {
            let label = rng.gen_range(0..num_labels);
            let to = rng.gen_range(0..num_states);
            if label == 0 && acyclic_tau && to <= from {
                continue;
            }
            builder.add(from, label, to);
        }
    }
    let mut hidden = vec![false; num_labels];
    hidden[0] = true;
    builder.build(num_states, 0, hidden)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn builder_sorts_and_dedups() {
        let mut b = LtsBuilder::new();
        b.add(1, 0, 0).add(0, 1, 1).add(0, 1, 1).add(0, 0, 1);
        let lts = b.build(2, 0, vec![true, false]);
        assert_eq!(lts.num_transitions(), 3);
        assert_eq!(lts.outgoing(StateIdx(0)).len(), 2);
        assert_eq!(lts.outgoing(StateIdx(1)).len(), 1);
        assert!(lts.is_silent(LabelIdx(0)));
        assert!(!lts.is_silent(LabelIdx(1)));
    }

    #[test]
    fn incoming_index_matches_transitions() {
        let mut b = LtsBuilder::new();
        b.add(0, 1, 1).add(1, 1, 1).add(1, 0, 0);
        let lts = b.build(2, 0, vec![true, false]);
        let incoming = lts.incoming_index();
        assert_eq!(incoming[0].len(), 1);
        assert_eq!(incoming[1].len(), 2);
        for (s, list) in incoming.iter().enumerate() {
            for &TransIdx(i) in list {
                assert_eq!(lts.transitions()[i].to, StateIdx(s));
            }
        }
    }

    #[test]
    fn random_lts_respects_tau_acyclicity() {
        let mut rng = StdRng::seed_from_u64(7);
        let lts = random_lts(&mut rng, 20, 3, 4, true);
        for t in lts.transitions() {
            if lts.is_silent(t.label) {
                assert!(t.to > t.from, "silent transitions must ascend");
            }
        }
    }

    #[test]
    fn quotient_merges_state_labels() {
        let lts = LabelledTransitionSystem::new(
            3,
            StateIdx(0),
            vec![Transition { from: StateIdx(0), label: LabelIdx(1), to: StateIdx(2) }],
            vec![true, false],
            vec!["p".into(), "q".into(), "r".into()],
        );
        let mut lts = lts;
        let class_of = |s: StateIdx| if s.0 < 2 { 0 } else { 1 };
        lts.apply_quotient(
            2,
            StateIdx(0),
            vec![Transition { from: StateIdx(0), label: LabelIdx(1), to: StateIdx(1) }],
            &class_of,
        );
        assert_eq!(lts.num_states(), 2);
        assert_eq!(lts.state_labels(), &["p+q".to_string(), "r".to_string()]);
    }
}
