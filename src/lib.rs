//! Crate root: public surface and crate-wide invariants
//!
//! This crate computes the **branching-bisimulation quotient** of a labelled
//! transition system in `O(m · log n)` time, with strong bisimulation as the
//! degenerate case without silent transitions and optional divergence
//! preservation (τ-self-loops kept apart from genuine stuttering).
//!
//! ## Shape of the engine
//!
//! - **Nested partitions.** Constellations ⊇ blocks ⊇ subblocks, all ranges
//!   of one permutation of the states (`partition`).
//! - **Lazy BLC index.** Transitions grouped by (source region, label,
//!   target constellation); block splits cost the index nothing, and a
//!   per-block view is only materialised when strictly necessary (`blc`).
//! - **Four-way split.** One block refined under a small and an optional
//!   large splitter by four cooperative in-thread coroutines with a size
//!   abort rule (`split`).
//! - **Driver & stabilisation.** Constellation refinement rounds (`refine`)
//!   interleaved with re-stabilisation of blocks that gained bottom states
//!   (`stabilise`), and a final quotient pass (`quotient`).
//!
//! ## Invariants
//!
//! - The engine is strictly single-threaded; the "coroutines" are explicit
//!   state machines scheduled by a plain loop. No locks, no atomics.
//! - Given valid input the algorithm is total. All failure is up-front
//!   validation ([`ReduceError`]); the core loops neither log nor fail.
//! - Inputs with block-inert cycles (τ-cycles under branching semantics
//!   without divergence preservation) are outside the documented
//!   precondition: the engine still terminates deterministically, but only
//!   cycle-free inputs get the full coarsest-partition guarantee. Cycle
//!   elimination is the caller's (SCC) preprocessing concern.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

use tracing::debug;

mod blc;
mod check;
/// Labelled transition systems: view trait, concrete LTS, builder.
pub mod lts;
mod partition;
/// Pool arena and the intrusive nearly-circular list.
pub mod pool;
mod quotient;
mod refine;
mod split;
mod stabilise;

#[cfg(test)]
mod oracle;

pub use crate::lts::{
    random_lts, LabelIdx, LabelledTransitionSystem, LtsBuilder, LtsView, StateIdx, TransIdx,
    Transition,
};

use crate::partition::Partitioner;

/// How the input is to be quotiented.
///
/// **Invariant:** `preserve_divergence` requires `branching`; a strong
/// bisimulation never absorbs τ-steps in the first place.
#[derive(Copy, Clone, Debug, Default)]
pub struct ReduceConfig {
    /// Branching bisimulation when set, strong bisimulation otherwise.
    pub branching: bool,
    /// Treat τ-self-loops as observable divergence (branching only).
    pub preserve_divergence: bool,
}

/// Why a reduction was refused. The engine itself is total; every error is
/// raised before any refinement work starts.
#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    /// A precondition on the input was violated; nothing was attempted.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The state or transition count exceeds the scratch-counter encoding.
    #[error("state or transition count exceeds the supported range")]
    CapacityExceeded,
    /// The entity arrays could not be reserved.
    #[error("out of memory while reserving the entity arrays")]
    OutOfMemory,
}

/// Sampled per-block observability data, one representative state per
/// equivalence class. Estimates only; not part of the correctness contract.
#[cfg(feature = "quotient-stats")]
#[derive(Clone, Debug)]
pub struct QuotientStats {
    /// Number of equivalence classes.
    pub num_classes: usize,
    /// One sampled member per class, in class order.
    pub sampled_states: Vec<StateIdx>,
}

/// The computed bisimulation quotient of one input LTS.
///
/// Obtained through [`BisimPartition::compute`]; afterwards the partition
/// answers class queries and can rewrite the input into its quotient via
/// [`BisimPartition::finalise`].
#[derive(Clone, Debug)]
pub struct BisimPartition {
    classes: Vec<usize>,
    num_classes: usize,
    initial_class: usize,
    quotient: Vec<Transition>,
    #[cfg(feature = "quotient-stats")]
    stats: QuotientStats,
}

impl BisimPartition {
    /// Run the partition refinement on `lts` under `config`.
    ///
    /// Preconditions (checked): at least one state, every transition
    /// endpoint and label in range, and `preserve_divergence ⇒ branching`.
    pub fn compute<L: LtsView>(lts: &L, config: &ReduceConfig) -> Result<Self, ReduceError> {
        let n = lts.num_states();
        if n == 0 {
            return Err(ReduceError::InvalidInput("the LTS must have at least one state"));
        }
        if lts.initial_state().as_usize() >= n {
            return Err(ReduceError::InvalidInput("initial state out of range"));
        }
        for t in lts.transitions() {
            if t.from.as_usize() >= n || t.to.as_usize() >= n {
                return Err(ReduceError::InvalidInput("transition endpoint out of range"));
            }
            if t.label.as_usize() >= lts.num_labels() {
                return Err(ReduceError::InvalidInput("transition label out of range"));
            }
        }
        if config.preserve_divergence && !config.branching {
            return Err(ReduceError::InvalidInput(
                "divergence preservation requires branching semantics",
            ));
        }

        debug!(
            states = n,
            transitions = lts.transitions().len(),
            branching = config.branching,
            preserve_divergence = config.preserve_divergence,
            "computing bisimulation quotient"
        );
        let mut engine = Partitioner::new(lts, config.branching, config.preserve_divergence)?;
        engine.run();
        let data = engine.build_quotient();
        let initial_class = data.classes[lts.initial_state().as_usize()];
        Ok(BisimPartition {
            classes: data.classes,
            num_classes: data.num_classes,
            initial_class,
            quotient: data.transitions,
            #[cfg(feature = "quotient-stats")]
            stats: data.stats,
        })
    }

    /// Number of equivalence classes.
    #[inline]
    pub fn num_equivalence_classes(&self) -> usize {
        self.num_classes
    }

    /// Class of a state, in `[0, num_equivalence_classes())`.
    #[inline]
    pub fn class_of(&self, s: StateIdx) -> usize {
        self.classes[s.as_usize()]
    }

    /// Whether two states are bisimilar under the configured semantics.
    #[inline]
    pub fn in_same_class(&self, s: StateIdx, t: StateIdx) -> bool {
        self.class_of(s) == self.class_of(t)
    }

    /// Rewrite `lts` into its quotient: class count, quotient transition
    /// relation, mapped initial state, and per-class merged state payload.
    pub fn finalise<L: LtsView>(&self, lts: &mut L) {
        let classes = &self.classes;
        lts.apply_quotient(
            self.num_classes,
            StateIdx(self.initial_class),
            self.quotient.clone(),
            &|s| classes[s.as_usize()],
        );
    }

    /// Sampled observability data gathered during the quotient pass.
    #[cfg(feature = "quotient-stats")]
    pub fn stats(&self) -> &QuotientStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lts::LtsBuilder;

    #[test]
    fn rejects_empty_lts() {
        let lts = LtsBuilder::new().build(0, 0, vec![true]);
        let err = BisimPartition::compute(&lts, &ReduceConfig::default());
        assert!(matches!(err, Err(ReduceError::InvalidInput(_))));
    }

    #[test]
    fn rejects_divergence_without_branching() {
        let mut b = LtsBuilder::new();
        b.add(0, 0, 0);
        let lts = b.build(1, 0, vec![true]);
        let config = ReduceConfig { branching: false, preserve_divergence: true };
        let err = BisimPartition::compute(&lts, &config);
        assert!(matches!(err, Err(ReduceError::InvalidInput(_))));
    }

    #[test]
    fn single_state_lts_has_one_class() {
        let lts = LtsBuilder::new().build(1, 0, vec![true]);
        let p = BisimPartition::compute(&lts, &ReduceConfig::default()).unwrap();
        assert_eq!(p.num_equivalence_classes(), 1);
        assert_eq!(p.class_of(StateIdx(0)), 0);
    }
}
