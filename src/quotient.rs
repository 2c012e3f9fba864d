//! Quotient builder
//!
//! Once the refinement is stable and every constellation is a single block,
//! each block is an equivalence class. Blocks are numbered in first
//! appearance order along the state-in-block array (deterministic across
//! runs on identical input), one representative bottom state is picked per
//! block, and one quotient transition is emitted per non-inert outgoing saC
//! group of the representative. Block-inert transitions vanish in the
//! quotient; non-inert silent transitions (divergence self-loops among
//! them) survive.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use tracing::debug;

use crate::lts::{LtsView, StateIdx, Transition};
use crate::partition::Partitioner;

/// The result of a refinement run, detached from the engine's internals.
pub(crate) struct QuotientData {
    pub classes: Vec<usize>,
    pub num_classes: usize,
    pub transitions: Vec<Transition>,
    #[cfg(feature = "quotient-stats")]
    pub stats: crate::QuotientStats,
}

impl<'a, L: LtsView> Partitioner<'a, L> {
    /// Number the blocks and emit the quotient transition relation.
    pub(crate) fn build_quotient(&self) -> QuotientData {
        let n = self.states.len();
        let mut class_ids: Vec<usize> = vec![usize::MAX; self.blocks.len()];
        let mut num_classes = 0usize;
        let mut p = 0usize;
        while p < n {
            let b = self.block_of(self.state_order[p]);
            debug_assert_eq!(self.block(b).start, p);
            class_ids[b.as_usize()] = num_classes;
            num_classes += 1;
            p = self.block(b).end;
        }

        let classes: Vec<usize> = (0..n)
            .map(|s| class_ids[self.states[s].block.as_usize()])
            .collect();

        let mut transitions: Vec<Transition> = Vec::new();
        #[cfg(feature = "quotient-stats")]
        let mut sampled_states: Vec<StateIdx> = Vec::new();
        let mut p = 0usize;
        while p < n {
            let b = self.block_of(self.state_order[p]);
            let blk = self.block(b);
            // The first state of the block is a bottom state whenever the
            // block has one (bottoms lead); a block without bottom states
            // only arises from inert cycles, where any member serves.
            let rep = self.state_order[blk.start];
            #[cfg(feature = "quotient-stats")]
            sampled_states.push(rep);
            let (lo, hi, inert_out) = {
                let st = self.state(rep);
                (st.out_start, st.out_end, st.inert_out)
            };
            let mut g = lo + inert_out;
            while g < hi {
                let (gf, gl) = self.group_bounds(g);
                let ti = self.out_slots[gf].trans;
                let t = &self.trans[ti.as_usize()];
                transitions.push(Transition {
                    from: StateIdx(class_ids[b.as_usize()]),
                    label: t.label,
                    to: StateIdx(classes[t.to.as_usize()]),
                });
                g = gl + 1;
            }
            p = blk.end;
        }

        debug!(num_classes, transitions = transitions.len(), "quotient built");
        QuotientData {
            classes,
            num_classes,
            transitions,
            #[cfg(feature = "quotient-stats")]
            stats: crate::QuotientStats { num_classes, sampled_states },
        }
    }
}

// ============================================================================
// Tests — end-to-end scenarios and randomised oracle comparisons
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::lts::{random_lts, LabelledTransitionSystem, LtsBuilder, LtsView, StateIdx};
    use crate::oracle;
    use crate::{BisimPartition, ReduceConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn classes_of(lts: &LabelledTransitionSystem, branching: bool, div: bool) -> Vec<usize> {
        // RUST_LOG=bisim=debug surfaces the engine's round summaries.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        let config = ReduceConfig { branching, preserve_divergence: div };
        let p = BisimPartition::compute(lts, &config).expect("reduction succeeds");
        (0..lts.num_states()).map(|s| p.class_of(StateIdx(s))).collect()
    }

    fn num_classes(classes: &[usize]) -> usize {
        classes.iter().max().map_or(0, |m| m + 1)
    }

    /// Label 0 is τ; the rest are visible.
    fn hidden(n: usize) -> Vec<bool> {
        let mut h = vec![false; n];
        h[0] = true;
        h
    }

    #[test]
    fn two_state_action_loop_collapses() {
        // 0 -a-> 1, 1 -a-> 0: strongly bisimilar.
        let mut b = LtsBuilder::new();
        b.add(0, 1, 1).add(1, 1, 0);
        let lts = b.build(2, 0, hidden(2));
        let classes = classes_of(&lts, false, false);
        assert_eq!(num_classes(&classes), 1);
        assert_eq!(classes[0], classes[1]);
    }

    #[test]
    fn branching_distinguishes_early_choice() {
        // 0 -a-> 1, 0 -a-> 2, 1 -b-> 3, 2 -c-> 3: all four states distinct.
        let mut b = LtsBuilder::new();
        b.add(0, 1, 1).add(0, 1, 2).add(1, 2, 3).add(2, 3, 3);
        let lts = b.build(4, 0, hidden(4));
        let classes = classes_of(&lts, true, false);
        assert_eq!(num_classes(&classes), 4);
    }

    #[test]
    fn tau_absorption_under_branching() {
        // 0 -τ-> 1, 1 -a-> 2.
        let mut b = LtsBuilder::new();
        b.add(0, 0, 1).add(1, 1, 2);
        let lts = b.build(3, 0, hidden(2));

        let branching = classes_of(&lts, true, false);
        assert_eq!(num_classes(&branching), 2);
        assert_eq!(branching[0], branching[1]);
        assert_ne!(branching[0], branching[2]);

        let strong = classes_of(&lts, false, false);
        assert_eq!(num_classes(&strong), 3);
    }

    #[test]
    fn divergence_preservation_splits_tau_loops() {
        // 0 -τ-> 0, 1 -τ-> 1, 0 -a-> 1.
        let mut b = LtsBuilder::new();
        b.add(0, 0, 0).add(1, 0, 1).add(0, 1, 1);
        let lts = b.build(2, 0, hidden(2));

        let div = classes_of(&lts, true, true);
        assert_eq!(num_classes(&div), 2);

        let blind = classes_of(&lts, true, false);
        assert_eq!(num_classes(&blind), 1);
    }

    #[test]
    fn deep_tau_chain_merges_entirely() {
        let n = 64;
        let mut b = LtsBuilder::new();
        for s in 0..n - 1 {
            b.add(s, 0, s + 1);
        }
        let lts = b.build(n, 0, hidden(1));
        let classes = classes_of(&lts, true, false);
        assert_eq!(num_classes(&classes), 1);
    }

    #[test]
    fn tau_stars_with_different_refusals_stay_apart() {
        // 0 -τ-> 1, 0 -τ-> 2, 1 -a-> 3, 2 -b-> 3 versus
        // 4 -τ-> 5, 5 -a-> 3, 5 -b-> 3.
        let mut b = LtsBuilder::new();
        b.add(0, 0, 1)
            .add(0, 0, 2)
            .add(1, 1, 3)
            .add(2, 2, 3)
            .add(4, 0, 5)
            .add(5, 1, 3)
            .add(5, 2, 3);
        let lts = b.build(6, 0, hidden(3));
        let classes = classes_of(&lts, true, false);
        assert_ne!(classes[0], classes[4]);
        // 5 keeps both a and b available; 1 and 2 each refuse one of them,
        // and 0 only commits through a τ-choice.
        assert_ne!(classes[1], classes[5]);
        assert_ne!(classes[2], classes[5]);
    }

    #[test]
    fn new_bottom_states_restabilise() {
        // 0 -τ-> 1, 0 -τ-> 2, 1 -a-> 3, 2 -b-> 4, 1 -b-> 4: splitting 1
        // from 2 turns 0 into a fresh bottom state.
        let mut b = LtsBuilder::new();
        b.add(0, 0, 1).add(0, 0, 2).add(1, 1, 3).add(2, 2, 4).add(1, 2, 4);
        let lts = b.build(5, 0, hidden(3));
        let classes = classes_of(&lts, true, false);
        assert_ne!(classes[1], classes[2]);
        assert_ne!(classes[0], classes[1]);
        assert_ne!(classes[0], classes[2]);
        // 3 and 4 are both deadlocked.
        assert_eq!(classes[3], classes[4]);
    }

    #[test]
    fn class_indices_are_dense() {
        let mut rng = StdRng::seed_from_u64(11);
        let lts = random_lts(&mut rng, 30, 3, 3, true);
        let classes = classes_of(&lts, true, false);
        let k = num_classes(&classes);
        for c in 0..k {
            assert!(classes.contains(&c), "class {c} must be inhabited");
        }
    }

    #[test]
    fn runs_are_deterministic() {
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..10 {
            let lts = random_lts(&mut rng, 25, 4, 3, true);
            let a = classes_of(&lts, true, false);
            let b = classes_of(&lts, true, false);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn strong_matches_naive_signature_refinement() {
        let mut rng = StdRng::seed_from_u64(3);
        for round in 0..50 {
            let lts = random_lts(&mut rng, 12, 3, 3, false);
            let got = classes_of(&lts, false, false);
            let want = oracle::strong_classes(&lts);
            assert!(
                oracle::equal_partitions(&got, &want),
                "strong mismatch in round {round}: {got:?} vs {want:?}"
            );
        }
    }

    #[test]
    fn branching_matches_naive_signature_refinement() {
        let mut rng = StdRng::seed_from_u64(5);
        for round in 0..50 {
            let lts = random_lts(&mut rng, 12, 3, 3, true);
            let got = classes_of(&lts, true, false);
            let want = oracle::branching_classes(&lts);
            assert!(
                oracle::equal_partitions(&got, &want),
                "branching mismatch in round {round}: {got:?} vs {want:?}"
            );
        }
    }

    #[test]
    fn quotient_is_stable_under_rerun() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..20 {
            let lts = random_lts(&mut rng, 15, 3, 3, true);
            let config = ReduceConfig { branching: true, preserve_divergence: false };
            let p = BisimPartition::compute(&lts, &config).unwrap();
            let mut reduced = lts.clone();
            p.finalise(&mut reduced);
            assert_eq!(reduced.num_states(), p.num_equivalence_classes());

            let again = BisimPartition::compute(&reduced, &config).unwrap();
            assert_eq!(
                again.num_equivalence_classes(),
                reduced.num_states(),
                "a quotient must already be minimal"
            );
        }
    }

    #[test]
    fn finalise_rewrites_the_lts() {
        // 0 -τ-> 1, 1 -a-> 2 under branching: classes {0,1} and {2}.
        let mut b = LtsBuilder::new();
        b.add(0, 0, 1).add(1, 1, 2);
        let mut lts = b.build(3, 0, hidden(2));
        let config = ReduceConfig { branching: true, preserve_divergence: false };
        let p = BisimPartition::compute(&lts, &config).unwrap();
        p.finalise(&mut lts);
        assert_eq!(lts.num_states(), 2);
        assert_eq!(lts.initial_state(), StateIdx(p.class_of(StateIdx(0))));
        // Exactly one transition survives: class(0) -a-> class(2).
        assert_eq!(lts.num_transitions(), 1);
        let t = lts.transitions()[0];
        assert_eq!(t.from.as_usize(), p.class_of(StateIdx(0)));
        assert_eq!(t.to.as_usize(), p.class_of(StateIdx(2)));
        assert!(!lts.is_silent(t.label));
    }

    #[test]
    fn in_same_class_agrees_with_class_of() {
        let mut rng = StdRng::seed_from_u64(29);
        let lts = random_lts(&mut rng, 20, 3, 3, true);
        let config = ReduceConfig { branching: true, preserve_divergence: false };
        let p = BisimPartition::compute(&lts, &config).unwrap();
        for s in 0..20 {
            for t in 0..20 {
                assert_eq!(
                    p.in_same_class(StateIdx(s), StateIdx(t)),
                    p.class_of(StateIdx(s)) == p.class_of(StateIdx(t))
                );
            }
        }
    }

    #[test]
    fn output_partition_is_stable() {
        let mut rng = StdRng::seed_from_u64(41);
        for _ in 0..20 {
            let lts = random_lts(&mut rng, 14, 3, 3, true);
            let classes = classes_of(&lts, true, false);
            assert!(
                oracle::is_stable_branching(&lts, &classes),
                "produced partition must be stable: {classes:?}"
            );
        }
    }
}
