//! Constellation refinement driver
//!
//! The outer loop of the partition refinement: keep a stack of non-trivial
//! constellations; pop one, carve a block of at most half its size into a
//! fresh singleton constellation, split every affected BLC slice, and
//! re-stabilise every source block against the new main/co splitter pairs.
//! Each round ends with the new-bottom-state stabilisation of `stabilise.rs`
//! and every split halves something, which is where the `log n` comes from.
//!
//! Refinement starts from the trivial one-block partition by treating that
//! block as if it had just gained new bottom states; the initial
//! stabilisation against every label slice falls out of the same machinery.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use tracing::{debug, trace};

use crate::lts::LtsView;
use crate::partition::{BlockIdx, ConstIdx, Constellation, Partitioner, SliceTarget};
use crate::pool::NodeRef;

impl<'a, L: LtsView> Partitioner<'a, L> {
    /// Run the full refinement to its fixpoint.
    pub(crate) fn run(&mut self) {
        self.init_blc();

        // Initial stabilisation: the single block plays the role of a block
        // with new bottom states, which marks every label slice and splits
        // until the partition is stable within the one constellation.
        let b0 = BlockIdx(0);
        if self.block(b0).len() > 1 {
            let blk = self.block_mut(b0);
            blk.new_bottom = true;
            blk.queued = true;
            self.new_bottom_queue.push(b0);
            self.stabilise_new_bottom_states();
        }
        self.assert_partition_ok();
        debug!(blocks = self.num_blocks(), "initial stabilisation done");

        if !self.constellation_is_trivial(ConstIdx(0)) && !self.constellations[0].on_stack {
            self.constellations[0].on_stack = true;
            self.nontrivial.push(ConstIdx(0));
        }
        let mut rounds = 0usize;
        while let Some(c) = self.nontrivial.pop() {
            self.constellations[c.as_usize()].on_stack = false;
            self.refine_constellation(c);
            rounds += 1;
        }
        debug!(rounds, blocks = self.num_blocks(), "refinement complete");
    }

    /// One refinement round: split `c` and restabilise against the result.
    fn refine_constellation(&mut self, c: ConstIdx) {
        debug_assert!(!self.constellation_is_trivial(c));
        let (c_start, c_end) = {
            let con = &self.constellations[c.as_usize()];
            (con.start, con.end)
        };

        // The splitter block: the first block of the range when it is at
        // most half, otherwise the last (one of the two always qualifies).
        let first = self.block_of(self.state_order[c_start]);
        let b_star = if self.block(first).len() * 2 <= c_end - c_start {
            first
        } else {
            self.block_of(self.state_order[c_end - 1])
        };
        debug_assert!(self.block(b_star).len() * 2 <= c_end - c_start);
        let (bs, be) = {
            let b = self.block(b_star);
            (b.start, b.end)
        };

        // Carve the new singleton constellation off the edge of `c`.
        let c_new = ConstIdx(self.constellations.len());
        if b_star == first {
            self.constellations[c.as_usize()].start = be;
        } else {
            self.constellations[c.as_usize()].end = bs;
        }
        self.constellations.push(Constellation { start: bs, end: be, on_stack: false });
        self.block_mut(b_star).constellation = c_new;
        trace!(
            round_constellation = c.as_usize(),
            new_constellation = c_new.as_usize(),
            block = b_star.as_usize(),
            size = be - bs,
            "constellation split"
        );
        if !self.constellation_is_trivial(c) && !self.constellations[c.as_usize()].on_stack {
            self.constellations[c.as_usize()].on_stack = true;
            self.nontrivial.push(c);
        }

        // Eagerly split the affected slices and collect this round's
        // splitters, then stabilise every hit block against each of them.
        debug_assert!(self.pending_splitters.is_empty());
        let splitters = self.refine_blc_for_new_constellation(b_star, c_new, c);
        for main in splitters.mains {
            self.pending_splitters.push(main);
        }
        while let Some(main) = self.pending_splitters.pop() {
            self.process_main_splitter(main, c);
        }
        for co in splitters.pinned_cos {
            self.unpin_slice(co);
        }
        self.drain_deferred();

        // Blocks that gained bottom states in this round.
        self.stabilise_new_bottom_states();
        self.assert_partition_ok();
    }

    /// Split every block with sources in `main` against it, with the
    /// co-splitter towards `c_old` as the large splitter when one exists.
    fn process_main_splitter(&mut self, main: NodeRef, c_old: ConstIdx) {
        {
            let s = self.slices.get_mut(main);
            s.pending = false;
            s.pinned = false;
            if s.dead {
                return;
            }
        }
        let (lo, hi, label, target, region) = {
            let s = self.slices.get(main);
            (s.start, s.end, s.label, s.target, s.region)
        };
        debug_assert!(lo < hi, "pending splitters are never empty");
        let SliceTarget::Constellation(main_target) = target else {
            unreachable!("the inert slice is never a splitter");
        };

        // The co-splitter sits directly before the main slice in its
        // region's list; it may have emptied or never existed.
        let list = self.regions[region.as_usize()].slices;
        let mut co = NodeRef::NIL;
        if list.front() != main {
            let prev = self.slices.prev(main);
            let p = self.slices.get(prev);
            if !p.dead
                && p.label == label
                && p.target == SliceTarget::Constellation(c_old)
                && p.start < p.end
            {
                co = prev;
            }
        }
        let large = if co.is_nil() { None } else { Some((label, c_old)) };

        let inits = self.scan_splitter(lo, hi, large.map(|(_, t)| t));
        for init in inits {
            self.four_way_split(init, (label, main_target), large);
        }
    }
}

// ============================================================================
// Tests: the scenario suite and randomised oracle comparisons live in
// `quotient.rs`, next to the public results they assert on.
// ============================================================================
