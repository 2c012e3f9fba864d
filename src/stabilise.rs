//! Stabilisation under new bottom states
//!
//! A block that gains bottom states may have become unstable against any of
//! its slices: the fresh bottoms need not agree with the old ones. Such
//! blocks queue up, and this module restores invariant stability by marking
//! the transitions that have to be re-examined and re-splitting against
//! every marked suffix.
//!
//! How a block is marked depends on its smallness credit:
//!
//! - **large** (no credit left, non-bottom states present): the block is
//!   isolated into its own region, every non-inert slice is marked
//!   unstable, and each bottom state contributes one marked transition per
//!   outgoing saC group that feeds a real slice;
//! - **small, own region**: every non-inert slice is bulk-marked in full
//!   (`starts_in_small_subblock`), spending a credit;
//! - **small, shared region**: every non-inert outgoing transition of the
//!   block is marked individually, spending a credit.
//!
//! The inner loop pops one unstable slice at a time, splits every block
//! with sources in the marked suffix against it, and breaks back to the
//! block queue as soon as new bottom states appear. The procedure ends when
//! both the queue and Q̂ are empty.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::lts::LtsView;
use crate::partition::{BlockIdx, Partitioner, SliceTarget};
use crate::pool::NodeRef;

impl<'a, L: LtsView> Partitioner<'a, L> {
    /// Restabilise every queued block, and every block their splits queue
    /// in turn, until no block is flagged and no slice is marked.
    pub(crate) fn stabilise_new_bottom_states(&mut self) {
        loop {
            while let Some(b) = self.new_bottom_queue.pop() {
                self.block_mut(b).queued = false;
                if !self.block(b).new_bottom {
                    continue;
                }
                self.block_mut(b).new_bottom = false;
                if self.block(b).len() <= 1 {
                    continue;
                }
                self.mark_block_for_stabilisation(b);
            }

            while self.new_bottom_queue.is_empty() {
                let Some(node) = self.qhat.pop() else {
                    break;
                };
                self.slices.get_mut(node).queued = false;
                {
                    let s = self.slices.get(node);
                    if s.dead || s.marked.is_none() {
                        continue;
                    }
                }
                let (mlo, mhi, label, target) = {
                    let s = self.slices.get(node);
                    let (lo, hi) = s.marked_range();
                    (lo, hi, s.label, s.target)
                };
                let SliceTarget::Constellation(tc) = target else {
                    unreachable!("the inert slice is never marked");
                };
                // Only the marked suffix is stabilised against; the slice
                // itself is stable from here on.
                self.stabilise_slice(node);
                if mlo >= mhi {
                    continue;
                }
                let inits = self.scan_splitter(mlo, mhi, None);
                for init in inits {
                    self.four_way_split(init, (label, tc), None);
                }
            }

            if self.new_bottom_queue.is_empty() && self.qhat.is_empty() {
                break;
            }
        }
        self.drain_deferred();
    }

    /// Build the set of unstable slices a freshly queued block must be
    /// re-examined against (the three marking paths).
    fn mark_block_for_stabilisation(&mut self, b: BlockIdx) {
        let credits = self.block(b).credits;
        let has_nonbottom = self.block(b).has_nonbottom();

        if credits == 0 && has_nonbottom {
            // Large block: no credit to charge a full transition walk to,
            // so isolate it and mark per slice, with one marked transition
            // per bottom state and group.
            self.make_region_simple(b, true);
            let region = self.block(b).region;
            let inert = self.regions[region.as_usize()].inert;
            let list = self.regions[region.as_usize()].slices;
            let nodes: Vec<NodeRef> = list.iter(&self.slices).collect();
            for node in nodes {
                if node == inert {
                    continue;
                }
                self.make_unstable(node);
            }
            let (bs, bbe) = {
                let blk = self.block(b);
                (blk.start, blk.bottom_end)
            };
            for pos in bs..bbe {
                let u = self.state_order[pos];
                debug_assert_eq!(self.state(u).inert_out, 0);
                let (lo, hi) = {
                    let st = self.state(u);
                    (st.out_start, st.out_end)
                };
                let mut g = lo;
                while g < hi {
                    let (gf, gl) = self.group_bounds(g);
                    debug_assert_eq!(gf, g);
                    for slot in gf..=gl {
                        let ti = self.out_slots[slot].trans;
                        let slice = self.trans[ti.as_usize()].slice;
                        if self.slices.get(slice).target != SliceTarget::Inert {
                            self.mark_transition(ti);
                            break;
                        }
                    }
                    g = gl + 1;
                }
            }
        } else if self.region_is_simple(b) {
            // Small block in its own region: bulk-mark every real slice.
            if credits > 0 {
                self.block_mut(b).credits = credits - 1;
            }
            let region = self.block(b).region;
            let inert = self.regions[region.as_usize()].inert;
            let list = self.regions[region.as_usize()].slices;
            let nodes: Vec<NodeRef> = list.iter(&self.slices).collect();
            for node in nodes {
                if node == inert {
                    continue;
                }
                {
                    let s = self.slices.get_mut(node);
                    s.marked = Some(s.start);
                    s.small_flag = true;
                }
                if !self.slices.get(node).queued {
                    self.slices.get_mut(node).queued = true;
                    self.qhat.push(node);
                }
            }
        } else {
            // Small block sharing its region: mark its own transitions one
            // by one, bottom and non-bottom states alike.
            if credits > 0 {
                self.block_mut(b).credits = credits - 1;
            }
            let (bs, be) = {
                let blk = self.block(b);
                (blk.start, blk.end)
            };
            for pos in bs..be {
                let u = self.state_order[pos];
                let (lo, hi, inert_out) = {
                    let st = self.state(u);
                    (st.out_start, st.out_end, st.inert_out)
                };
                for slot in lo + inert_out..hi {
                    let ti = self.out_slots[slot].trans;
                    let slice = self.trans[ti.as_usize()].slice;
                    if self.slices.get(slice).target == SliceTarget::Inert {
                        continue;
                    }
                    self.make_unstable(slice);
                    self.mark_transition(ti);
                }
            }
        }
    }
}
