//! Debug-build structural checks
//!
//! The refinement relies on a web of cross-array invariants; this module
//! re-validates the important ones between public operations. Everything
//! here compiles to a no-op in release builds.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::lts::LtsView;
use crate::partition::Partitioner;
#[cfg(debug_assertions)]
use crate::partition::{SliceTarget, UNDEFINED};

impl<'a, L: LtsView> Partitioner<'a, L> {
    /// Validate the whole structure; no-op in release builds.
    pub(crate) fn assert_partition_ok(&self) {
        #[cfg(debug_assertions)]
        {
            self.assert_states_ok();
            self.assert_blocks_ok();
            self.assert_blc_ok();
            self.assert_stability_ok();
        }
    }

    /// Per-state invariants: back pointers, bottom status, slot grouping.
    #[cfg(debug_assertions)]
    pub(crate) fn assert_states_ok(&self) {
        for s in 0..self.states.len() {
            let st = &self.states[s];
            assert_eq!(
                self.state_order[st.pos].as_usize(),
                s,
                "state-in-block back pointer broken for state {s}"
            );
            let blk = self.block(st.block);
            assert!(blk.start <= st.pos && st.pos < blk.end, "state {s} outside its block");
            let bottom = st.inert_out == 0;
            assert_eq!(
                st.pos < blk.bottom_end,
                bottom,
                "bottom ordering broken for state {s}"
            );
            assert_eq!(st.counter, UNDEFINED, "scratch counter in use between operations");

            // The block-inert prefixes really are block-inert.
            for slot in st.out_start..st.out_start + st.inert_out {
                let ti = self.out_slots[slot].trans;
                let t = &self.trans[ti.as_usize()];
                assert!(self.inert_candidate(t.label, t.from, t.to));
                assert_eq!(self.block_of(t.from), self.block_of(t.to));
            }
            for i in st.in_start..st.in_inert_end {
                let ti = self.incoming[i];
                let t = &self.trans[ti.as_usize()];
                assert!(self.inert_candidate(t.label, t.from, t.to));
                assert_eq!(self.block_of(t.from), self.block_of(t.to));
                assert_eq!(t.in_pos, i);
            }

            // saC groups tile the non-inert slot range and are homogeneous.
            let mut g = st.out_start + st.inert_out;
            while g < st.out_end {
                let (gf, gl) = self.group_bounds(g);
                assert_eq!(gf, g, "group does not start where the previous ended");
                assert!(gl < st.out_end);
                let (key, target) = self.group_key(gf);
                for slot in gf..=gl {
                    let ti = self.out_slots[slot].trans;
                    let t = &self.trans[ti.as_usize()];
                    assert_eq!(t.slot, slot);
                    assert_eq!(self.label_key(t.label), key);
                    assert_eq!(self.target_constellation(ti), target);
                }
                g = gl + 1;
            }
        }
    }

    /// Blocks tile the state order; constellations and regions are unions
    /// of whole blocks.
    #[cfg(debug_assertions)]
    pub(crate) fn assert_blocks_ok(&self) {
        let n = self.states.len();
        let mut p = 0usize;
        while p < n {
            let b = self.block_of(self.state_order[p]);
            let blk = self.block(b);
            assert_eq!(blk.start, p, "blocks must tile the state order");
            assert!(blk.start < blk.end && blk.bottom_end <= blk.end);
            let con = &self.constellations[blk.constellation.as_usize()];
            assert!(con.start <= blk.start && blk.end <= con.end);
            let reg = &self.regions[blk.region.as_usize()];
            assert!(reg.start <= blk.start && blk.end <= reg.end);
            for q in blk.start..blk.end {
                assert_eq!(self.block_of(self.state_order[q]), b);
            }
            p = blk.end;
        }
    }

    /// Slice invariants: membership back pointers, one label and target per
    /// slice, sources inside the owning region, markers cleared.
    #[cfg(debug_assertions)]
    pub(crate) fn assert_blc_ok(&self) {
        for (r, reg) in self.regions.iter().enumerate() {
            if reg.start >= reg.end {
                continue; // region entry no longer owns a range
            }
            // Regions can be superseded by a later split; only check the
            // ones some block still points at.
            let owner = self.block_of(self.state_order[reg.start]);
            if self.block(owner).region.as_usize() != r {
                continue;
            }
            if !reg.inert.is_nil() {
                assert_eq!(
                    reg.slices.front(),
                    reg.inert,
                    "the inert slice must stay first in its region's list"
                );
            }
            for node in reg.slices.iter(&self.slices) {
                let sl = self.slices.get(node);
                assert!(!sl.dead);
                assert_eq!(sl.region.as_usize(), r);
                assert!(sl.start < sl.end, "empty slices must be unlinked");
                assert!(sl.marked.is_none(), "all slices must be stable between operations");
                for pos in sl.start..sl.end {
                    let ti = self.blc_order[pos];
                    let t = &self.trans[ti.as_usize()];
                    assert_eq!(t.blc_pos, pos);
                    assert_eq!(t.slice, node);
                    let src_pos = self.state(t.from).pos;
                    assert!(reg.start <= src_pos && src_pos < reg.end);
                    match sl.target {
                        SliceTarget::Inert => {
                            assert!(self.inert_candidate(t.label, t.from, t.to));
                            assert_eq!(
                                self.constellation_of(t.from),
                                self.constellation_of(t.to)
                            );
                        }
                        SliceTarget::Constellation(c) => {
                            assert_eq!(self.label_key(t.label), sl.label);
                            assert_eq!(self.target_constellation(ti), c);
                        }
                    }
                }
            }
        }
    }

    /// Invariant 7: within a block, either every bottom state has a
    /// transition in a stable slice or none does.
    #[cfg(debug_assertions)]
    pub(crate) fn assert_stability_ok(&self) {
        let mut seen = vec![false; self.states.len()];
        for (r, reg) in self.regions.iter().enumerate() {
            if reg.start >= reg.end {
                continue;
            }
            let owner = self.block_of(self.state_order[reg.start]);
            if self.block(owner).region.as_usize() != r {
                continue;
            }
            for node in reg.slices.iter(&self.slices) {
                let sl = self.slices.get(node);
                if sl.target == SliceTarget::Inert {
                    continue;
                }
                let mut hit_per_block: Vec<(usize, usize)> = Vec::new();
                let mut touched: Vec<usize> = Vec::new();
                for pos in sl.start..sl.end {
                    let ti = self.blc_order[pos];
                    let from = self.trans[ti.as_usize()].from;
                    if !self.is_bottom(from) || seen[from.as_usize()] {
                        continue;
                    }
                    seen[from.as_usize()] = true;
                    touched.push(from.as_usize());
                    let b = self.block_of(from).as_usize();
                    match hit_per_block.iter_mut().find(|(blk, _)| *blk == b) {
                        Some((_, count)) => *count += 1,
                        None => hit_per_block.push((b, 1)),
                    }
                }
                for &(b, count) in &hit_per_block {
                    let blk = &self.blocks[b];
                    let bottoms = blk.bottom_end - blk.start;
                    assert_eq!(
                        count, bottoms,
                        "stable slice must cover all bottom states of block {b} or none"
                    );
                }
                for s in touched {
                    seen[s] = false;
                }
            }
        }
    }
}
