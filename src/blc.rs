//! BLC slice index with lazy refinement
//!
//! Transitions are grouped twice:
//!
//! - per source state into *saC groups* — outgoing slots that share a label
//!   key and a target constellation, chained so that group bounds are O(1)
//!   (a non-last slot points to the last of its group, the last points back
//!   to the first, a singleton to itself);
//! - per *BLC source region* into slices of the flat BLC transition array,
//!   each slice holding the transitions of one `(label, target
//!   constellation)` pair whose sources lie in the region.
//!
//! A region spans one or more whole blocks that still share a slice list.
//! Block splits never touch this index; that is the laziness. Slices are
//! only reorganised when a constellation splits
//! ([`Partitioner::refine_blc_for_new_constellation`]) or when a block must
//! be isolated into its own region ([`Partitioner::make_region_simple`]).
//!
//! The constellation-inert slice is the designated first slice of a region's
//! list. It holds every constellation-inert transition of the region's
//! states, is never a splitter and is never split within one constellation;
//! transitions leave it exactly when they stop being constellation-inert.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::lts::{LabelIdx, LtsView, TransIdx};
use crate::partition::{
    BlcSlice, BlockIdx, ConstIdx, Partitioner, Region, RegionIdx, SliceTarget,
};
use crate::pool::{NodeRef, SimpleList};

/// Splitters produced by one constellation split: the main slices (their
/// co-splitters are found as list predecessors at processing time) plus the
/// co slices pinned for the round.
pub(crate) struct RoundSplitters {
    pub mains: Vec<NodeRef>,
    pub pinned_cos: Vec<NodeRef>,
}

impl<'a, L: LtsView> Partitioner<'a, L> {
    // ------------------------------------------------------------------
    // saC groups
    // ------------------------------------------------------------------

    /// Bounds `(first, last)` of the saC group containing `slot`.
    #[inline]
    pub(crate) fn group_bounds(&self, slot: usize) -> (usize, usize) {
        let sac = self.out_slots[slot].sac;
        if sac > slot {
            // Non-last slot: `sac` is the last; the last points to the first.
            (self.out_slots[sac].sac, sac)
        } else if sac < slot {
            // Last slot: `sac` is the first.
            (sac, slot)
        } else {
            (slot, slot)
        }
    }

    /// Label key and target constellation of the group starting at `first`.
    #[inline]
    pub(crate) fn group_key(&self, first: usize) -> (LabelIdx, ConstIdx) {
        let t = self.out_slots[first].trans;
        (
            self.label_key(self.trans[t.as_usize()].label),
            self.target_constellation(t),
        )
    }

    /// Whether the group `[first, last]` contains a transition that lies in
    /// a real (non-inert) slice. Constellation-inert transitions share the
    /// group key of non-inert same-target silent transitions, so membership
    /// in a splitter must look at the slice, not just the key.
    pub(crate) fn group_has_noninert(&self, first: usize, last: usize) -> bool {
        (first..=last).any(|slot| {
            let t = self.out_slots[slot].trans;
            let slice = self.trans[t.as_usize()].slice;
            !slice.is_nil()
                && self.slices.get(slice).target != SliceTarget::Inert
        })
    }

    /// Swap two outgoing slots, keeping the transition back references
    /// consistent. The saC chains are the caller's responsibility.
    pub(crate) fn swap_slots(&mut self, p: usize, q: usize) {
        if p == q {
            return;
        }
        let tp = self.out_slots[p].trans;
        let tq = self.out_slots[q].trans;
        self.out_slots[p].trans = tq;
        self.out_slots[q].trans = tp;
        self.trans[tp.as_usize()].slot = q;
        self.trans[tq.as_usize()].slot = p;
    }

    // ------------------------------------------------------------------
    // Flat BLC array and slice bookkeeping
    // ------------------------------------------------------------------

    /// Swap two positions of the flat BLC transition array.
    pub(crate) fn swap_blc(&mut self, p: usize, q: usize) {
        if p == q {
            return;
        }
        let tp = self.blc_order[p];
        let tq = self.blc_order[q];
        self.blc_order[p] = tq;
        self.blc_order[q] = tp;
        self.trans[tp.as_usize()].blc_pos = q;
        self.trans[tq.as_usize()].blc_pos = p;
    }

    /// Make `slice` unstable with an empty marked suffix and queue it.
    pub(crate) fn make_unstable(&mut self, slice: NodeRef) {
        let s = self.slices.get_mut(slice);
        debug_assert!(s.target != SliceTarget::Inert, "the inert slice stays stable");
        if s.marked.is_none() {
            s.marked = Some(s.end);
        }
        if !s.queued {
            s.queued = true;
            self.qhat.push(slice);
        }
    }

    /// Move `t` into the marked suffix of its slice: swap it with the
    /// predecessor of `start_marked` and decrement the marker.
    pub(crate) fn mark_transition(&mut self, t: TransIdx) {
        let slice = self.trans[t.as_usize()].slice;
        let (marked, _) = {
            let s = self.slices.get(slice);
            debug_assert!(s.marked.is_some(), "marking needs an unstable slice");
            (s.marked.unwrap(), s.end)
        };
        let pos = self.trans[t.as_usize()].blc_pos;
        if pos >= marked {
            return; // already marked
        }
        self.swap_blc(pos, marked - 1);
        self.slices.get_mut(slice).marked = Some(marked - 1);
    }

    /// Clear a slice's marker, declaring it stable again.
    pub(crate) fn stabilise_slice(&mut self, slice: NodeRef) {
        let s = self.slices.get_mut(slice);
        s.marked = None;
        s.small_flag = false;
    }

    /// Handle a slice that has just become empty: unlink it and either free
    /// it or, while a pending record still references it, defer deletion.
    pub(crate) fn slice_emptied(&mut self, slice: NodeRef) {
        let region = self.slices.get(slice).region;
        let reg = &mut self.regions[region.as_usize()];
        if reg.inert == slice {
            reg.inert = NodeRef::NIL;
        }
        let mut list = reg.slices;
        list.erase(&mut self.slices, slice);
        self.regions[region.as_usize()].slices = list;
        let s = self.slices.get_mut(slice);
        if s.pinned || s.queued || s.pending {
            s.dead = true;
            self.deferred.push(slice);
        } else {
            self.slices.free(slice);
        }
    }

    /// Release pending-record pins and free deferred slices that nothing
    /// references any more.
    pub(crate) fn unpin_slice(&mut self, slice: NodeRef) {
        if slice.is_nil() {
            return;
        }
        self.slices.get_mut(slice).pinned = false;
    }

    pub(crate) fn drain_deferred(&mut self) {
        let mut still_held = Vec::new();
        while let Some(slice) = self.deferred.pop() {
            let s = self.slices.get(slice);
            debug_assert!(s.dead);
            if s.pinned || s.queued || s.pending {
                still_held.push(slice);
            } else {
                self.slices.free(slice);
            }
        }
        self.deferred = still_held;
    }

    // ------------------------------------------------------------------
    // Initial BLC layout
    // ------------------------------------------------------------------

    /// Build the initial BLC array: the constellation-inert slice first,
    /// then one slice per non-inert label key, all in region 0 targeting
    /// constellation 0.
    pub(crate) fn init_blc(&mut self) {
        let m = self.trans.len();
        let mut order: Vec<TransIdx> = (0..m).map(TransIdx).collect();
        order.sort_unstable_by_key(|&TransIdx(i)| {
            let t = &self.trans[i];
            let inert = self.inert_candidate(t.label, t.from, t.to);
            (
                if inert { 0usize } else { 1 },
                self.label_key(t.label).as_usize(),
                i,
            )
        });
        self.blc_order = order;
        for pos in 0..m {
            let t = self.blc_order[pos];
            self.trans[t.as_usize()].blc_pos = pos;
        }

        let mut list = SimpleList::new();
        let mut inert_node = NodeRef::NIL;
        let mut pos = 0usize;
        while pos < m {
            let t0 = self.blc_order[pos].as_usize();
            let inert = {
                let t = &self.trans[t0];
                self.inert_candidate(t.label, t.from, t.to)
            };
            let key = self.label_key(self.trans[t0].label);
            let mut end = pos + 1;
            while end < m {
                let tn = &self.trans[self.blc_order[end].as_usize()];
                let tn_inert = self.inert_candidate(tn.label, tn.from, tn.to);
                if tn_inert != inert || (!inert && self.label_key(tn.label) != key) {
                    break;
                }
                end += 1;
            }
            let node = self.slices.alloc(BlcSlice {
                start: pos,
                end,
                marked: None,
                label: key,
                target: if inert {
                    SliceTarget::Inert
                } else {
                    SliceTarget::Constellation(ConstIdx(0))
                },
                region: RegionIdx(0),
                small_flag: false,
                pinned: false,
                dead: false,
                queued: false,
                pending: false,
            });
            for p in pos..end {
                let t = self.blc_order[p];
                self.trans[t.as_usize()].slice = node;
            }
            if inert {
                inert_node = node;
                list.push_front(&mut self.slices, node);
            } else {
                list.push_back(&mut self.slices, node);
            }
            pos = end;
        }
        self.regions[0].slices = list;
        self.regions[0].inert = inert_node;
    }

    // ------------------------------------------------------------------
    // Constellation split: eager slice refinement
    // ------------------------------------------------------------------

    /// After block `b_star` moved from `c_old` into the fresh singleton
    /// constellation `c_new`, reorganise every affected saC group and BLC
    /// slice, and collect the splitters of this round: one main slice per
    /// `(region, label)` with transitions into `c_new` (paired with its
    /// co-splitter when one exists) plus, per region, the slice of
    /// previously constellation-inert transitions that now leave `c_new`.
    pub(crate) fn refine_blc_for_new_constellation(
        &mut self,
        b_star: BlockIdx,
        c_new: ConstIdx,
        c_old: ConstIdx,
    ) -> RoundSplitters {
        let mut splitters = RoundSplitters { mains: Vec::new(), pinned_cos: Vec::new() };
        // saC groups that grew a front subgroup; interior chain pointers are
        // repaired once per group at the end of the pass.
        let mut sac_fixups: Vec<usize> = Vec::new();
        // Constellation-inert transitions into `b_star` whose source lies
        // outside it; they leave the inert slice in per-label batches.
        let mut from_inert: Vec<TransIdx> = Vec::new();

        let (bs, be) = {
            let b = self.block(b_star);
            (b.start, b.end)
        };
        for pos in bs..be {
            let target = self.state_order[pos];
            let (in_start, in_end) = {
                let st = self.state(target);
                (st.in_start, st.in_end)
            };
            for i in in_start..in_end {
                let ti = self.incoming[i];
                let (from, slice) = {
                    let t = &self.trans[ti.as_usize()];
                    (t.from, t.slice)
                };
                let src_in_bstar = self.block_of(from) == b_star;
                let inert_origin = self.slices.get(slice).target == SliceTarget::Inert;
                if src_in_bstar && inert_origin {
                    // Still constellation-inert (within c_new).
                    continue;
                }
                if inert_origin {
                    from_inert.push(ti);
                } else {
                    self.move_into_main_slice(ti, c_new, &mut splitters, &mut sac_fixups);
                }
            }
        }

        // Inert-origin transitions, batched per (region, label) so each main
        // slice grows at the inert slice's current front.
        from_inert.sort_unstable_by_key(|&ti| {
            let t = &self.trans[ti.as_usize()];
            (
                self.block(self.block_of(t.from)).region.as_usize(),
                self.label_key(t.label).as_usize(),
                ti.as_usize(),
            )
        });
        let mut batch_main = NodeRef::NIL;
        let mut batch_key: Option<(RegionIdx, LabelIdx)> = None;
        for k in 0..from_inert.len() {
            let ti = from_inert[k];
            let (from, label) = {
                let t = &self.trans[ti.as_usize()];
                (t.from, self.label_key(t.label))
            };
            let region = self.block(self.block_of(from)).region;
            if batch_key != Some((region, label)) {
                batch_key = Some((region, label));
                batch_main = self.create_slice_at_inert_front(region, label, c_new);
                let s = self.slices.get_mut(batch_main);
                s.pinned = true;
                s.pending = true;
                splitters.mains.push(batch_main);
            }
            self.move_from_inert_slice(ti, batch_main);
            self.move_slot_to_front_subgroup(ti, c_new, &mut sac_fixups);
        }

        // Outgoing constellation-inert τ-transitions of `b_star` now end in
        // a foreign constellation; they leave the inert slice and form the
        // extra τ-splitter towards `c_old`. The slots do not move: the group
        // key of the formerly cross-block inert group now reads `(τ, c_old)`
        // by itself.
        let mut out_inert: Vec<TransIdx> = Vec::new();
        for pos in bs..be {
            let src = self.state_order[pos];
            let (lo, hi, inert_out) = {
                let st = self.state(src);
                (st.out_start, st.out_end, st.inert_out)
            };
            let mut g = lo + inert_out;
            while g < hi {
                let (_, last) = self.group_bounds(g);
                for slot in g..=last {
                    let ti = self.out_slots[slot].trans;
                    let slice = self.trans[ti.as_usize()].slice;
                    if self.slices.get(slice).target == SliceTarget::Inert {
                        debug_assert!(self.target_constellation(ti) == c_old);
                        out_inert.push(ti);
                    }
                }
                g = last + 1;
            }
        }
        out_inert.sort_unstable_by_key(|&ti| {
            let t = &self.trans[ti.as_usize()];
            (
                self.block(self.block_of(t.from)).region.as_usize(),
                self.label_key(t.label).as_usize(),
                ti.as_usize(),
            )
        });
        let mut batch_main = NodeRef::NIL;
        let mut batch_key: Option<(RegionIdx, LabelIdx)> = None;
        for k in 0..out_inert.len() {
            let ti = out_inert[k];
            let label = self.label_key(self.trans[ti.as_usize()].label);
            let region = self.block(b_star).region;
            if batch_key != Some((region, label)) {
                batch_key = Some((region, label));
                batch_main = self.create_slice_at_inert_front(region, label, c_old);
                let s = self.slices.get_mut(batch_main);
                s.pinned = true;
                s.pending = true;
                splitters.mains.push(batch_main);
            }
            self.move_from_inert_slice(ti, batch_main);
        }

        // Repair interior saC pointers of every grown front subgroup.
        for first in sac_fixups {
            let last = self.out_slots[first].sac;
            for slot in first + 1..last {
                self.out_slots[slot].sac = last;
            }
        }

        splitters
    }

    /// Move `ti` from its slice `(region, ℓ, c_old)` to the main slice
    /// `(region, ℓ, c_new)` directly preceding it in the BLC array (creating
    /// that slice when absent), and regroup its outgoing slot.
    fn move_into_main_slice(
        &mut self,
        ti: TransIdx,
        c_new: ConstIdx,
        splitters: &mut RoundSplitters,
        sac_fixups: &mut Vec<usize>,
    ) {
        let old = self.trans[ti.as_usize()].slice;
        debug_assert!(self.slices.get(old).marked.is_none(), "splits run on stable slices");
        // Find or create the main slice directly before `old` in the array
        // and directly after it in the region's list.
        let region = self.slices.get(old).region;
        let label = self.slices.get(old).label;
        let next = self.slices.next(old);
        let main = if !next.is_nil() && {
            let n = self.slices.get(next);
            !n.dead
                && n.label == label
                && n.target == SliceTarget::Constellation(c_new)
        } {
            next
        } else {
            let start = self.slices.get(old).start;
            let node = self.slices.alloc(BlcSlice {
                start,
                end: start,
                marked: None,
                label,
                target: SliceTarget::Constellation(c_new),
                region,
                small_flag: false,
                pinned: true,
                dead: false,
                queued: false,
                pending: true,
            });
            let mut list = self.regions[region.as_usize()].slices;
            list.insert_after(&mut self.slices, old, node);
            self.regions[region.as_usize()].slices = list;
            self.slices.get_mut(old).pinned = true;
            splitters.mains.push(node);
            splitters.pinned_cos.push(old);
            node
        };
        debug_assert_eq!(self.slices.get(main).end, self.slices.get(old).start);

        // Boundary shift: the transition swaps to the co-slice's first
        // position, which then becomes the main slice's last.
        let pos = self.trans[ti.as_usize()].blc_pos;
        let boundary = self.slices.get(old).start;
        self.swap_blc(pos, boundary);
        self.slices.get_mut(old).start = boundary + 1;
        self.slices.get_mut(main).end = boundary + 1;
        self.trans[ti.as_usize()].slice = main;
        if self.slices.get(old).is_empty() {
            self.slice_emptied(old);
        }

        self.move_slot_to_front_subgroup(ti, c_new, sac_fixups);
    }

    /// Create an empty slice at the current front of a region's inert slice.
    fn create_slice_at_inert_front(
        &mut self,
        region: RegionIdx,
        label: LabelIdx,
        target: ConstIdx,
    ) -> NodeRef {
        let inert = self.regions[region.as_usize()].inert;
        debug_assert!(!inert.is_nil(), "inert-origin moves need an inert slice");
        let start = self.slices.get(inert).start;
        let node = self.slices.alloc(BlcSlice {
            start,
            end: start,
            marked: None,
            label,
            target: SliceTarget::Constellation(target),
            region,
            small_flag: false,
            pinned: false,
            dead: false,
            queued: false,
            pending: false,
        });
        let mut list = self.regions[region.as_usize()].slices;
        list.insert_after(&mut self.slices, inert, node);
        self.regions[region.as_usize()].slices = list;
        node
    }

    /// Move `ti` out of its region's inert slice into `main`, which must end
    /// exactly at the inert slice's front.
    fn move_from_inert_slice(&mut self, ti: TransIdx, main: NodeRef) {
        let inert = self.trans[ti.as_usize()].slice;
        debug_assert_eq!(self.slices.get(inert).target, SliceTarget::Inert);
        debug_assert_eq!(self.slices.get(main).end, self.slices.get(inert).start);
        let pos = self.trans[ti.as_usize()].blc_pos;
        let boundary = self.slices.get(inert).start;
        self.swap_blc(pos, boundary);
        self.slices.get_mut(inert).start = boundary + 1;
        self.slices.get_mut(main).end = boundary + 1;
        self.trans[ti.as_usize()].slice = main;
        if self.slices.get(inert).is_empty() {
            self.slice_emptied(inert);
        }
    }

    /// Move `ti`'s outgoing slot into the front subgroup (targeting the new
    /// constellation) of its saC group, growing that subgroup by one.
    fn move_slot_to_front_subgroup(
        &mut self,
        ti: TransIdx,
        c_new: ConstIdx,
        sac_fixups: &mut Vec<usize>,
    ) {
        let slot = self.trans[ti.as_usize()].slot;
        let from = self.trans[ti.as_usize()].from;
        let (of, ol) = self.group_bounds(slot);
        let prefix_end = {
            let st = self.state(from);
            st.out_start + st.inert_out
        };
        let label = self.label_key(self.trans[ti.as_usize()].label);

        // Does a front subgroup for `c_new` already sit directly before the
        // (shrunken) old group? Only slots already moved this round can
        // target `c_new` there, so the test is unambiguous.
        let front_first = if of > prefix_end {
            let prev = of - 1;
            let tp = self.out_slots[prev].trans;
            let tp_key = self.label_key(self.trans[tp.as_usize()].label);
            if tp_key == label && self.target_constellation(tp) == c_new {
                Some(self.out_slots[prev].sac) // last → first, kept fresh
            } else {
                None
            }
        } else {
            None
        };

        self.swap_slots(slot, of);
        match front_first {
            Some(first) => {
                // Append as the new last of the front subgroup.
                self.out_slots[first].sac = of;
                self.out_slots[of].sac = first;
            }
            None => {
                // Fresh singleton subgroup; register it for interior repair.
                self.out_slots[of].sac = of;
                sac_fixups.push(of);
            }
        }
        // The shrunken old subgroup `[of+1, ol]`, when non-empty, keeps its
        // interior pointers but needs its last slot re-aimed at its first.
        if of + 1 <= ol {
            if of + 1 == ol {
                self.out_slots[ol].sac = ol;
            } else {
                self.out_slots[ol].sac = of + 1;
            }
        }
    }

    /// Whether the source of the main-splitter transition `ti` also has a
    /// transition in the co-splitter `(label, c_old)`: a non-inert
    /// transition with the same label key into the old constellation.
    /// Constellation-inert transitions share the group key but are not part
    /// of any splitter, so membership must look at the slice, not just the
    /// key. This sweeps the source's saC groups; the co group usually sits
    /// directly after the main group, but a transition evicted from the
    /// inert prefix can open a second group with the same key, so adjacency
    /// alone is not trusted.
    pub(crate) fn main_has_adjacent_co(&self, ti: TransIdx, c_old: ConstIdx) -> bool {
        let from = self.trans[ti.as_usize()].from;
        let key = self.label_key(self.trans[ti.as_usize()].label);
        let (lo, hi, inert_out) = {
            let st = self.state(from);
            (st.out_start, st.out_end, st.inert_out)
        };
        let mut g = lo + inert_out;
        while g < hi {
            let (gf, gl) = self.group_bounds(g);
            let (gk, gt) = self.group_key(gf);
            if gk == key && gt == c_old && self.group_has_noninert(gf, gl) {
                return true;
            }
            g = gl + 1;
        }
        false
    }

    /// A block-inert transition `ti` has stopped being block-inert (its
    /// endpoints' blocks diverged). Remove it from the inert prefixes on
    /// both sides and join it onto (or open) the adjacent saC group for its
    /// target. It stays constellation-inert, so the BLC index is untouched.
    /// The caller is responsible for bottom promotion of the source.
    pub(crate) fn make_outgoing_noninert(&mut self, ti: TransIdx) {
        let (from, to) = {
            let t = &self.trans[ti.as_usize()];
            (t.from, t.to)
        };
        debug_assert_eq!(
            self.constellation_of(from),
            self.constellation_of(to),
            "a block-inert transition is constellation-inert"
        );

        // Outgoing side: swap out of the inert prefix.
        let (out_start, inert_out) = {
            let st = self.state(from);
            (st.out_start, st.inert_out)
        };
        let slot = self.trans[ti.as_usize()].slot;
        debug_assert!(slot < out_start + inert_out, "transition is not block-inert");
        let prefix_last = out_start + inert_out - 1;
        self.swap_slots(slot, prefix_last);
        self.state_mut(from).inert_out = inert_out - 1;

        // The freed slot joins the group for (its label key, its target
        // constellation) when that group starts right next to it, and
        // becomes a singleton group otherwise.
        let g = prefix_last;
        let out_end = self.state(from).out_end;
        let key = self.label_key(self.trans[ti.as_usize()].label);
        let target = self.target_constellation(ti);
        let mut joined = false;
        if g + 1 < out_end {
            let (nk, nt) = self.group_key(g + 1);
            if nk == key && nt == target {
                let (nf, nl) = self.group_bounds(g + 1);
                debug_assert_eq!(nf, g + 1);
                // Prepend: the old first becomes interior and already obeys
                // the point-at-last rule; only the two ends change.
                self.out_slots[g].sac = nl;
                self.out_slots[nl].sac = g;
                joined = true;
            }
        }
        if !joined {
            self.out_slots[g].sac = g;
        }

        // Incoming side: swap out of the target's inert prefix.
        let (in_start, in_inert_end) = {
            let st = self.state(to);
            (st.in_start, st.in_inert_end)
        };
        let in_pos = self.trans[ti.as_usize()].in_pos;
        debug_assert!(in_start <= in_pos && in_pos < in_inert_end);
        let last = in_inert_end - 1;
        if in_pos != last {
            let other = self.incoming[last];
            self.incoming.swap(in_pos, last);
            self.trans[other.as_usize()].in_pos = in_pos;
            self.trans[ti.as_usize()].in_pos = last;
        }
        self.state_mut(to).in_inert_end = last;
    }

    // ------------------------------------------------------------------
    // Region refinement (the lazy part made concrete)
    // ------------------------------------------------------------------

    /// Whether a block is the only block of its region.
    pub(crate) fn region_is_simple(&self, b: BlockIdx) -> bool {
        let blk = self.block(b);
        let reg = &self.regions[blk.region.as_usize()];
        reg.start == blk.start && reg.end == blk.end
    }

    /// Isolate `b` into its own BLC source region, splitting the current
    /// region into up to three (the part before `b`, `b` itself, the part
    /// after). Every slice of the region is redistributed by source part,
    /// preserving transition order per part and the unmarked/marked
    /// segmentation; with `mark_all` set, sub-slices of unstable slices come
    /// out fully marked. Marked sub-slices join Q̂, and sub-slices of pinned
    /// pending splitters re-enter the pending splitter list, so no pending
    /// work is lost in the reshuffle.
    pub(crate) fn make_region_simple(&mut self, b: BlockIdx, mark_all: bool) {
        if self.region_is_simple(b) {
            return;
        }
        let old_region = self.block(b).region;
        let (r_start, r_end) = {
            let r = &self.regions[old_region.as_usize()];
            (r.start, r.end)
        };
        let (b_start, b_end) = {
            let blk = self.block(b);
            (blk.start, blk.end)
        };
        debug_assert!(r_start <= b_start && b_end <= r_end);

        // Save the slice order before the lists are rebuilt; the nodes keep
        // chaining until each is re-linked into its part's list.
        let order: Vec<NodeRef> =
            self.regions[old_region.as_usize()].slices.iter(&self.slices).collect();

        // Part 0: before `b`, part 1: `b`, part 2: after `b`. Empty parts
        // get no region; the old region entry is reused for the first
        // non-empty part.
        let bounds = [(r_start, b_start), (b_start, b_end), (b_end, r_end)];
        let mut part_region: [RegionIdx; 3] = [old_region; 3];
        let mut first_part = usize::MAX;
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if lo == hi {
                continue;
            }
            if first_part == usize::MAX {
                first_part = i;
                let r = &mut self.regions[old_region.as_usize()];
                r.start = lo;
                r.end = hi;
                r.inert = NodeRef::NIL;
                r.slices = SimpleList::new();
            } else {
                part_region[i] = RegionIdx(self.regions.len());
                self.regions.push(Region {
                    start: lo,
                    end: hi,
                    slices: SimpleList::new(),
                    inert: NodeRef::NIL,
                });
            }
        }
        // Re-aim the region of every block that landed in a fresh part.
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if part_region[i] == old_region {
                continue;
            }
            let mut p = lo;
            while p < hi {
                let blk = self.block_of(self.state_order[p]);
                self.blocks[blk.as_usize()].region = part_region[i];
                p = self.block(blk).end;
            }
        }

        for node in order {
            self.distribute_slice(node, b_start, b_end, part_region, mark_all);
        }
    }

    /// Redistribute one slice over the three parts of a region split.
    fn distribute_slice(
        &mut self,
        node: NodeRef,
        b_start: usize,
        b_end: usize,
        part_region: [RegionIdx; 3],
        mark_all: bool,
    ) -> NodeRef {
        let (s, e, m_opt, label, target, small_flag, was_pinned, was_pending) = {
            let sl = self.slices.get(node);
            (
                sl.start,
                sl.end,
                sl.marked,
                sl.label,
                sl.target,
                sl.small_flag,
                sl.pinned,
                sl.pending,
            )
        };
        debug_assert!(target != SliceTarget::Inert || m_opt.is_none());
        let m = m_opt.unwrap_or(e);

        let mut unmarked: [Vec<TransIdx>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        let mut marked: [Vec<TransIdx>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for i in s..e {
            let ti = self.blc_order[i];
            let pos = self.state(self.trans[ti.as_usize()].from).pos;
            let part = if pos < b_start {
                0
            } else if pos < b_end {
                1
            } else {
                2
            };
            if i < m {
                unmarked[part].push(ti);
            } else {
                marked[part].push(ti);
            }
        }

        let mut cursor = s;
        let mut mid = NodeRef::NIL;
        let mut reused = false;
        for part in 0..3 {
            let count = unmarked[part].len() + marked[part].len();
            if count == 0 {
                continue;
            }
            let p_start = cursor;
            for k in 0..unmarked[part].len() {
                let ti = unmarked[part][k];
                self.blc_order[cursor] = ti;
                self.trans[ti.as_usize()].blc_pos = cursor;
                cursor += 1;
            }
            let p_mark = cursor;
            for k in 0..marked[part].len() {
                let ti = marked[part][k];
                self.blc_order[cursor] = ti;
                self.trans[ti.as_usize()].blc_pos = cursor;
                cursor += 1;
            }
            let p_end = cursor;
            let p_marked = if m_opt.is_some() {
                Some(if mark_all { p_start } else { p_mark })
            } else {
                None
            };
            let sub = if !reused {
                reused = true;
                let sl = self.slices.get_mut(node);
                sl.start = p_start;
                sl.end = p_end;
                sl.marked = p_marked;
                sl.region = part_region[part];
                node
            } else {
                let fresh = self.slices.alloc(BlcSlice {
                    start: p_start,
                    end: p_end,
                    marked: p_marked,
                    label,
                    target,
                    region: part_region[part],
                    small_flag,
                    pinned: was_pinned,
                    dead: false,
                    queued: false,
                    pending: was_pending,
                });
                if was_pending {
                    // The original is a pending main splitter; its other
                    // parts must be processed as splitters of their own.
                    self.pending_splitters.push(fresh);
                }
                fresh
            };
            let mut list = self.regions[part_region[part].as_usize()].slices;
            list.push_back(&mut self.slices, sub);
            self.regions[part_region[part].as_usize()].slices = list;
            if target == SliceTarget::Inert {
                self.regions[part_region[part].as_usize()].inert = sub;
            }
            for k in 0..count {
                let ti = self.blc_order[p_start + k];
                self.trans[ti.as_usize()].slice = sub;
            }
            if p_marked.is_some() && !self.slices.get(sub).queued {
                self.slices.get_mut(sub).queued = true;
                self.qhat.push(sub);
            }
            if part == 1 {
                mid = sub;
            }
        }
        debug_assert_eq!(cursor, e);
        mid
    }
}
