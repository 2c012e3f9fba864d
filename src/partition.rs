//! Indexed entity arrays & the refinable partition
//!
//! Every entity of the refinement — states, transitions, outgoing slots,
//! blocks, constellations, BLC source regions — lives in a flat vector owned
//! by the [`Partitioner`]; cross-references are plain indices. The
//! state-in-block array `state_order` is a permutation of the states with a
//! per-state back pointer `pos`, so that
//! `state_order[states[s].pos] == s` always holds and a block or
//! constellation is nothing but a half-open range of that permutation.
//!
//! Within a block, bottom states (no block-inert outgoing transition) occupy
//! the prefix `[start, bottom_end)`; non-bottom states follow. A state's
//! block-inert outgoing transitions occupy the prefix of its outgoing slots.
//!
//! The scratch `counter` of a state is only meaningful while a four-way
//! split is running; its encoding (three reserved values plus three
//! equal-sized coroutine ranges) is defined here.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::lts::{LabelIdx, LtsView, StateIdx, TransIdx};
use crate::pool::{NodeRef, Pool, SimpleList};
use crate::ReduceError;

// ============================================================================
// Index newtypes for the partition entities
// ============================================================================

/// Index of a block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIdx(pub usize);

impl BlockIdx {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Index of a constellation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstIdx(pub usize);

impl ConstIdx {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Index of a BLC source region.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionIdx(pub usize);

impl RegionIdx {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

// ============================================================================
// Scratch-counter encoding
// ============================================================================

/// Counter value of a state that no split has touched.
pub(crate) const UNDEFINED: usize = 0;
/// Counter of a non-bottom state with a transition in the (fully scanned)
/// small splitter, not yet claimed by any coroutine.
pub(crate) const HIT_SMALL: usize = usize::MAX;
/// Counter of a state claimed by the NewBotSt coroutine.
pub(crate) const NEW_BOT: usize = usize::MAX - 1;
/// Width of one coroutine's counter range.
pub(crate) const COUNTER_RANGE: usize = (usize::MAX - 2) / 3;

/// The three searching coroutines of a four-way split. NewBotSt is the
/// fourth coroutine but has no counter range of its own (`NEW_BOT`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Sub {
    ReachAlw = 0,
    AvoidSml = 1,
    AvoidLrg = 2,
}

pub(crate) const SEARCHERS: [Sub; 3] = [Sub::ReachAlw, Sub::AvoidSml, Sub::AvoidLrg];

/// First counter value of coroutine `c`; a state finalised into `c` carries
/// exactly this value. `base(c) + r` encodes `r` still-unvisited block-inert
/// successors.
#[inline]
pub(crate) fn base(c: Sub) -> usize {
    1 + (c as usize) * COUNTER_RANGE
}

/// Which coroutine's range `counter` falls into, if any.
#[inline]
pub(crate) fn counter_owner(counter: usize) -> Option<Sub> {
    if counter == UNDEFINED || counter >= NEW_BOT {
        return None;
    }
    match (counter - 1) / COUNTER_RANGE {
        0 => Some(Sub::ReachAlw),
        1 => Some(Sub::AvoidSml),
        _ => Some(Sub::AvoidLrg),
    }
}

#[inline]
pub(crate) fn log2_floor(x: usize) -> u32 {
    debug_assert!(x > 0);
    usize::BITS - 1 - x.leading_zeros()
}

// ============================================================================
// Entity records
// ============================================================================

pub(crate) struct StateEntry {
    pub block: BlockIdx,
    /// Position in `state_order` (the state-in-block array).
    pub pos: usize,
    /// Outgoing slot range `[out_start, out_end)`; the first `inert_out`
    /// slots are the currently block-inert transitions.
    pub out_start: usize,
    pub out_end: usize,
    pub inert_out: usize,
    /// Incoming range `[in_start, in_end)`; `[in_start, in_inert_end)` are
    /// the currently block-inert incoming transitions.
    pub in_start: usize,
    pub in_inert_end: usize,
    pub in_end: usize,
    /// Scratch; `UNDEFINED` between splits.
    pub counter: usize,
}

pub(crate) struct TransEntry {
    pub from: StateIdx,
    pub label: LabelIdx,
    pub to: StateIdx,
    /// Outgoing slot representing this transition.
    pub slot: usize,
    /// Position in the incoming array.
    pub in_pos: usize,
    /// BLC slice containing this transition.
    pub slice: NodeRef,
    /// Position in the flat BLC transition array.
    pub blc_pos: usize,
}

/// One entry per transition, grouped by source state and, within a state,
/// by (label, target constellation). `sac` is the same-saC chain: a slot
/// that is not the last of its group points to the last; the last points
/// back to the first; a singleton points to itself.
pub(crate) struct OutSlot {
    pub trans: TransIdx,
    pub sac: usize,
}

pub(crate) struct Block {
    pub start: usize,
    pub bottom_end: usize,
    pub end: usize,
    pub constellation: ConstIdx,
    pub region: RegionIdx,
    pub new_bottom: bool,
    pub queued: bool,
    /// Smallness credit (`small_subblock_counter`).
    pub credits: u32,
    /// Transient slot into the scan table of the splitter scan in progress.
    pub scan_slot: usize,
}

impl Block {
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn has_nonbottom(&self) -> bool {
        self.bottom_end < self.end
    }
}

pub(crate) struct Constellation {
    pub start: usize,
    pub end: usize,
    pub on_stack: bool,
}

/// Contiguous run of whole blocks that still share one BLC slice list.
pub(crate) struct Region {
    pub start: usize,
    pub end: usize,
    pub slices: SimpleList,
    /// The designated constellation-inert slice, nil when absent.
    pub inert: NodeRef,
}

/// Target of a BLC slice.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum SliceTarget {
    /// All transitions in the slice end in this constellation.
    Constellation(ConstIdx),
    /// The constellation-inert slice: every transition is silent and ends in
    /// its own source's constellation. Exempt from the single-target rule,
    /// never a splitter, never split within one constellation.
    Inert,
}

/// A BLC slice: contiguous range `[start, end)` of the flat BLC transition
/// array, one label, one target, sources within one region. `marked` is the
/// start of the marked suffix; `Some(_)` means the slice is unstable.
pub(crate) struct BlcSlice {
    pub start: usize,
    pub end: usize,
    pub marked: Option<usize>,
    pub label: LabelIdx,
    pub target: SliceTarget,
    pub region: RegionIdx,
    pub small_flag: bool,
    pub pinned: bool,
    pub dead: bool,
    pub queued: bool,
    /// Whether this slice sits in the pending main-splitter list.
    pub pending: bool,
}

impl BlcSlice {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The marked suffix (empty for a stable slice).
    #[inline]
    pub fn marked_range(&self) -> (usize, usize) {
        (self.marked.unwrap_or(self.end), self.end)
    }
}

// ============================================================================
// The partitioner state
// ============================================================================

/// All mutable state of one refinement run. The backing vectors own every
/// entity; everything else is an index into them.
pub(crate) struct Partitioner<'a, L: LtsView> {
    pub lts: &'a L,
    pub branching: bool,
    pub preserve_divergence: bool,
    /// Canonical silent label; all silent labels are keyed onto it under
    /// branching semantics (they are interchangeable there).
    pub canonical_silent: Option<LabelIdx>,

    pub states: Vec<StateEntry>,
    pub trans: Vec<TransEntry>,
    pub out_slots: Vec<OutSlot>,
    pub incoming: Vec<TransIdx>,
    pub state_order: Vec<StateIdx>,
    pub blc_order: Vec<TransIdx>,

    pub blocks: Vec<Block>,
    pub constellations: Vec<Constellation>,
    pub regions: Vec<Region>,
    pub slices: Pool<BlcSlice>,

    /// Constellations with more than one block, pending refinement.
    pub nontrivial: Vec<ConstIdx>,
    /// Blocks flagged `new_bottom` awaiting stabilisation.
    pub new_bottom_queue: Vec<BlockIdx>,
    /// Unstable slices awaiting stabilisation (Q̂).
    pub qhat: Vec<NodeRef>,
    /// Main splitters of the constellation round in progress. Pinned; a
    /// region split of a pinned main re-enqueues its sub-slices here.
    pub pending_splitters: Vec<NodeRef>,
    /// Emptied slices still referenced by a pending refinement record.
    pub deferred: Vec<NodeRef>,
}

impl<'a, L: LtsView> Partitioner<'a, L> {
    /// Allocate the entity arrays and derive outgoing slots, the incoming
    /// index, and the initial one-block partition. BLC slices are built by
    /// `init_blc` (in `blc.rs`).
    pub fn new(
        lts: &'a L,
        branching: bool,
        preserve_divergence: bool,
    ) -> Result<Self, ReduceError> {
        let n = lts.num_states();
        let m = lts.transitions().len();

        // The counter encoding must be able to hold `1 + inert degree`, and
        // positions must stay clear of the sentinel values.
        if m + 2 >= COUNTER_RANGE || n + 2 >= COUNTER_RANGE {
            return Err(ReduceError::CapacityExceeded);
        }

        let mut states: Vec<StateEntry> = Vec::new();
        let mut trans: Vec<TransEntry> = Vec::new();
        let mut out_slots: Vec<OutSlot> = Vec::new();
        let mut incoming: Vec<TransIdx> = Vec::new();
        let mut state_order: Vec<StateIdx> = Vec::new();
        let mut blc_order: Vec<TransIdx> = Vec::new();
        states.try_reserve_exact(n).map_err(|_| ReduceError::OutOfMemory)?;
        trans.try_reserve_exact(m).map_err(|_| ReduceError::OutOfMemory)?;
        out_slots.try_reserve_exact(m).map_err(|_| ReduceError::OutOfMemory)?;
        incoming.try_reserve_exact(m).map_err(|_| ReduceError::OutOfMemory)?;
        state_order.try_reserve_exact(n).map_err(|_| ReduceError::OutOfMemory)?;
        blc_order.try_reserve_exact(m).map_err(|_| ReduceError::OutOfMemory)?;

        let canonical_silent =
            (0..lts.num_labels()).map(LabelIdx).find(|&l| lts.is_silent(l));
        let mut p = Partitioner {
            lts,
            branching,
            preserve_divergence,
            canonical_silent,
            states,
            trans,
            out_slots,
            incoming,
            state_order,
            blc_order,
            blocks: Vec::new(),
            constellations: Vec::new(),
            regions: Vec::new(),
            slices: Pool::new(),
            nontrivial: Vec::new(),
            new_bottom_queue: Vec::new(),
            qhat: Vec::new(),
            pending_splitters: Vec::new(),
            deferred: Vec::new(),
        };
        p.build_entities();
        Ok(p)
    }

    /// Whether a transition can ever be block-inert: silent, and not a
    /// self-loop when divergence is preserved. Without branching semantics
    /// nothing is inert.
    #[inline]
    pub fn inert_candidate(&self, label: LabelIdx, from: StateIdx, to: StateIdx) -> bool {
        self.branching
            && self.lts.is_silent(label)
            && !(self.preserve_divergence && from == to)
    }

    /// Grouping key of a label. Under branching semantics every silent label
    /// maps onto the canonical one; strong bisimulation keeps labels apart.
    #[inline]
    pub fn label_key(&self, label: LabelIdx) -> LabelIdx {
        if self.branching && self.lts.is_silent(label) {
            self.canonical_silent.unwrap_or(label)
        } else {
            label
        }
    }

    fn build_entities(&mut self) {
        let n = self.lts.num_states();
        let lts_trans = self.lts.transitions();
        let m = lts_trans.len();

        for t in lts_trans {
            self.trans.push(TransEntry {
                from: t.from,
                label: t.label,
                to: t.to,
                slot: 0,
                in_pos: 0,
                slice: NodeRef::NIL,
                blc_pos: 0,
            });
        }

        // Incoming index: per target state, block-inert candidates first.
        let mut in_count = vec![0usize; n + 1];
        for t in lts_trans {
            in_count[t.to.as_usize() + 1] += 1;
        }
        for i in 0..n {
            in_count[i + 1] += in_count[i];
        }
        let in_start = in_count;
        let mut inert_cursor = vec![0usize; n];
        let mut tail_cursor = vec![0usize; n];
        for (s, c) in inert_cursor.iter_mut().enumerate() {
            *c = in_start[s];
        }
        for ti in 0..m {
            let t = &self.trans[ti];
            if self.inert_candidate(t.label, t.from, t.to) {
                inert_cursor[t.to.as_usize()] += 1;
            }
        }
        let mut in_inert_end = vec![0usize; n];
        for s in 0..n {
            in_inert_end[s] = inert_cursor[s];
            tail_cursor[s] = inert_cursor[s];
            inert_cursor[s] = in_start[s];
        }
        self.incoming.resize(m, TransIdx(0));
        for ti in 0..m {
            let (to, inert) = {
                let t = &self.trans[ti];
                (t.to.as_usize(), self.inert_candidate(t.label, t.from, t.to))
            };
            let pos = if inert {
                let p = inert_cursor[to];
                inert_cursor[to] += 1;
                p
            } else {
                let p = tail_cursor[to];
                tail_cursor[to] += 1;
                p
            };
            self.incoming[pos] = TransIdx(ti);
            self.trans[ti].in_pos = pos;
        }

        // Outgoing slots: per source state, block-inert candidates first,
        // then non-inert transitions grouped by (silent-first, label).
        let mut order: Vec<TransIdx> = (0..m).map(TransIdx).collect();
        order.sort_unstable_by_key(|&TransIdx(i)| {
            let t = &self.trans[i];
            let inert = self.inert_candidate(t.label, t.from, t.to);
            let silent = self.lts.is_silent(t.label);
            (
                t.from.as_usize(),
                if inert { 0usize } else { 1 },
                if silent { 0usize } else { 1 },
                self.label_key(t.label).as_usize(),
            )
        });
        self.out_slots.resize_with(m, || OutSlot { trans: TransIdx(0), sac: 0 });
        let mut out_start = vec![0usize; n + 1];
        for t in lts_trans {
            out_start[t.from.as_usize() + 1] += 1;
        }
        for i in 0..n {
            out_start[i + 1] += out_start[i];
        }
        for (slot, &ti) in order.iter().enumerate() {
            self.out_slots[slot] = OutSlot { trans: ti, sac: slot };
            self.trans[ti.as_usize()].slot = slot;
        }

        // States: counts, then the bottom-first state order.
        let mut inert_out = vec![0usize; n];
        for t in lts_trans {
            if self.inert_candidate(t.label, t.from, t.to) {
                inert_out[t.from.as_usize()] += 1;
            }
        }
        for s in 0..n {
            self.states.push(StateEntry {
                block: BlockIdx(0),
                pos: 0,
                out_start: out_start[s],
                out_end: out_start[s + 1],
                inert_out: inert_out[s],
                in_start: in_start[s],
                in_inert_end: in_inert_end[s],
                in_end: in_start[s + 1],
                counter: UNDEFINED,
            });
        }
        self.state_order.resize(n, StateIdx(0));
        let bottoms = inert_out.iter().filter(|&&c| c == 0).count();
        let mut bottom_cursor = 0usize;
        let mut nonbottom_cursor = bottoms;
        for s in 0..n {
            let pos = if inert_out[s] == 0 {
                let p = bottom_cursor;
                bottom_cursor += 1;
                p
            } else {
                let p = nonbottom_cursor;
                nonbottom_cursor += 1;
                p
            };
            self.state_order[pos] = StateIdx(s);
            self.states[s].pos = pos;
        }

        // Build the saC chains of the initial non-inert label groups.
        for s in 0..n {
            let (lo, hi) = (self.states[s].out_start, self.states[s].out_end);
            let mut g = lo + self.states[s].inert_out;
            while g < hi {
                let key = self.label_key(self.trans[self.out_slots[g].trans.as_usize()].label);
                let mut last = g;
                while last + 1 < hi
                    && self.label_key(self.trans[self.out_slots[last + 1].trans.as_usize()].label)
                        == key
                {
                    last += 1;
                }
                self.init_sac_group(g, last);
                g = last + 1;
            }
        }

        // The trivial partition: one block, one constellation, one region.
        self.blocks.push(Block {
            start: 0,
            bottom_end: bottoms,
            end: n,
            constellation: ConstIdx(0),
            region: RegionIdx(0),
            new_bottom: false,
            queued: false,
            credits: 0,
            scan_slot: usize::MAX,
        });
        self.constellations.push(Constellation { start: 0, end: n, on_stack: false });
        self.regions.push(Region {
            start: 0,
            end: n,
            slices: SimpleList::new(),
            inert: NodeRef::NIL,
        });
    }

    /// Set the saC chain of a fresh group `[first, last]`.
    pub(crate) fn init_sac_group(&mut self, first: usize, last: usize) {
        for slot in first..=last {
            self.out_slots[slot].sac = last;
        }
        self.out_slots[last].sac = first;
    }

    // ------------------------------------------------------------------
    // Elementary accessors
    // ------------------------------------------------------------------

    #[inline]
    pub fn state(&self, s: StateIdx) -> &StateEntry {
        &self.states[s.as_usize()]
    }

    #[inline]
    pub fn state_mut(&mut self, s: StateIdx) -> &mut StateEntry {
        &mut self.states[s.as_usize()]
    }

    #[inline]
    pub fn block(&self, b: BlockIdx) -> &Block {
        &self.blocks[b.as_usize()]
    }

    #[inline]
    pub fn block_mut(&mut self, b: BlockIdx) -> &mut Block {
        &mut self.blocks[b.as_usize()]
    }

    #[inline]
    pub fn block_of(&self, s: StateIdx) -> BlockIdx {
        self.state(s).block
    }

    /// Constellation a state currently belongs to.
    #[inline]
    pub fn constellation_of(&self, s: StateIdx) -> ConstIdx {
        self.block(self.block_of(s)).constellation
    }

    /// Target constellation of a transition.
    #[inline]
    pub fn target_constellation(&self, t: TransIdx) -> ConstIdx {
        self.constellation_of(self.trans[t.as_usize()].to)
    }

    #[inline]
    pub fn is_bottom(&self, s: StateIdx) -> bool {
        self.state(s).inert_out == 0
    }

    /// Whether a constellation consists of more than one block.
    pub fn constellation_is_trivial(&self, c: ConstIdx) -> bool {
        let con = &self.constellations[c.as_usize()];
        let first = self.block_of(self.state_order[con.start]);
        self.block(first).end >= con.end
    }

    /// Swap two positions of the state-in-block array, keeping the
    /// back pointers consistent.
    pub fn swap_positions(&mut self, p: usize, q: usize) {
        if p == q {
            return;
        }
        let sp = self.state_order[p];
        let sq = self.state_order[q];
        self.state_order[p] = sq;
        self.state_order[q] = sp;
        self.states[sp.as_usize()].pos = q;
        self.states[sq.as_usize()].pos = p;
    }

    /// Promote `s` (currently non-bottom) to bottom status in its block,
    /// flagging and queueing the block for stabilisation.
    pub fn promote_to_bottom(&mut self, s: StateIdx) {
        let b = self.block_of(s);
        debug_assert_eq!(self.state(s).inert_out, 0);
        let bottom_end = self.block(b).bottom_end;
        debug_assert!(self.state(s).pos >= bottom_end, "state is already bottom");
        self.swap_positions(self.state(s).pos, bottom_end);
        let blk = self.block_mut(b);
        blk.bottom_end += 1;
        blk.new_bottom = true;
        if blk.len() > 1 && !blk.queued {
            blk.queued = true;
            self.new_bottom_queue.push(b);
        }
    }

    /// Number of equivalence classes (blocks) currently present.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_encoding_round_trips() {
        assert_eq!(counter_owner(UNDEFINED), None);
        assert_eq!(counter_owner(HIT_SMALL), None);
        assert_eq!(counter_owner(NEW_BOT), None);
        for c in SEARCHERS {
            assert_eq!(counter_owner(base(c)), Some(c));
            assert_eq!(counter_owner(base(c) + COUNTER_RANGE - 1), Some(c));
        }
        // The three ranges and the sentinels do not overlap.
        assert!(base(Sub::AvoidLrg) + COUNTER_RANGE - 1 < NEW_BOT);
    }

    #[test]
    fn log2_floor_matches_bit_length() {
        assert_eq!(log2_floor(1), 0);
        assert_eq!(log2_floor(2), 1);
        assert_eq!(log2_floor(3), 1);
        assert_eq!(log2_floor(4), 2);
        assert_eq!(log2_floor(1023), 9);
        assert_eq!(log2_floor(1024), 10);
    }
}
