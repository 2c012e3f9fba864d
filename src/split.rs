//! Four-way cooperative split
//!
//! `four_way_split` refines one block under a small splitter (already
//! scanned) and an optional large splitter into up to four subblocks:
//!
//! - **ReachAlw** — states from which every provided splitter is reachable
//!   along block-inert paths;
//! - **AvoidSml** — states that cannot inertly reach the small splitter;
//! - **AvoidLrg** — states that cannot inertly reach the large splitter;
//! - **NewBotSt** — states whose inert successors span several of the above;
//!   they lose inert transitions in the split and become new bottom states.
//!
//! The three searchers are explicit state machines stepped round-robin, one
//! unit of work per step (one incoming transition visited, or one outgoing
//! saC group swept). A state is claimed on first visit and finalised when
//! all of its block-inert successors are finalised into the same searcher;
//! visits from two different searchers move a state to NewBotSt instead.
//!
//! The size-abort rule bounds the work: a searcher that provably exceeds
//! half of the block stops searching and simply receives every state the
//! others leave behind. The block size is fixed at entry, and claimed sets
//! are disjoint, so at most one searcher can ever abort.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::lts::{LabelIdx, LtsView, StateIdx};
use crate::partition::{
    base, counter_owner, log2_floor, Block, BlockIdx, ConstIdx, Partitioner, SliceTarget, Sub,
    HIT_SMALL, NEW_BOT, UNDEFINED,
};

/// Per-block result of scanning a splitter: the classified bottom states
/// and the non-bottom sources (marked `HIT_SMALL`).
pub(crate) struct ScanInit {
    pub block: BlockIdx,
    pub ra_bottoms: Vec<StateIdx>,
    pub al_bottoms: Vec<StateIdx>,
    pub hit_small: Vec<StateIdx>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Phase {
    Running,
    Aborted,
    Finished,
}

/// One searching coroutine. Its explicit states are: picking a state to
/// walk (`cur == None`), walking that state's incoming inert transitions
/// (`cur == Some(..)`), sweeping a candidate's outgoing groups before
/// finalising it (`sweep == Some(..)`), aborted, finished.
struct Searcher {
    kind: Sub,
    phase: Phase,
    todo: Vec<StateIdx>,
    potential: Vec<StateIdx>,
    nonbottoms: Vec<StateIdx>,
    /// AvoidSml only: cursor over the parent's bottom range claiming the
    /// bottoms nobody else classified, plus the list of bottoms claimed.
    bottom_cursor: usize,
    bottom_cursor_end: usize,
    seen_bottoms: Vec<StateIdx>,
    size: usize,
    cur: Option<(StateIdx, usize, usize)>,
    sweep: Option<(StateIdx, usize)>,
    /// A state may only be finalised here if it has no own transition with
    /// this `(label key, target constellation)`; checked by sweeping.
    sweep_target: Option<(LabelIdx, ConstIdx)>,
}

impl Searcher {
    fn new(kind: Sub, sweep_target: Option<(LabelIdx, ConstIdx)>) -> Self {
        Searcher {
            kind,
            phase: Phase::Running,
            todo: Vec::new(),
            potential: Vec::new(),
            nonbottoms: Vec::new(),
            bottom_cursor: 0,
            bottom_cursor_end: 0,
            seen_bottoms: Vec::new(),
            size: 0,
            cur: None,
            sweep: None,
            sweep_target,
        }
    }
}

/// The NewBotSt coroutine: a backward closure (any inert successor in
/// NewBotSt pulls the source in) plus, once only AvoidLrg still searches,
/// a walk over the block's own co-splitter slices.
struct NewBot {
    todo: Vec<StateIdx>,
    members: Vec<StateIdx>,
    cur: Option<(StateIdx, usize, usize)>,
    walk2: Vec<(usize, usize)>,
    phase2_done: bool,
}

struct Ctx {
    block: BlockIdx,
    u_total: usize,
    large: Option<(LabelIdx, ConstIdx)>,
}

impl<'a, L: LtsView> Partitioner<'a, L> {
    // ------------------------------------------------------------------
    // Splitter scan
    // ------------------------------------------------------------------

    /// Scan the BLC range `[lo, hi)` of a small splitter, classifying the
    /// source states per hit block. With a large splitter towards `c_old`,
    /// bottom sources split into ReachAlw (both splitters) and AvoidLrg
    /// (main only) using the saC adjacency of main and co groups; without
    /// one, every bottom source is ReachAlw. Non-bottom sources are marked
    /// `HIT_SMALL`. Blocks of size one never split and are skipped.
    pub(crate) fn scan_splitter(
        &mut self,
        lo: usize,
        hi: usize,
        c_old: Option<ConstIdx>,
    ) -> Vec<ScanInit> {
        let mut inits: Vec<ScanInit> = Vec::new();
        for pos in lo..hi {
            let ti = self.blc_order[pos];
            let u = self.trans[ti.as_usize()].from;
            let b = self.block_of(u);
            if self.block(b).len() <= 1 {
                continue;
            }
            let idx = if self.block(b).scan_slot == usize::MAX {
                self.block_mut(b).scan_slot = inits.len();
                inits.push(ScanInit {
                    block: b,
                    ra_bottoms: Vec::new(),
                    al_bottoms: Vec::new(),
                    hit_small: Vec::new(),
                });
                inits.len() - 1
            } else {
                self.block(b).scan_slot
            };
            if self.is_bottom(u) {
                if self.state(u).counter != UNDEFINED {
                    continue;
                }
                match c_old {
                    Some(c) if !self.main_has_adjacent_co(ti, c) => {
                        self.state_mut(u).counter = base(Sub::AvoidLrg);
                        inits[idx].al_bottoms.push(u);
                    }
                    _ => {
                        self.state_mut(u).counter = base(Sub::ReachAlw);
                        inits[idx].ra_bottoms.push(u);
                    }
                }
            } else {
                if self.state(u).counter == HIT_SMALL {
                    continue;
                }
                debug_assert_eq!(self.state(u).counter, UNDEFINED);
                self.state_mut(u).counter = HIT_SMALL;
                inits[idx].hit_small.push(u);
            }
        }
        for init in &inits {
            self.block_mut(init.block).scan_slot = usize::MAX;
        }
        inits
    }

    // ------------------------------------------------------------------
    // The split itself
    // ------------------------------------------------------------------

    /// Refine `init.block` under the scanned small splitter `small_key` and
    /// the optional large splitter. New blocks inherit region and
    /// constellation; blocks that gain bottom states are flagged and queued.
    pub(crate) fn four_way_split(
        &mut self,
        init: ScanInit,
        small_key: (LabelIdx, ConstIdx),
        large: Option<(LabelIdx, ConstIdx)>,
    ) {
        let ScanInit { block, ra_bottoms, al_bottoms, hit_small } = init;
        let (p_start, p_bottom_end, p_end) = {
            let b = self.block(block);
            (b.start, b.bottom_end, b.end)
        };
        let u_total = p_end - p_start;
        debug_assert!(u_total > 1);
        debug_assert!(large.is_some() || al_bottoms.is_empty());

        let mut searchers = [
            Searcher::new(Sub::ReachAlw, None),
            Searcher::new(Sub::AvoidSml, Some(small_key)),
            Searcher::new(Sub::AvoidLrg, large),
        ];
        searchers[0].size = ra_bottoms.len();
        searchers[0].todo = ra_bottoms;
        searchers[2].size = al_bottoms.len();
        searchers[2].todo = al_bottoms;
        searchers[1].bottom_cursor = p_start;
        searchers[1].bottom_cursor_end = p_bottom_end;
        if large.is_none() {
            searchers[2].phase = Phase::Finished;
        }

        let mut nbs = NewBot {
            todo: Vec::new(),
            members: Vec::new(),
            cur: None,
            walk2: Vec::new(),
            phase2_done: false,
        };
        let ctx = Ctx { block, u_total, large };
        let mut aborted: Option<Sub> = None;

        // A searcher seeded over half of the block aborts before stepping.
        for i in [0usize, 2] {
            if aborted.is_none()
                && searchers[i].phase == Phase::Running
                && searchers[i].size * 2 > u_total
            {
                aborted = Some(searchers[i].kind);
                searchers[i].phase = Phase::Aborted;
            }
        }

        loop {
            if !nbs.phase2_done
                && ctx.large.is_some()
                && searchers[0].phase == Phase::Finished
                && searchers[1].phase == Phase::Finished
                && searchers[2].phase != Phase::Finished
            {
                // Only AvoidLrg and NewBotSt remain: isolate the block and
                // let NewBotSt walk exactly its transitions in the large
                // splitter, so no co-splitter source can linger unresolved.
                nbs.phase2_done = true;
                self.make_region_simple(ctx.block, false);
                let (lbl, c_old) = ctx.large.unwrap();
                let region = self.block(ctx.block).region;
                let list = self.regions[region.as_usize()].slices;
                for node in list.iter(&self.slices) {
                    let sl = self.slices.get(node);
                    if sl.label == lbl && sl.target == SliceTarget::Constellation(c_old) {
                        nbs.walk2.push((sl.start, sl.end));
                    }
                }
            }

            let mut progress = false;
            for i in 0..3 {
                if searchers[i].phase == Phase::Running {
                    self.searcher_step(&mut searchers, i, &mut nbs, &ctx, &mut aborted);
                    progress = true;
                }
            }
            if nbs.cur.is_some() || !nbs.todo.is_empty() || !nbs.walk2.is_empty() {
                self.nbs_step(&mut searchers, &mut nbs, &ctx);
                progress = true;
            }
            if !progress {
                break;
            }
        }

        self.finalise_split(
            block,
            p_start,
            p_bottom_end,
            p_end,
            searchers,
            nbs,
            aborted,
            hit_small,
        );
    }

    fn abort_searcher(
        &mut self,
        sr: &mut Searcher,
        nbs: &mut NewBot,
        aborted: &mut Option<Sub>,
    ) {
        debug_assert!(aborted.is_none());
        *aborted = Some(sr.kind);
        sr.phase = Phase::Aborted;
        sr.cur = None;
        if let Some((u, _)) = sr.sweep.take() {
            // The candidate was never cleared; it stays unresolved.
            self.state_mut(u).counter = NEW_BOT;
            nbs.todo.push(u);
        }
    }

    /// One cooperative step of a searcher.
    fn searcher_step(
        &mut self,
        searchers: &mut [Searcher; 3],
        idx: usize,
        nbs: &mut NewBot,
        ctx: &Ctx,
        aborted: &mut Option<Sub>,
    ) {
        let sr = &mut searchers[idx];

        // outgoing_constellation_checking: one saC group per step.
        if let Some((u, g)) = sr.sweep {
            let out_end = self.state(u).out_end;
            let (lbl, tc) = sr.sweep_target.expect("sweeping without a target");
            if g >= out_end {
                sr.sweep = None;
                sr.todo.push(u);
                sr.nonbottoms.push(u);
                return;
            }
            let (gf, gl) = self.group_bounds(g);
            debug_assert_eq!(gf, g);
            let (key, target) = self.group_key(g);
            if key == lbl && target == tc && self.group_has_noninert(gf, gl) {
                // The candidate reaches the splitter itself; it belongs to
                // NewBotSt, not here.
                sr.sweep = None;
                self.state_mut(u).counter = NEW_BOT;
                nbs.todo.push(u);
                return;
            }
            sr.sweep = Some((u, gl + 1));
            return;
        }

        // state_checking: pick the next finalised state and open its
        // incoming inert transitions.
        if sr.cur.is_none() {
            if let Some(u) = sr.todo.pop() {
                let st = self.state(u);
                sr.cur = Some((u, st.in_start, st.in_inert_end));
                return;
            }
            if sr.kind == Sub::AvoidSml {
                while sr.bottom_cursor < sr.bottom_cursor_end {
                    let u = self.state_order[sr.bottom_cursor];
                    sr.bottom_cursor += 1;
                    if self.state(u).counter != UNDEFINED {
                        continue;
                    }
                    self.state_mut(u).counter = base(Sub::AvoidSml);
                    sr.seen_bottoms.push(u);
                    sr.size += 1;
                    if aborted.is_none() && sr.size * 2 > ctx.u_total {
                        self.abort_searcher(sr, nbs, aborted);
                        return;
                    }
                    let st = self.state(u);
                    sr.cur = Some((u, st.in_start, st.in_inert_end));
                    return;
                }
            }
            // Out of work: unresolved candidates have successors in other
            // subblocks and migrate to NewBotSt; then this searcher is done.
            for i in 0..sr.potential.len() {
                let u = sr.potential[i];
                let c = self.state(u).counter;
                if counter_owner(c) == Some(sr.kind) && c != base(sr.kind) {
                    self.state_mut(u).counter = NEW_BOT;
                    nbs.todo.push(u);
                }
            }
            sr.phase = Phase::Finished;
            return;
        }

        // incoming_inert_transition_checking: visit one transition.
        let (v, i, end) = sr.cur.unwrap();
        if i == end {
            sr.cur = None;
            return;
        }
        sr.cur = Some((v, i + 1, end));
        let ti = self.incoming[i];
        let u = self.trans[ti.as_usize()].from;
        if self.block_of(u) != ctx.block {
            return;
        }
        debug_assert!(!self.is_bottom(u));

        let c = self.state(u).counter;
        let b = base(sr.kind);
        if c == NEW_BOT || c == b {
            return;
        }
        if c == UNDEFINED || c == HIT_SMALL {
            if c == HIT_SMALL && sr.kind == Sub::AvoidSml {
                // The state has a small-splitter transition of its own.
                self.state_mut(u).counter = NEW_BOT;
                nbs.todo.push(u);
                return;
            }
            let remaining = self.state(u).inert_out;
            debug_assert!(remaining >= 1);
            self.state_mut(u).counter = b + remaining - 1;
            sr.size += 1;
            sr.potential.push(u);
            if aborted.is_none() && sr.size * 2 > ctx.u_total {
                self.abort_searcher(sr, nbs, aborted);
                return;
            }
            if remaining == 1 {
                sr.potential.pop();
                self.finalise_candidate(sr, u);
            }
            return;
        }
        match counter_owner(c) {
            Some(k) if k == sr.kind => {
                let nc = c - 1;
                self.state_mut(u).counter = nc;
                if nc == b {
                    self.finalise_candidate(sr, u);
                }
            }
            _ => {
                // Claimed by another searcher: inert successors in two
                // different subblocks.
                self.state_mut(u).counter = NEW_BOT;
                nbs.todo.push(u);
            }
        }
    }

    /// All inert successors of `u` are finalised into `sr`; finalise `u`
    /// too, via the outgoing sweep when this searcher requires one.
    fn finalise_candidate(&mut self, sr: &mut Searcher, u: StateIdx) {
        debug_assert_eq!(self.state(u).counter, base(sr.kind));
        if sr.sweep_target.is_some() {
            debug_assert!(sr.sweep.is_none(), "one sweep at a time");
            let st = self.state(u);
            sr.sweep = Some((u, st.out_start + st.inert_out));
        } else {
            sr.todo.push(u);
            sr.nonbottoms.push(u);
        }
    }

    /// One cooperative step of the NewBotSt coroutine.
    fn nbs_step(&mut self, searchers: &mut [Searcher; 3], nbs: &mut NewBot, ctx: &Ctx) {
        if let Some(&(i, end)) = nbs.walk2.last() {
            if i >= end {
                nbs.walk2.pop();
                return;
            }
            *nbs.walk2.last_mut().unwrap() = (i + 1, end);
            let ti = self.blc_order[i];
            let u = self.trans[ti.as_usize()].from;
            debug_assert_eq!(self.block_of(u), ctx.block);
            if self.is_bottom(u) {
                return; // bottoms are fully classified by the scan
            }
            let c = self.state(u).counter;
            if c == NEW_BOT || c == base(Sub::ReachAlw) || c == base(Sub::AvoidSml) {
                return;
            }
            if c == base(Sub::AvoidLrg) {
                // A swept AvoidLrg member has no co-splitter transition, so
                // this is either the candidate whose sweep is still pending
                // or a claim the abort froze at the finalisation value.
                let al = &mut searchers[2];
                let pending = matches!(al.sweep, Some((cand, _)) if cand == u);
                if pending {
                    al.sweep = None;
                }
                if pending || al.phase == Phase::Aborted {
                    self.state_mut(u).counter = NEW_BOT;
                    nbs.todo.push(u);
                    return;
                }
                debug_assert!(false, "AvoidLrg member with a co-splitter transition");
                return;
            }
            self.state_mut(u).counter = NEW_BOT;
            nbs.todo.push(u);
            return;
        }

        if nbs.cur.is_none() {
            if let Some(u) = nbs.todo.pop() {
                nbs.members.push(u);
                let st = self.state(u);
                nbs.cur = Some((u, st.in_start, st.in_inert_end));
            }
            return;
        }
        let (v, i, end) = nbs.cur.unwrap();
        if i == end {
            nbs.cur = None;
            return;
        }
        nbs.cur = Some((v, i + 1, end));
        let ti = self.incoming[i];
        let u = self.trans[ti.as_usize()].from;
        if self.block_of(u) != ctx.block {
            return;
        }
        let c = self.state(u).counter;
        if c == NEW_BOT {
            return;
        }
        debug_assert!(
            c != base(Sub::ReachAlw) && c != base(Sub::AvoidSml) && c != base(Sub::AvoidLrg),
            "a finalised state cannot have a NewBotSt successor"
        );
        // Any inert successor in NewBotSt drags the source along.
        self.state_mut(u).counter = NEW_BOT;
        nbs.todo.push(u);
    }

    // ------------------------------------------------------------------
    // Finalisation
    // ------------------------------------------------------------------

    /// Carve the four subblocks out of the parent range, adjust inertness
    /// across the new boundaries, promote fresh bottom states and reset the
    /// scratch counters.
    #[allow(clippy::too_many_arguments)]
    fn finalise_split(
        &mut self,
        block: BlockIdx,
        p_start: usize,
        p_bottom_end: usize,
        p_end: usize,
        searchers: [Searcher; 3],
        mut nbs: NewBot,
        aborted: Option<Sub>,
        hit_small: Vec<StateIdx>,
    ) {
        let u_total = p_end - p_start;
        let [ra, avs, avl] = searchers;

        // Classify the bottom range (positions are untouched so far).
        let mut ra_b: Vec<StateIdx> = Vec::new();
        let mut as_b: Vec<StateIdx> = Vec::new();
        let mut al_b: Vec<StateIdx> = Vec::new();
        for pos in p_start..p_bottom_end {
            let u = self.state_order[pos];
            let c = self.state(u).counter;
            if c == base(Sub::ReachAlw) {
                ra_b.push(u);
            } else if c == base(Sub::AvoidLrg) {
                al_b.push(u);
            } else {
                debug_assert!(c == UNDEFINED || c == base(Sub::AvoidSml));
                as_b.push(u);
            }
        }

        // Explicit non-bottom membership, filtered against later steals.
        let keep = |p: &Self, list: &[StateIdx], kind: Sub| -> Vec<StateIdx> {
            list.iter().copied().filter(|&u| p.state(u).counter == base(kind)).collect()
        };
        let ra_nb = keep(self, &ra.nonbottoms, Sub::ReachAlw);
        let as_nb = keep(self, &avs.nonbottoms, Sub::AvoidSml);
        let al_nb = keep(self, &avl.nonbottoms, Sub::AvoidLrg);

        if aborted == Some(Sub::AvoidSml) {
            // The small splitter was fully scanned, so an unclaimed source
            // of it must not sink into the AvoidSml leftover.
            for &u in &hit_small {
                if self.state(u).counter == HIT_SMALL {
                    self.state_mut(u).counter = NEW_BOT;
                    nbs.members.push(u);
                }
            }
        }
        if aborted.is_none() {
            // No leftover receiver: anything unclaimed (only possible for
            // states on inert cycles, which violate the documented
            // precondition, or stale scan marks) joins NewBotSt.
            let explicit = ra_b.len()
                + as_b.len()
                + al_b.len()
                + ra_nb.len()
                + as_nb.len()
                + al_nb.len()
                + nbs.members.len();
            if explicit < u_total {
                for pos in p_bottom_end..p_end {
                    let u = self.state_order[pos];
                    let c = self.state(u).counter;
                    if c != NEW_BOT
                        && c != base(Sub::ReachAlw)
                        && c != base(Sub::AvoidSml)
                        && c != base(Sub::AvoidLrg)
                    {
                        self.state_mut(u).counter = NEW_BOT;
                        nbs.members.push(u);
                    }
                }
            }
        }

        // Zone plan, in fixed order ReachAlw, AvoidSml, AvoidLrg, NewBotSt.
        // The aborted searcher's non-bottom zone is the single implicit
        // hole; everything else is placed explicitly and the leftovers fill
        // the hole by exhaustion.
        let nonbottom_total = p_end - p_bottom_end;
        let explicit_nb = [&ra_nb, &as_nb, &al_nb];
        let bot_lists = [&ra_b, &as_b, &al_b];
        let mut nb_sizes = [ra_nb.len(), as_nb.len(), al_nb.len(), nbs.members.len()];
        if let Some(kind) = aborted {
            let others: usize = (0..4)
                .filter(|&i| i != kind as usize)
                .map(|i| nb_sizes[i])
                .sum();
            nb_sizes[kind as usize] = nonbottom_total - others;
        }
        let bot_sizes = [ra_b.len(), as_b.len(), al_b.len(), 0usize];

        let mut zone_start = [0usize; 4];
        let mut zone_bottom_end = [0usize; 4];
        let mut zone_end = [0usize; 4];
        let mut cursor = p_start;
        for g in 0..4 {
            zone_start[g] = cursor;
            zone_bottom_end[g] = cursor + bot_sizes[g];
            zone_end[g] = zone_bottom_end[g] + nb_sizes[g];
            cursor = zone_end[g];
        }
        debug_assert_eq!(cursor, p_end);

        // Placement: targets strictly increase, so a placed state is never
        // displaced again.
        for g in 0..4 {
            let mut target = zone_start[g];
            if g < 3 {
                for k in 0..bot_lists[g].len() {
                    let u = bot_lists[g][k];
                    self.swap_positions(self.state(u).pos, target);
                    target += 1;
                }
            }
            debug_assert_eq!(target, zone_bottom_end[g]);
            if aborted.map(|k| k as usize) == Some(g) {
                continue; // the hole fills itself
            }
            if g < 3 {
                for k in 0..explicit_nb[g].len() {
                    let u = explicit_nb[g][k];
                    self.swap_positions(self.state(u).pos, target);
                    target += 1;
                }
            } else {
                for k in 0..nbs.members.len() {
                    let u = nbs.members[k];
                    self.swap_positions(self.state(u).pos, target);
                    target += 1;
                }
            }
            debug_assert_eq!(target, zone_end[g]);
        }

        // Create the subblocks. The parent entry stays with the aborted
        // subblock when there is one (its states are never enumerated),
        // with NewBotSt otherwise, or with the last non-empty subblock when
        // NewBotSt came out empty.
        let retainer: usize = match aborted {
            Some(k) => k as usize,
            None => (0..4)
                .rev()
                .find(|&g| zone_end[g] > zone_start[g])
                .expect("a split block is never empty"),
        };
        let parent_flagged = self.block(block).new_bottom;
        let (parent_region, parent_const, parent_credits) = {
            let b = self.block(block);
            (b.region, b.constellation, b.credits)
        };
        let parent_log = log2_floor(u_total);
        let mut zone_block = [BlockIdx(usize::MAX); 4];
        for g in 0..4 {
            let len = zone_end[g] - zone_start[g];
            if len == 0 {
                continue;
            }
            let delta = parent_log - log2_floor(len);
            if g == retainer {
                let blk = self.block_mut(block);
                blk.start = zone_start[g];
                blk.bottom_end = zone_bottom_end[g];
                blk.end = zone_end[g];
                blk.credits = parent_credits + delta;
                zone_block[g] = block;
            } else {
                let nb = BlockIdx(self.blocks.len());
                self.blocks.push(Block {
                    start: zone_start[g],
                    bottom_end: zone_bottom_end[g],
                    end: zone_end[g],
                    constellation: parent_const,
                    region: parent_region,
                    new_bottom: false,
                    queued: false,
                    credits: parent_credits + delta,
                    scan_slot: usize::MAX,
                });
                for pos in zone_start[g]..zone_end[g] {
                    let u = self.state_order[pos];
                    self.state_mut(u).block = nb;
                }
                zone_block[g] = nb;
            }
        }

        // The parent's constellation may just have turned non-trivial.
        if !self.constellation_is_trivial(parent_const)
            && !self.constellations[parent_const.as_usize()].on_stack
        {
            self.constellations[parent_const.as_usize()].on_stack = true;
            self.nontrivial.push(parent_const);
        }

        // A parent already awaiting stabilisation passes the duty on to
        // every child; NewBotSt is flagged as soon as it is real.
        for g in 0..4 {
            let b = zone_block[g];
            if b.0 == usize::MAX {
                continue;
            }
            let len = zone_end[g] - zone_start[g];
            let flag = (parent_flagged || g == 3) && len > 1;
            if flag {
                let blk = self.block_mut(b);
                blk.new_bottom = true;
                if !blk.queued {
                    blk.queued = true;
                    self.new_bottom_queue.push(b);
                }
            }
        }

        // Adjust inertness across the new boundaries. Only explicitly
        // enumerated states are walked; retainer-internal transitions stay
        // inert and cross transitions are seen from their non-retainer end.
        let mut snapshot: Vec<StateIdx> = Vec::new();
        for g in 0..4 {
            if g == retainer {
                if g < 3 {
                    snapshot.extend_from_slice(bot_lists[g]);
                }
                continue;
            }
            if g < 3 {
                snapshot.extend_from_slice(bot_lists[g]);
                snapshot.extend_from_slice(explicit_nb[g]);
            } else {
                snapshot.extend_from_slice(&nbs.members);
            }
        }
        for k in 0..snapshot.len() {
            let u = snapshot[k];
            let ub = self.block_of(u);
            // Outgoing block-inert transitions into other subblocks.
            let out_start = self.state(u).out_start;
            let mut slot = out_start;
            while slot < out_start + self.state(u).inert_out {
                let ti = self.out_slots[slot].trans;
                let w = self.trans[ti.as_usize()].to;
                if self.block_of(w) != ub {
                    self.make_outgoing_noninert(ti);
                } else {
                    slot += 1;
                }
            }
            // Incoming block-inert transitions from other subblocks.
            let in_start = self.state(u).in_start;
            let mut i = in_start;
            while i < self.state(u).in_inert_end {
                let ti = self.incoming[i];
                let u2 = self.trans[ti.as_usize()].from;
                if self.block_of(u2) != ub {
                    self.make_outgoing_noninert(ti);
                    if self.state(u2).inert_out == 0 {
                        let b2 = self.block_of(u2);
                        if self.state(u2).pos >= self.block(b2).bottom_end {
                            self.promote_to_bottom(u2);
                        }
                    }
                } else {
                    i += 1;
                }
            }
            if self.state(u).inert_out == 0 {
                let ub = self.block_of(u);
                if self.state(u).pos >= self.block(ub).bottom_end {
                    self.promote_to_bottom(u);
                }
            }
        }

        // Scratch counters back to rest.
        for list in [
            &ra_b, &as_b, &al_b, &ra_nb, &as_nb, &al_nb, &hit_small, &nbs.members,
            &ra.potential, &avs.potential, &avl.potential, &avs.seen_bottoms,
            &ra.todo, &avl.todo, &avs.todo,
        ] {
            for &u in list.iter() {
                self.state_mut(u).counter = UNDEFINED;
            }
        }
        #[cfg(debug_assertions)]
        for pos in p_start..p_end {
            let u = self.state_order[pos];
            debug_assert_eq!(self.state(u).counter, UNDEFINED, "scratch counter left behind");
        }
    }
}
