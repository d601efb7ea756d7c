//! Connected component analysis over the value numbers of a live range.
//!
//! A live range can be internally disconnected: two values with no path of
//! def-precedes-use or phi-predecessor relations between them never flow
//! into one another, so the range can be split into independent ranges, one
//! per component. [`ConnectedVNClasses`] finds the components of a single
//! range and [`ConnectedVNClasses::distribute`] moves segments, values and
//! machine operands into per-component intervals.
//!
//! [`ConnectedSubRegClasses`] is the subregister-aware variant: components
//! are computed per subrange, unified across subranges through the operands
//! that read or write several lanes at once, and the main ranges of the
//! resulting intervals are reconstructed from their subranges.

use alloc::vec;
use alloc::vec::Vec;
use core::iter::once;

use smallvec::SmallVec;

use crate::live_interval::LiveInterval;
use crate::live_range::{LiveRange, Segment};
use crate::reginfo::{LaneBitmask, OperandId, RegInfo};
use crate::slot_index::{SlotIndex, SlotIndexes};
use crate::vninfo::VNInfoArena;

/// Union-find over small dense integer keys with a compression step.
///
/// Joining always keeps the smaller key as the leader, so leader chains
/// point downwards and a single sweep can renumber the classes densely in
/// key order. After [`EqClasses::compress`] the structure becomes read-only:
/// each key maps directly to its class number.
pub struct EqClasses {
    ec: Vec<u32>,
    num_classes: u32,
}

impl EqClasses {
    /// Creates an empty, uncompressed structure.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ec: vec![],
            num_classes: 0,
        }
    }

    /// Resets to `n` singleton classes.
    pub fn clear_and_grow(&mut self, n: usize) {
        self.ec.clear();
        self.num_classes = 0;
        self.ec.extend(0..n as u32);
    }

    /// Joins the classes of `a` and `b`, returning the surviving leader
    /// (the smallest key of the united class).
    pub fn join(&mut self, mut a: u32, mut b: u32) -> u32 {
        debug_assert!(self.num_classes == 0, "join called after compress");
        let mut eca = self.ec[a as usize];
        let mut ecb = self.ec[b as usize];
        while eca != ecb {
            // Follow the chain of the larger leader until the two meet.
            if eca < ecb {
                self.ec[b as usize] = eca;
                b = ecb;
                ecb = self.ec[b as usize];
            } else {
                self.ec[a as usize] = ecb;
                a = eca;
                eca = self.ec[a as usize];
            }
        }
        eca
    }

    /// Returns the leader of `k`'s class. Only valid before compression.
    #[must_use]
    pub fn find_leader(&self, mut k: u32) -> u32 {
        debug_assert!(self.num_classes == 0, "find_leader called after compress");
        while self.ec[k as usize] != k {
            k = self.ec[k as usize];
        }
        k
    }

    /// Renumbers the classes to consecutive integers in key order and
    /// freezes the structure.
    pub fn compress(&mut self) {
        for i in 0..self.ec.len() {
            self.ec[i] = if self.ec[i] == i as u32 {
                let class = self.num_classes;
                self.num_classes += 1;
                class
            } else {
                self.ec[self.ec[i] as usize]
            };
        }
    }

    /// Number of classes after compression.
    #[must_use]
    pub fn num_classes(&self) -> u32 {
        self.num_classes
    }

    /// Returns the class of `k`. Only valid after compression.
    #[must_use]
    pub fn class_of(&self, k: u32) -> u32 {
        debug_assert!(self.num_classes > 0 || self.ec.is_empty(), "class_of called before compress");
        self.ec[k as usize]
    }
}

impl Default for EqClasses {
    fn default() -> Self {
        Self::new()
    }
}

/// Classifier partitioning the value numbers of one live range into
/// connected components.
pub struct ConnectedVNClasses {
    eq: EqClasses,
}

impl ConnectedVNClasses {
    /// Creates a classifier with no classes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            eq: EqClasses::new(),
        }
    }

    /// Partitions the values of `lr` into connected components and returns
    /// the number of components.
    ///
    /// Two values are connected when one is live into the definition of the
    /// other: a plain definition connects to the value live just before it
    /// (a two-address or tied redefinition), and a phi definition connects
    /// to the values live out of every predecessor of its block. Unused
    /// values travel together with an arbitrary used value.
    pub fn classify(
        &mut self,
        lr: &LiveRange,
        arena: &VNInfoArena,
        indexes: &impl SlotIndexes,
    ) -> u32 {
        self.eq.clear_and_grow(lr.num_val_nums());

        let mut used = None;
        let mut unused = None;
        for &vn in lr.valnos() {
            let info = &arena[vn];

            // Group all unused values into one class.
            if info.is_unused() {
                if let Some(prev) = unused {
                    self.eq.join(arena[prev].id, info.id);
                }
                unused = Some(vn);
                continue;
            }
            used = Some(vn);

            if info.phi_def {
                // Connect to the values live out of the predecessors.
                let block = indexes.block_from_index(info.def);
                for &pred in indexes.block_preds(block) {
                    if let Some(pvn) = lr.vn_before(indexes.block_end(pred)) {
                        self.eq.join(info.id, arena[pvn].id);
                    }
                }
            } else {
                // Normal value defined by an instruction. Check for a
                // two-address redefinition. Note that the def may be a use
                // slot for an early-clobber def.
                if let Some(uvn) = lr.vn_before(info.def) {
                    self.eq.join(info.id, arena[uvn].id);
                }
            }
        }

        // Lump the unused values in with the last used value.
        if let (Some(u), Some(x)) = (used, unused) {
            self.eq.join(arena[u].id, arena[x].id);
        }

        self.eq.compress();
        trace!("classified live range into {} components", self.eq.num_classes());
        self.eq.num_classes()
    }

    /// Returns the component of the value with the given table id, as
    /// computed by the last [`ConnectedVNClasses::classify`].
    #[must_use]
    pub fn eq_class(&self, id: u32) -> u32 {
        self.eq.class_of(id)
    }

    /// Number of components found by the last classification.
    #[must_use]
    pub fn num_classes(&self) -> u32 {
        self.eq.num_classes()
    }

    /// Moves the segments, value numbers, subranges and machine operands of
    /// every component `c > 0` of `li` into `targets[c - 1]`.
    ///
    /// The targets must be freshly created intervals bound to their own
    /// virtual registers. Operands with no value at their slot (undef uses)
    /// are left untouched.
    pub fn distribute(
        &self,
        li: &mut LiveInterval,
        targets: &mut [&mut LiveInterval],
        arena: &mut VNInfoArena,
        indexes: &impl SlotIndexes,
        regs: &mut impl RegInfo,
    ) {
        debug_assert!(self.eq.num_classes() as usize == targets.len() + 1);

        // Rewrite the instructions referencing the register.
        for op in regs.reg_operands(li.reg) {
            // Debug instructions don't have slot indexes; use the slot of
            // the instruction before them.
            let inst = regs.operand_inst(op);
            let pos = if regs.operand_is_debug(op) {
                indexes.index_before(inst)
            } else {
                let base = indexes.instruction_index(inst);
                if regs.operand_is_def(op) {
                    base.reg_slot(regs.operand_is_early_clobber(op))
                } else {
                    base.base_slot()
                }
            };
            let Some(vn) = li.range.vn_at(pos) else {
                continue;
            };
            let class = self.eq_class(arena[vn].id);
            if class > 0 {
                regs.set_operand_reg(op, targets[(class - 1) as usize].reg);
            }
        }

        // Distribute subregister live ranges.
        if li.has_sub_ranges() {
            for si in 0..li.num_sub_ranges() {
                let lane_mask = li.sub_ranges_slice()[si].lane_mask;

                // Map each subrange value to the component of the main range
                // value covering its definition.
                let mut mapping: SmallVec<[u32; 8]> = SmallVec::new();
                for &vn in li.sub_ranges_slice()[si].range.valnos() {
                    let component = if arena[vn].is_unused() {
                        0
                    } else {
                        let main_vn = li
                            .range
                            .vn_at(arena[vn].def)
                            .expect("subrange def must have corresponding main range def");
                        self.eq_class(arena[main_vn].id)
                    };
                    mapping.push(component);
                }

                // Create the target subranges that will receive segments.
                for &component in &mapping {
                    if component > 0 {
                        let target = &mut *targets[(component - 1) as usize];
                        if target.sub_range_index_with_mask(lane_mask).is_none() {
                            target.create_sub_range(lane_mask);
                        }
                    }
                }

                let mut target_subs: Vec<Option<&mut LiveRange>> = targets
                    .iter_mut()
                    .map(|t| match t.sub_range_index_with_mask(lane_mask) {
                        Some(idx) => Some(&mut t.sub_ranges_slice_mut()[idx].range),
                        None => None,
                    })
                    .collect();
                distribute_range(
                    &mut li.sub_ranges_slice_mut()[si].range,
                    &mut target_subs,
                    &mapping,
                    arena,
                );
            }
            li.remove_empty_sub_ranges();
        }

        // Distribute the main live range.
        let mapping: Vec<u32> = li
            .range
            .valnos()
            .iter()
            .map(|&vn| self.eq_class(arena[vn].id))
            .collect();
        let mut target_mains: Vec<Option<&mut LiveRange>> = targets
            .iter_mut()
            .map(|t| Some(&mut t.range))
            .collect();
        distribute_range(&mut li.range, &mut target_mains, &mapping, arena);
    }
}

impl Default for ConnectedVNClasses {
    fn default() -> Self {
        Self::new()
    }
}

/// Moves the segments and value numbers of every class `c > 0` of `lr` into
/// `targets[c - 1]`, compacting class 0 in place and renumbering ids.
///
/// `classes[id]` is the class of the value with table id `id`. Segments are
/// appended to their targets, which must be expired at each appended start.
pub fn distribute_range(
    lr: &mut LiveRange,
    targets: &mut [Option<&mut LiveRange>],
    classes: &[u32],
    arena: &mut VNInfoArena,
) {
    // Move segments to their new ranges.
    let mut out = 0;
    while out < lr.segments.len() && classes[arena[lr.segments[out].valno].id as usize] == 0 {
        out += 1;
    }
    for i in out..lr.segments.len() {
        let seg: Segment = lr.segments[i];
        let class = classes[arena[seg.valno].id as usize];
        if class != 0 {
            let target = targets[(class - 1) as usize]
                .as_mut()
                .expect("component has no target range");
            debug_assert!(
                target.segments.is_empty() || target.expired_at(seg.start),
                "new intervals should be empty"
            );
            target.segments.push(seg);
        } else {
            lr.segments[out] = seg;
            out += 1;
        }
    }
    lr.segments.truncate(out);

    // Transfer the value numbers to their new owners and renumber them.
    let mut out = 0;
    while out < lr.valnos.len() && classes[out] == 0 {
        out += 1;
    }
    for i in out..lr.valnos.len() {
        let vn = lr.valnos[i];
        let class = classes[i];
        if class != 0 {
            let target = targets[(class - 1) as usize].as_mut().unwrap();
            arena[vn].id = target.valnos.len() as u32;
            target.valnos.push(vn);
        } else {
            arena[vn].id = out as u32;
            lr.valnos[out] = vn;
            out += 1;
        }
    }
    lr.valnos.truncate(out);
}

/// Per-subrange classification state used by [`ConnectedSubRegClasses`].
struct SubRangeInfo {
    /// Connected components of the subrange's own values.
    con_eq: ConnectedVNClasses,

    /// Sum of the component counts of all prior subranges; local component
    /// `l` of this subrange has global id `l + index`.
    index: u32,
}

/// Subrange-aware splitter of internally disconnected live intervals.
///
/// Where [`ConnectedVNClasses`] connects values through the main range,
/// this variant classifies each subrange independently and then unifies
/// components across subranges wherever a machine operand touches several
/// lanes at once. Components that remain separate get their own virtual
/// registers, and the affected operands, subranges and main ranges are
/// rewritten accordingly.
pub struct ConnectedSubRegClasses {
    classes: EqClasses,
    sub_infos: SmallVec<[SubRangeInfo; 4]>,
}

impl ConnectedSubRegClasses {
    /// Creates a splitter with no state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            classes: EqClasses::new(),
            sub_infos: SmallVec::new(),
        }
    }

    /// Splits `li` into one interval per connected subregister component.
    ///
    /// Returns the newly created intervals, one for each component beyond
    /// the first; the first component stays in `li`. Returns an empty vector
    /// when the interval has a single component and nothing changes.
    pub fn rename_components(
        &mut self,
        li: &mut LiveInterval,
        arena: &mut VNInfoArena,
        indexes: &impl SlotIndexes,
        regs: &mut impl RegInfo,
    ) -> Vec<LiveInterval> {
        // We cannot have split components with a single definition.
        if li.range.num_val_nums() < 2 {
            return vec![];
        }

        if !self.find_components(li, arena, indexes, regs) {
            return vec![];
        }

        // Create a new virtual register and interval for each extra class.
        let class = regs.reg_class(li.reg);
        let num_classes = self.classes.num_classes();
        let mut new_intervals: Vec<LiveInterval> = (1..num_classes)
            .map(|_| LiveInterval::new(regs.create_virtual_register(class)))
            .collect();
        trace!(
            "splitting {} into {} connected subregister components",
            li.reg,
            num_classes
        );

        self.rewrite_operands(li, &new_intervals, arena, indexes, regs);
        self.distribute(li, &mut new_intervals, arena);
        self.compute_main_ranges_fix_flags(li, &mut new_intervals, arena, indexes, regs);
        new_intervals
    }

    /// Classifies every subrange and unifies classes across subranges
    /// through the operands. Returns whether more than one global class
    /// remains.
    fn find_components(
        &mut self,
        li: &LiveInterval,
        arena: &VNInfoArena,
        indexes: &impl SlotIndexes,
        regs: &impl RegInfo,
    ) -> bool {
        self.sub_infos.clear();
        let mut num_components = 0;
        for sr in li.sub_ranges() {
            let mut con_eq = ConnectedVNClasses::new();
            let num_sub_components = con_eq.classify(&sr.range, arena, indexes);
            self.sub_infos.push(SubRangeInfo {
                con_eq,
                index: num_components,
            });
            num_components += num_sub_components;
        }

        // With only one subrange the normal separate component test is
        // enough; no cross-subrange union-find is needed.
        if self.sub_infos.len() < 2 {
            return false;
        }

        // Union-find over all subrange components, merging classes whenever
        // one operand touches components of several subranges.
        self.classes.clear_and_grow(num_components as usize);
        for op in regs.reg_operands_no_debug(li.reg) {
            if !regs.operand_is_def(op) && !regs.operand_reads_reg(op) {
                continue;
            }
            let lane_mask = operand_lane_mask(regs, op);
            let pos = operand_slot(regs, op, indexes);
            let mut merged_id = u32::MAX;
            for (sr, info) in li.sub_ranges().zip(&self.sub_infos) {
                if (sr.lane_mask & lane_mask).is_empty() {
                    continue;
                }
                let Some(vn) = sr.range.vn_at(pos) else {
                    continue;
                };
                let local = info.con_eq.eq_class(arena[vn].id);
                let id = local + info.index;
                merged_id = if merged_id == u32::MAX {
                    id
                } else {
                    self.classes.join(merged_id, id)
                };
            }
        }

        self.classes.compress();
        self.classes.num_classes() > 1
    }

    /// Re-points every operand at the register of the component its lanes
    /// belong to.
    fn rewrite_operands(
        &self,
        li: &LiveInterval,
        new_intervals: &[LiveInterval],
        arena: &VNInfoArena,
        indexes: &impl SlotIndexes,
        regs: &mut impl RegInfo,
    ) {
        for op in regs.reg_operands_no_debug(li.reg) {
            if !regs.operand_is_def(op) && !regs.operand_reads_reg(op) {
                continue;
            }
            let lane_mask = operand_lane_mask(regs, op);
            let pos = operand_slot(regs, op, indexes);

            // The first intersecting subrange with a live value at the slot
            // determines the component.
            let mut class = 0;
            for (sr, info) in li.sub_ranges().zip(&self.sub_infos) {
                if (sr.lane_mask & lane_mask).is_empty() {
                    continue;
                }
                let Some(vn) = sr.range.vn_at(pos) else {
                    continue;
                };
                let local = info.con_eq.eq_class(arena[vn].id);
                class = self.classes.class_of(local + info.index);
                break;
            }
            if class > 0 {
                regs.set_operand_reg(op, new_intervals[(class - 1) as usize].reg);
            }
        }
    }

    /// Moves every subrange segment and value to the interval of its global
    /// class.
    fn distribute(
        &self,
        li: &mut LiveInterval,
        new_intervals: &mut [LiveInterval],
        arena: &mut VNInfoArena,
    ) {
        for si in 0..li.num_sub_ranges() {
            let lane_mask = li.sub_ranges_slice()[si].lane_mask;
            let info = &self.sub_infos[si];

            let mut mapping: SmallVec<[u32; 8]> = SmallVec::new();
            for &vn in li.sub_ranges_slice()[si].range.valnos() {
                let local = info.con_eq.eq_class(arena[vn].id);
                mapping.push(self.classes.class_of(local + info.index));
            }

            for &class in &mapping {
                if class > 0 {
                    let target = &mut new_intervals[(class - 1) as usize];
                    if target.sub_range_index_with_mask(lane_mask).is_none() {
                        target.create_sub_range(lane_mask);
                    }
                }
            }

            let mut target_subs: Vec<Option<&mut LiveRange>> = new_intervals
                .iter_mut()
                .map(|t| match t.sub_range_index_with_mask(lane_mask) {
                    Some(idx) => Some(&mut t.sub_ranges_slice_mut()[idx].range),
                    None => None,
                })
                .collect();
            distribute_range(
                &mut li.sub_ranges_slice_mut()[si].range,
                &mut target_subs,
                &mapping,
                arena,
            );
        }
    }

    /// Final fix-up pass over the original and new intervals: drop empty
    /// subranges, plug phi predecessors that lost their definition with
    /// implicit defs, recompute undef/dead flags on subregister defs, and
    /// rebuild every main range from its subranges.
    fn compute_main_ranges_fix_flags(
        &self,
        li: &mut LiveInterval,
        new_intervals: &mut [LiveInterval],
        arena: &mut VNInfoArena,
        indexes: &impl SlotIndexes,
        regs: &mut impl RegInfo,
    ) {
        let mut intervals: Vec<&mut LiveInterval> =
            once(&mut *li).chain(new_intervals.iter_mut()).collect();

        for (idx, interval) in intervals.iter_mut().enumerate() {
            let reg = interval.reg;
            interval.remove_empty_sub_ranges();

            // There must be a definition (or live-in) before every use.
            // Splitting may leave a phi value without a live value in some
            // predecessor block; insert an implicit def where one is
            // missing.
            let mut phi_defs: SmallVec<[SlotIndex; 4]> = SmallVec::new();
            for sr in interval.sub_ranges() {
                for &vn in sr.range.valnos() {
                    let info = &arena[vn];
                    if !info.is_unused() && info.phi_def {
                        phi_defs.push(info.def);
                    }
                }
            }
            for def in phi_defs {
                let block = indexes.block_from_index(def);
                for &pred in indexes.block_preds(block) {
                    let pred_end = indexes.block_end(pred);
                    if sub_range_live_at(interval, pred_end.prev_slot()) {
                        continue;
                    }
                    let def_idx = regs.insert_implicit_def(pred, reg);
                    for sr in interval.sub_ranges_mut() {
                        let vn = sr.range.next_value(def_idx, arena);
                        sr.range.add_segment(Segment::new(def_idx, pred_end, vn));
                    }
                }
            }

            // After assigning the new register there may not be any other
            // sublanes living in and out of a subregister def anymore; add
            // missing undef and dead flags.
            for op in regs.reg_operands_no_debug(reg) {
                if !regs.operand_is_def(op) || regs.operand_sub_reg(op).is_none() {
                    continue;
                }
                let base = indexes.instruction_index(regs.operand_inst(op));
                if !regs.operand_is_undef(op) && !sub_range_live_at(interval, base) {
                    regs.set_operand_undef(op);
                }
                if !regs.operand_is_dead(op) && !sub_range_live_at(interval, base.dead_slot()) {
                    regs.set_operand_dead(op);
                }
            }

            if idx == 0 {
                interval.range.clear();
            }
            interval.construct_main_range_from_subranges(arena);
        }
    }
}

impl Default for ConnectedSubRegClasses {
    fn default() -> Self {
        Self::new()
    }
}

/// Lanes touched by an operand; a full register reference touches them all.
fn operand_lane_mask(regs: &impl RegInfo, op: OperandId) -> LaneBitmask {
    match regs.operand_sub_reg(op) {
        Some(sub) => regs.lane_mask_for_subreg(sub),
        None => LaneBitmask::ALL,
    }
}

/// The program point at which an operand reads or writes its register:
/// the register slot for defs (honoring early-clobber), the base slot for
/// uses.
fn operand_slot(regs: &impl RegInfo, op: OperandId, indexes: &impl SlotIndexes) -> SlotIndex {
    let base = indexes.instruction_index(regs.operand_inst(op));
    if regs.operand_is_def(op) {
        base.reg_slot(regs.operand_is_early_clobber(op))
    } else {
        base.base_slot()
    }
}

/// Returns whether any subrange of the interval is live at the given point.
fn sub_range_live_at(li: &LiveInterval, pos: SlotIndex) -> bool {
    li.sub_ranges().any(|sr| sr.range.live_at(pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_classes_join_and_compress() {
        let mut eq = EqClasses::new();
        eq.clear_and_grow(6);
        eq.join(0, 3);
        eq.join(4, 5);
        eq.join(1, 4);
        assert_eq!(eq.find_leader(3), 0);
        assert_eq!(eq.find_leader(5), 1);
        eq.compress();
        assert_eq!(eq.num_classes(), 3);
        assert_eq!(eq.class_of(0), 0);
        assert_eq!(eq.class_of(3), 0);
        assert_eq!(eq.class_of(1), 1);
        assert_eq!(eq.class_of(4), 1);
        assert_eq!(eq.class_of(5), 1);
        assert_eq!(eq.class_of(2), 2);
    }

    #[test]
    fn eq_classes_join_returns_smaller_leader() {
        let mut eq = EqClasses::new();
        eq.clear_and_grow(4);
        assert_eq!(eq.join(2, 3), 2);
        assert_eq!(eq.join(3, 1), 1);
        eq.compress();
        assert_eq!(eq.num_classes(), 2);
        assert_eq!(eq.class_of(1), 1);
        assert_eq!(eq.class_of(2), 1);
        assert_eq!(eq.class_of(3), 1);
    }
}
