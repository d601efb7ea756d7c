//! Live intervals: a [`LiveRange`] bound to a virtual register, optionally
//! refined by subregister ranges.
//!
//! A [`SubRange`] tracks the liveness of a subset of a register's lanes.
//! Subranges of one interval carry pairwise disjoint lane masks, each a
//! subset of the register's maximum mask, and the main range covers every
//! subrange. Registers typically have between one and four subranges, so
//! they are kept in a plain vector and traversed linearly.

use alloc::vec::Vec;
use core::fmt;

use smallvec::SmallVec;

use crate::live_range::{LiveRange, Segment};
use crate::reginfo::{LaneBitmask, VirtReg};
use crate::slot_index::SlotIndex;
use crate::vninfo::{VNInfoArena, ValNo};

/// A live range covering a lane-mask subset of a register.
pub struct SubRange {
    /// The lanes of the register this subrange describes.
    pub lane_mask: LaneBitmask,

    /// Liveness of those lanes.
    pub range: LiveRange,
}

/// A [`LiveRange`] bound to a virtual register, plus its subranges.
pub struct LiveInterval {
    /// The register whose liveness this interval describes.
    pub reg: VirtReg,

    /// Liveness of the register as a whole.
    pub range: LiveRange,

    subranges: Vec<SubRange>,
}

impl LiveInterval {
    /// Creates an empty interval for the given register.
    #[must_use]
    pub fn new(reg: VirtReg) -> Self {
        Self {
            reg,
            range: LiveRange::new(),
            subranges: Vec::new(),
        }
    }

    /// Returns whether the interval has any subranges.
    #[inline]
    #[must_use]
    pub fn has_sub_ranges(&self) -> bool {
        !self.subranges.is_empty()
    }

    /// Number of subranges.
    #[inline]
    #[must_use]
    pub fn num_sub_ranges(&self) -> usize {
        self.subranges.len()
    }

    /// Iterates over the subranges.
    pub fn sub_ranges(&self) -> impl Iterator<Item = &SubRange> {
        self.subranges.iter()
    }

    /// Iterates mutably over the subranges.
    pub fn sub_ranges_mut(&mut self) -> impl Iterator<Item = &mut SubRange> {
        self.subranges.iter_mut()
    }

    /// The subranges as a slice.
    #[inline]
    #[must_use]
    pub fn sub_ranges_slice(&self) -> &[SubRange] {
        &self.subranges
    }

    /// The subranges as a mutable slice.
    #[inline]
    pub fn sub_ranges_slice_mut(&mut self) -> &mut [SubRange] {
        &mut self.subranges
    }

    /// Returns the position of the subrange with exactly the given lane
    /// mask, if one exists.
    #[must_use]
    pub fn sub_range_index_with_mask(&self, lane_mask: LaneBitmask) -> Option<usize> {
        self.subranges.iter().position(|sr| sr.lane_mask == lane_mask)
    }

    /// Creates a new empty subrange covering the given lanes.
    ///
    /// The mask must be disjoint from every existing subrange.
    pub fn create_sub_range(&mut self, lane_mask: LaneBitmask) -> &mut SubRange {
        assert!(
            self.subranges
                .iter()
                .all(|sr| (sr.lane_mask & lane_mask).is_empty()),
            "subrange lane masks must be disjoint"
        );
        self.subranges.push(SubRange {
            lane_mask,
            range: LiveRange::new(),
        });
        self.subranges.last_mut().unwrap()
    }

    /// Removes every subrange that covers no points.
    pub fn remove_empty_sub_ranges(&mut self) {
        self.subranges.retain(|sr| !sr.range.is_empty());
    }

    /// Removes all subranges.
    pub fn clear_sub_ranges(&mut self) {
        self.subranges.clear();
    }

    /// Total number of slots covered by the main range.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.range
            .segments()
            .iter()
            .map(|s| s.start.distance(s.end))
            .sum()
    }

    /// Rebuilds the main range as the union of the subranges.
    ///
    /// The main range must be empty (freshly created or cleared). A main
    /// value number is created for each definition point found in the
    /// subranges, with phi flags carried over; definitions on the same
    /// instruction collapse to the earlier slot.
    pub fn construct_main_range_from_subranges(&mut self, arena: &mut VNInfoArena) {
        debug_assert!(
            self.range.is_empty() && self.range.num_val_nums() == 0,
            "main range must be cleared before reconstruction"
        );

        // Collect the definition points of all subrange values.
        let mut defs: SmallVec<[(SlotIndex, bool); 8]> = SmallVec::new();
        for sr in &self.subranges {
            for &vn in sr.range.valnos() {
                let info = &arena[vn];
                if !info.is_unused() {
                    defs.push((info.def, info.phi_def));
                }
            }
        }
        defs.sort_unstable_by_key(|&(def, _)| def);
        // Collapse duplicate defs. A normal and an early-clobber def on the
        // same instruction become one def at the earlier slot; block
        // boundary defs never merge with instruction defs.
        defs.dedup_by(|b, a| {
            let mergeable = a.0 == b.0 || (a.0.same_instr(b.0) && !a.0.is_block() && !b.0.is_block());
            if mergeable {
                a.1 |= b.1 && a.0 == b.0;
            }
            mergeable
        });

        // Create the main values in definition order.
        let mut def_vns: SmallVec<[(SlotIndex, ValNo); 8]> = SmallVec::new();
        for &(def, phi_def) in &defs {
            let vn = self.range.next_value(def, arena);
            arena[vn].phi_def = phi_def;
            def_vns.push((def, vn));
        }

        // Compute the union of the subrange segments.
        let mut union: Vec<(SlotIndex, SlotIndex)> = self
            .subranges
            .iter()
            .flat_map(|sr| sr.range.segments().iter().map(|s| (s.start, s.end)))
            .collect();
        union.sort_unstable();
        let mut merged: Vec<(SlotIndex, SlotIndex)> = Vec::with_capacity(union.len());
        for (start, end) in union {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = core::cmp::max(last.1, end),
                _ => merged.push((start, end)),
            }
        }

        // Emit segments, splitting at interior definition points so each
        // segment carries the value defined at or before its start.
        for (start, end) in merged {
            let first_def = def_vns.partition_point(|&(d, _)| d <= start);
            debug_assert!(first_def > 0, "live range with no reaching definition");
            let mut cur = start;
            let mut cur_vn = def_vns[first_def - 1].1;
            for &(d, vn) in &def_vns[first_def..] {
                if d >= end {
                    break;
                }
                self.range.append(Segment::new(cur, d, cur_vn));
                cur = d;
                cur_vn = vn;
            }
            self.range.append(Segment::new(cur, end, cur_vn));
        }
    }

    /// Asserts the interval invariants: main range consistency, disjoint
    /// subrange lane masks within the register's maximum mask, no empty
    /// subranges, and main coverage of every subrange.
    pub fn verify(&self, arena: &VNInfoArena, max_mask: LaneBitmask) {
        self.range.verify(arena);

        let mut mask = LaneBitmask::NONE;
        for sr in &self.subranges {
            assert!((mask & sr.lane_mask).is_empty(), "subrange lane masks must be disjoint");
            mask |= sr.lane_mask;
            assert!((mask & !max_mask).is_empty(), "subrange lane mask exceeds the register");
            assert!(!sr.range.is_empty(), "empty subranges must be removed");
            sr.range.verify(arena);
            assert!(self.range.covers(&sr.range), "main range must cover subranges");
        }
    }

    /// Returns an object formatting the interval as its register, main
    /// range, and ` L<mask> <range>` for each subrange.
    #[must_use]
    pub fn display<'a>(&'a self, arena: &'a VNInfoArena) -> DisplayLiveInterval<'a> {
        DisplayLiveInterval { li: self, arena }
    }
}

/// Displays a [`LiveInterval`] together with its subranges.
pub struct DisplayLiveInterval<'a> {
    li: &'a LiveInterval,
    arena: &'a VNInfoArena,
}

impl fmt::Display for DisplayLiveInterval<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.li.reg, self.li.range.display(self.arena))?;
        for sr in &self.li.subranges {
            write!(f, " L{} {}", sr.lane_mask, sr.range.display(self.arena))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot_index::{Inst, Slot};
    use cranelift_entity::EntityRef;

    fn r(i: usize) -> SlotIndex {
        Inst::new(i).slot(Slot::Register)
    }

    fn b(i: usize) -> SlotIndex {
        Inst::new(i).slot(Slot::Block)
    }

    #[test]
    fn sub_range_management() {
        let mut arena = VNInfoArena::new();
        let mut li = LiveInterval::new(VirtReg::new(0));
        assert!(!li.has_sub_ranges());

        let lo = LaneBitmask::from_bits(0x3);
        let hi = LaneBitmask::from_bits(0xc);
        {
            let sr = li.create_sub_range(lo);
            let vn = sr.range.next_value(r(1), &mut arena);
            sr.range.append(Segment::new(r(1), r(5), vn));
        }
        li.create_sub_range(hi);
        assert_eq!(li.num_sub_ranges(), 2);

        // The second subrange stayed empty and is dropped.
        li.remove_empty_sub_ranges();
        assert_eq!(li.num_sub_ranges(), 1);
        assert_eq!(li.sub_ranges_slice()[0].lane_mask, lo);

        li.clear_sub_ranges();
        assert!(!li.has_sub_ranges());
    }

    #[test]
    #[should_panic(expected = "disjoint")]
    fn overlapping_lane_masks_rejected() {
        let mut li = LiveInterval::new(VirtReg::new(0));
        li.create_sub_range(LaneBitmask::from_bits(0x3));
        li.create_sub_range(LaneBitmask::from_bits(0x2));
    }

    #[test]
    fn main_range_reconstruction() {
        let mut arena = VNInfoArena::new();
        let mut li = LiveInterval::new(VirtReg::new(0));

        // Lane 0 live [1r, 8B); lane 1 live [1r, 4r) and, from a phi at 8B,
        // [8B, 12r).
        {
            let sr = li.create_sub_range(LaneBitmask::from_bits(0x1));
            let vn = sr.range.next_value(r(1), &mut arena);
            sr.range.append(Segment::new(r(1), b(8), vn));
        }
        {
            let sr = li.create_sub_range(LaneBitmask::from_bits(0x2));
            let v0 = sr.range.next_value(r(1), &mut arena);
            sr.range.append(Segment::new(r(1), r(4), v0));
            let v1 = sr.range.next_value(b(8), &mut arena);
            arena[v1].phi_def = true;
            sr.range.append(Segment::new(b(8), r(12), v1));
        }

        li.construct_main_range_from_subranges(&mut arena);

        let segs = li.range.segments();
        assert_eq!(segs.len(), 2);
        assert_eq!((segs[0].start, segs[0].end), (r(1), b(8)));
        assert_eq!((segs[1].start, segs[1].end), (b(8), r(12)));
        assert!(segs[0].valno != segs[1].valno);
        assert!(arena[segs[1].valno].phi_def);
        li.verify(&arena, LaneBitmask::from_bits(0x3));
    }

    #[test]
    fn size_sums_segment_distances() {
        let mut arena = VNInfoArena::new();
        let mut li = LiveInterval::new(VirtReg::new(3));
        let vn = li.range.next_value(r(0), &mut arena);
        li.range.append(Segment::new(r(0), r(2), vn));
        li.range.append(Segment::new(r(5), r(6), vn));
        assert_eq!(li.size(), 12);
    }
}
