//! The [`LiveRange`] data structure and its query and mutation algorithms.
//!
//! A live range is an ordered list of non-overlapping [`Segment`]s over the
//! linear instruction space, together with a table of the value numbers
//! referenced by those segments. Segments may cross block boundaries. Two
//! segments carrying the same value number are always coalesced when they
//! touch; touching segments with different value numbers represent a
//! redefinition and stay separate.
//!
//! # Staging mode
//!
//! During initial liveness computation segments arrive in an uncontrolled
//! order. A range can be created in *staging* mode, where insertions go into
//! an ordered set supporting cheap out-of-order inserts. Once construction
//! finishes, [`LiveRange::flush_segment_set`] transfers the set into the
//! segment array and the range switches to its cache-friendly final form.
//! Queries that assume the array layout must not be used while staging.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cmp::{max, min};
use core::fmt;
use core::ops::Bound::{Excluded, Unbounded};

use hashbrown::HashSet;
use smallvec::SmallVec;

use crate::reginfo::CoalescerPair;
use crate::slot_index::{Slot, SlotIndex, SlotIndexes};
use crate::updater::LiveRangeUpdater;
use crate::vninfo::{VNInfoArena, ValNo};
use cranelift_entity::packed_option::PackedOption;

/// A half-open interval `[start, end)` of program points carrying the value
/// number of the definition that reaches it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// First point covered by the segment.
    pub start: SlotIndex,

    /// First point after the segment.
    pub end: SlotIndex,

    /// The definition live throughout the segment.
    pub valno: ValNo,
}

impl Segment {
    /// Creates a new segment covering `[start, end)`.
    #[inline]
    #[must_use]
    pub fn new(start: SlotIndex, end: SlotIndex, valno: ValNo) -> Self {
        debug_assert!(start.is_valid() && end.is_valid() && start < end, "invalid segment");
        Self { start, end, valno }
    }

    /// Returns whether the segment contains the given point.
    #[inline]
    #[must_use]
    pub fn contains(&self, pos: SlotIndex) -> bool {
        self.start <= pos && pos < self.end
    }

    /// Returns whether the segment contains the whole interval
    /// `[start, end)`.
    #[inline]
    #[must_use]
    pub fn contains_interval(&self, start: SlotIndex, end: SlotIndex) -> bool {
        debug_assert!(start < end, "invalid interval");
        self.start <= start && end <= self.end
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}:{}]", self.start, self.end, self.valno)
    }
}

/// Entry of the staging segment set, keyed by segment start.
struct SetSegment {
    end: SlotIndex,
    valno: ValNo,
}

/// An ordered collection of non-overlapping segments plus the table of value
/// numbers they reference.
///
/// Invariants, holding whenever the range is not mid-update:
/// 1. segments are strictly ordered by start;
/// 2. `segments[i].end <= segments[i + 1].start`;
/// 3. touching segments carry different value numbers;
/// 4. every segment's value number round-trips through the table;
/// 5. a value number marked unused is referenced by no segment.
pub struct LiveRange {
    pub(crate) segments: Vec<Segment>,
    pub(crate) valnos: SmallVec<[ValNo; 4]>,
    segment_set: Option<BTreeMap<SlotIndex, SetSegment>>,
}

impl LiveRange {
    /// Creates an empty live range in array form.
    #[must_use]
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            valnos: SmallVec::new(),
            segment_set: None,
        }
    }

    /// Creates an empty live range in staging mode.
    ///
    /// Insertions go into an ordered set until [`LiveRange::flush_segment_set`]
    /// is called.
    #[must_use]
    pub fn new_staged() -> Self {
        Self {
            segments: Vec::new(),
            valnos: SmallVec::new(),
            segment_set: Some(BTreeMap::new()),
        }
    }

    /// Returns whether the range is still accumulating segments in its
    /// staging set.
    #[inline]
    #[must_use]
    pub fn is_staged(&self) -> bool {
        self.segment_set.is_some()
    }

    /// Returns whether the range covers no points.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.segment_set {
            Some(set) => set.is_empty(),
            None => self.segments.is_empty(),
        }
    }

    /// The segments of the range, in order.
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        debug_assert!(!self.is_staged(), "segment array queried while staging");
        &self.segments
    }

    /// The value number table. `valnos()[i]` has id `i`.
    #[inline]
    #[must_use]
    pub fn valnos(&self) -> &[ValNo] {
        &self.valnos
    }

    /// Number of value numbers in the table, including unused ones.
    #[inline]
    #[must_use]
    pub fn num_val_nums(&self) -> usize {
        self.valnos.len()
    }

    /// Returns the value number with the given table id.
    #[inline]
    #[must_use]
    pub fn val_no(&self, id: u32) -> ValNo {
        self.valnos[id as usize]
    }

    /// First point covered by the range. The range must not be empty.
    #[inline]
    #[must_use]
    pub fn begin_index(&self) -> SlotIndex {
        self.segments().first().expect("empty range").start
    }

    /// First point after the range. The range must not be empty.
    #[inline]
    #[must_use]
    pub fn end_index(&self) -> SlotIndex {
        self.segments().last().expect("empty range").end
    }

    /// Returns whether every point of the range lies before `pos`.
    #[inline]
    #[must_use]
    pub fn expired_at(&self, pos: SlotIndex) -> bool {
        pos >= self.end_index()
    }

    /// Returns the position of the first segment ending after `pos`, or
    /// `segments().len()` when the range ends at or before `pos`.
    #[must_use]
    pub fn find(&self, pos: SlotIndex) -> usize {
        debug_assert!(!self.is_staged(), "segment array queried while staging");
        self.segments.partition_point(|s| s.end <= pos)
    }

    /// Advances `from` to the first segment at or after it that ends after
    /// `pos`, or to `segments().len()` when the range ends at or before
    /// `pos`.
    #[must_use]
    pub fn advance_to(&self, mut from: usize, pos: SlotIndex) -> usize {
        debug_assert!(from <= self.segments.len());
        if from == self.segments.len() || pos >= self.end_index() {
            return self.segments.len();
        }
        while self.segments[from].end <= pos {
            from += 1;
        }
        from
    }

    /// Returns whether the range contains the given point.
    #[must_use]
    pub fn contains(&self, pos: SlotIndex) -> bool {
        let i = self.find(pos);
        i != self.segments.len() && self.segments[i].start <= pos
    }

    /// Returns whether the range is live at the given point. Synonym of
    /// [`LiveRange::contains`].
    #[inline]
    #[must_use]
    pub fn live_at(&self, pos: SlotIndex) -> bool {
        self.contains(pos)
    }

    /// Returns the value number live at the given point, if any.
    #[must_use]
    pub fn vn_at(&self, pos: SlotIndex) -> Option<ValNo> {
        let i = self.find(pos);
        if i == self.segments.len() || self.segments[i].start > pos {
            None
        } else {
            Some(self.segments[i].valno)
        }
    }

    /// Returns the value number live immediately before the given point, if
    /// any.
    #[must_use]
    pub fn vn_before(&self, pos: SlotIndex) -> Option<ValNo> {
        self.vn_at(pos.prev_slot())
    }

    /// Returns whether the two ranges share at least one point.
    #[must_use]
    pub fn overlaps(&self, other: &LiveRange) -> bool {
        if other.is_empty() {
            return false;
        }
        self.overlaps_from(other, 0)
    }

    /// Returns whether the two ranges share at least one point, starting the
    /// search at the given segment position into `other`.
    ///
    /// The hint must either be `other`'s first segment or start at or before
    /// `self`'s first segment; a bogus hint silently produces a wrong
    /// answer, so it is checked in debug builds.
    #[must_use]
    pub fn overlaps_from(&self, other: &LiveRange, start_pos: usize) -> bool {
        assert!(!self.is_empty(), "empty range");
        assert!(start_pos < other.segments().len(), "bogus start position hint");
        debug_assert!(
            other.segments[start_pos].start <= self.segments[0].start || start_pos == 0,
            "bogus start position hint"
        );

        let mut a: &[Segment] = &self.segments;
        let mut b: &[Segment] = &other.segments;
        let mut i = 0;
        let mut j = start_pos;

        if a[i].start < b[j].start {
            i = upper_bound_by_start(a, i, b[j].start);
            if i != 0 {
                i -= 1;
            }
        } else if b[j].start < a[i].start {
            let next = start_pos + 1;
            if next < b.len() && b[next].start <= a[i].start {
                j = upper_bound_by_start(b, j, a[i].start);
                if j != 0 {
                    j -= 1;
                }
            }
        } else {
            return true;
        }

        if j == b.len() {
            return false;
        }

        while i < a.len() {
            if a[i].start > b[j].start {
                core::mem::swap(&mut a, &mut b);
                core::mem::swap(&mut i, &mut j);
            }
            if a[i].end > b[j].start {
                return true;
            }
            i += 1;
        }
        false
    }

    /// Returns whether the range overlaps the interval `[start, end)`.
    #[must_use]
    pub fn overlaps_interval(&self, start: SlotIndex, end: SlotIndex) -> bool {
        assert!(start < end, "invalid range");
        let i = self.segments().partition_point(|s| s.start < end);
        i != 0 && self.segments[i - 1].end > start
    }

    /// Returns whether the two ranges overlap, ignoring overlap caused by a
    /// coalescable copy.
    ///
    /// For each shared point the later of the two segment starts is the
    /// candidate definition. If that definition is a block boundary, or the
    /// instruction there is not a copy the coalescer intends to merge, the
    /// overlap is real; otherwise it is the copy being coalesced away and
    /// the search continues.
    #[must_use]
    pub fn overlaps_with_coalescer(
        &self,
        other: &LiveRange,
        cp: &impl CoalescerPair,
        indexes: &impl SlotIndexes,
    ) -> bool {
        assert!(!self.is_empty(), "empty range");
        if other.is_empty() {
            return false;
        }

        // Use binary searches to find initial positions.
        let mut a: &[Segment] = self.segments();
        let mut b: &[Segment] = other.segments();
        let mut i = self.find(other.begin_index());
        if i == a.len() {
            return false;
        }
        let mut j = other.find(a[i].start);
        if j == b.len() {
            return false;
        }

        loop {
            // j has just been advanced to satisfy:
            debug_assert!(b[j].end >= a[i].start);
            // Check for an overlap.
            if b[j].start < a[i].end {
                let def = max(a[i].start, b[j].start);
                let coalescable_copy = !def.is_block()
                    && indexes
                        .instruction_from_index(def)
                        .is_some_and(|inst| cp.is_coalescable(inst));
                if !coalescable_copy {
                    return true;
                }
            }
            // Advance the range that ends first to check for more overlaps.
            if b[j].end > a[i].end {
                core::mem::swap(&mut a, &mut b);
                core::mem::swap(&mut i, &mut j);
            }
            // Advance j until it ends at or after the current a segment.
            loop {
                j += 1;
                if j == b.len() {
                    return false;
                }
                if b[j].end >= a[i].start {
                    break;
                }
            }
        }
    }

    /// Returns whether every point of `other` is contained in `self`.
    #[must_use]
    pub fn covers(&self, other: &LiveRange) -> bool {
        if self.is_empty() {
            return other.is_empty();
        }

        let mut i = 0;
        for o in other.segments() {
            i = self.advance_to(i, o.start);
            if i == self.segments.len() || self.segments[i].start > o.start {
                return false;
            }

            // Follow adjacent segments until we get past the end of o.
            while self.segments[i].end < o.end {
                let last = i;
                i += 1;
                if i == self.segments.len() || self.segments[last].end != self.segments[i].start {
                    return false;
                }
            }
        }
        true
    }

    /// Returns whether any of the given slots, sorted in increasing order,
    /// lies inside a segment.
    #[must_use]
    pub fn is_live_at_indexes(&self, slots: &[SlotIndex]) -> bool {
        let Some(&first) = slots.first() else {
            return false;
        };

        // Start at the first segment that ends after the first slot.
        let mut i = self.find(first);
        if i == self.segments.len() {
            return false;
        }

        for &slot in slots {
            // The slot may be within a hole in the range.
            i = self.advance_to(i, slot);
            if i == self.segments.len() {
                return false;
            }
            if self.segments[i].contains(slot) {
                return true;
            }
        }
        false
    }

    /// Allocates a new value number defined at `def` and adds it to the
    /// table.
    pub fn next_value(&mut self, def: SlotIndex, arena: &mut VNInfoArena) -> ValNo {
        let vn = arena.alloc(self.valnos.len() as u32, def);
        self.valnos.push(vn);
        vn
    }

    /// Removes all segments and value numbers from the range.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.valnos.clear();
    }

    /// Creates a dead definition at `def`, covering just `[def, def.dead)`.
    ///
    /// If a definition already exists on the same instruction, the earlier
    /// of the two slots wins (a normal def and an early-clobber def of the
    /// same register collapse to the early-clobber) and the existing value
    /// is returned. The caller must not dead-define inside an already live
    /// segment.
    pub fn create_dead_def(&mut self, def: SlotIndex, arena: &mut VNInfoArena) -> ValNo {
        assert!(def.slot() != Slot::Dead, "cannot define a value at the dead slot");
        if self.is_staged() {
            return self.create_dead_def_set(def, arena);
        }

        let i = self.find(def);
        if i == self.segments.len() {
            let vn = self.next_value(def, arena);
            self.segments.push(Segment::new(def, def.dead_slot(), vn));
            return vn;
        }

        let s = self.segments[i];
        if def.same_instr(s.start) {
            debug_assert!(arena[s.valno].def == s.start, "inconsistent existing value def");
            let new_def = min(def, s.start);
            if new_def != s.start {
                self.segments[i].start = new_def;
                arena[s.valno].def = new_def;
            }
            return s.valno;
        }
        assert!(def.earlier_instr(s.start), "already live at def");
        let vn = self.next_value(def, arena);
        self.segments.insert(i, Segment::new(def, def.dead_slot(), vn));
        vn
    }

    /// If the range is live before `kill` in the basic block starting at
    /// `block_start`, extends it to be live up to `kill` and returns the
    /// live value. Returns `None` if there is no live range before `kill`.
    pub fn extend_in_block(&mut self, block_start: SlotIndex, kill: SlotIndex) -> Option<ValNo> {
        if self.is_staged() {
            return self.extend_in_block_set(block_start, kill);
        }
        if self.segments.is_empty() {
            return None;
        }
        let i = self.segments.partition_point(|s| s.start <= kill.prev_slot());
        if i == 0 {
            return None;
        }
        let i = i - 1;
        if self.segments[i].end <= block_start {
            return None;
        }
        if self.segments[i].end < kill {
            self.extend_segment_end_to(i, kill);
        }
        Some(self.segments[i].valno)
    }

    /// Extends the segment at `i` to end at `new_end`, merging and
    /// eliminating every following segment this overlaps. The segment
    /// position stays valid.
    fn extend_segment_end_to(&mut self, i: usize, new_end: SlotIndex) {
        let valno = self.segments[i].valno;

        // Search for the first segment that we can't merge with.
        let mut merge_to = i + 1;
        while merge_to < self.segments.len() && new_end >= self.segments[merge_to].end {
            assert!(
                self.segments[merge_to].valno == valno,
                "cannot merge with differing values"
            );
            merge_to += 1;
        }

        // If new_end was in the middle of a segment, keep its endpoint.
        self.segments[i].end = max(new_end, self.segments[merge_to - 1].end);

        // If the newly formed segment now touches the segment after it and
        // they have the same value number, merge the two into one.
        if merge_to < self.segments.len()
            && self.segments[merge_to].start <= self.segments[i].end
            && self.segments[merge_to].valno == valno
        {
            self.segments[i].end = self.segments[merge_to].end;
            merge_to += 1;
        }

        self.segments.drain(i + 1..merge_to);
    }

    /// Extends the segment at `i` to start at `new_start`, merging and
    /// eliminating every preceding segment this overlaps. Returns the new
    /// position of the extended segment.
    fn extend_segment_start_to(&mut self, i: usize, new_start: SlotIndex) -> usize {
        let valno = self.segments[i].valno;
        let end = self.segments[i].end;

        // Search backwards for the first segment that we can't merge with.
        let mut merge_to = i;
        loop {
            if merge_to == 0 {
                self.segments[i].start = new_start;
                self.segments.drain(0..i);
                return 0;
            }
            assert!(
                self.segments[merge_to].valno == valno,
                "cannot merge with differing values"
            );
            merge_to -= 1;
            if new_start > self.segments[merge_to].start {
                break;
            }
        }

        if self.segments[merge_to].end >= new_start && self.segments[merge_to].valno == valno {
            // We start in the middle of another segment of our value; absorb
            // everything up to the original segment into it.
            self.segments[merge_to].end = end;
        } else {
            // Otherwise, extend the segment right after.
            merge_to += 1;
            self.segments[merge_to] = Segment::new(new_start, end, valno);
        }
        self.segments.drain(merge_to + 1..=i);
        merge_to
    }

    /// Inserts a segment, preserving the range invariants.
    ///
    /// The segment is merged with its neighbors when they carry the same
    /// value number. Overlapping a neighbor with a *different* value number
    /// is a contract violation and aborts.
    pub fn add_segment(&mut self, seg: Segment) {
        if self.is_staged() {
            self.add_segment_set(seg);
            return;
        }
        self.add_segment_vec(seg);
    }

    fn add_segment_vec(&mut self, seg: Segment) -> usize {
        let (start, end) = (seg.start, seg.end);
        let i = self.segments.partition_point(|s| s.start <= start);

        // If the inserted segment starts in the middle of, or right at the
        // end of, the previous segment, extend that segment to contain it.
        if i != 0 {
            let b = i - 1;
            if self.segments[b].valno == seg.valno {
                if self.segments[b].start <= start && self.segments[b].end >= start {
                    self.extend_segment_end_to(b, end);
                    return b;
                }
            } else {
                assert!(
                    self.segments[b].end <= start,
                    "cannot overlap two segments with differing value numbers"
                );
            }
        }

        // If this segment ends in the middle of, or right next to, the
        // following segment, merge it into that segment.
        if i != self.segments.len() {
            if self.segments[i].valno == seg.valno {
                if self.segments[i].start <= end {
                    let i = self.extend_segment_start_to(i, start);

                    // If seg is a complete superset of the segment, we may
                    // need to grow its endpoint as well.
                    if end > self.segments[i].end {
                        self.extend_segment_end_to(i, end);
                    }
                    return i;
                }
            } else {
                assert!(
                    self.segments[i].start >= end,
                    "cannot overlap two segments with differing value numbers"
                );
            }
        }

        // A new segment that doesn't interact with anything.
        self.segments.insert(i, seg);
        i
    }

    /// Appends a segment known to start at or after the end of the range.
    /// O(1); used when segments are generated in order.
    pub fn append(&mut self, seg: Segment) {
        assert!(
            self.segments.last().is_none_or(|last| last.end <= seg.start),
            "segment appended out of order"
        );
        self.segments.push(seg);
    }

    /// Removes `[start, end)` from the range. The interval must lie within a
    /// single segment, which is trimmed or split accordingly.
    ///
    /// With `remove_dead_val_no` set, a value number left without any
    /// segment is marked for deletion.
    pub fn remove_segment(
        &mut self,
        start: SlotIndex,
        end: SlotIndex,
        remove_dead_val_no: bool,
        arena: &mut VNInfoArena,
    ) {
        // Find the segment containing this span.
        let i = self.find(start);
        assert!(i != self.segments.len(), "segment is not in range");
        assert!(
            self.segments[i].contains_interval(start, end),
            "segment is not entirely in range"
        );

        let valno = self.segments[i].valno;
        if self.segments[i].start == start {
            if self.segments[i].end == end {
                if remove_dead_val_no {
                    let is_dead = !self
                        .segments
                        .iter()
                        .enumerate()
                        .any(|(j, s)| j != i && s.valno == valno);
                    if is_dead {
                        self.mark_val_no_for_deletion(valno, arena);
                    }
                }
                self.segments.remove(i);
            } else {
                self.segments[i].start = end;
            }
            return;
        }

        if self.segments[i].end == end {
            self.segments[i].end = start;
            return;
        }

        // Removing from the middle splits the segment in two.
        let old_end = self.segments[i].end;
        self.segments[i].end = start;
        self.segments.insert(i + 1, Segment::new(end, old_end, valno));
    }

    /// Removes all segments carrying the given value number and marks it for
    /// deletion.
    pub fn remove_val_no(&mut self, valno: ValNo, arena: &mut VNInfoArena) {
        if self.segments.is_empty() {
            return;
        }
        self.segments.retain(|s| s.valno != valno);
        self.mark_val_no_for_deletion(valno, arena);
    }

    /// Retires a dead value number. The final table slot is popped together
    /// with any trailing already-unused entries; an interior value is marked
    /// unused in place so ids stay dense.
    pub fn mark_val_no_for_deletion(&mut self, valno: ValNo, arena: &mut VNInfoArena) {
        if arena[valno].id as usize == self.valnos.len() - 1 {
            loop {
                self.valnos.pop();
                match self.valnos.last() {
                    Some(&back) if arena[back].is_unused() => {}
                    _ => break,
                }
            }
        } else {
            arena[valno].mark_unused();
        }
    }

    /// Renumbers all value numbers in order of appearance and drops values
    /// no segment references.
    pub fn renumber_values(&mut self, arena: &mut VNInfoArena) {
        let mut seen: HashSet<ValNo> = HashSet::new();
        self.valnos.clear();
        for i in 0..self.segments.len() {
            let vn = self.segments[i].valno;
            if !seen.insert(vn) {
                continue;
            }
            debug_assert!(!arena[vn].is_unused(), "unused valno used by live segment");
            arena[vn].id = self.valnos.len() as u32;
            self.valnos.push(vn);
        }
    }

    /// Produces the union of two live ranges under a given value number
    /// mapping.
    ///
    /// `lhs_assign[i]` maps `self`'s value with id `i` to a position in
    /// `new_vns`; `rhs_assign` does the same for `other`. `self`'s value
    /// table is rebuilt from the non-null entries of `new_vns`, and
    /// `other`'s segments are streamed in through an updater. `other` is
    /// consumed: remapping leaves it with touching same-value segments that
    /// are intentionally not coalesced.
    pub fn join(
        &mut self,
        mut other: LiveRange,
        lhs_assign: &[u32],
        rhs_assign: &[u32],
        new_vns: &[PackedOption<ValNo>],
        arena: &mut VNInfoArena,
    ) {
        if cfg!(debug_assertions) {
            self.verify(arena);
        }

        // Determine if any of our values are mapped. This is uncommon, so we
        // want to avoid the range rewrite if not.
        let must_map = (0..self.valnos.len()).any(|i| {
            let lhs_id = lhs_assign[i] as usize;
            i != lhs_id
                || (new_vns[lhs_id].is_some() && new_vns[lhs_id].expand() != Some(self.valnos[i]))
        });

        // If we have to apply a mapping to our segments, rewrite them now,
        // coalescing neighbors that end up with the same value number.
        if must_map && !self.segments.is_empty() {
            let mut out = 0;
            let first = self.segments[0].valno;
            self.segments[0].valno = new_vns[lhs_assign[arena[first].id as usize] as usize]
                .expand()
                .expect("mapped value must be present");
            for i in 1..self.segments.len() {
                let seg = self.segments[i];
                let next_valno = new_vns[lhs_assign[arena[seg.valno].id as usize] as usize]
                    .expand()
                    .expect("mapped value must be present");
                if self.segments[out].valno == next_valno && self.segments[out].end == seg.start {
                    self.segments[out].end = seg.end;
                } else {
                    out += 1;
                    self.segments[out] = Segment::new(seg.start, seg.end, next_valno);
                }
            }
            self.segments.truncate(out + 1);
        }

        // Rewrite other's values before the ids change below.
        for s in &mut other.segments {
            s.valno = new_vns[rhs_assign[arena[s.valno].id as usize] as usize]
                .expand()
                .expect("mapped value must be present");
        }

        // Rebuild the value table from the surviving values, renumbering.
        self.valnos.clear();
        for vn in new_vns {
            if let Some(vn) = vn.expand() {
                arena[vn].id = self.valnos.len() as u32;
                self.valnos.push(vn);
            }
        }

        // Insert other's live segments into ours.
        trace!("joining {} segments into live range", other.segments.len());
        let mut updater = LiveRangeUpdater::new(self);
        for &s in &other.segments {
            updater.add(s);
        }
    }

    /// Merges all segments of `rhs` into this range as the given value.
    /// Overlap with existing segments is allowed; the overlapped points end
    /// up carrying `lhs_valno`.
    pub fn merge_segments_in_as_value(&mut self, rhs: &LiveRange, lhs_valno: ValNo) {
        let mut updater = LiveRangeUpdater::new(self);
        for s in &rhs.segments {
            updater.add(Segment::new(s.start, s.end, lhs_valno));
        }
    }

    /// Merges the segments of a specific value of `rhs` into this range as
    /// the given value.
    pub fn merge_value_in_as_value(&mut self, rhs: &LiveRange, rhs_valno: ValNo, lhs_valno: ValNo) {
        let mut updater = LiveRangeUpdater::new(self);
        for s in &rhs.segments {
            if s.valno == rhs_valno {
                updater.add(Segment::new(s.start, s.end, lhs_valno));
            }
        }
    }

    /// Merges two value numbers found to be equivalent, eliminating `v1`.
    ///
    /// The numerically smaller id survives, compacting the value space; its
    /// definition point is taken from `v2` so the result value keeps the
    /// definition the caller asked for. Returns the surviving value.
    pub fn merge_value_number_into(
        &mut self,
        mut v1: ValNo,
        mut v2: ValNo,
        arena: &mut VNInfoArena,
    ) -> ValNo {
        assert!(v1 != v2, "identical value numbers are always equivalent");

        // Make sure v2 is the value with the smaller id, transplanting the
        // definition of the caller's v2 onto it.
        if arena[v1].id < arena[v2].id {
            let (def, phi_def) = (arena[v2].def, arena[v2].phi_def);
            arena[v1].def = def;
            arena[v1].phi_def = phi_def;
            core::mem::swap(&mut v1, &mut v2);
        }

        // Merge v1 segments into v2.
        let mut i = 0;
        while i < self.segments.len() {
            if self.segments[i].valno != v1 {
                i += 1;
                continue;
            }
            let mut s = i;

            // If there is a previous, touching, v2 segment, extend it.
            if s != 0
                && self.segments[s - 1].valno == v2
                && self.segments[s - 1].end == self.segments[s].start
            {
                self.segments[s - 1].end = self.segments[s].end;
                self.segments.remove(s);
                s -= 1;
            }

            self.segments[s].valno = v2;

            // Merge into a later v2 segment if they now touch. Later v1
            // segments are picked up by subsequent iterations.
            if s + 1 < self.segments.len()
                && self.segments[s + 1].start == self.segments[s].end
                && self.segments[s + 1].valno == v2
            {
                self.segments[s].end = self.segments[s + 1].end;
                self.segments.remove(s + 1);
            }
            i = s + 1;
        }

        // Now that v1 is dead, remove it.
        self.mark_val_no_for_deletion(v1, arena);
        v2
    }

    /// Transfers the staging set into the segment array and leaves staging
    /// mode. The array must still be empty.
    pub fn flush_segment_set(&mut self) {
        let set = self.segment_set.take().expect("segment set must have been created");
        assert!(
            self.segments.is_empty(),
            "segment set can be used only initially before switching to the array"
        );
        self.segments.extend(
            set.into_iter()
                .map(|(start, s)| Segment::new(start, s.end, s.valno)),
        );
        if cfg!(debug_assertions) {
            self.verify_segments();
        }
    }

    // Staging twins of the construction operations, working on the ordered
    // set. Only `create_dead_def`, `extend_in_block` and `add_segment` are
    // available while staging.

    fn create_dead_def_set(&mut self, def: SlotIndex, arena: &mut VNInfoArena) -> ValNo {
        let set = self.segment_set.as_ref().unwrap();

        // First segment ending after def, if any.
        let found = set
            .range(..=def)
            .next_back()
            .filter(|(_, s)| s.end > def)
            .or_else(|| set.range((Excluded(def), Unbounded)).next())
            .map(|(&start, s)| (start, s.valno));

        match found {
            None => {
                let vn = self.next_value(def, arena);
                let set = self.segment_set.as_mut().unwrap();
                set.insert(
                    def,
                    SetSegment {
                        end: def.dead_slot(),
                        valno: vn,
                    },
                );
                vn
            }
            Some((start, valno)) if def.same_instr(start) => {
                debug_assert!(arena[valno].def == start, "inconsistent existing value def");
                let new_def = min(def, start);
                if new_def != start {
                    let set = self.segment_set.as_mut().unwrap();
                    let s = set.remove(&start).unwrap();
                    set.insert(new_def, s);
                    arena[valno].def = new_def;
                }
                valno
            }
            Some((start, _)) => {
                assert!(def.earlier_instr(start), "already live at def");
                let vn = self.next_value(def, arena);
                let set = self.segment_set.as_mut().unwrap();
                set.insert(
                    def,
                    SetSegment {
                        end: def.dead_slot(),
                        valno: vn,
                    },
                );
                vn
            }
        }
    }

    fn extend_in_block_set(&mut self, block_start: SlotIndex, kill: SlotIndex) -> Option<ValNo> {
        let set = self.segment_set.as_mut().unwrap();
        let (&start, s) = set.range(..=kill.prev_slot()).next_back()?;
        if s.end <= block_start {
            return None;
        }
        let valno = s.valno;
        if s.end < kill {
            Self::set_extend_end(set, start, kill);
        }
        Some(valno)
    }

    fn add_segment_set(&mut self, seg: Segment) {
        let set = self.segment_set.as_mut().unwrap();

        // Merge into the previous segment if it reaches seg's start.
        if let Some((&bs, b)) = set.range(..=seg.start).next_back() {
            if b.valno == seg.valno {
                if b.end >= seg.start {
                    Self::set_extend_end(set, bs, seg.end);
                    return;
                }
            } else {
                assert!(
                    b.end <= seg.start,
                    "cannot overlap two segments with differing value numbers"
                );
            }
        }

        // Merge with the following segment if seg reaches it.
        if let Some((&ns, n)) = set.range((Excluded(seg.start), Unbounded)).next() {
            if n.valno == seg.valno {
                if ns <= seg.end {
                    let moved = set.remove(&ns).unwrap();
                    let end = moved.end;
                    set.insert(seg.start, moved);
                    if seg.end > end {
                        Self::set_extend_end(set, seg.start, seg.end);
                    }
                    return;
                }
            } else {
                assert!(
                    ns >= seg.end,
                    "cannot overlap two segments with differing value numbers"
                );
            }
        }

        set.insert(
            seg.start,
            SetSegment {
                end: seg.end,
                valno: seg.valno,
            },
        );
    }

    /// Extends the set entry starting at `start` to end at least at
    /// `new_end`, absorbing mergeable successors.
    fn set_extend_end(set: &mut BTreeMap<SlotIndex, SetSegment>, start: SlotIndex, new_end: SlotIndex) {
        let valno = set[&start].valno;
        let mut end = max(new_end, set[&start].end);
        loop {
            let next = set
                .range((Excluded(start), Unbounded))
                .next()
                .map(|(&s, n)| (s, n.end, n.valno));
            match next {
                Some((ns, ne, nv)) if ne <= new_end => {
                    assert!(nv == valno, "cannot merge with differing values");
                    set.remove(&ns);
                }
                Some((ns, ne, nv)) if ns <= end && nv == valno => {
                    end = max(end, ne);
                    set.remove(&ns);
                    break;
                }
                _ => break,
            }
        }
        set.get_mut(&start).unwrap().end = end;
    }

    /// Asserts the segment ordering invariants: strictly increasing starts,
    /// no overlap, and no uncoalesced touch of equal value numbers.
    pub fn verify_segments(&self) {
        for (i, s) in self.segments.iter().enumerate() {
            assert!(s.start.is_valid());
            assert!(s.end.is_valid());
            assert!(s.start < s.end);
            if let Some(next) = self.segments.get(i + 1) {
                assert!(s.end <= next.start);
                if s.end == next.start {
                    assert!(s.valno != next.valno);
                }
            }
        }
    }

    /// Asserts all range invariants, including value table consistency.
    pub fn verify(&self, arena: &VNInfoArena) {
        self.verify_segments();
        for s in &self.segments {
            let id = arena[s.valno].id as usize;
            assert!(id < self.valnos.len());
            assert!(self.valnos[id] == s.valno);
            assert!(!arena[s.valno].is_unused());
        }
    }

    /// Returns an object that formats the range as
    /// `[s0,e0:id0)[s1,e1:id1)  id0@def0 id1@def1-phi id2@x`.
    #[must_use]
    pub fn display<'a>(&'a self, arena: &'a VNInfoArena) -> DisplayLiveRange<'a> {
        DisplayLiveRange { lr: self, arena }
    }
}

impl Default for LiveRange {
    fn default() -> Self {
        Self::new()
    }
}

/// Displays a [`LiveRange`] with its value number table.
pub struct DisplayLiveRange<'a> {
    lr: &'a LiveRange,
    arena: &'a VNInfoArena,
}

impl fmt::Display for DisplayLiveRange<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lr.segments.is_empty() {
            f.write_str("EMPTY")?;
        } else {
            for s in &self.lr.segments {
                write!(f, "[{},{}:{})", s.start, s.end, self.arena[s.valno].id)?;
            }
        }
        if !self.lr.valnos.is_empty() {
            f.write_str("  ")?;
            for (id, &vn) in self.lr.valnos.iter().enumerate() {
                if id != 0 {
                    f.write_str(" ")?;
                }
                let info = &self.arena[vn];
                if info.is_unused() {
                    write!(f, "{id}@x")?;
                } else {
                    write!(f, "{id}@{}", info.def)?;
                    if info.phi_def {
                        f.write_str("-phi")?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// First position after `from` whose segment starts after `pos`.
fn upper_bound_by_start(segments: &[Segment], from: usize, pos: SlotIndex) -> usize {
    from + segments[from..].partition_point(|s| s.start <= pos)
}
