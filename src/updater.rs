//! Amortized bulk insertion into a [`LiveRange`].
//!
//! Inserting many segments one at a time through `add_segment` is quadratic
//! when the insertions straddle existing segments. The updater instead keeps
//! the target range in a transient three-area form while a batch is being
//! streamed in:
//!
//! 1. `[0, write_i)` at the front of the range: fully coalesced, ordered.
//! 2. `[read_i, len)` at the back of the range: fully coalesced, starts
//!    strictly after area 1.
//! 3. `spills`: segments that did not fit in the gap between the areas.
//!
//! Segments in the gap `[write_i, read_i)` are garbage. When `last_start` is
//! invalid the updater is clean, the spill buffer is empty and the positions
//! carry no meaning. Adding a segment that starts before `last_start` flushes
//! the batch and starts a new one, so out-of-order streams degrade to
//! several in-order batches rather than to quadratic behavior.
//!
//! The updater must be flushed (or dropped, which flushes) before the range
//! is queried.

use core::cmp::max;

use smallvec::SmallVec;

use crate::live_range::{LiveRange, Segment};
use crate::slot_index::SlotIndex;
use crate::vninfo::ValNo;
use cranelift_entity::packed_option::ReservedValue;

/// Streaming inserter for a [`LiveRange`]. See the module documentation.
pub struct LiveRangeUpdater<'a> {
    lr: &'a mut LiveRange,
    last_start: SlotIndex,
    write_i: usize,
    read_i: usize,
    spills: SmallVec<[Segment; 8]>,
}

/// Determines if two segments should be coalesced, given `a.start <=
/// b.start`. Overlapping segments must carry the same value number.
fn coalescable(a: &Segment, b: &Segment) -> bool {
    debug_assert!(a.start <= b.start, "unordered live segments");
    if a.end == b.start {
        return a.valno == b.valno;
    }
    if a.end < b.start {
        return false;
    }
    assert!(a.valno == b.valno, "cannot overlap different values");
    true
}

impl<'a> LiveRangeUpdater<'a> {
    /// Creates a clean updater for the given range.
    pub fn new(lr: &'a mut LiveRange) -> Self {
        Self {
            lr,
            last_start: SlotIndex::invalid(),
            write_i: 0,
            read_i: 0,
            spills: SmallVec::new(),
        }
    }

    /// Returns whether the target range is mid-update.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.last_start.is_valid()
    }

    /// Adds a segment covering `[start, end)` with the given value.
    pub fn add_range(&mut self, start: SlotIndex, end: SlotIndex, valno: ValNo) {
        self.add(Segment::new(start, end, valno));
    }

    /// Adds a segment to the range under construction.
    pub fn add(&mut self, mut seg: Segment) {
        // Fall back to the regular insert if the range is still staging in
        // its segment set.
        if self.lr.is_staged() {
            self.lr.add_segment(seg);
            return;
        }

        // Flush the state if the start moves backwards.
        if !self.last_start.is_valid() || self.last_start > seg.start {
            if self.is_dirty() {
                self.flush();
            }
            debug_assert!(self.spills.is_empty(), "leftover spilled segments");
            self.write_i = 0;
            self.read_i = 0;
        }

        // Remember the start for next time.
        self.last_start = seg.start;

        // Advance read_i until it ends after seg.start.
        if self.read_i < self.lr.segments.len() && self.lr.segments[self.read_i].end <= seg.start {
            // First try to close the gap between write_i and read_i with
            // spills.
            if self.read_i != self.write_i {
                self.merge_spills();
            }
            // Then advance read_i.
            if self.read_i == self.write_i {
                let pos = self.lr.find(seg.start);
                self.read_i = pos;
                self.write_i = pos;
            } else {
                while self.read_i < self.lr.segments.len()
                    && self.lr.segments[self.read_i].end <= seg.start
                {
                    self.lr.segments[self.write_i] = self.lr.segments[self.read_i];
                    self.read_i += 1;
                    self.write_i += 1;
                }
            }
        }

        debug_assert!(
            self.read_i == self.lr.segments.len()
                || self.lr.segments[self.read_i].end > seg.start
        );

        // Check if the read_i segment begins early.
        if self.read_i < self.lr.segments.len() && self.lr.segments[self.read_i].start <= seg.start
        {
            assert!(
                self.lr.segments[self.read_i].valno == seg.valno,
                "cannot overlap different values"
            );
            // Bail if seg is completely contained in it.
            if self.lr.segments[self.read_i].end >= seg.end {
                return;
            }
            // Coalesce into seg.
            seg.start = self.lr.segments[self.read_i].start;
            self.read_i += 1;
        }

        // Coalesce as much as possible from read_i into seg.
        while self.read_i < self.lr.segments.len()
            && coalescable(&seg, &self.lr.segments[self.read_i])
        {
            seg.end = max(seg.end, self.lr.segments[self.read_i].end);
            self.read_i += 1;
        }

        // Try coalescing the last spill into seg.
        if let Some(&back) = self.spills.last() {
            if coalescable(&back, &seg) {
                seg.start = back.start;
                seg.end = max(back.end, seg.end);
                self.spills.pop();
            }
        }

        // Try coalescing seg into the last written segment.
        if self.write_i != 0 && coalescable(&self.lr.segments[self.write_i - 1], &seg) {
            let w = self.write_i - 1;
            self.lr.segments[w].end = max(self.lr.segments[w].end, seg.end);
            return;
        }

        // Seg doesn't coalesce with anything; put it in the gap if there is
        // room.
        if self.write_i != self.read_i {
            self.lr.segments[self.write_i] = seg;
            self.write_i += 1;
            return;
        }

        // Finally, append to the range or to the spill buffer.
        if self.write_i == self.lr.segments.len() {
            self.lr.segments.push(seg);
            self.write_i = self.lr.segments.len();
            self.read_i = self.write_i;
        } else {
            self.spills.push(seg);
        }
    }

    /// Merges as many spilled segments as possible into the gap between
    /// write_i and read_i, advancing write_i over the inserted segments.
    fn merge_spills(&mut self) {
        // Backwards merge of the spill buffer and the tail of area 1 into
        // the gap.
        let gap_size = self.read_i - self.write_i;
        let num_moved = core::cmp::min(self.spills.len(), gap_size);
        let mut src = self.write_i;
        let mut dst = src + num_moved;
        let mut spill_src = self.spills.len();

        // This is the new write_i position after merging spills.
        self.write_i = dst;

        while src != dst {
            if src != 0 && self.lr.segments[src - 1].start > self.spills[spill_src - 1].start {
                src -= 1;
                dst -= 1;
                self.lr.segments[dst] = self.lr.segments[src];
            } else {
                spill_src -= 1;
                dst -= 1;
                self.lr.segments[dst] = self.spills[spill_src];
            }
        }
        debug_assert_eq!(num_moved, self.spills.len() - spill_src);
        self.spills.truncate(spill_src);
    }

    /// Restores the target range's invariants and returns the updater to its
    /// clean state. Flushing a clean updater is a no-op.
    pub fn flush(&mut self) {
        if !self.is_dirty() {
            return;
        }
        // Clear the dirty state.
        self.last_start = SlotIndex::invalid();

        // Nothing to merge?
        if self.spills.is_empty() {
            self.lr.segments.drain(self.write_i..self.read_i);
            if cfg!(debug_assertions) {
                self.lr.verify_segments();
            }
            return;
        }

        // Resize the gap to match the spill buffer.
        let gap_size = self.read_i - self.write_i;
        if gap_size < self.spills.len() {
            // The gap is too small. Make some room; the placeholders are
            // fully overwritten by the merge below.
            let placeholder = Segment {
                start: SlotIndex::invalid(),
                end: SlotIndex::invalid(),
                valno: ValNo::reserved_value(),
            };
            let missing = self.spills.len() - gap_size;
            self.lr
                .segments
                .splice(self.read_i..self.read_i, core::iter::repeat_n(placeholder, missing));
        } else {
            // Shrink the gap if necessary.
            self.lr
                .segments
                .drain(self.write_i + self.spills.len()..self.read_i);
        }
        self.read_i = self.write_i + self.spills.len();
        self.merge_spills();
        if cfg!(debug_assertions) {
            self.lr.verify_segments();
        }
    }
}

impl Drop for LiveRangeUpdater<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
