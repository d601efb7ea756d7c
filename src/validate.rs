//! Non-panicking invariant checkers for live ranges and live intervals.
//!
//! The mutation algorithms assert their contracts inline and abort on
//! violation. These checkers report the same conditions as errors instead,
//! which is what test harnesses and input validators want. The first
//! violated invariant is reported; later ones are not searched for.

use anyhow::{ensure, Result};

use crate::live_interval::LiveInterval;
use crate::live_range::LiveRange;
use crate::reginfo::LaneBitmask;
use crate::vninfo::VNInfoArena;
use crate::LiveRangeError;

/// Checks the segment ordering and value table invariants of a live range.
pub fn check_live_range(lr: &LiveRange, arena: &VNInfoArena) -> Result<()> {
    for (i, s) in lr.segments().iter().enumerate() {
        ensure!(
            s.start.is_valid() && s.end.is_valid() && s.start < s.end,
            LiveRangeError::InvalidSegment
        );

        let id = arena[s.valno].id as usize;
        ensure!(
            id < lr.num_val_nums() && lr.valnos()[id] == s.valno,
            LiveRangeError::StaleVN
        );
        ensure!(!arena[s.valno].is_unused(), LiveRangeError::StaleVN);

        if let Some(next) = lr.segments().get(i + 1) {
            ensure!(s.end <= next.start, LiveRangeError::OverlapMismatch);
            if s.end == next.start {
                ensure!(s.valno != next.valno, LiveRangeError::OverlapMismatch);
            }
        }
    }
    Ok(())
}

/// Checks a live interval: its main range, the subrange lane mask
/// invariants against the register's maximum mask, and main range coverage
/// of every subrange.
pub fn check_live_interval(
    li: &LiveInterval,
    arena: &VNInfoArena,
    max_mask: LaneBitmask,
) -> Result<()> {
    check_live_range(&li.range, arena)?;

    let mut mask = LaneBitmask::NONE;
    for sr in li.sub_ranges() {
        ensure!((mask & sr.lane_mask).is_empty(), LiveRangeError::LaneMaskConflict);
        mask |= sr.lane_mask;
        ensure!((mask & !max_mask).is_empty(), LiveRangeError::LaneMaskConflict);
        ensure!(!sr.range.is_empty(), LiveRangeError::InvalidSegment);

        check_live_range(&sr.range, arena)?;
        ensure!(li.range.covers(&sr.range), LiveRangeError::OverlapMismatch);
    }
    Ok(())
}
