//! Segmented live range and live interval data structures for a register
//! allocator.
//!
//! A live range describes the set of program points at which some definition
//! of a quantity (an SSA value or a virtual register) is live. It is stored
//! as a sorted array of half-open [`Segment`]s, each tagged with a value
//! number identifying the definition that reaches it. Ranges can have holes:
//! a range might look like `[1,20) [50,65) [1000,1001)`.
//!
//! This crate is compatible with `#![no_std]` and only requires `alloc`.
//!
//! # Overview
//!
//! * [`slot_index`] defines [`SlotIndex`], a totally ordered program point
//!   with sub-instruction granularity, and the [`SlotIndexes`] trait through
//!   which the instruction numbering service is consumed.
//! * [`vninfo`] defines value numbers: stable [`ValNo`] handles into an
//!   append-only [`VNInfoArena`].
//! * [`live_range`] defines [`LiveRange`], the queryable object, together
//!   with all of its mutation algorithms.
//! * [`updater`] provides [`LiveRangeUpdater`], an amortized bulk-insertion
//!   facility for streaming many out-of-order segments into a range.
//! * [`live_interval`] binds a range to a virtual register and adds
//!   lane-mask-keyed subregister ranges.
//! * [`connected`] classifies the value numbers of a range into connected
//!   components and splits internally disconnected ranges apart.
//!
//! # Error handling
//!
//! All error conditions in this crate are contract violations. The hot-path
//! operations fail fast with assertions; [`validate`] offers non-panicking
//! checkers built around [`LiveRangeError`] for callers that want to audit a
//! range without risking an abort.
//!
//! [`Segment`]: live_range::Segment
//! [`SlotIndex`]: slot_index::SlotIndex
//! [`SlotIndexes`]: slot_index::SlotIndexes
//! [`ValNo`]: vninfo::ValNo
//! [`VNInfoArena`]: vninfo::VNInfoArena
//! [`LiveRange`]: live_range::LiveRange
//! [`LiveRangeUpdater`]: updater::LiveRangeUpdater

#![no_std]
#![warn(rust_2018_idioms, missing_docs)]
#![allow(
    clippy::collapsible_if,
    clippy::collapsible_else_if,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::doc_markdown
)]
#![warn(
    clippy::explicit_iter_loop,
    clippy::range_plus_one,
    clippy::map_unwrap_or,
    clippy::cloned_instead_of_copied,
    clippy::semicolon_if_nothing_returned,
    clippy::must_use_candidate,
    clippy::uninlined_format_args
)]

extern crate alloc;

#[cfg(test)]
extern crate std;

use core::fmt;

// Even when trace logging is disabled, the trace macro has a significant
// performance cost so we disable it in release builds.
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(feature = "trace-log") {
            ::log::trace!($($tt)*);
        }
    };
}

pub mod connected;
pub mod live_interval;
pub mod live_range;
pub mod reginfo;
pub mod slot_index;
pub mod updater;
pub mod validate;
pub mod vninfo;

/// Contract violations detectable on a live range or live interval.
///
/// The mutation algorithms in this crate never recover from a broken
/// invariant: they halt the compilation pass with an assertion naming the
/// violated contract. This taxonomy exists for the checkers in [`validate`],
/// which report the same conditions without aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LiveRangeError {
    /// A segment has `start >= end` or an invalid slot.
    InvalidSegment,

    /// `create_dead_def` was called with a dead slot.
    DeadSlotDef,

    /// Two segments overlap with differing value numbers, or touch while
    /// carrying the same value number without having been coalesced.
    OverlapMismatch,

    /// `append` received a segment starting before the end of the range.
    OrderViolation,

    /// A segment references a value number that is not live in the range's
    /// value number table.
    StaleVN,

    /// A subrange's lane mask intersects a sibling subrange or exceeds the
    /// register's maximum lane mask.
    LaneMaskConflict,

    /// `flush_segment_set` was called when the segment array was already
    /// populated.
    AppendPrecondition,
}

impl fmt::Display for LiveRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveRangeError::InvalidSegment => write!(f, "segment is empty or has invalid slots"),
            LiveRangeError::DeadSlotDef => write!(f, "cannot define a value at the dead slot"),
            LiveRangeError::OverlapMismatch => {
                write!(f, "segments overlap or touch with inconsistent value numbers")
            }
            LiveRangeError::OrderViolation => write!(f, "segment appended out of order"),
            LiveRangeError::StaleVN => {
                write!(f, "segment references a value number outside the table")
            }
            LiveRangeError::LaneMaskConflict => {
                write!(f, "subrange lane mask conflicts with its siblings or register")
            }
            LiveRangeError::AppendPrecondition => {
                write!(f, "segment set flushed into a non-empty segment array")
            }
        }
    }
}

impl core::error::Error for LiveRangeError {}
