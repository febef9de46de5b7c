//! Wrapping frame counter used as the ordering key for commands and snapshots

use std::fmt;

use super::batcher::BATCH_SIZE_HIGH_LATENCY;

/// Ceiling observed in production: the counter wraps to zero on reaching it.
pub const DEFAULT_MAX_FRAME: i16 = 20_000;

/// Smallest usable ceiling. Half the ring must span the largest batch plus the
/// anchor frame before it, or wrap-aware ordering inside a batch breaks.
pub const MIN_MAX_FRAME: i16 = 2 * (BATCH_SIZE_HIGH_LATENCY as i16 + 1);

/// A simulation frame index in `0..max_frame`.
///
/// Frames are matching keys, not timestamps. Comparisons must go through
/// [`Frame::is_newer_than`] so that a frame just past the wrap boundary is not
/// mistaken for an old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Frame(pub i16);

impl Frame {
    pub const ZERO: Frame = Frame(0);

    pub fn value(self) -> i16 {
        self.0
    }

    /// Whether this frame lies in the valid range for the given ceiling
    pub fn is_valid(self, max_frame: i16) -> bool {
        self.0 >= 0 && self.0 < max_frame
    }

    /// Forward distance from `earlier` to `self`, modulo the ceiling
    pub fn wrapping_distance(self, earlier: Frame, max_frame: i16) -> i32 {
        (i32::from(self.0) - i32::from(earlier.0)).rem_euclid(i32::from(max_frame.max(1)))
    }

    /// Wrap-aware "strictly after" comparison.
    ///
    /// `self` is newer when it is less than half the ring ahead of `other`.
    pub fn is_newer_than(self, other: Frame, max_frame: i16) -> bool {
        let distance = self.wrapping_distance(other, max_frame);
        distance > 0 && distance < i32::from(max_frame) / 2
    }

    /// The frame following this one
    pub fn next(self, max_frame: i16) -> Frame {
        let next = self.0.saturating_add(1);
        if next >= max_frame {
            Frame::ZERO
        } else {
            Frame(next)
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-entity frame counter, advanced exactly once per tick
#[derive(Debug, Clone)]
pub struct FrameClock {
    current: Frame,
    max_frame: i16,
}

impl FrameClock {
    pub fn new(max_frame: i16) -> Self {
        Self {
            current: Frame::ZERO,
            max_frame: max_frame.max(MIN_MAX_FRAME),
        }
    }

    /// Step to the next frame, wrapping to zero at the ceiling
    pub fn advance(&mut self) -> Frame {
        self.current = self.current.next(self.max_frame);
        self.current
    }

    pub fn current(&self) -> Frame {
        self.current
    }

    pub fn max_frame(&self) -> i16 {
        self.max_frame
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}
