//! Bounded, frame-ordered logs of commands and snapshots

use std::collections::VecDeque;

use glam::Vec3;

use super::frame::Frame;
use super::input::InputCommand;
use super::simulator::PlayerState;

/// Anything stored in a log carries the frame it belongs to
pub trait Framed {
    fn frame(&self) -> Frame;
}

impl Framed for InputCommand {
    fn frame(&self) -> Frame {
        self.frame
    }
}

/// Authority-published (or locally recorded) position for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub frame: Frame,
    pub position: Vec3,
}

impl Framed for Snapshot {
    fn frame(&self) -> Frame {
        self.frame
    }
}

/// Owner-side record: the published shape plus the full predicted state, so a
/// rollback can restart from exactly what was predicted at that frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSnapshot {
    pub snapshot: Snapshot,
    pub state: PlayerState,
}

impl RecordedSnapshot {
    pub fn new(frame: Frame, state: PlayerState) -> Self {
        Self {
            snapshot: Snapshot {
                frame,
                position: state.position,
            },
            state,
        }
    }
}

impl Framed for RecordedSnapshot {
    fn frame(&self) -> Frame {
        self.snapshot.frame
    }
}

/// Append-only log capped at `capacity`; the oldest entry goes first.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Framed> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append, evicting from the front until the cap holds again
    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
        self.trim();
    }

    /// Change the cap. Shrinking evicts the oldest entries immediately.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.trim();
    }

    fn trim(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn find(&self, frame: Frame) -> Option<&T> {
        self.entries.iter().find(|e| e.frame() == frame)
    }

    pub fn find_mut(&mut self, frame: Frame) -> Option<&mut T> {
        self.entries.iter_mut().find(|e| e.frame() == frame)
    }

    /// Entries strictly after `frame`, wrap-aware, in log order
    pub fn newer_than(&self, frame: Frame, max_frame: i16) -> impl Iterator<Item = &T> {
        self.entries
            .iter()
            .filter(move |e| e.frame().is_newer_than(frame, max_frame))
    }

    pub fn oldest(&self) -> Option<&T> {
        self.entries.front()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Replay buffer / outbound buffer of input commands
pub type CommandLog = BoundedLog<InputCommand>;

/// Locally recorded predictions, one per tick
pub type SnapshotLog = BoundedLog<RecordedSnapshot>;
