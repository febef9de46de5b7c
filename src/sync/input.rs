//! Per-frame input commands and the sampler that produces them

use super::frame::Frame;

/// One bit per intent. Nine intents need bits 0..=8, so the field is 16 bits wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InputFlags(u16);

impl InputFlags {
    pub const MOVE_LEFT: u16 = 1 << 0;
    pub const MOVE_RIGHT: u16 = 1 << 1;
    pub const JUMP: u16 = 1 << 2;
    pub const BEND: u16 = 1 << 3;
    pub const ISLAND_HOP: u16 = 1 << 4;
    pub const ATTACK: u16 = 1 << 5;
    pub const CUT: u16 = 1 << 6;
    pub const EXTRACT: u16 = 1 << 7;
    pub const MINE: u16 = 1 << 8;

    /// Every bit that carries meaning
    pub const ALL: u16 = Self::MOVE_LEFT
        | Self::MOVE_RIGHT
        | Self::JUMP
        | Self::BEND
        | Self::ISLAND_HOP
        | Self::ATTACK
        | Self::CUT
        | Self::EXTRACT
        | Self::MINE;

    /// Unknown bits are dropped so a hostile peer cannot smuggle extra state
    pub fn from_bits(bits: u16) -> Self {
        Self(bits & Self::ALL)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u16, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    fn with(mut self, bit: u16, value: bool) -> Self {
        self.set(bit, value);
        self
    }
}

// The highest intent bit must fit the storage width.
const _: () = assert!(InputFlags::MINE.trailing_zeros() < u16::BITS);

/// Discrete action selected by the player for the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionIntent {
    #[default]
    Idle,
    Attack,
    Cut,
    Extract,
    Mine,
}

/// Immutable input for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputCommand {
    pub frame: Frame,
    pub flags: InputFlags,
}

impl InputCommand {
    pub fn new(frame: Frame, flags: InputFlags) -> Self {
        Self { frame, flags }
    }

    /// -1 for left, +1 for right, 0 when idle. Right wins when both are set.
    pub fn move_direction(&self) -> f32 {
        if self.flags.contains(InputFlags::MOVE_RIGHT) {
            1.0
        } else if self.flags.contains(InputFlags::MOVE_LEFT) {
            -1.0
        } else {
            0.0
        }
    }

    pub fn jump(&self) -> bool {
        self.flags.contains(InputFlags::JUMP)
    }

    pub fn bend(&self) -> bool {
        self.flags.contains(InputFlags::BEND)
    }

    pub fn island_hop(&self) -> bool {
        self.flags.contains(InputFlags::ISLAND_HOP)
    }

    /// The single action honoured this frame, by priority attack > cut > extract > mine
    pub fn action(&self) -> ActionIntent {
        if self.flags.contains(InputFlags::ATTACK) {
            ActionIntent::Attack
        } else if self.flags.contains(InputFlags::CUT) {
            ActionIntent::Cut
        } else if self.flags.contains(InputFlags::EXTRACT) {
            ActionIntent::Extract
        } else if self.flags.contains(InputFlags::MINE) {
            ActionIntent::Mine
        } else {
            ActionIntent::Idle
        }
    }
}

/// Captures the player's current intent and turns it into one command per tick.
///
/// Only the current state matters; nothing about earlier ticks is kept.
#[derive(Debug, Clone, Default)]
pub struct InputSampler {
    axis: f32,
    jump: bool,
    bend: bool,
    island_hop: bool,
    action: ActionIntent,
}

impl InputSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continuous horizontal axis, clamped to [-1, 1]
    pub fn set_axis(&mut self, axis: f32) {
        self.axis = if axis.is_finite() { axis.clamp(-1.0, 1.0) } else { 0.0 };
    }

    pub fn request_move_left(&mut self) {
        self.axis = -1.0;
    }

    pub fn request_move_right(&mut self) {
        self.axis = 1.0;
    }

    pub fn request_jump(&mut self) {
        self.jump = true;
    }

    /// Bend is held: it stays set until released
    pub fn set_bend(&mut self, held: bool) {
        self.bend = held;
    }

    pub fn request_island_hop(&mut self) {
        self.island_hop = true;
    }

    pub fn request_action(&mut self, action: ActionIntent) {
        self.action = action;
    }

    /// Build the command for `frame` and consume the one-shot intents
    pub fn sample(&mut self, frame: Frame) -> InputCommand {
        let flags = InputFlags::default()
            .with(InputFlags::MOVE_LEFT, self.axis < 0.0)
            .with(InputFlags::MOVE_RIGHT, self.axis > 0.0)
            .with(InputFlags::JUMP, self.jump)
            .with(InputFlags::BEND, self.bend)
            .with(InputFlags::ISLAND_HOP, self.island_hop)
            .with(InputFlags::ATTACK, self.action == ActionIntent::Attack)
            .with(InputFlags::CUT, self.action == ActionIntent::Cut)
            .with(InputFlags::EXTRACT, self.action == ActionIntent::Extract)
            .with(InputFlags::MINE, self.action == ActionIntent::Mine);

        self.axis = 0.0;
        self.jump = false;
        self.island_hop = false;
        self.action = ActionIntent::Idle;

        InputCommand::new(frame, flags)
    }
}
