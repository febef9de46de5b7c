//! Deterministic movement and action step shared by owner and authority.
//!
//! The owner runs it for prediction, the authority runs it on the same
//! commands for ground truth. Everything it needs from the outside world comes
//! through [`Surroundings`], and everything it wants done to the outside world
//! comes back as [`ActionEffect`]s for the caller to dispatch.

use std::f32::consts::PI;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::input::{ActionIntent, InputCommand};

/// Movement and action constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimParams {
    /// Fixed step length in seconds
    pub dt: f32,
    /// Horizontal walking speed (units per second)
    pub move_speed: f32,
    pub jump_duration: f32,
    pub jump_height: f32,
    /// Horizontal travel over a whole jump
    pub jump_distance: f32,
    /// Minimum simulation time between two attacks
    pub attack_cooldown: f32,
    /// Radius searched for an attack target
    pub target_radius: f32,
    /// Damage dealt by one strike
    pub tool_damage: f32,
    /// Distance to the supporting surface under which the entity counts as grounded
    pub grounded_threshold: f32,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            dt: 1.0 / 60.0,
            move_speed: 0.5,
            jump_duration: 0.8,
            jump_height: 0.4,
            jump_distance: 0.5,
            attack_cooldown: 0.4,
            target_radius: 0.7,
            tool_damage: 10.0,
            grounded_threshold: 0.13,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Idle,
    Walk,
    Bend,
    Jump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionState {
    #[default]
    Idle,
    Attack,
    Cut,
    Extract,
    Mine,
}

/// Jump as an explicit timed state.
///
/// Entering `Airborne` makes the body kinematic until `elapsed` reaches the
/// jump duration; a new jump request cannot interrupt it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum JumpPhase {
    #[default]
    Grounded,
    Airborne {
        elapsed: f32,
        direction: f32,
    },
}

/// Physical state of one controllable entity
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub entity: Uuid,
    pub position: Vec3,
    /// Rotation the body should turn toward
    pub facing: Quat,
    pub move_state: MoveState,
    pub action_state: ActionState,
    pub jump: JumpPhase,
    pub grounded: bool,
    pub attacking: bool,
    /// Accumulated simulation time, advanced by `dt` per step
    pub sim_time: f32,
    pub last_attack_at: Option<f32>,
}

impl PlayerState {
    pub fn new(entity: Uuid, position: Vec3) -> Self {
        Self {
            entity,
            position,
            facing: Quat::IDENTITY,
            move_state: MoveState::Idle,
            action_state: ActionState::Idle,
            jump: JumpPhase::Grounded,
            grounded: true,
            attacking: false,
            sim_time: 0.0,
            last_attack_at: None,
        }
    }

    pub fn is_airborne(&self) -> bool {
        matches!(self.jump, JumpPhase::Airborne { .. })
    }

    /// Physics response is off for the whole jump window
    pub fn is_kinematic(&self) -> bool {
        self.is_airborne()
    }
}

/// Something that can be attacked
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetInfo {
    pub id: Uuid,
    pub position: Vec3,
}

/// Read-only queries the simulator may make of the world
pub trait Surroundings {
    /// Distance from `position` to the nearest supporting surface, if any is known
    fn ground_distance(&self, position: Vec3) -> Option<f32>;

    /// Nearest living entity within `radius`, never `exclude`
    fn nearest_target(&self, position: Vec3, radius: f32, exclude: Uuid) -> Option<TargetInfo>;
}

/// A flat floor at a fixed height plus a fixed set of targets
#[derive(Debug, Clone, Default)]
pub struct StaticSurroundings {
    pub floor: Option<f32>,
    pub targets: Vec<TargetInfo>,
}

impl StaticSurroundings {
    pub fn floor(height: f32) -> Self {
        Self {
            floor: Some(height),
            targets: Vec::new(),
        }
    }

    pub fn with_target(mut self, id: Uuid, position: Vec3) -> Self {
        self.targets.push(TargetInfo { id, position });
        self
    }
}

impl Surroundings for StaticSurroundings {
    fn ground_distance(&self, position: Vec3) -> Option<f32> {
        self.floor.map(|h| (position.y - h).abs())
    }

    fn nearest_target(&self, position: Vec3, radius: f32, exclude: Uuid) -> Option<TargetInfo> {
        nearest_in_plane(position, radius, exclude, self.targets.iter().copied())
    }
}

/// Nearest candidate by distance in the x/y plane, strictly inside `radius`
pub fn nearest_in_plane(
    position: Vec3,
    radius: f32,
    exclude: Uuid,
    candidates: impl IntoIterator<Item = TargetInfo>,
) -> Option<TargetInfo> {
    let mut best: Option<(f32, TargetInfo)> = None;
    for candidate in candidates {
        if candidate.id == exclude {
            continue;
        }
        let distance = position.truncate().distance(candidate.position.truncate());
        if distance < radius && best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, t)| t)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoreKind {
    Cut,
    Extract,
    Mine,
}

/// Requests for the game-rule collaborators, produced by a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionEffect {
    Strike {
        attacker: Uuid,
        target: Uuid,
        damage: f32,
    },
    IslandHop {
        entity: Uuid,
    },
    Chore {
        entity: Uuid,
        kind: ChoreKind,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub state: PlayerState,
    pub effects: Vec<ActionEffect>,
}

/// The shared state-transition function
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    params: SimParams,
}

impl Simulator {
    pub fn new(params: SimParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Apply one command to `state`
    pub fn step(
        &self,
        state: &PlayerState,
        command: &InputCommand,
        env: &dyn Surroundings,
    ) -> StepOutcome {
        let p = &self.params;
        let mut next = state.clone();
        let mut effects = Vec::new();

        next.sim_time += p.dt;
        if let Some(distance) = env.ground_distance(next.position) {
            next.grounded = distance < p.grounded_threshold;
        }

        let direction = command.move_direction();
        let moving = direction != 0.0;

        match next.jump {
            JumpPhase::Airborne { .. } => self.advance_jump(&mut next),
            JumpPhase::Grounded if command.jump() => {
                next.jump = JumpPhase::Airborne {
                    elapsed: 0.0,
                    direction,
                };
                next.move_state = MoveState::Jump;
                self.advance_jump(&mut next);
            }
            JumpPhase::Grounded => {
                if next.grounded || next.move_state == MoveState::Jump {
                    next.move_state = MoveState::Idle;
                }
            }
        }

        if moving && !next.is_airborne() {
            next.position.x += direction * p.move_speed * p.dt;
            next.move_state = MoveState::Walk;
        }

        if command.bend() && !next.is_airborne() {
            next.move_state = MoveState::Bend;
        }

        if command.island_hop() && next.grounded {
            effects.push(ActionEffect::IslandHop {
                entity: next.entity,
            });
        }

        // Facing uses last frame's attack flag, before this frame's action
        if moving && !next.attacking {
            next.facing = facing_for(direction);
        }

        self.apply_action(&mut next, command.action(), env, &mut effects);

        StepOutcome {
            state: next,
            effects,
        }
    }

    /// Fold `step` over an ordered command sequence, discarding effects
    pub fn replay<'a>(
        &self,
        state: &PlayerState,
        commands: impl IntoIterator<Item = &'a InputCommand>,
        env: &dyn Surroundings,
    ) -> PlayerState {
        commands
            .into_iter()
            .fold(state.clone(), |acc, command| self.step(&acc, command, env).state)
    }

    /// Point on the jump arc relative to the take-off position
    fn arc_offset(&self, elapsed: f32, direction: f32) -> Vec3 {
        let p = &self.params;
        let fraction = if p.jump_duration > 0.0 {
            (elapsed / p.jump_duration).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let height = (PI * fraction).sin() * p.jump_height;
        Vec3::new(direction * p.jump_distance * fraction, height, 0.0)
    }

    fn advance_jump(&self, state: &mut PlayerState) {
        let JumpPhase::Airborne { elapsed, direction } = state.jump else {
            return;
        };
        let until = (elapsed + self.params.dt).min(self.params.jump_duration);
        state.position += self.arc_offset(until, direction) - self.arc_offset(elapsed, direction);

        if until >= self.params.jump_duration {
            state.jump = JumpPhase::Grounded;
        } else {
            state.jump = JumpPhase::Airborne {
                elapsed: until,
                direction,
            };
        }
    }

    fn apply_action(
        &self,
        state: &mut PlayerState,
        action: ActionIntent,
        env: &dyn Surroundings,
        effects: &mut Vec<ActionEffect>,
    ) {
        let p = &self.params;
        match action {
            ActionIntent::Attack => {
                let ready = state
                    .last_attack_at
                    .map_or(true, |at| state.sim_time - at >= p.attack_cooldown);
                if !ready {
                    return;
                }
                match env.nearest_target(state.position, p.target_radius, state.entity) {
                    Some(target) => {
                        state.attacking = true;
                        state.facing = facing_for((target.position.x - state.position.x).signum());
                        state.last_attack_at = Some(state.sim_time);
                        effects.push(ActionEffect::Strike {
                            attacker: state.entity,
                            target: target.id,
                            damage: p.tool_damage,
                        });
                    }
                    None => state.attacking = false,
                }
                state.action_state = ActionState::Attack;
            }
            ActionIntent::Cut => self.chore(state, ChoreKind::Cut, effects),
            ActionIntent::Extract => self.chore(state, ChoreKind::Extract, effects),
            ActionIntent::Mine => self.chore(state, ChoreKind::Mine, effects),
            ActionIntent::Idle => {
                state.action_state = ActionState::Idle;
                state.attacking = false;
            }
        }
    }

    fn chore(&self, state: &mut PlayerState, kind: ChoreKind, effects: &mut Vec<ActionEffect>) {
        state.action_state = match kind {
            ChoreKind::Cut => ActionState::Cut,
            ChoreKind::Extract => ActionState::Extract,
            ChoreKind::Mine => ActionState::Mine,
        };
        effects.push(ActionEffect::Chore {
            entity: state.entity,
            kind,
        });
    }
}

/// Yaw of ±90° toward the given horizontal direction
pub fn facing_for(direction: f32) -> Quat {
    Quat::from_rotation_y((90.0 * direction).to_radians())
}
