//! Smoothing of entities driven by another process

use glam::{Quat, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationSettings {
    /// Position approach rate (per second)
    pub position_rate: f32,
    /// Rotation approach rate (per second)
    pub rotation_rate: f32,
    /// Gap above which physics is switched off so the body can close it freely
    pub update_without_physics_threshold: f32,
    /// Gap below which physics comes back
    pub return_to_physics_threshold: f32,
}

impl Default for InterpolationSettings {
    fn default() -> Self {
        Self {
            position_rate: 20.0,
            rotation_rate: 20.0,
            update_without_physics_threshold: 0.1,
            return_to_physics_threshold: 0.005,
        }
    }
}

/// Displayed transform of a remote entity, blended toward the last published one.
///
/// Physics toggles with hysteresis: off above the upper threshold, back on
/// below the lower one, unchanged in between.
#[derive(Debug, Clone)]
pub struct RemoteInterpolator {
    settings: InterpolationSettings,
    position: Vec3,
    rotation: Quat,
    physics_enabled: bool,
}

impl RemoteInterpolator {
    pub fn new(settings: InterpolationSettings, position: Vec3, rotation: Quat) -> Self {
        Self {
            settings,
            position,
            rotation,
            physics_enabled: true,
        }
    }

    /// Advance one frame toward the authoritative transform
    pub fn update(&mut self, target_position: Vec3, target_rotation: Quat, dt: f32) {
        let gap = self.position.distance(target_position);
        self.apply_hysteresis(gap);

        let s = &self.settings;
        let position_t = (s.position_rate * dt).clamp(0.0, 1.0);
        let rotation_t = (s.rotation_rate * dt).clamp(0.0, 1.0);
        self.position = self.position.lerp(target_position, position_t);
        self.rotation = self.rotation.slerp(target_rotation, rotation_t);
    }

    fn apply_hysteresis(&mut self, gap: f32) {
        if gap > self.settings.update_without_physics_threshold {
            self.physics_enabled = false;
        } else if gap < self.settings.return_to_physics_threshold {
            self.physics_enabled = true;
        }
    }

    /// Teleport the displayed transform, e.g. when the entity first appears
    pub fn snap_to(&mut self, position: Vec3, rotation: Quat) {
        self.position = position;
        self.rotation = rotation;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn physics_enabled(&self) -> bool {
        self.physics_enabled
    }
}
