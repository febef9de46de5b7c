//! Combat helpers - health and damage

use uuid::Uuid;

/// Health every entity spawns with
pub const DEFAULT_HEALTH: f32 = 100.0;

/// Combat system for managing damage
pub struct CombatSystem;

impl CombatSystem {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage.max(0.0)).max(0.0);
        (new_health, new_health <= 0.0)
    }

    /// Whether an entity with this health may still be targeted
    pub fn is_targetable(health: f32) -> bool {
        health > 0.0
    }
}

/// Hit result from combat resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    pub attacker: Uuid,
    pub target: Uuid,
    pub damage: f32,
    pub remaining_health: f32,
    pub target_defeated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_floors_at_zero() {
        assert_eq!(CombatSystem::apply_damage(100.0, 10.0), (90.0, false));
        assert_eq!(CombatSystem::apply_damage(5.0, 10.0), (0.0, true));
        assert_eq!(CombatSystem::apply_damage(50.0, -10.0), (50.0, false));
        assert!(!CombatSystem::is_targetable(0.0));
    }
}
