//! The session's world: islands, living entities and the game-rule hooks
//! the movement core calls out to.

use std::collections::HashMap;

use glam::Vec3;
use rand::Rng;
use tracing::debug;
use uuid::Uuid;

use crate::sync::simulator::nearest_in_plane;
use crate::sync::{ActionEffect, ChoreKind, Surroundings, TargetInfo};
use crate::ws::protocol::GameEvent;

use super::combat::{CombatSystem, HitResult, DEFAULT_HEALTH};

pub type IslandId = u32;

const ISLAND_WIDTH: f32 = 3.0;
const ISLAND_SPACING: f32 = 3.5;
/// How far below a surface something may sink and still stand on it
const GROUND_SLACK: f32 = 0.5;
/// Keep spawns away from island edges
const SPAWN_MARGIN: f32 = 0.5;

/// A walkable platform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Island {
    pub id: IslandId,
    pub min_x: f32,
    pub max_x: f32,
    pub surface_y: f32,
    /// Depth every body on this island is held to
    pub lane_z: f32,
    /// Landing here starts a fight
    pub arena: bool,
}

impl Island {
    pub fn contains_x(&self, x: f32) -> bool {
        x >= self.min_x && x <= self.max_x
    }
}

#[derive(Debug, Clone)]
struct Living {
    position: Vec3,
    health: f32,
    island: Option<IslandId>,
    in_fight: bool,
}

/// Authority-side consequences of simulated actions
pub trait GameRules {
    fn apply_damage(&mut self, attacker: Uuid, target: Uuid, damage: f32) -> Option<HitResult>;
    fn set_fight_state(&mut self, entity: Uuid, in_fight: bool);
    fn report_camera_target(&mut self, entity: Uuid, island: IslandId);
    fn request_island_hop(&mut self, entity: Uuid);
    fn perform_chore(&mut self, entity: Uuid, kind: ChoreKind);
}

/// Route one simulator effect to the rules that resolve it
pub fn dispatch_effect(rules: &mut impl GameRules, effect: ActionEffect) {
    match effect {
        ActionEffect::Strike {
            attacker,
            target,
            damage,
        } => {
            rules.apply_damage(attacker, target, damage);
        }
        ActionEffect::IslandHop { entity } => rules.request_island_hop(entity),
        ActionEffect::Chore { entity, kind } => rules.perform_chore(entity, kind),
    }
}

/// Islands and the entities standing on them
#[derive(Debug, Clone, Default)]
pub struct World {
    islands: Vec<Island>,
    living: HashMap<Uuid, Living>,
    events: Vec<GameEvent>,
}

impl World {
    pub fn new(islands: Vec<Island>) -> Self {
        Self {
            islands,
            living: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// A row of islands along x. The first is a peaceful spawn, the rest are arenas.
    pub fn archipelago(count: usize) -> Self {
        let islands = (0..count.max(1))
            .map(|i| {
                let min_x = i as f32 * ISLAND_SPACING;
                Island {
                    id: i as IslandId,
                    min_x,
                    max_x: min_x + ISLAND_WIDTH,
                    surface_y: 0.0,
                    lane_z: 0.0,
                    arena: i > 0,
                }
            })
            .collect();
        Self::new(islands)
    }

    pub fn islands(&self) -> &[Island] {
        &self.islands
    }

    /// Island whose surface supports `position`
    pub fn island_under(&self, position: Vec3) -> Option<&Island> {
        self.islands
            .iter()
            .find(|i| i.contains_x(position.x) && position.y >= i.surface_y - GROUND_SLACK)
    }

    /// Place a new entity on the spawn island
    pub fn spawn(&mut self, entity: Uuid, rng: &mut impl Rng) -> Vec3 {
        let position = match self.islands.first() {
            Some(island) => {
                let lo = island.min_x + SPAWN_MARGIN;
                let hi = (island.max_x - SPAWN_MARGIN).max(lo + f32::EPSILON);
                Vec3::new(rng.gen_range(lo..hi), island.surface_y, island.lane_z)
            }
            None => Vec3::ZERO,
        };
        let island = self.island_under(position).map(|i| i.id);
        self.living.insert(
            entity,
            Living {
                position,
                health: DEFAULT_HEALTH,
                island,
                in_fight: false,
            },
        );
        position
    }

    pub fn despawn(&mut self, entity: Uuid) {
        self.living.remove(&entity);
    }

    pub fn set_position(&mut self, entity: Uuid, position: Vec3) {
        if let Some(living) = self.living.get_mut(&entity) {
            living.position = position;
        }
    }

    pub fn health(&self, entity: Uuid) -> Option<f32> {
        self.living.get(&entity).map(|l| l.health)
    }

    pub fn in_fight(&self, entity: Uuid) -> bool {
        self.living.get(&entity).map_or(false, |l| l.in_fight)
    }

    /// Depth the entity is held to, from the island it last landed on
    pub fn lane_for(&self, entity: Uuid) -> Option<f32> {
        let island = self.living.get(&entity)?.island?;
        self.islands.iter().find(|i| i.id == island).map(|i| i.lane_z)
    }

    /// Record the entity's post-physics position and detect island landings
    pub fn settle(&mut self, entity: Uuid, position: Vec3, grounded: bool) {
        self.set_position(entity, position);
        if !grounded {
            return;
        }
        let Some(landed) = self.island_under(position).copied() else {
            return;
        };
        let Some(living) = self.living.get_mut(&entity) else {
            return;
        };
        if living.island == Some(landed.id) {
            return;
        }
        living.island = Some(landed.id);
        debug!(entity_id = %entity, island_id = landed.id, "Entity landed on island");

        self.events.push(GameEvent::IslandLanded {
            entity_id: entity,
            island_id: landed.id,
        });
        self.set_fight_state(entity, landed.arena);
        self.report_camera_target(entity, landed.id);
    }

    /// Take every event produced since the last drain
    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Surroundings for World {
    fn ground_distance(&self, position: Vec3) -> Option<f32> {
        self.island_under(position)
            .map(|island| (position.y - island.surface_y).abs())
    }

    fn nearest_target(&self, position: Vec3, radius: f32, exclude: Uuid) -> Option<TargetInfo> {
        let candidates = self
            .living
            .iter()
            .filter(|(_, l)| CombatSystem::is_targetable(l.health))
            .map(|(id, l)| TargetInfo {
                id: *id,
                position: l.position,
            });
        nearest_in_plane(position, radius, exclude, candidates)
    }
}

impl GameRules for World {
    fn apply_damage(&mut self, attacker: Uuid, target: Uuid, damage: f32) -> Option<HitResult> {
        let living = self.living.get_mut(&target)?;
        if !CombatSystem::is_targetable(living.health) {
            return None;
        }
        let (remaining_health, target_defeated) =
            CombatSystem::apply_damage(living.health, damage);
        living.health = remaining_health;

        self.events.push(GameEvent::Strike {
            attacker,
            target,
            damage,
            remaining_health,
        });
        if target_defeated {
            self.events.push(GameEvent::Defeated {
                entity_id: target,
                by: attacker,
            });
        }

        Some(HitResult {
            attacker,
            target,
            damage,
            remaining_health,
            target_defeated,
        })
    }

    fn set_fight_state(&mut self, entity: Uuid, in_fight: bool) {
        let Some(living) = self.living.get_mut(&entity) else {
            return;
        };
        if living.in_fight != in_fight {
            living.in_fight = in_fight;
            self.events.push(GameEvent::FightState {
                entity_id: entity,
                in_fight,
            });
        }
    }

    fn report_camera_target(&mut self, entity: Uuid, island: IslandId) {
        self.events.push(GameEvent::CameraTarget {
            entity_id: entity,
            island_id: island,
        });
    }

    fn request_island_hop(&mut self, entity: Uuid) {
        let from_island = self.living.get(&entity).and_then(|l| l.island);
        self.events.push(GameEvent::IslandHopRequested {
            entity_id: entity,
            from_island,
        });
    }

    fn perform_chore(&mut self, entity: Uuid, kind: ChoreKind) {
        self.events.push(GameEvent::Chore {
            entity_id: entity,
            chore: kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn world_with(ids: &[Uuid]) -> World {
        let mut world = World::archipelago(3);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for id in ids {
            world.spawn(*id, &mut rng);
        }
        world.drain_events();
        world
    }

    #[test]
    fn spawns_land_on_first_island() {
        let a = Uuid::new_v4();
        let world = world_with(&[a]);
        assert_eq!(world.lane_for(a), Some(0.0));
        assert_eq!(world.health(a), Some(DEFAULT_HEALTH));
        assert!(!world.in_fight(a));
    }

    #[test]
    fn ground_distance_only_over_islands() {
        let world = World::archipelago(2);
        assert_eq!(world.ground_distance(Vec3::new(1.0, 0.25, 0.0)), Some(0.25));
        // Gap between island 0 (0..3) and island 1 (3.5..6.5)
        assert_eq!(world.ground_distance(Vec3::new(3.2, 0.0, 0.0)), None);
    }

    #[test]
    fn strike_reduces_health_until_defeat() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut world = world_with(&[a, b]);

        for _ in 0..9 {
            dispatch_effect(
                &mut world,
                ActionEffect::Strike {
                    attacker: a,
                    target: b,
                    damage: 10.0,
                },
            );
        }
        assert_eq!(world.health(b), Some(10.0));
        let hit = world.apply_damage(a, b, 10.0).unwrap();
        assert!(hit.target_defeated);

        let events = world.drain_events();
        assert_eq!(events.len(), 11);
        assert_eq!(events[10], GameEvent::Defeated { entity_id: b, by: a });

        // Defeated entities are no longer targets
        assert!(world.apply_damage(a, b, 10.0).is_none());
        let near_b = Vec3::new(0.0, 0.0, 0.0);
        let found = world.nearest_target(near_b, 100.0, a);
        assert!(found.is_none());
    }

    #[test]
    fn landing_on_arena_starts_fight_and_moves_camera() {
        let a = Uuid::new_v4();
        let mut world = world_with(&[a]);

        world.settle(a, Vec3::new(4.0, 0.0, 0.0), true);
        assert_eq!(
            world.drain_events(),
            vec![
                GameEvent::IslandLanded {
                    entity_id: a,
                    island_id: 1
                },
                GameEvent::FightState {
                    entity_id: a,
                    in_fight: true
                },
                GameEvent::CameraTarget {
                    entity_id: a,
                    island_id: 1
                },
            ]
        );
        assert!(world.in_fight(a));

        // Same island again, or airborne over another, is not a landing
        world.settle(a, Vec3::new(5.0, 0.0, 0.0), true);
        world.settle(a, Vec3::new(1.0, 0.3, 0.0), false);
        assert!(world.drain_events().is_empty());
    }

    #[test]
    fn island_hop_reports_origin() {
        let a = Uuid::new_v4();
        let mut world = world_with(&[a]);
        dispatch_effect(&mut world, ActionEffect::IslandHop { entity: a });
        dispatch_effect(
            &mut world,
            ActionEffect::Chore {
                entity: a,
                kind: ChoreKind::Cut,
            },
        );
        assert_eq!(
            world.drain_events(),
            vec![
                GameEvent::IslandHopRequested {
                    entity_id: a,
                    from_island: Some(0)
                },
                GameEvent::Chore {
                    entity_id: a,
                    chore: ChoreKind::Cut
                },
            ]
        );
    }
}
