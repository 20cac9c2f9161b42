//! Entity behavior.
//!
//! Entity records are plain data; each [`EntityKind`] gets a zero-sized
//! controller implementing [`Controller`]. The shared actions (move, attack,
//! take damage, die, follow) are free functions over a [`WorldMap`] so two
//! entities of the same map can interact without aliasing borrows.

pub mod ai;
pub mod monster;
pub mod npc;
pub mod player;
pub mod portal;

pub use monster::MonsterControl;
pub use npc::NpcControl;
pub use player::PlayerControl;
pub use portal::PortalControl;

use log::{debug, info};
use thiserror::Error;
use realm_shared::{Direction, EntityKind};

use crate::entities::Entity;
use crate::world::WorldMap;

/// Dead entities that revive come back after five minutes
pub const REVIVE_DELAY_MS: u64 = 5 * 60 * 1000;

/// Failure while ticking a single entity
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("entity {0} is not on this map")]
    EntityMissing(u64),
    #[error("failed to serialize packet: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Cross-map work requested by a controller, applied by the world
#[derive(Debug, Clone, PartialEq)]
pub enum WorldAction {
    /// Move an entity to a position on another (or the same) map
    Transfer { gid: u64, map: String, x: f32, y: f32 },
}

/// What a victim learns about the hit it takes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub attacker: u64,
    pub map_id: u32,
    pub damage: i32,
}

impl Hit {
    pub fn from_entity(attacker: &Entity) -> Self {
        Self {
            attacker: attacker.gid,
            map_id: attacker.map_id,
            damage: attacker.attack_damage(),
        }
    }
}

/// What a killer learns about its victim
#[derive(Debug, Clone, PartialEq)]
pub struct Kill {
    pub gid: u64,
    pub name: String,
    pub kind: EntityKind,
    pub level: u32,
    /// Time of death
    pub at: u64,
}

/// Per-kind behavior contract
pub trait Controller: Sync {
    /// NPCs and portals are invulnerable
    fn takes_damage(&self) -> bool {
        true
    }

    /// Whether the timed auto-revive applies
    fn revives(&self) -> bool {
        false
    }

    /// Kind-specific per-tick behavior of a living entity
    fn on_tick(
        &self,
        map: &mut WorldMap,
        gid: u64,
        now: u64,
        actions: &mut Vec<WorldAction>,
    ) -> Result<(), ControlError>;

    /// Called right after a timed revive
    fn on_revive(&self, _entity: &mut Entity, _actions: &mut Vec<WorldAction>) {}

    /// Called once when the entity dies
    fn on_die(&self, _entity: &Entity, _map_name: &str) -> Result<(), ControlError> {
        Ok(())
    }

    /// Reward hook invoked on the killer
    fn on_kill(&self, _killer: &mut Entity, _victim: &Kill, _map_name: &str) -> Result<(), ControlError> {
        Ok(())
    }
}

/// Controller bound to a kind
pub fn controller(kind: EntityKind) -> &'static dyn Controller {
    match kind {
        EntityKind::Npc => &NpcControl,
        EntityKind::Monster => &MonsterControl,
        EntityKind::Player => &PlayerControl,
        EntityKind::Portal => &PortalControl,
    }
}

/// Common per-tick entry point
pub fn tick(
    map: &mut WorldMap,
    gid: u64,
    now: u64,
    actions: &mut Vec<WorldAction>,
) -> Result<(), ControlError> {
    let entity = map.get_mut(gid).ok_or(ControlError::EntityMissing(gid))?;
    let control = controller(entity.kind());

    if entity.is_dead() {
        if control.revives() && now.saturating_sub(entity.death) >= REVIVE_DELAY_MS {
            entity.revive();
            entity.to_save_position();
            info!("{} ({}) revived at ({}, {})", entity.name, gid, entity.x, entity.y);
            control.on_revive(entity, actions);
        }
        return Ok(());
    }

    control.on_tick(map, gid, now, actions)
}

/// Step one unit in `direction`. Returns true if the step was taken.
pub fn move_entity(map: &mut WorldMap, gid: u64, direction: Direction, now: u64) -> bool {
    let (width, height) = (map.width, map.height);
    let Some(entity) = map.get_mut(gid) else {
        return false;
    };
    if entity.is_dead() || !entity.move_cooldown.is_expired(now) {
        return false;
    }

    let (dx, dy) = direction.delta();
    entity.direction = direction;
    entity.x = (entity.x + dx).clamp(0.0, width);
    entity.y = (entity.y + dy).clamp(0.0, height);
    let delay = entity.move_delay();
    entity.move_cooldown.set(now + delay);
    true
}

/// Melee attack gated by the attack cooldown and range
pub fn attack(map: &mut WorldMap, attacker_gid: u64, target_gid: u64, now: u64) -> bool {
    let Some(attacker) = map.get(attacker_gid) else {
        return false;
    };
    if attacker.is_dead() || !attacker.attack_cooldown.is_expired(now) {
        return false;
    }
    let Some(target) = map.get(target_gid) else {
        return false;
    };
    if !attacker.in_melee_range(target) {
        return false;
    }

    let hit = Hit::from_entity(attacker);
    let delay = attacker.attack_delay();
    if let Some(attacker) = map.get_mut(attacker_gid) {
        attacker.attack_cooldown.set(now + delay);
    }
    take_damage(map, target_gid, &hit, now);
    true
}

/// Apply a hit. Returns the damage dealt, `None` if the hit was rejected.
pub fn take_damage(map: &mut WorldMap, target_gid: u64, hit: &Hit, now: u64) -> Option<i32> {
    let target = map.get_mut(target_gid)?;
    if target.is_dead() || !controller(target.kind()).takes_damage() {
        return None;
    }
    if target.map_id != hit.map_id {
        debug!("Rejected cross-map hit from {} on {}", hit.attacker, target_gid);
        return None;
    }

    target.hp -= hit.damage;
    debug!("{} hit {} for {} ({} hp left)", hit.attacker, target_gid, hit.damage, target.hp.max(0));
    if target.hp <= 0 {
        die(map, target_gid, Some(hit.attacker), now);
    }
    Some(hit.damage)
}

/// Mark an entity dead and reward its killer
pub fn die(map: &mut WorldMap, victim_gid: u64, killer_gid: Option<u64>, now: u64) {
    let map_name = map.name.clone();
    let Some(victim) = map.get_mut(victim_gid) else {
        return;
    };

    victim.hp = 0;
    victim.mp = 0;
    victim.death = now;
    victim.clear_intents();
    if let Some(player) = victim.player_mut() {
        player.dialog = None;
    }
    let control = controller(victim.kind());
    if let Err(e) = control.on_die(victim, &map_name) {
        debug!("Death hook failed for {}: {}", victim_gid, e);
    }

    let kill = Kill {
        gid: victim.gid,
        name: victim.name.clone(),
        kind: victim.kind(),
        level: victim.level,
        at: now,
    };
    info!("{} ({}) died on map '{}'", kill.name, victim_gid, map_name);

    let Some(killer) = killer_gid.and_then(|gid| map.get_mut(gid)) else {
        return;
    };
    if let Err(e) = controller(killer.kind()).on_kill(killer, &kill, &map_name) {
        debug!("Kill hook failed for {}: {}", killer.gid, e);
    }
}

/// Close in on another entity, at most one unit per axis per step.
/// Stops following once the target is dead, gone or within melee range.
pub fn follow(map: &mut WorldMap, gid: u64, target_gid: u64, now: u64) -> bool {
    let target = map.get(target_gid).map(|t| (t.x, t.y, t.is_dead()));
    let (width, height) = (map.width, map.height);
    let Some(entity) = map.get_mut(gid) else {
        return false;
    };
    if entity.is_dead() || !entity.move_cooldown.is_expired(now) {
        return false;
    }

    let Some((tx, ty, dead)) = target else {
        entity.follow = None;
        return false;
    };
    if dead || entity.distance_to(tx, ty) <= entity.range {
        entity.follow = None;
        return false;
    }

    advance_towards(entity, tx, ty, width, height, now);
    true
}

/// Walk towards a point, one unit per axis per step. Returns true once the
/// point is reached.
pub fn step_towards(map: &mut WorldMap, gid: u64, tx: f32, ty: f32, now: u64) -> bool {
    let (width, height) = (map.width, map.height);
    let (tx, ty) = map.clamp(tx, ty);
    let Some(entity) = map.get_mut(gid) else {
        return true;
    };
    if entity.x == tx && entity.y == ty {
        return true;
    }
    if entity.is_dead() || !entity.move_cooldown.is_expired(now) {
        return false;
    }

    advance_towards(entity, tx, ty, width, height, now);
    entity.x == tx && entity.y == ty
}

fn advance_towards(entity: &mut Entity, tx: f32, ty: f32, width: f32, height: f32, now: u64) {
    let dx = (tx - entity.x).clamp(-1.0, 1.0);
    let dy = (ty - entity.y).clamp(-1.0, 1.0);

    entity.direction = if dx.abs() >= dy.abs() {
        if dx < 0.0 { Direction::Left } else { Direction::Right }
    } else if dy < 0.0 {
        Direction::Up
    } else {
        Direction::Down
    };
    entity.x = (entity.x + dx).clamp(0.0, width);
    entity.y = (entity.y + dy).clamp(0.0, height);
    let delay = entity.move_delay();
    entity.move_cooldown.set(now + delay);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::dummy;
    use crate::world::definitions::MapDefinition;
    use realm_shared::PortalTarget;

    fn map_with(entities: Vec<Entity>) -> WorldMap {
        let mut map = WorldMap::new(MapDefinition::empty(1, "test", 20.0, 20.0));
        for entity in entities {
            map.add_entity(entity);
        }
        map
    }

    #[test]
    fn test_move_respects_cooldown() {
        let mut map = map_with(vec![dummy(1, 5.0, 5.0)]);
        assert!(move_entity(&mut map, 1, Direction::Right, 1_000));
        // Same cooldown window: no change
        assert!(!move_entity(&mut map, 1, Direction::Right, 1_000));
        assert_eq!(map.get(1).unwrap().x, 6.0);
        assert_eq!(map.get(1).unwrap().direction, Direction::Right);

        let delay = map.get(1).unwrap().move_delay();
        assert!(move_entity(&mut map, 1, Direction::Up, 1_001 + delay));
        assert_eq!((map.get(1).unwrap().x, map.get(1).unwrap().y), (6.0, 4.0));
    }

    #[test]
    fn test_move_never_leaves_bounds() {
        let mut map = map_with(vec![dummy(1, 0.0, 20.0)]);
        let mut now = 1;
        for direction in [Direction::Left, Direction::Down, Direction::Left, Direction::Down] {
            for _ in 0..5 {
                now += 1_000;
                move_entity(&mut map, 1, direction, now);
                let entity = map.get(1).unwrap();
                assert!((0.0..=20.0).contains(&entity.x));
                assert!((0.0..=20.0).contains(&entity.y));
            }
        }
        let entity = map.get(1).unwrap();
        assert_eq!((entity.x, entity.y), (0.0, 20.0));
    }

    #[test]
    fn test_dead_entity_cannot_move() {
        let mut map = map_with(vec![dummy(1, 5.0, 5.0)]);
        map.get_mut(1).unwrap().hp = 0;
        assert!(!move_entity(&mut map, 1, Direction::Left, 10));
    }

    #[test]
    fn test_attack_kills_and_dies_once() {
        let mut attacker = dummy(1, 5.0, 5.0);
        attacker.stats.strength = 10;
        attacker.stats.atk = 5;
        attacker.stats.atk_multiplier = 1.0;
        let mut target = dummy(2, 6.0, 5.0);
        target.hp = 12;
        let mut map = map_with(vec![attacker, target]);

        assert!(attack(&mut map, 1, 2, 1_000));
        let target = map.get(2).unwrap();
        assert_eq!(target.hp, 0);
        assert_eq!(target.death, 1_000);

        // Further hits are rejected while dead
        let hit = Hit { attacker: 1, map_id: 1, damage: 15 };
        assert_eq!(take_damage(&mut map, 2, &hit, 9_000), None);
        assert_eq!(map.get(2).unwrap().death, 1_000);
        assert_eq!(map.get(2).unwrap().hp, 0);
    }

    #[test]
    fn test_attack_gated_by_cooldown_and_range() {
        let mut map = map_with(vec![dummy(1, 5.0, 5.0), dummy(2, 6.0, 6.0), dummy(3, 9.0, 5.0)]);
        assert!(!attack(&mut map, 1, 3, 1_000), "out of range");
        assert!(map.get(1).unwrap().attack_cooldown.is_expired(1_000));

        assert!(attack(&mut map, 1, 2, 1_000));
        let hp = map.get(2).unwrap().hp;
        assert!(!attack(&mut map, 1, 2, 1_500));
        assert_eq!(map.get(2).unwrap().hp, hp);

        let delay = map.get(1).unwrap().attack_delay();
        assert!(attack(&mut map, 1, 2, 1_001 + delay));
        assert!(map.get(2).unwrap().hp < hp);
    }

    #[test]
    fn test_cross_map_hit_rejected() {
        let mut map = map_with(vec![dummy(2, 5.0, 5.0)]);
        let hit = Hit { attacker: 99, map_id: 7, damage: 50 };
        assert_eq!(take_damage(&mut map, 2, &hit, 10), None);
        assert_eq!(map.get(2).unwrap().hp, 100);
    }

    #[test]
    fn test_invulnerable_kinds_ignore_damage() {
        let npc = Entity::npc(2, "Guide", 5.0, 5.0, vec![]);
        let portal = Entity::portal(3, 6.0, 5.0, PortalTarget { name: "x".into(), x: 0.0, y: 0.0 });
        let mut map = map_with(vec![npc, portal]);
        let hit = Hit { attacker: 1, map_id: 1, damage: 500 };
        assert_eq!(take_damage(&mut map, 2, &hit, 10), None);
        assert_eq!(take_damage(&mut map, 3, &hit, 10), None);
        assert!(!map.get(2).unwrap().is_dead());
    }

    #[test]
    fn test_die_clears_intents() {
        let mut map = map_with(vec![dummy(1, 5.0, 5.0)]);
        {
            let entity = map.get_mut(1).unwrap();
            entity.target = Some(4);
            entity.follow = Some(4);
            entity.move_to = Some((1.0, 1.0));
            entity.mp = 10;
        }
        die(&mut map, 1, None, 77);
        let entity = map.get(1).unwrap();
        assert_eq!((entity.hp, entity.mp, entity.death), (0, 0, 77));
        assert_eq!((entity.target, entity.follow, entity.move_to), (None, None, None));
    }

    #[test]
    fn test_follow_moves_diagonally_and_stops_in_range() {
        let mut map = map_with(vec![dummy(1, 5.0, 5.0), dummy(2, 9.0, 8.0)]);
        map.get_mut(1).unwrap().follow = Some(2);

        assert!(follow(&mut map, 1, 2, 1_000));
        let entity = map.get(1).unwrap();
        assert_eq!((entity.x, entity.y), (6.0, 6.0));

        let mut now = 1_000;
        for _ in 0..10 {
            now += 1_000;
            follow(&mut map, 1, 2, now);
        }
        let entity = map.get(1).unwrap();
        assert!(entity.distance_to(9.0, 8.0) <= entity.range);
        assert_eq!(entity.follow, None);
    }

    #[test]
    fn test_follow_stops_on_dead_target() {
        let mut map = map_with(vec![dummy(1, 5.0, 5.0), dummy(2, 12.0, 5.0)]);
        map.get_mut(1).unwrap().follow = Some(2);
        map.get_mut(2).unwrap().hp = 0;
        assert!(!follow(&mut map, 1, 2, 1_000));
        assert_eq!(map.get(1).unwrap().follow, None);
        assert_eq!(map.get(1).unwrap().x, 5.0);
    }

    #[test]
    fn test_timed_revive() {
        let mut map = map_with(vec![dummy(1, 5.0, 5.0)]);
        map.get_mut(1).unwrap().x = 9.0;
        die(&mut map, 1, None, 1_000);

        let mut actions = Vec::new();
        tick(&mut map, 1, 1_000 + REVIVE_DELAY_MS - 1, &mut actions).unwrap();
        assert!(map.get(1).unwrap().is_dead());

        tick(&mut map, 1, 1_000 + REVIVE_DELAY_MS, &mut actions).unwrap();
        let entity = map.get(1).unwrap();
        assert_eq!(entity.hp, entity.hp_max);
        assert_eq!((entity.x, entity.y), (5.0, 5.0));
    }
}
