//! Server-side entity records.
//!
//! An [`Entity`] is plain data: identity, position, vitals, stats and a
//! kind-specific payload. Behavior lives in `crate::control`.

pub mod player;
mod monster;
mod npc;

pub use player::{PlayerData, SavePoint, DialogState, experience_to_next_level};
pub use monster::{MonsterData, MonsterType, AiState};
pub use npc::NpcData;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use realm_shared::{Direction, Element, EntityKind, PortalTarget};

use crate::cooldown::Cooldown;

/// Default bounding box edge for every entity
const DEFAULT_SIZE: f32 = 1.0;

/// Default melee range (Chebyshev distance)
const DEFAULT_RANGE: f32 = 1.0;

/// Hands out ephemeral session ids ("gid"). Cloned into the network layer so
/// connections can be identified before they reach the world.
#[derive(Debug, Clone, Default)]
pub struct GidAllocator {
    next: Arc<AtomicU64>,
}

impl GidAllocator {
    pub fn new() -> Self {
        Self { next: Arc::new(AtomicU64::new(1)) }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Combat stats and their multipliers
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub strength: i32,
    pub agi: i32,
    pub vit: i32,
    pub int: i32,
    pub dex: i32,
    pub luk: i32,
    pub atk: i32,
    pub m_atk: i32,
    pub def: i32,
    pub m_def: i32,
    pub e_atk: Element,
    pub e_def: Element,
    /// Milliseconds between attacks
    pub attack_speed: u64,
    /// Milliseconds between one-unit steps
    pub speed: u64,
    pub atk_multiplier: f32,
    pub m_atk_multiplier: f32,
    pub def_multiplier: f32,
    pub m_def_multiplier: f32,
    pub attack_speed_multiplier: f32,
    pub speed_multiplier: f32,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            strength: 5,
            agi: 5,
            vit: 5,
            int: 5,
            dex: 5,
            luk: 5,
            atk: 5,
            m_atk: 5,
            def: 0,
            m_def: 0,
            e_atk: Element::Neutral,
            e_def: Element::Neutral,
            attack_speed: 1000,
            speed: 200,
            atk_multiplier: 1.0,
            m_atk_multiplier: 1.0,
            def_multiplier: 1.0,
            m_def_multiplier: 1.0,
            attack_speed_multiplier: 1.0,
            speed_multiplier: 1.0,
        }
    }
}

/// Kind-specific part of an entity
#[derive(Debug)]
pub enum Payload {
    Npc(NpcData),
    Monster(MonsterData),
    Player(Box<PlayerData>),
    Portal(PortalTarget),
}

/// Server-side entity state
#[derive(Debug)]
pub struct Entity {
    /// Persistent database id (0 when the entity is not persisted)
    pub id: i64,
    /// Ephemeral session id
    pub gid: u64,
    pub name: String,
    /// Map this entity currently belongs to
    pub map_id: u32,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub width: f32,
    pub height: f32,
    pub visible: bool,
    /// Melee range
    pub range: f32,
    pub hp: i32,
    pub hp_max: i32,
    pub mp: i32,
    pub mp_max: i32,
    /// Timestamp of the last death, 0 while alive
    pub death: u64,
    pub stats: Stats,
    pub level: u32,
    pub job_level: u32,
    pub base_exp: u64,
    pub job_exp: u64,
    /// Where the entity returns to after reviving
    pub spawn_x: f32,
    pub spawn_y: f32,
    pub move_cooldown: Cooldown,
    pub attack_cooldown: Cooldown,
    /// Attack target
    pub target: Option<u64>,
    /// Entity being followed
    pub follow: Option<u64>,
    /// Point being walked to
    pub move_to: Option<(f32, f32)>,
    pub payload: Payload,
}

impl Entity {
    /// Bare entity with default stats, used by the kind constructors
    fn base(gid: u64, name: String, x: f32, y: f32, payload: Payload) -> Self {
        Self {
            id: 0,
            gid,
            name,
            map_id: 0,
            x,
            y,
            direction: Direction::Down,
            width: DEFAULT_SIZE,
            height: DEFAULT_SIZE,
            visible: true,
            range: DEFAULT_RANGE,
            hp: 1,
            hp_max: 1,
            mp: 0,
            mp_max: 0,
            death: 0,
            stats: Stats::default(),
            level: 1,
            job_level: 1,
            base_exp: 0,
            job_exp: 0,
            spawn_x: x,
            spawn_y: y,
            move_cooldown: Cooldown::new(),
            attack_cooldown: Cooldown::new(),
            target: None,
            follow: None,
            move_to: None,
            payload,
        }
    }

    /// Stationary portal
    pub fn portal(gid: u64, x: f32, y: f32, to: PortalTarget) -> Self {
        let name = format!("Portal to {}", to.name);
        Self::base(gid, name, x, y, Payload::Portal(to))
    }

    pub fn kind(&self) -> EntityKind {
        match &self.payload {
            Payload::Npc(_) => EntityKind::Npc,
            Payload::Monster(_) => EntityKind::Monster,
            Payload::Player(_) => EntityKind::Player,
            Payload::Portal(_) => EntityKind::Portal,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.hp <= 0
    }

    /// Chebyshev distance to a point
    pub fn distance_to(&self, x: f32, y: f32) -> f32 {
        (self.x - x).abs().max((self.y - y).abs())
    }

    /// Whether `other` is within this entity's melee range
    pub fn in_melee_range(&self, other: &Entity) -> bool {
        self.distance_to(other.x, other.y) <= self.range
    }

    /// Movement cooldown gate in milliseconds
    pub fn move_delay(&self) -> u64 {
        (self.stats.speed as f32 * self.stats.speed_multiplier).max(0.0) as u64
    }

    /// Attack cooldown gate in milliseconds
    pub fn attack_delay(&self) -> u64 {
        (self.stats.attack_speed as f32 * self.stats.attack_speed_multiplier).max(0.0) as u64
    }

    /// Raw damage this entity deals per hit. Neutral attacks are physical,
    /// any other element is magical. Defense is not subtracted.
    pub fn attack_damage(&self) -> i32 {
        let stats = &self.stats;
        let damage = if stats.e_atk == Element::Neutral {
            (stats.strength + stats.atk) as f32 * stats.atk_multiplier
        } else {
            (stats.int + stats.m_atk) as f32 * stats.m_atk_multiplier
        };
        damage.round() as i32
    }

    /// Restore vitals after death
    pub fn revive(&mut self) {
        self.hp = self.hp_max;
        self.mp = self.mp_max;
        self.death = 0;
    }

    /// Snap back to the spawn coordinates
    pub fn to_save_position(&mut self) {
        self.x = self.spawn_x;
        self.y = self.spawn_y;
    }

    /// Drop any target / follow / move-to intent
    pub fn clear_intents(&mut self) {
        self.target = None;
        self.follow = None;
        self.move_to = None;
    }

    pub fn player(&self) -> Option<&PlayerData> {
        match &self.payload {
            Payload::Player(data) => Some(data),
            _ => None,
        }
    }

    pub fn player_mut(&mut self) -> Option<&mut PlayerData> {
        match &mut self.payload {
            Payload::Player(data) => Some(data),
            _ => None,
        }
    }

    pub fn monster_data(&self) -> Option<&MonsterData> {
        match &self.payload {
            Payload::Monster(data) => Some(data),
            _ => None,
        }
    }

    pub fn monster_mut(&mut self) -> Option<&mut MonsterData> {
        match &mut self.payload {
            Payload::Monster(data) => Some(data),
            _ => None,
        }
    }

    pub fn portal_target(&self) -> Option<&PortalTarget> {
        match &self.payload {
            Payload::Portal(to) => Some(to),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Bare monster-kind entity for combat tests
    pub(crate) fn dummy(gid: u64, x: f32, y: f32) -> Entity {
        let mut entity = Entity::base(
            gid,
            format!("dummy{}", gid),
            x,
            y,
            Payload::Monster(MonsterData::new(MonsterType::Goblin)),
        );
        entity.hp = 100;
        entity.hp_max = 100;
        entity
    }

    #[test]
    fn test_physical_damage_formula() {
        let mut attacker = dummy(1, 0.0, 0.0);
        attacker.stats.strength = 10;
        attacker.stats.atk = 5;
        attacker.stats.atk_multiplier = 1.0;
        assert_eq!(attacker.attack_damage(), 15);

        attacker.stats.atk_multiplier = 1.5;
        assert_eq!(attacker.attack_damage(), 23);
    }

    #[test]
    fn test_magical_damage_formula() {
        let mut attacker = dummy(1, 0.0, 0.0);
        attacker.stats.e_atk = Element::Fire;
        attacker.stats.int = 20;
        attacker.stats.m_atk = 10;
        attacker.stats.m_atk_multiplier = 2.0;
        // str/atk do not count for magical attacks
        attacker.stats.strength = 99;
        assert_eq!(attacker.attack_damage(), 60);
    }

    #[test]
    fn test_chebyshev_distance() {
        let entity = dummy(1, 10.0, 10.0);
        assert_eq!(entity.distance_to(13.0, 11.0), 3.0);
        assert_eq!(entity.distance_to(9.0, 6.0), 4.0);
    }

    #[test]
    fn test_revive_and_save_position() {
        let mut entity = dummy(1, 10.0, 10.0);
        entity.hp = 0;
        entity.mp = 0;
        entity.mp_max = 20;
        entity.death = 1234;
        entity.x = 40.0;
        entity.revive();
        entity.to_save_position();
        assert_eq!((entity.hp, entity.mp, entity.death), (100, 20, 0));
        assert_eq!((entity.x, entity.y), (10.0, 10.0));
    }

    #[test]
    fn test_gid_allocator_is_shared() {
        let gids = GidAllocator::new();
        let clone = gids.clone();
        let a = gids.next();
        let b = clone.next();
        assert_ne!(a, b);
    }
}
