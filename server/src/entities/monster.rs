//! Monster entities and their base stats.

use rand::Rng;
use serde::{Deserialize, Serialize};
use realm_shared::{Direction, Element};

use super::{Entity, Payload};

/// Monster template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonsterType {
    Goblin,
    Wolf,
    Skeleton,
}

impl MonsterType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Goblin => "Goblin",
            Self::Wolf => "Wolf",
            Self::Skeleton => "Skeleton",
        }
    }
}

/// Idle / aggro bookkeeping
#[derive(Debug, Clone, Default)]
pub struct AiState {
    /// When the current idle pause started
    pub idle_start: Option<u64>,
    /// Current leg of the patrol square
    pub patrol: Direction,
}

/// Monster-specific payload
#[derive(Debug, Clone)]
pub struct MonsterData {
    pub monster_type: MonsterType,
    pub ai: AiState,
}

impl MonsterData {
    pub fn new(monster_type: MonsterType) -> Self {
        Self { monster_type, ai: AiState::default() }
    }
}

impl Entity {
    /// Spawn a monster with a random level from its template's range
    pub fn monster<R: Rng>(gid: u64, monster_type: MonsterType, x: f32, y: f32, rng: &mut R) -> Self {
        // hp, str, atk, attack speed, move speed, element, level range
        let (hp, strength, atk, attack_speed, speed, e_atk, min_level, max_level) = match monster_type {
            MonsterType::Goblin => (50, 6, 4, 1500, 400, Element::Neutral, 1, 3),
            MonsterType::Wolf => (40, 8, 4, 1000, 250, Element::Neutral, 2, 4),
            MonsterType::Skeleton => (70, 5, 8, 1800, 500, Element::Undead, 3, 5),
        };

        let level: u32 = rng.gen_range(min_level..=max_level);
        let level_multiplier = 1.0 + (level as f32 - 1.0) * 0.15;

        let mut entity = Entity::base(
            gid,
            monster_type.name().to_string(),
            x,
            y,
            Payload::Monster(MonsterData::new(monster_type)),
        );
        entity.level = level;
        entity.hp_max = (hp as f32 * level_multiplier) as i32;
        entity.hp = entity.hp_max;
        entity.stats.strength = strength;
        entity.stats.atk = (atk as f32 * level_multiplier) as i32;
        entity.stats.int = strength;
        entity.stats.m_atk = entity.stats.atk;
        entity.stats.attack_speed = attack_speed;
        entity.stats.speed = speed;
        entity.stats.e_atk = e_atk;
        entity.stats.e_def = e_atk;
        entity
    }
}
