//! Shared entity definitions.

use serde::{Deserialize, Serialize};

/// Facing direction of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Left,
    Right,
    Up,
    #[default]
    Down,
}

impl Direction {
    /// Unit step for this direction. Y grows downwards (screen space).
    pub fn delta(&self) -> (f32, f32) {
        match self {
            Self::Left => (-1.0, 0.0),
            Self::Right => (1.0, 0.0),
            Self::Up => (0.0, -1.0),
            Self::Down => (0.0, 1.0),
        }
    }

    /// Next leg of the idle patrol square: DOWN -> RIGHT -> UP -> LEFT -> DOWN
    pub fn next_patrol(&self) -> Self {
        match self {
            Self::Down => Self::Right,
            Self::Right => Self::Up,
            Self::Up => Self::Left,
            Self::Left => Self::Down,
        }
    }
}

/// Kind tag carried by every entity record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityKind {
    Npc,
    Monster,
    Player,
    Portal,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Npc => "NPC",
            Self::Monster => "MONSTER",
            Self::Player => "PLAYER",
            Self::Portal => "PORTAL",
        }
    }
}

/// Attack / defense element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Element {
    #[default]
    Neutral,
    Water,
    Earth,
    Fire,
    Wind,
    Poison,
    Holy,
    Shadow,
    Ghost,
    Undead,
}

/// Where a portal sends whoever steps on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalTarget {
    /// Destination map name
    pub name: String,
    pub x: f32,
    pub y: f32,
}
