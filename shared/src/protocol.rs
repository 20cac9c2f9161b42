//! Network protocol definitions shared between client and server.
//!
//! Every packet is a JSON object with a `type` discriminator.

use serde::{Deserialize, Serialize};

use crate::entities::{Direction, Element, EntityKind, PortalTarget};

/// Server tick rate in Hz
pub const SERVER_TICK_RATE: u32 = 60;

/// Default server port
pub const DEFAULT_PORT: u16 = 8080;

/// Map new players are placed on
pub const DEFAULT_MAP: &str = "town";

// =============================================================================
// Shared Types
// =============================================================================

/// Chat channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatChannel {
    #[default]
    Global,
    Map,
    Private,
    System,
}

/// NPC dialog action requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogAction {
    Open,
    Next,
    Close,
}

/// Key sent with a move request. Browsers send either a numeric key code
/// or a `KeyboardEvent.code` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MoveCode {
    Key(u32),
    Name(String),
}

impl MoveCode {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Key(37) | Self::Key(65) => Some(Direction::Left),
            Self::Key(38) | Self::Key(87) => Some(Direction::Up),
            Self::Key(39) | Self::Key(68) => Some(Direction::Right),
            Self::Key(40) | Self::Key(83) => Some(Direction::Down),
            Self::Key(_) => None,
            Self::Name(name) => match name.as_str() {
                "ArrowLeft" | "KeyA" | "left" | "LEFT" => Some(Direction::Left),
                "ArrowUp" | "KeyW" | "up" | "UP" => Some(Direction::Up),
                "ArrowRight" | "KeyD" | "right" | "RIGHT" => Some(Direction::Right),
                "ArrowDown" | "KeyS" | "down" | "DOWN" => Some(Direction::Down),
                _ => None,
            },
        }
    }
}

// =============================================================================
// Client -> Server
// =============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientPacket {
    /// Step once in a direction
    Move { code: MoveCode },

    /// Chat line or slash command
    Chat {
        #[serde(default)]
        channel: ChatChannel,
        #[serde(default)]
        to: Option<String>,
        message: String,
    },

    /// Click on a world position
    Click { x: f32, y: f32 },

    /// NPC dialog interaction
    Dialog { action: DialogAction, gid: u64 },

    /// Client heartbeat (answered with pong)
    Ping { timestamp: u64 },

    /// Answer to a server ping
    Pong { timestamp: u64 },

    /// Explicit logout
    Logout,
}

impl ClientPacket {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// Server -> Client
// =============================================================================

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerPacket {
    /// Visible state of the receiver's current map
    Map { map: MapState },

    /// Full stat block of the receiving player
    Player { player: PlayerStats },

    Chat {
        channel: ChatChannel,
        from: String,
        to: Option<String>,
        message: String,
        timestamp: u64,
    },

    /// Current dialog page of an NPC; `None` tells the client to close it
    NpcDialog { gid: u64, dialog: Option<String> },

    /// A player left the game
    PlayerLeave { name: String },

    Ping { timestamp: u64 },

    Pong { timestamp: u64 },
}

impl ServerPacket {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// State Types
// =============================================================================

/// Map snapshot for world updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapState {
    pub id: u32,
    pub name: String,
    pub width: f32,
    pub height: f32,
    pub entities: Vec<EntityState>,
}

/// One visible entity in a map snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    pub gid: u64,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub width: f32,
    pub height: f32,
    pub hp: i32,
    pub hp_max: i32,
    pub level: u32,
    /// Only present on portals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_to: Option<PortalTarget>,
}

/// Full player stat block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub gid: u64,
    pub id: i64,
    pub name: String,
    pub map: String,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub hp: i32,
    pub hp_max: i32,
    pub mp: i32,
    pub mp_max: i32,
    pub level: u32,
    pub job_level: u32,
    pub base_exp: u64,
    pub job_exp: u64,
    pub next_base_exp: u64,
    #[serde(rename = "str")]
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
    pub attack_speed: u64,
    pub speed: u64,
    pub range: f32,
    pub target: Option<u64>,
}
