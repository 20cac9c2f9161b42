//! Static map definitions.
//!
//! Maps are described by data: size, NPC and portal placement, and monster
//! batches. Definitions are read from a JSON file when one is configured and
//! fall back to a built-in town + field pair otherwise.

use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use realm_shared::PortalTarget;

use crate::entities::MonsterType;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read map definitions from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse map definitions: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate map {0}")]
    Duplicate(String),
}

/// Static NPC placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcSpawn {
    pub name: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub dialog: Vec<String>,
}

/// Static portal placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalSpawn {
    pub x: f32,
    pub y: f32,
    pub to: PortalTarget,
}

/// Rectangle monsters of a batch are scattered in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnArea {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A batch of identical monsters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterSpawn {
    pub monster: MonsterType,
    pub count: u32,
    pub area: SpawnArea,
}

/// Everything needed to build one map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDefinition {
    pub id: u32,
    pub name: String,
    pub width: f32,
    pub height: f32,
    /// Players may only `/save` in towns
    #[serde(default)]
    pub town: bool,
    #[serde(default)]
    pub npcs: Vec<NpcSpawn>,
    #[serde(default)]
    pub portals: Vec<PortalSpawn>,
    #[serde(default)]
    pub monsters: Vec<MonsterSpawn>,
}

impl MapDefinition {
    /// Empty map with no static content
    pub fn empty(id: u32, name: impl Into<String>, width: f32, height: f32) -> Self {
        Self {
            id,
            name: name.into(),
            width,
            height,
            town: false,
            npcs: Vec::new(),
            portals: Vec::new(),
            monsters: Vec::new(),
        }
    }
}

/// Load definitions from `path`, or the built-in set when no path is given
/// or the file does not exist.
pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Vec<MapDefinition>, DefinitionError> {
    let Some(path) = path else {
        info!("No map definition file configured, using built-in maps");
        return Ok(default_definitions());
    };
    let path = path.as_ref();

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Map definition file {:?} not found, using built-in maps", path);
            return Ok(default_definitions());
        }
        Err(source) => {
            return Err(DefinitionError::Io { path: path.display().to_string(), source });
        }
    };

    let definitions = parse_definitions(&content)?;
    info!("Loaded {} map definitions from {:?}", definitions.len(), path);
    Ok(definitions)
}

/// Parse a JSON array of map definitions
pub fn parse_definitions(content: &str) -> Result<Vec<MapDefinition>, DefinitionError> {
    let definitions: Vec<MapDefinition> = serde_json::from_str(content)?;

    for (i, definition) in definitions.iter().enumerate() {
        let duplicate = definitions[..i]
            .iter()
            .any(|d| d.id == definition.id || d.name == definition.name);
        if duplicate {
            return Err(DefinitionError::Duplicate(definition.name.clone()));
        }
    }

    Ok(definitions)
}

/// Built-in world: a town with a guide NPC and a field with monsters,
/// connected by a pair of portals.
pub fn default_definitions() -> Vec<MapDefinition> {
    let town = MapDefinition {
        id: 1,
        name: "town".to_string(),
        width: 100.0,
        height: 100.0,
        town: true,
        npcs: vec![NpcSpawn {
            name: "Guide".to_string(),
            x: 50.0,
            y: 45.0,
            dialog: vec![
                "Welcome, traveller!".to_string(),
                "Monsters roam the field to the east. Walk into the portal to get there.".to_string(),
                "Type /save while in town to come back here when you fall.".to_string(),
            ],
        }],
        portals: vec![PortalSpawn {
            x: 98.0,
            y: 50.0,
            to: PortalTarget { name: "field".to_string(), x: 5.0, y: 100.0 },
        }],
        monsters: Vec::new(),
    };

    let field = MapDefinition {
        id: 2,
        name: "field".to_string(),
        width: 200.0,
        height: 200.0,
        town: false,
        npcs: Vec::new(),
        portals: vec![PortalSpawn {
            x: 1.0,
            y: 100.0,
            to: PortalTarget { name: "town".to_string(), x: 94.0, y: 50.0 },
        }],
        monsters: vec![
            MonsterSpawn {
                monster: MonsterType::Goblin,
                count: 12,
                area: SpawnArea { x: 30.0, y: 60.0, width: 60.0, height: 80.0 },
            },
            MonsterSpawn {
                monster: MonsterType::Wolf,
                count: 8,
                area: SpawnArea { x: 110.0, y: 40.0, width: 60.0, height: 60.0 },
            },
            MonsterSpawn {
                monster: MonsterType::Skeleton,
                count: 5,
                area: SpawnArea { x: 120.0, y: 130.0, width: 50.0, height: 50.0 },
            },
        ],
    };

    vec![town, field]
}
