//! A single zone and the entities it owns.

use log::{debug, info};
use rand::Rng;
use realm_shared::EntityKind;

use super::definitions::MapDefinition;
use super::WorldError;
use crate::entities::{Entity, GidAllocator};

/// One map: its bounds and the entity set it owns
#[derive(Debug)]
pub struct WorldMap {
    pub id: u32,
    pub name: String,
    /// Positions are clamped to [0, width] x [0, height]
    pub width: f32,
    pub height: f32,
    pub town: bool,
    /// Map packets only list entities this close to the viewer
    pub view_distance: Option<f32>,
    definition: MapDefinition,
    /// Owned entities, in insertion order
    entities: Vec<Entity>,
    is_loaded: bool,
    is_created: bool,
}

/// Inclusive square test centered on (cx, cy)
fn in_square(x: f32, y: f32, cx: f32, cy: f32, r: f32) -> bool {
    x >= cx - r && x <= cx + r && y >= cy - r && y <= cy + r
}

impl WorldMap {
    pub fn new(definition: MapDefinition) -> Self {
        Self {
            id: definition.id,
            name: definition.name.clone(),
            width: definition.width,
            height: definition.height,
            town: definition.town,
            view_distance: None,
            definition,
            entities: Vec::new(),
            is_loaded: false,
            is_created: false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn is_created(&self) -> bool {
        self.is_created
    }

    /// Validate the definition
    pub fn load(&mut self) -> Result<(), WorldError> {
        if self.is_loaded {
            return Ok(());
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(self.creation_error(format!("invalid size {}x{}", self.width, self.height)));
        }
        for batch in &self.definition.monsters {
            let area = batch.area;
            if area.width < 0.0 || area.height < 0.0
                || area.x < 0.0 || area.y < 0.0
                || area.x + area.width > self.width
                || area.y + area.height > self.height
            {
                return Err(self.creation_error(format!(
                    "{} spawn area {:?} lies outside the map",
                    batch.monster.name(),
                    area
                )));
            }
        }
        self.is_loaded = true;
        Ok(())
    }

    /// Place static NPCs and portals and spawn the monster batches
    pub fn create<R: Rng>(&mut self, gids: &GidAllocator, rng: &mut R) -> Result<(), WorldError> {
        if self.is_created {
            return Ok(());
        }
        self.load()?;

        let mut spawned = Vec::new();
        for npc in &self.definition.npcs {
            spawned.push(Entity::npc(gids.next(), npc.name.clone(), npc.x, npc.y, npc.dialog.clone()));
        }
        for portal in &self.definition.portals {
            spawned.push(Entity::portal(gids.next(), portal.x, portal.y, portal.to.clone()));
        }
        for batch in &self.definition.monsters {
            let area = batch.area;
            for _ in 0..batch.count {
                let x = (area.x + rng.gen_range(0.0..=area.width)).round();
                let y = (area.y + rng.gen_range(0.0..=area.height)).round();
                spawned.push(Entity::monster(gids.next(), batch.monster, x, y, rng));
            }
        }

        let count = spawned.len();
        for entity in spawned {
            self.add_entity(entity);
        }
        self.is_created = true;
        info!("Created map '{}' ({}) with {} entities", self.name, self.id, count);
        Ok(())
    }

    fn creation_error(&self, reason: String) -> WorldError {
        WorldError::MapCreation { map: self.name.clone(), reason }
    }

    /// Take ownership of an entity
    pub fn add_entity(&mut self, mut entity: Entity) {
        entity.map_id = self.id;
        let (x, y) = self.clamp(entity.x, entity.y);
        entity.x = x;
        entity.y = y;
        debug!("Entity {} ({}) added to map '{}'", entity.gid, entity.kind().name(), self.name);
        self.entities.push(entity);
    }

    /// Give up ownership of an entity
    pub fn remove_entity(&mut self, gid: u64) -> Option<Entity> {
        let index = self.entities.iter().position(|e| e.gid == gid)?;
        Some(self.entities.remove(index))
    }

    pub fn contains(&self, gid: u64) -> bool {
        self.entities.iter().any(|e| e.gid == gid)
    }

    pub fn get(&self, gid: u64) -> Option<&Entity> {
        self.entities.iter().find(|e| e.gid == gid)
    }

    pub fn get_mut(&mut self, gid: u64) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.gid == gid)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.iter_mut()
    }

    /// Snapshot of gids in set order
    pub fn gids(&self) -> Vec<u64> {
        self.entities.iter().map(|e| e.gid).collect()
    }

    pub fn players(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.kind() == EntityKind::Player)
    }

    /// Every entity within `r` of (x, y). The test is the union of two
    /// inclusive squares: one centered on the point and one centered on
    /// (x + r/2, y + r/2). Order is set order and carries no meaning.
    pub fn find_entities_in_radius(&self, x: f32, y: f32, r: f32) -> Vec<&Entity> {
        let half = r / 2.0;
        self.entities
            .iter()
            .filter(|e| in_square(e.x, e.y, x, y, r) || in_square(e.x, e.y, x + half, y + half, r))
            .collect()
    }

    /// Clamp a point to the map bounds
    pub fn clamp(&self, x: f32, y: f32) -> (f32, f32) {
        (x.clamp(0.0, self.width), y.clamp(0.0, self.height))
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.width / 2.0).floor(), (self.height / 2.0).floor())
    }
}
