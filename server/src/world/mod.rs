//! Game world management.
//!
//! The [`World`] owns every map (and through them every entity), the
//! account -> session index and the persistence handle. It is driven from a
//! single task: ticks, socket events and shutdown never run concurrently.

pub mod definitions;
mod map;

pub use map::WorldMap;

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use realm_shared::{EntityKind, ServerPacket};

use crate::config::ServerConfig;
use crate::control::{self, ControlError, WorldAction};
use crate::entities::{Entity, GidAllocator};
use crate::events;
use crate::network::{Connection, NetEvent, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_SUPERSEDED};
use crate::packets;
use crate::persistence::{PersistenceHandle, PlayerRecord};
use definitions::MapDefinition;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("map '{0}' not found")]
    MapNotFound(String),
    #[error("entity {0} not found")]
    EntityNotFound(u64),
    #[error("failed to create map '{map}': {reason}")]
    MapCreation { map: String, reason: String },
}

/// The game world containing all maps
pub struct World {
    /// Fixed order: ticks walk the maps in this order
    maps: Vec<WorldMap>,
    /// Live session per account
    sessions: HashMap<i64, u64>,
    gids: GidAllocator,
    rng: StdRng,
    persistence: PersistenceHandle,
    default_map: String,
    replace_grace: Duration,
    shutting_down: bool,
}

impl World {
    pub fn new(
        definitions: Vec<MapDefinition>,
        gids: GidAllocator,
        persistence: PersistenceHandle,
        config: &ServerConfig,
    ) -> Self {
        let maps = definitions
            .into_iter()
            .map(|definition| {
                let mut map = WorldMap::new(definition);
                map.view_distance = config.view_distance;
                map
            })
            .collect();

        Self {
            maps,
            sessions: HashMap::new(),
            gids,
            rng: StdRng::from_entropy(),
            persistence,
            default_map: config.default_map.clone(),
            replace_grace: Duration::from_millis(config.session_replace_grace_ms),
            shutting_down: false,
        }
    }

    pub fn maps(&self) -> &[WorldMap] {
        &self.maps
    }

    pub fn map_mut(&mut self, index: usize) -> Option<&mut WorldMap> {
        self.maps.get_mut(index)
    }

    pub fn persistence(&self) -> &PersistenceHandle {
        &self.persistence
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Map by name, or by numeric id
    pub fn resolve_map(&self, name_or_id: &str) -> Option<usize> {
        self.maps.iter().position(|m| m.name == name_or_id).or_else(|| {
            let id: u32 = name_or_id.parse().ok()?;
            self.maps.iter().position(|m| m.id == id)
        })
    }

    /// Index of the map an entity is on
    pub fn locate(&self, gid: u64) -> Option<usize> {
        self.maps.iter().position(|m| m.contains(gid))
    }

    pub fn entity(&self, gid: u64) -> Option<&Entity> {
        self.maps.iter().find_map(|m| m.get(gid))
    }

    pub fn entity_mut(&mut self, gid: u64) -> Option<&mut Entity> {
        self.maps.iter_mut().find_map(|m| m.get_mut(gid))
    }

    /// Online player by character name
    pub fn find_player(&self, name: &str) -> Option<&Entity> {
        self.maps.iter().flat_map(|m| m.players()).find(|p| p.name == name)
    }

    fn ensure_created(&mut self, index: usize) -> Result<(), WorldError> {
        let Some(map) = self.maps.get_mut(index) else {
            return Err(WorldError::MapNotFound(index.to_string()));
        };
        map.create(&self.gids, &mut self.rng)
    }

    /// Remove an entity from every map
    fn take_entity(&mut self, gid: u64) -> Option<Entity> {
        let mut taken = None;
        for map in &mut self.maps {
            if let Some(entity) = map.remove_entity(gid) {
                taken = Some(entity);
            }
        }
        taken
    }

    /// Put an entity on a created map at (x, y), or the map center if either
    /// is negative, then run the enter hook
    fn place(&mut self, mut entity: Entity, index: usize, x: f32, y: f32) {
        let Some(map) = self.maps.get_mut(index) else {
            return;
        };
        let (x, y) = if x < 0.0 || y < 0.0 { map.center() } else { map.clamp(x, y) };
        entity.spawn_x = x;
        entity.spawn_y = y;
        entity.x = x;
        entity.y = y;
        entity.reset_direction();
        if let Some(data) = entity.player_mut() {
            data.map_update.reset();
        }
        let gid = entity.gid;
        map.add_entity(entity);

        // Enter hook: players see the new map right away
        if let Some(entity) = map.get(gid) {
            if let Some(data) = entity.player() {
                let packet = packets::map_update(map, Some(entity));
                if let Err(e) = data.connection.send(&packet) {
                    warn!("Failed to send map to {}: {}", gid, e);
                }
            }
        }
    }

    /// Move an entity to a map, lazily creating it. On failure the entity
    /// stays where it was.
    pub fn join_map(&mut self, gid: u64, name_or_id: &str, x: f32, y: f32) -> Result<(), WorldError> {
        let index = self
            .resolve_map(name_or_id)
            .ok_or_else(|| WorldError::MapNotFound(name_or_id.to_string()))?;
        self.ensure_created(index)?;

        let mut entity = self.take_entity(gid).ok_or(WorldError::EntityNotFound(gid))?;
        // Leave hook
        entity.clear_intents();
        if let Some(data) = entity.player_mut() {
            data.dialog = None;
        }

        info!("{} ({}) joins map '{}'", entity.name, gid, self.maps[index].name);
        self.place(entity, index, x, y);
        Ok(())
    }

    // =========================================================================
    // Scheduler
    // =========================================================================

    /// One simulation step over every created map, in map order and then
    /// entity set order. A failing entity is logged and skipped.
    pub fn tick(&mut self, now: u64) {
        self.tick_with(now, control::tick);
    }

    /// Run `tick_one` for every entity of every created map. A failing
    /// entity is logged and skipped; the rest of the tick carries on.
    fn tick_with<F>(&mut self, now: u64, mut tick_one: F)
    where
        F: FnMut(&mut WorldMap, u64, u64, &mut Vec<WorldAction>) -> Result<(), ControlError>,
    {
        let plan: Vec<(usize, Vec<u64>)> = self
            .maps
            .iter()
            .enumerate()
            .filter(|(_, map)| map.is_created())
            .map(|(index, map)| (index, map.gids()))
            .collect();

        for (index, gids) in plan {
            for gid in gids {
                // Moved away earlier in this tick
                if !self.maps[index].contains(gid) {
                    continue;
                }
                let mut actions = Vec::new();
                if let Err(e) = tick_one(&mut self.maps[index], gid, now, &mut actions) {
                    error!("Tick failed for entity {} on map '{}': {}", gid, self.maps[index].name, e);
                }
                self.apply(actions);
            }
        }
    }

    fn apply(&mut self, actions: Vec<WorldAction>) {
        for action in actions {
            match action {
                WorldAction::Transfer { gid, map, x, y } => {
                    if let Err(e) = self.join_map(gid, &map, x, y) {
                        error!("Failed to move {} to '{}': {}", gid, map, e);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Broadcasting
    // =========================================================================

    /// Send a packet to every connected player; closed connections are skipped
    pub fn broadcast(&self, packet: &ServerPacket) {
        self.broadcast_to(self.maps.iter(), packet);
    }

    /// Send a packet to every connected player on one map
    pub fn broadcast_map(&self, index: usize, packet: &ServerPacket) {
        self.broadcast_to(self.maps.get(index).into_iter(), packet);
    }

    /// Send a packet to one player
    pub fn send_to(&self, gid: u64, packet: &ServerPacket) {
        let Some(data) = self.entity(gid).and_then(|e| e.player()) else {
            return;
        };
        if let Err(e) = data.connection.send(packet) {
            error!("Failed to serialize packet for {}: {}", gid, e);
        }
    }

    fn broadcast_to<'a>(&self, maps: impl Iterator<Item = &'a WorldMap>, packet: &ServerPacket) {
        let text = match packet.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize broadcast: {}", e);
                return;
            }
        };
        for player in maps.flat_map(|m| m.players()) {
            if let Some(data) = player.player() {
                if data.connection.is_open() {
                    data.connection.send_text(text.clone());
                }
            }
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    pub fn handle_event(&mut self, event: NetEvent, now: u64) {
        match event {
            NetEvent::Joined { gid, account_id, record, connection } => {
                self.on_join(gid, account_id, record, connection, now)
            }
            NetEvent::Message { gid, text } => events::handle_message(self, gid, &text, now),
            NetEvent::Closed { gid } => self.on_client_close(gid),
        }
    }

    /// Bind an authenticated connection to a player entity. A live session
    /// of the same account is notified and closed after the grace delay;
    /// its in-memory state wins over the stored record.
    pub fn on_join(&mut self, gid: u64, account_id: i64, record: PlayerRecord, connection: Connection, now: u64) {
        if self.shutting_down {
            connection.close(CLOSE_GOING_AWAY, "server shutting down", Duration::ZERO);
            return;
        }

        let mut record = record;
        if let Some(old_gid) = self.sessions.remove(&account_id) {
            if let Some(index) = self.locate(old_gid) {
                let map_name = self.maps[index].name.clone();
                if let Some(old) = self.maps[index].remove_entity(old_gid) {
                    if let Some(live) = old.to_record(&map_name) {
                        record = live;
                    }
                    if let Some(data) = old.player() {
                        let notice = packets::system_chat("You have logged in from another location.", now);
                        if let Err(e) = data.connection.send(&notice) {
                            warn!("Failed to notify replaced session {}: {}", old_gid, e);
                        }
                        data.connection.close(CLOSE_SUPERSEDED, "session replaced", self.replace_grace);
                    }
                    info!("Account {} session {} replaced by {}", account_id, old_gid, gid);
                }
            }
        }

        let index = match self.resolve_map(&record.map).or_else(|| self.resolve_map(&self.default_map)) {
            Some(index) => index,
            None => {
                error!("Neither '{}' nor the default map exist", record.map);
                connection.close(CLOSE_INTERNAL_ERROR, "no map to join", Duration::ZERO);
                return;
            }
        };
        if let Err(e) = self.ensure_created(index) {
            error!("Cannot place account {}: {}", account_id, e);
            connection.close(CLOSE_INTERNAL_ERROR, "no map to join", Duration::ZERO);
            return;
        }

        let entity = Entity::player_from_record(gid, &record, connection);
        info!("{} ({}) joined on '{}'", entity.name, gid, self.maps[index].name);
        self.sessions.insert(account_id, gid);
        self.persistence.mark_logged_in(account_id);
        self.place(entity, index, record.x, record.y);
    }

    /// Socket closed: leave notice, logout, save and removal. Stale or
    /// repeated calls are no-ops.
    pub fn on_client_close(&mut self, gid: u64) {
        self.disconnect(gid, false);
    }

    /// Explicit logout: like a close, but the token is revoked
    pub fn logout(&mut self, gid: u64) {
        if let Some(data) = self.entity(gid).and_then(|e| e.player()) {
            data.connection.close(CLOSE_NORMAL, "logged out", Duration::ZERO);
        }
        self.disconnect(gid, true);
    }

    fn disconnect(&mut self, gid: u64, remove_token: bool) {
        let Some(index) = self.locate(gid) else {
            debug!("Close for unknown or replaced session {}", gid);
            return;
        };
        let map_name = self.maps[index].name.clone();
        let Some(entity) = self.maps[index].get_mut(gid) else {
            return;
        };
        let Some(data) = entity.player_mut() else {
            return;
        };
        if data.closing {
            return;
        }
        data.closing = true;
        let account_id = data.account_id;

        let record = entity.to_record(&map_name);
        let name = entity.name.clone();
        self.maps[index].remove_entity(gid);
        if self.sessions.get(&account_id) == Some(&gid) {
            self.sessions.remove(&account_id);
        }

        self.broadcast(&packets::player_leave(&name));
        self.persistence.logout(account_id, remove_token);
        if let Some(record) = record {
            self.persistence.save_player(record);
        }
        info!("{} ({}) left", name, gid);
    }

    /// Queue a save of every connected player
    pub fn save_all(&self) {
        let mut saved = 0;
        for map in &self.maps {
            for player in map.players() {
                if let Some(record) = player.to_record(&map.name) {
                    self.persistence.save_player(record);
                    saved += 1;
                }
            }
        }
        if saved > 0 {
            info!("Queued save of {} players", saved);
        }
    }

    /// Close every socket, save every player and log every account out
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!("Shutting down world with {} players", self.sessions.len());

        for map in &mut self.maps {
            let name = map.name.clone();
            for player in map.entities_mut().filter(|e| e.kind() == EntityKind::Player) {
                let record = player.to_record(&name);
                let Some(data) = player.player_mut() else {
                    continue;
                };
                if data.closing {
                    continue;
                }
                data.closing = true;
                data.connection.close(CLOSE_GOING_AWAY, "server shutting down", Duration::ZERO);
                if let Some(record) = record {
                    self.persistence.save_player(record);
                }
                self.persistence.logout(data.account_id, false);
            }
        }
        self.sessions.clear();
    }
}
