//! Server-side player entity.

use realm_shared::{Direction, Element};

use super::{Entity, Payload, Stats};
use crate::cooldown::Cooldown;
use crate::network::Connection;
use crate::persistence::PlayerRecord;

/// Where a player returns to after dying
#[derive(Debug, Clone, PartialEq)]
pub struct SavePoint {
    pub map: String,
    pub x: f32,
    pub y: f32,
}

/// Open NPC dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialogState {
    pub npc: u64,
    pub page: usize,
}

/// Player-specific payload: the socket binding and per-connection throttles
#[derive(Debug)]
pub struct PlayerData {
    pub account_id: i64,
    pub connection: Connection,
    /// Movement is blocked while a dialog is open
    pub dialog: Option<DialogState>,
    pub save_point: Option<SavePoint>,
    /// Portal re-use gate
    pub portal_cooldown: Cooldown,
    /// Map-state broadcast throttle
    pub map_update: Cooldown,
    /// Player-state broadcast throttle
    pub player_update: Cooldown,
    pub regen: Cooldown,
    pub heartbeat: Cooldown,
    /// Last measured round trip in milliseconds
    pub latency: Option<u64>,
    /// Set once disconnect cleanup has started
    pub closing: bool,
}

impl PlayerData {
    pub fn new(account_id: i64, connection: Connection) -> Self {
        Self {
            account_id,
            connection,
            dialog: None,
            save_point: None,
            portal_cooldown: Cooldown::new(),
            map_update: Cooldown::new(),
            player_update: Cooldown::new(),
            regen: Cooldown::new(),
            heartbeat: Cooldown::new(),
            latency: None,
            closing: false,
        }
    }
}

/// Base experience needed to leave `level`
pub fn experience_to_next_level(level: u32) -> u64 {
    let level = level.max(1) as u64;
    level * level * 50
}

/// Job experience needed to leave `job_level`
fn job_experience_to_next_level(job_level: u32) -> u64 {
    let job_level = job_level.max(1) as u64;
    job_level * job_level * 30
}

impl Entity {
    /// Bind a persisted record to a live connection
    pub fn player_from_record(gid: u64, record: &PlayerRecord, connection: Connection) -> Self {
        let mut data = PlayerData::new(record.account_id, connection);
        data.save_point = record.save_map.as_ref().map(|map| SavePoint {
            map: map.clone(),
            x: record.save_x,
            y: record.save_y,
        });

        let mut entity = Entity::base(
            gid,
            record.name.clone(),
            record.x,
            record.y,
            Payload::Player(Box::new(data)),
        );
        entity.id = record.id;
        entity.hp_max = record.hp_max.max(1);
        entity.hp = record.hp.min(entity.hp_max);
        entity.mp_max = record.mp_max.max(0);
        entity.mp = record.mp.clamp(0, entity.mp_max);
        entity.level = record.level.max(1) as u32;
        entity.job_level = record.job_level.max(1) as u32;
        entity.base_exp = record.base_exp.max(0) as u64;
        entity.job_exp = record.job_exp.max(0) as u64;
        entity.stats = Stats {
            strength: record.strength,
            agi: record.agi,
            vit: record.vit,
            int: record.int,
            dex: record.dex,
            luk: record.luk,
            atk: record.atk,
            m_atk: record.m_atk,
            def: record.def,
            m_def: record.m_def,
            e_atk: Element::Neutral,
            e_def: Element::Neutral,
            attack_speed: record.attack_speed.max(0) as u64,
            speed: record.speed.max(0) as u64,
            ..Stats::default()
        };

        // Dead characters come back with full vitals
        if entity.is_dead() {
            entity.revive();
        }
        entity
    }

    /// Snapshot for persistence; `None` for non-player entities
    pub fn to_record(&self, map_name: &str) -> Option<PlayerRecord> {
        let data = self.player()?;
        let save = data.save_point.as_ref();
        Some(PlayerRecord {
            id: self.id,
            account_id: data.account_id,
            name: self.name.clone(),
            map: map_name.to_string(),
            x: self.x,
            y: self.y,
            hp: self.hp.max(0),
            hp_max: self.hp_max,
            mp: self.mp.max(0),
            mp_max: self.mp_max,
            level: self.level as i32,
            job_level: self.job_level as i32,
            base_exp: self.base_exp as i64,
            job_exp: self.job_exp as i64,
            strength: self.stats.strength,
            agi: self.stats.agi,
            vit: self.stats.vit,
            int: self.stats.int,
            dex: self.stats.dex,
            luk: self.stats.luk,
            atk: self.stats.atk,
            m_atk: self.stats.m_atk,
            def: self.stats.def,
            m_def: self.stats.m_def,
            attack_speed: self.stats.attack_speed as i32,
            speed: self.stats.speed as i32,
            save_map: save.map(|s| s.map.clone()),
            save_x: save.map(|s| s.x).unwrap_or(0.0),
            save_y: save.map(|s| s.y).unwrap_or(0.0),
        })
    }

    /// Add experience, levelling up as many times as it covers.
    /// Returns true if the base level changed.
    pub fn gain_experience(&mut self, base: u64, job: u64) -> bool {
        self.base_exp += base;
        self.job_exp += job;

        let mut leveled = false;
        while self.base_exp >= experience_to_next_level(self.level) {
            self.base_exp -= experience_to_next_level(self.level);
            self.level += 1;
            self.hp_max += 10 + self.stats.vit;
            self.mp_max += 5 + self.stats.int / 2;
            self.stats.strength += 1;
            self.stats.agi += 1;
            self.stats.vit += 1;
            self.stats.int += 1;
            self.stats.dex += 1;
            self.stats.luk += 1;
            self.stats.atk += 2;
            self.stats.m_atk += 2;
            leveled = true;
        }
        while self.job_exp >= job_experience_to_next_level(self.job_level) {
            self.job_exp -= job_experience_to_next_level(self.job_level);
            self.job_level += 1;
        }

        if leveled {
            self.revive();
        }
        leveled
    }

    /// One regeneration pulse: 2% of max (at least 1) for hp and mp
    pub fn regenerate(&mut self) {
        if self.is_dead() {
            return;
        }
        self.hp = (self.hp + (self.hp_max / 50).max(1)).min(self.hp_max);
        if self.mp_max > 0 {
            self.mp = (self.mp + (self.mp_max / 50).max(1)).min(self.mp_max);
        }
    }

    /// Movement is blocked while a dialog is open
    pub fn is_in_dialog(&self) -> bool {
        self.player().is_some_and(|p| p.dialog.is_some())
    }

    /// Reset facing after a map change
    pub fn reset_direction(&mut self) {
        self.direction = Direction::Down;
    }
}
