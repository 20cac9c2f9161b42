//! Persisted player record.

use serde::{Deserialize, Serialize};
use realm_shared::DEFAULT_MAP;

/// Everything about a player that survives a disconnect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Database id (0 until created)
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    /// Last known map name
    pub map: String,
    /// Last known position; negative means "map center"
    pub x: f32,
    pub y: f32,
    pub hp: i32,
    pub hp_max: i32,
    pub mp: i32,
    pub mp_max: i32,
    pub level: i32,
    pub job_level: i32,
    pub base_exp: i64,
    pub job_exp: i64,
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
    pub attack_speed: i32,
    pub speed: i32,
    pub save_map: Option<String>,
    pub save_x: f32,
    pub save_y: f32,
}

impl PlayerRecord {
    /// Fresh character for an account that has none yet
    pub fn new_for_account(account_id: i64, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            account_id,
            name: name.into(),
            map: DEFAULT_MAP.to_string(),
            x: -1.0,
            y: -1.0,
            hp: 100,
            hp_max: 100,
            mp: 50,
            mp_max: 50,
            level: 1,
            job_level: 1,
            base_exp: 0,
            job_exp: 0,
            strength: 5,
            agi: 5,
            vit: 5,
            int: 5,
            dex: 5,
            luk: 5,
            atk: 10,
            m_atk: 10,
            def: 5,
            m_def: 5,
            attack_speed: 800,
            speed: 150,
            save_map: None,
            save_x: 0.0,
            save_y: 0.0,
        }
    }
}
