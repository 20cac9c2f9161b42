//! Builders for outbound packets.

use realm_shared::{ChatChannel, EntityState, MapState, PlayerStats, ServerPacket};

use crate::entities::{experience_to_next_level, Entity};
use crate::world::WorldMap;

/// Sender name used for server-originated chat
pub const SYSTEM_SENDER: &str = "system";

pub fn entity_state(entity: &Entity) -> EntityState {
    EntityState {
        gid: entity.gid,
        kind: entity.kind(),
        name: entity.name.clone(),
        x: entity.x,
        y: entity.y,
        direction: entity.direction,
        width: entity.width,
        height: entity.height,
        hp: entity.hp,
        hp_max: entity.hp_max,
        level: entity.level,
        portal_to: entity.portal_target().cloned(),
    }
}

/// Snapshot of a map as seen by `viewer`. Only visible, living entities are
/// listed; with a view distance set, so are only those close to the viewer.
pub fn map_update(map: &WorldMap, viewer: Option<&Entity>) -> ServerPacket {
    let in_view = |entity: &Entity| match (map.view_distance, viewer) {
        (Some(distance), Some(viewer)) => viewer.distance_to(entity.x, entity.y) <= distance,
        _ => true,
    };

    let entities = map
        .entities()
        .iter()
        .filter(|e| e.visible && e.hp > 0 && in_view(e))
        .map(entity_state)
        .collect();

    ServerPacket::Map {
        map: MapState {
            id: map.id,
            name: map.name.clone(),
            width: map.width,
            height: map.height,
            entities,
        },
    }
}

/// Full stat block; `None` for non-player entities
pub fn player_update(entity: &Entity, map_name: &str) -> Option<ServerPacket> {
    entity.player()?;
    let stats = &entity.stats;
    Some(ServerPacket::Player {
        player: PlayerStats {
            gid: entity.gid,
            id: entity.id,
            name: entity.name.clone(),
            map: map_name.to_string(),
            x: entity.x,
            y: entity.y,
            direction: entity.direction,
            hp: entity.hp.max(0),
            hp_max: entity.hp_max,
            mp: entity.mp.max(0),
            mp_max: entity.mp_max,
            level: entity.level,
            job_level: entity.job_level,
            base_exp: entity.base_exp,
            job_exp: entity.job_exp,
            next_base_exp: experience_to_next_level(entity.level),
            strength: stats.strength,
            agi: stats.agi,
            vit: stats.vit,
            int: stats.int,
            dex: stats.dex,
            luk: stats.luk,
            atk: stats.atk,
            m_atk: stats.m_atk,
            def: stats.def,
            m_def: stats.m_def,
            e_atk: stats.e_atk,
            e_def: stats.e_def,
            attack_speed: entity.attack_delay(),
            speed: entity.move_delay(),
            range: entity.range,
            target: entity.target,
        },
    })
}

pub fn chat(channel: ChatChannel, from: &str, to: Option<&str>, message: &str, now: u64) -> ServerPacket {
    ServerPacket::Chat {
        channel,
        from: from.to_string(),
        to: to.map(str::to_string),
        message: message.to_string(),
        timestamp: now,
    }
}

/// Server notice shown in the chat log
pub fn system_chat(message: &str, now: u64) -> ServerPacket {
    chat(ChatChannel::System, SYSTEM_SENDER, None, message, now)
}

pub fn npc_dialog(gid: u64, page: Option<&str>) -> ServerPacket {
    ServerPacket::NpcDialog { gid, dialog: page.map(str::to_string) }
}

pub fn player_leave(name: &str) -> ServerPacket {
    ServerPacket::PlayerLeave { name: name.to_string() }
}
