//! Connected players.
//!
//! Besides acting on click intents, a player tick drives the per-connection
//! traffic: throttled map and stat snapshots, a heartbeat ping and the
//! regeneration pulse.

use log::info;
use realm_shared::ServerPacket;

use super::{attack, follow, step_towards, ControlError, Controller, Kill, WorldAction};
use crate::entities::Entity;
use crate::packets;
use crate::world::WorldMap;

/// Minimum gap between two map snapshots to the same client
pub const MAP_UPDATE_INTERVAL_MS: u64 = 100;

/// Minimum gap between two stat snapshots to the same client
pub const PLAYER_UPDATE_INTERVAL_MS: u64 = 250;

pub const REGEN_INTERVAL_MS: u64 = 3_000;

pub const HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Base experience per victim level
const BASE_EXP_PER_LEVEL: u64 = 10;

/// Job experience per victim level
const JOB_EXP_PER_LEVEL: u64 = 5;

pub struct PlayerControl;

impl Controller for PlayerControl {
    fn revives(&self) -> bool {
        true
    }

    fn on_tick(
        &self,
        map: &mut WorldMap,
        gid: u64,
        now: u64,
        _actions: &mut Vec<WorldAction>,
    ) -> Result<(), ControlError> {
        act_on_intents(map, gid, now)?;
        regenerate(map, gid, now);
        send_updates(map, gid, now)
    }

    fn on_revive(&self, entity: &mut Entity, actions: &mut Vec<WorldAction>) {
        let Some(save) = entity.player().and_then(|p| p.save_point.clone()) else {
            return;
        };
        actions.push(WorldAction::Transfer { gid: entity.gid, map: save.map, x: save.x, y: save.y });
    }

    fn on_die(&self, entity: &Entity, map_name: &str) -> Result<(), ControlError> {
        send_player_update(entity, map_name)
    }

    fn on_kill(&self, killer: &mut Entity, victim: &Kill, map_name: &str) -> Result<(), ControlError> {
        let level = u64::from(victim.level);
        let base = level * BASE_EXP_PER_LEVEL;
        let job = level * JOB_EXP_PER_LEVEL;
        let leveled = killer.gain_experience(base, job);
        info!("{} killed {} (+{} base / +{} job exp)", killer.name, victim.name, base, job);

        if leveled {
            let notice = packets::system_chat(&format!("Level up! You are now level {}.", killer.level), victim.at);
            if let Some(data) = killer.player() {
                data.connection.send(&notice)?;
            }
        }
        send_player_update(killer, map_name)
    }
}

fn send_player_update(entity: &Entity, map_name: &str) -> Result<(), ControlError> {
    let (Some(packet), Some(data)) = (packets::player_update(entity, map_name), entity.player()) else {
        return Ok(());
    };
    data.connection.send(&packet)?;
    Ok(())
}

/// Attack the target, chase it, follow someone or walk to a clicked point
fn act_on_intents(map: &mut WorldMap, gid: u64, now: u64) -> Result<(), ControlError> {
    let entity = map.get(gid).ok_or(ControlError::EntityMissing(gid))?;
    let (target, following, move_to, in_dialog) =
        (entity.target, entity.follow, entity.move_to, entity.is_in_dialog());

    if let Some(target) = target {
        let state = map.get(target).map(|t| (t.is_dead(), entity.in_melee_range(t)));
        match state {
            Some((false, true)) => {
                attack(map, gid, target, now);
            }
            Some((false, false)) => {
                if let Some(entity) = map.get_mut(gid) {
                    entity.follow = Some(target);
                }
                follow(map, gid, target, now);
            }
            _ => {
                if let Some(entity) = map.get_mut(gid) {
                    entity.target = None;
                    entity.follow = None;
                }
            }
        }
    } else if let Some(following) = following {
        follow(map, gid, following, now);
    } else if let Some((x, y)) = move_to {
        if !in_dialog && step_towards(map, gid, x, y, now) {
            if let Some(entity) = map.get_mut(gid) {
                entity.move_to = None;
            }
        }
    }
    Ok(())
}

fn regenerate(map: &mut WorldMap, gid: u64, now: u64) {
    let Some(entity) = map.get_mut(gid) else {
        return;
    };
    let due = entity.player_mut().is_some_and(|data| {
        let due = data.regen.is_expired(now);
        if due {
            data.regen.set(now + REGEN_INTERVAL_MS);
        }
        due
    });
    if due {
        entity.regenerate();
    }
}

/// Throttled snapshots and the heartbeat
fn send_updates(map: &mut WorldMap, gid: u64, now: u64) -> Result<(), ControlError> {
    let entity = map.get(gid).ok_or(ControlError::EntityMissing(gid))?;
    let data = entity.player().ok_or(ControlError::EntityMissing(gid))?;

    let map_due = data.map_update.is_expired(now);
    let player_due = data.player_update.is_expired(now);
    let ping_due = data.heartbeat.is_expired(now);

    if map_due {
        data.connection.send(&packets::map_update(map, Some(entity)))?;
    }
    if player_due {
        if let Some(packet) = packets::player_update(entity, &map.name) {
            data.connection.send(&packet)?;
        }
    }
    if ping_due {
        data.connection.send(&ServerPacket::Ping { timestamp: now })?;
    }

    let Some(data) = map.get_mut(gid).and_then(|e| e.player_mut()) else {
        return Ok(());
    };
    if map_due {
        data.map_update.set(now + MAP_UPDATE_INTERVAL_MS);
    }
    if player_due {
        data.player_update.set(now + PLAYER_UPDATE_INTERVAL_MS);
    }
    if ping_due {
        data.heartbeat.set(now + HEARTBEAT_INTERVAL_MS);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{tick, REVIVE_DELAY_MS};
    use crate::entities::tests::dummy;
    use crate::entities::SavePoint;
    use crate::network::{Connection, Outbound};
    use crate::persistence::PlayerRecord;
    use crate::world::definitions::MapDefinition;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (WorldMap, UnboundedReceiver<Outbound>) {
        let mut map = WorldMap::new(MapDefinition::empty(1, "field", 100.0, 100.0));
        let (connection, rx) = Connection::channel();
        let mut record = PlayerRecord::new_for_account(1, "Alice");
        record.x = 10.0;
        record.y = 10.0;
        map.add_entity(Entity::player_from_record(1, &record, connection));
        (map, rx)
    }

    fn packet_types(rx: &mut UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut types = Vec::new();
        while let Ok(outbound) = rx.try_recv() {
            if let Outbound::Text(text) = outbound {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                types.push(value["type"].as_str().unwrap().to_string());
            }
        }
        types
    }

    #[test]
    fn test_updates_are_throttled() {
        let (mut map, mut rx) = setup();
        let mut actions = Vec::new();

        tick(&mut map, 1, 1_000, &mut actions).unwrap();
        assert_eq!(packet_types(&mut rx), vec!["map", "player", "ping"]);

        tick(&mut map, 1, 1_050, &mut actions).unwrap();
        assert!(packet_types(&mut rx).is_empty());

        tick(&mut map, 1, 1_101, &mut actions).unwrap();
        assert_eq!(packet_types(&mut rx), vec!["map"]);
    }

    #[test]
    fn test_walks_to_clicked_point() {
        let (mut map, _rx) = setup();
        map.get_mut(1).unwrap().move_to = Some((12.0, 10.0));
        let mut actions = Vec::new();
        let mut now = 1_000;
        for _ in 0..5 {
            now += 1_000;
            tick(&mut map, 1, now, &mut actions).unwrap();
        }
        let player = map.get(1).unwrap();
        assert_eq!((player.x, player.y), (12.0, 10.0));
        assert_eq!(player.move_to, None);
    }

    #[test]
    fn test_dialog_blocks_walking() {
        let (mut map, _rx) = setup();
        {
            let player = map.get_mut(1).unwrap();
            player.move_to = Some((20.0, 10.0));
            player.player_mut().unwrap().dialog = Some(crate::entities::DialogState { npc: 5, page: 0 });
        }
        tick(&mut map, 1, 5_000, &mut Vec::new()).unwrap();
        assert_eq!(map.get(1).unwrap().x, 10.0);
    }

    #[test]
    fn test_kill_rewards_experience() {
        let (mut map, _rx) = setup();
        let mut monster = dummy(2, 11.0, 10.0);
        monster.hp = 1;
        monster.level = 3;
        map.add_entity(monster);
        map.get_mut(1).unwrap().target = Some(2);

        tick(&mut map, 1, 1_000, &mut Vec::new()).unwrap();
        assert!(map.get(2).unwrap().is_dead());
        let player = map.get(1).unwrap();
        assert_eq!((player.base_exp, player.job_exp), (30, 15));

        // Dead target is dropped on the next tick
        tick(&mut map, 1, 5_000, &mut Vec::new()).unwrap();
        assert_eq!(map.get(1).unwrap().target, None);
    }

    #[test]
    fn test_revive_returns_to_save_point() {
        let (mut map, _rx) = setup();
        map.get_mut(1).unwrap().player_mut().unwrap().save_point =
            Some(SavePoint { map: "town".into(), x: 3.0, y: 4.0 });
        crate::control::die(&mut map, 1, None, 1_000);

        let mut actions = Vec::new();
        tick(&mut map, 1, 1_000 + REVIVE_DELAY_MS, &mut actions).unwrap();
        assert!(!map.get(1).unwrap().is_dead());
        assert_eq!(actions, vec![WorldAction::Transfer { gid: 1, map: "town".into(), x: 3.0, y: 4.0 }]);
    }
}
