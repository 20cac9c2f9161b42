//! Inbound packet dispatch.
//!
//! Every text frame from a client lands here between ticks. Parse errors and
//! unknown packet types are logged and dropped; the connection stays open.

use log::{debug, info, warn};
use realm_shared::{ChatChannel, ClientPacket, DialogAction, EntityKind, MoveCode, ServerPacket};

use crate::commands;
use crate::control::{self, NpcControl};
use crate::packets;
use crate::world::World;

/// Entities this close to a click count as clicked on
pub const CLICK_RADIUS: f32 = 1.0;

/// Longest chat line relayed to other players
pub const MAX_CHAT_LENGTH: usize = 256;

/// Handle one text frame from `gid`
pub fn handle_message(world: &mut World, gid: u64, text: &str, now: u64) {
    let packet = match ClientPacket::from_json(text) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("Ignoring malformed packet from {}: {}", gid, e);
            return;
        }
    };

    // Sessions that are shutting down or were replaced take no more input
    let alive = world
        .entity(gid)
        .and_then(|e| e.player())
        .is_some_and(|data| !data.closing);
    if !alive {
        debug!("Dropping packet for inactive session {}", gid);
        return;
    }

    match packet {
        ClientPacket::Move { code } => handle_move(world, gid, &code, now),
        ClientPacket::Chat { channel, to, message } => handle_chat(world, gid, channel, to, &message, now),
        ClientPacket::Click { x, y } => handle_click(world, gid, x, y),
        ClientPacket::Dialog { action, gid: npc } => handle_dialog(world, gid, action, npc),
        ClientPacket::Ping { timestamp } => world.send_to(gid, &ServerPacket::Pong { timestamp }),
        ClientPacket::Pong { timestamp } => {
            if let Some(data) = world.entity_mut(gid).and_then(|e| e.player_mut()) {
                data.latency = Some(now.saturating_sub(timestamp));
            }
        }
        ClientPacket::Logout => {
            info!("Player {} logged out", gid);
            world.logout(gid);
        }
    }
}

/// Step once; any walking or chasing is cancelled
fn handle_move(world: &mut World, gid: u64, code: &MoveCode, now: u64) {
    let Some(direction) = code.direction() else {
        debug!("Unknown move code {:?} from {}", code, gid);
        return;
    };
    let Some(index) = world.locate(gid) else {
        return;
    };
    let Some(map) = world.map_mut(index) else {
        return;
    };
    let Some(player) = map.get_mut(gid) else {
        return;
    };
    player.clear_intents();
    if player.is_in_dialog() {
        return;
    }
    control::move_entity(map, gid, direction, now);
}

/// NPC under the cursor opens its dialog (or walks there when out of reach),
/// a monster becomes the target, a player is followed, and anything else is
/// a point to walk to.
fn handle_click(world: &mut World, gid: u64, x: f32, y: f32) {
    let Some(index) = world.locate(gid) else {
        return;
    };
    let Some(map) = world.map_mut(index) else {
        return;
    };
    if !map.get(gid).is_some_and(|p| !p.is_dead()) {
        return;
    }

    let clicked: Vec<(u64, EntityKind, f32, f32)> = map
        .find_entities_in_radius(x, y, CLICK_RADIUS)
        .into_iter()
        .filter(|e| e.gid != gid && e.visible && !e.is_dead())
        .map(|e| (e.gid, e.kind(), e.x, e.y))
        .collect();
    let pick = |kind: EntityKind| clicked.iter().find(|c| c.1 == kind).copied();

    if let Some((npc, _, nx, ny)) = pick(EntityKind::Npc) {
        match NpcControl::on_touch(map, npc, gid) {
            Ok(true) => {}
            Ok(false) => {
                if let Some(player) = map.get_mut(gid) {
                    player.clear_intents();
                    player.move_to = Some((nx, ny));
                }
            }
            Err(e) => warn!("Failed to open dialog of {} for {}: {}", npc, gid, e),
        }
        return;
    }

    let Some(player) = map.get_mut(gid) else {
        return;
    };
    if player.is_in_dialog() {
        return;
    }
    player.clear_intents();
    if let Some((monster, ..)) = pick(EntityKind::Monster) {
        player.target = Some(monster);
        player.follow = Some(monster);
    } else if let Some((other, ..)) = pick(EntityKind::Player) {
        player.follow = Some(other);
    } else {
        player.move_to = Some((x, y));
    }
}

fn handle_dialog(world: &mut World, gid: u64, action: DialogAction, npc: u64) {
    let Some(index) = world.locate(gid) else {
        return;
    };
    let Some(map) = world.map_mut(index) else {
        return;
    };
    let result = match action {
        DialogAction::Open => NpcControl::on_touch(map, npc, gid).map(|_| ()),
        DialogAction::Next => NpcControl::next_page(map, npc, gid),
        DialogAction::Close => {
            NpcControl::on_close_dialog(map, npc, gid);
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!("Dialog {:?} with {} failed for {}: {}", action, npc, gid, e);
    }
}

fn handle_chat(world: &mut World, gid: u64, channel: ChatChannel, to: Option<String>, message: &str, now: u64) {
    let message = message.trim();
    if message.is_empty() {
        return;
    }

    if let Some(result) = commands::parse_and_execute(message, gid, world, now) {
        if !result.success {
            debug!("Command '{}' from {} failed: {}", message, gid, result.message);
        }
        world.send_to(gid, &packets::system_chat(&result.message, now));
        return;
    }

    let Some(from) = world.entity(gid).map(|e| e.name.clone()) else {
        return;
    };
    let message: String = message.chars().take(MAX_CHAT_LENGTH).collect();

    match channel {
        ChatChannel::Global => {
            world.broadcast(&packets::chat(ChatChannel::Global, &from, None, &message, now));
        }
        ChatChannel::Map => {
            if let Some(index) = world.locate(gid) {
                world.broadcast_map(index, &packets::chat(ChatChannel::Map, &from, None, &message, now));
            }
        }
        ChatChannel::Private => {
            let Some(to) = to.filter(|to| !to.is_empty()) else {
                world.send_to(gid, &packets::system_chat("Private messages need a recipient.", now));
                return;
            };
            let Some(recipient) = world.find_player(&to).map(|p| p.gid) else {
                let notice = format!("{} is not online.", to);
                world.send_to(gid, &packets::system_chat(&notice, now));
                return;
            };
            let packet = packets::chat(ChatChannel::Private, &from, Some(to.as_str()), &message, now);
            world.send_to(recipient, &packet);
            if recipient != gid {
                world.send_to(gid, &packet);
            }
        }
        ChatChannel::System => {
            warn!("Player {} tried to send on the system channel", gid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Outbound;
    use crate::world::tests::{drain, join, test_world};
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn packets_of(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Value> {
        drain(rx)
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Text(text) => serde_json::from_str(&text).ok(),
                Outbound::Close { .. } => None,
            })
            .collect()
    }

    fn chats(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Value> {
        packets_of(rx).into_iter().filter(|p| p["type"] == "chat").collect()
    }

    #[test]
    fn test_malformed_packet_is_ignored() {
        let (mut world, _store) = test_world();
        let (gid, mut rx) = join(&mut world, 1, "Alice");
        drain(&mut rx);

        handle_message(&mut world, gid, "not json", 2_000);
        handle_message(&mut world, gid, r#"{"type":"teleport","x":1}"#, 2_000);
        assert!(drain(&mut rx).is_empty());
        assert!(world.entity(gid).is_some());
    }

    #[test]
    fn test_ping_is_answered() {
        let (mut world, _store) = test_world();
        let (gid, mut rx) = join(&mut world, 1, "Alice");
        drain(&mut rx);

        handle_message(&mut world, gid, r#"{"type":"ping","timestamp":77}"#, 2_000);
        let replies = packets_of(&mut rx);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["type"], "pong");
        assert_eq!(replies[0]["timestamp"], 77);
    }

    #[test]
    fn test_pong_records_latency() {
        let (mut world, _store) = test_world();
        let (gid, _rx) = join(&mut world, 1, "Alice");
        handle_message(&mut world, gid, r#"{"type":"pong","timestamp":1900}"#, 2_000);
        assert_eq!(world.entity(gid).unwrap().player().unwrap().latency, Some(100));
    }

    #[test]
    fn test_move_steps_and_cancels_walking() {
        let (mut world, _store) = test_world();
        let (gid, _rx) = join(&mut world, 1, "Alice");
        world.entity_mut(gid).unwrap().move_to = Some((90.0, 90.0));

        handle_message(&mut world, gid, r#"{"type":"move","code":"ArrowLeft"}"#, 2_000);
        let player = world.entity(gid).unwrap();
        assert_eq!((player.x, player.y), (49.0, 50.0));
        assert_eq!(player.move_to, None);

        // Still on cooldown
        handle_message(&mut world, gid, r#"{"type":"move","code":37}"#, 2_001);
        assert_eq!(world.entity(gid).unwrap().x, 49.0);
    }

    #[test]
    fn test_click_on_ground_walks_there() {
        let (mut world, _store) = test_world();
        let (gid, _rx) = join(&mut world, 1, "Alice");
        handle_message(&mut world, gid, r#"{"type":"click","x":70,"y":80}"#, 2_000);
        assert_eq!(world.entity(gid).unwrap().move_to, Some((70.0, 80.0)));
    }

    #[test]
    fn test_click_on_npc_opens_dialog() {
        let (mut world, _store) = test_world();
        let (gid, mut rx) = join(&mut world, 1, "Alice");
        drain(&mut rx);
        // The guide stands at (50, 45); the player starts at (50, 50)
        handle_message(&mut world, gid, r#"{"type":"click","x":50,"y":45}"#, 2_000);

        let dialogs: Vec<Value> = packets_of(&mut rx).into_iter().filter(|p| p["type"] == "npc-dialog").collect();
        assert_eq!(dialogs.len(), 1);
        assert_eq!(dialogs[0]["dialog"], "Welcome, traveller!");
        assert!(world.entity(gid).unwrap().is_in_dialog());

        // Movement is blocked while talking
        handle_message(&mut world, gid, r#"{"type":"move","code":"ArrowDown"}"#, 3_000);
        assert_eq!(world.entity(gid).unwrap().y, 50.0);

        let npc = dialogs[0]["gid"].as_u64().unwrap();
        let close = format!(r#"{{"type":"dialog","action":"close","gid":{}}}"#, npc);
        handle_message(&mut world, gid, &close, 3_000);
        assert!(!world.entity(gid).unwrap().is_in_dialog());
    }

    #[test]
    fn test_global_and_private_chat() {
        let (mut world, _store) = test_world();
        let (alice, mut alice_rx) = join(&mut world, 1, "Alice");
        let (_bob, mut bob_rx) = join(&mut world, 2, "Bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        handle_message(&mut world, alice, r#"{"type":"chat","channel":"global","message":"hi all"}"#, 2_000);
        let received = chats(&mut bob_rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["from"], "Alice");
        assert_eq!(received[0]["message"], "hi all");
        assert_eq!(chats(&mut alice_rx).len(), 1);

        handle_message(&mut world, alice, r#"{"type":"chat","channel":"private","to":"Bob","message":"psst"}"#, 2_000);
        let received = chats(&mut bob_rx);
        assert_eq!(received[0]["channel"], "private");
        assert_eq!(received[0]["to"], "Bob");

        handle_message(&mut world, alice, r#"{"type":"chat","channel":"private","to":"Carol","message":"?"}"#, 2_000);
        let notice = chats(&mut alice_rx).into_iter().last().unwrap();
        assert_eq!(notice["channel"], "system");
        assert_eq!(notice["message"], "Carol is not online.");
        assert!(chats(&mut bob_rx).is_empty());
    }

    #[test]
    fn test_map_chat_stays_on_map() {
        let (mut world, _store) = test_world();
        let (alice, _alice_rx) = join(&mut world, 1, "Alice");
        let (bob, mut bob_rx) = join(&mut world, 2, "Bob");
        world.join_map(bob, "field", -1.0, -1.0).unwrap();
        drain(&mut bob_rx);

        handle_message(&mut world, alice, r#"{"type":"chat","channel":"map","message":"town only"}"#, 2_000);
        assert!(chats(&mut bob_rx).is_empty());
    }

    #[test]
    fn test_system_channel_is_rejected() {
        let (mut world, _store) = test_world();
        let (alice, _alice_rx) = join(&mut world, 1, "Alice");
        let (_bob, mut bob_rx) = join(&mut world, 2, "Bob");
        drain(&mut bob_rx);

        handle_message(&mut world, alice, r#"{"type":"chat","channel":"system","message":"fake"}"#, 2_000);
        assert!(chats(&mut bob_rx).is_empty());
    }

    #[test]
    fn test_logout_closes_and_removes() {
        let (mut world, _store) = test_world();
        let (gid, mut rx) = join(&mut world, 1, "Alice");
        drain(&mut rx);

        handle_message(&mut world, gid, r#"{"type":"logout"}"#, 2_000);
        assert!(world.entity(gid).is_none());
        assert_eq!(world.session_count(), 0);
        let closed = drain(&mut rx)
            .into_iter()
            .any(|i| matches!(i, Outbound::Close { code: crate::network::CLOSE_NORMAL, .. }));
        assert!(closed);
    }
}
