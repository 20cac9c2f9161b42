//! Dialog NPCs.

use log::debug;
use realm_shared::EntityKind;

use super::{ControlError, Controller, WorldAction};
use crate::entities::DialogState;
use crate::packets;
use crate::world::WorldMap;

/// Players must stand this close to start talking
pub const TALK_RANGE: f32 = 5.0;

pub struct NpcControl;

impl Controller for NpcControl {
    fn takes_damage(&self) -> bool {
        false
    }

    fn on_tick(
        &self,
        _map: &mut WorldMap,
        _gid: u64,
        _now: u64,
        _actions: &mut Vec<WorldAction>,
    ) -> Result<(), ControlError> {
        Ok(())
    }
}

impl NpcControl {
    /// Open the dialog of `npc_gid` for a player and send the first page.
    /// Returns false if the NPC is missing or out of reach.
    pub fn on_touch(map: &mut WorldMap, npc_gid: u64, player_gid: u64) -> Result<bool, ControlError> {
        let Some(npc) = map.get(npc_gid) else {
            return Ok(false);
        };
        let Some(player) = map.get(player_gid) else {
            return Ok(false);
        };
        if npc.kind() != EntityKind::Npc {
            return Ok(false);
        }
        if player.is_dead() || player.distance_to(npc.x, npc.y) > TALK_RANGE {
            debug!("{} is too far from {} to talk", player.name, npc.name);
            return Ok(false);
        }
        let page = npc.dialog_page(0).map(str::to_string);

        let Some(player) = map.get_mut(player_gid) else {
            return Ok(false);
        };
        player.move_to = None;
        player.follow = None;
        let Some(data) = player.player_mut() else {
            return Ok(false);
        };
        // Nothing to say: tell the client to close right away
        data.dialog = page.as_ref().map(|_| DialogState { npc: npc_gid, page: 0 });
        data.connection.send(&packets::npc_dialog(npc_gid, page.as_deref()))?;
        Ok(true)
    }

    /// Advance to the next page; past the last page the dialog closes
    pub fn next_page(map: &mut WorldMap, npc_gid: u64, player_gid: u64) -> Result<(), ControlError> {
        let Some(state) = map.get(player_gid).and_then(|p| p.player()).and_then(|p| p.dialog) else {
            return Ok(());
        };
        if state.npc != npc_gid {
            return Ok(());
        }

        let page = state.page + 1;
        let text = map.get(npc_gid).and_then(|npc| npc.dialog_page(page)).map(str::to_string);

        let Some(data) = map.get_mut(player_gid).and_then(|p| p.player_mut()) else {
            return Ok(());
        };
        data.dialog = text.as_ref().map(|_| DialogState { npc: npc_gid, page });
        data.connection.send(&packets::npc_dialog(npc_gid, text.as_deref()))?;
        Ok(())
    }

    /// Client closed the dialog window
    pub fn on_close_dialog(map: &mut WorldMap, npc_gid: u64, player_gid: u64) {
        if let Some(data) = map.get_mut(player_gid).and_then(|p| p.player_mut()) {
            if data.dialog.is_some_and(|d| d.npc == npc_gid) {
                data.dialog = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Entity;
    use crate::network::{Connection, Outbound};
    use crate::persistence::PlayerRecord;
    use crate::world::definitions::MapDefinition;
    use realm_shared::ServerPacket;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup(player_x: f32) -> (WorldMap, UnboundedReceiver<Outbound>) {
        let mut map = WorldMap::new(MapDefinition::empty(1, "town", 50.0, 50.0));
        let pages = vec!["Hello".to_string(), "Goodbye".to_string()];
        map.add_entity(Entity::npc(1, "Guide", 10.0, 10.0, pages));

        let (connection, rx) = Connection::channel();
        let mut record = PlayerRecord::new_for_account(1, "Alice");
        record.x = player_x;
        record.y = 10.0;
        map.add_entity(Entity::player_from_record(2, &record, connection));
        (map, rx)
    }

    fn next_dialog(rx: &mut UnboundedReceiver<Outbound>) -> Option<String> {
        match rx.try_recv().unwrap() {
            Outbound::Text(text) => match serde_json::from_str(&text).unwrap() {
                ServerPacket::NpcDialog { dialog, .. } => dialog,
                other => panic!("unexpected packet {:?}", other),
            },
            other => panic!("unexpected outbound {:?}", other),
        }
    }

    #[test]
    fn test_pages_then_close() {
        let (mut map, mut rx) = setup(11.0);

        assert!(NpcControl::on_touch(&mut map, 1, 2).unwrap());
        assert_eq!(next_dialog(&mut rx).as_deref(), Some("Hello"));
        assert!(map.get(2).unwrap().is_in_dialog());

        NpcControl::next_page(&mut map, 1, 2).unwrap();
        assert_eq!(next_dialog(&mut rx).as_deref(), Some("Goodbye"));

        NpcControl::next_page(&mut map, 1, 2).unwrap();
        assert_eq!(next_dialog(&mut rx), None);
        assert!(!map.get(2).unwrap().is_in_dialog());
    }

    #[test]
    fn test_too_far_to_talk() {
        let (mut map, mut rx) = setup(30.0);
        assert!(!NpcControl::on_touch(&mut map, 1, 2).unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_dialog_unblocks() {
        let (mut map, _rx) = setup(11.0);
        NpcControl::on_touch(&mut map, 1, 2).unwrap();
        NpcControl::on_close_dialog(&mut map, 1, 2);
        assert!(!map.get(2).unwrap().is_in_dialog());
    }
}
